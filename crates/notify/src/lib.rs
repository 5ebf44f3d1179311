//! Agent notifications: a durable store plus best-effort live push.
//!
//! The row is the source of truth (unread counts survive restarts); the live
//! push is a wake-up through the connection manager and may be lost freely.

pub mod dispatcher;
pub mod store;

pub use {
    dispatcher::NotificationDispatcher,
    store::{Notification, NotificationStore},
};
