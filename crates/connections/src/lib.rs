//! The connection manager: a distributed switchboard for live sockets.
//!
//! Each server instance tracks its own sockets in process memory and mirrors
//! lightweight connection records into the shared cache; envelopes travel
//! between instances over pub/sub channels, so any instance can deliver to
//! any connection in the cluster.

pub mod manager;

pub use manager::{ConnKind, ConnectionManager, ConnectionMeta};
