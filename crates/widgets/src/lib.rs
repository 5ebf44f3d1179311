//! Embeddable chat widgets: configuration store and domain verification.
//!
//! A widget only initiates sessions from a domain its tenant has proven
//! control over, so the store and the validator are one crate; widget reads
//! on the public path always join against verified domains.

pub mod domains;
pub mod store;
pub mod types;

pub use {
    domains::{DomainValidator, VerifiedDomain},
    store::WidgetStore,
    types::{BubbleStyle, ChatWidget, NewWidget, UpdateWidget, WidgetPosition, WidgetShape, WidgetSize},
};
