//! Chat session engine: the authoritative state machine for a conversation.
//!
//! Sessions pair with a ticket at creation; every chat message is mirrored
//! into the ticket timeline inside the same transaction, so the durable
//! history survives whatever happens to live delivery.

pub mod engine;
pub mod store;
pub mod sweeper;
pub mod types;

pub use {
    engine::{InitiateResult, NoopBroadcast, SessionBroadcast, SessionEngine, VisitorInfo},
    store::{AppendMessage, Appended, SYSTEM_AI_AUTHOR, SessionStore},
    sweeper::InactivitySweeper,
    types::{
        AuthorType, ChatMessage, ChatSession, Customer, MessageType, SessionStatus, Ticket,
        TicketAuthorType, TicketMessage, TicketPriority, TicketStatus,
    },
};
