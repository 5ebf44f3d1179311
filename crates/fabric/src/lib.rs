//! Distributed coordination fabric: pub/sub channels plus a TTL'd key-value
//! cache.
//!
//! The connection manager is written against the [`PubSub`] and [`Cache`]
//! traits; deployments pick a backend. [`memory`] serves single-node runs and
//! tests (a shared hub behaves like a tiny cluster), [`redis_backend`] serves
//! multi-server deployments.

pub mod error;
pub mod memory;
pub mod pubsub;
pub mod redis_backend;

pub use {
    error::{Error, Result},
    memory::{MemoryCache, MemoryHub},
    pubsub::{Cache, PubSub, PubSubMessage},
    redis_backend::{RedisCache, RedisPubSub},
};
