use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Redis(#[from] redis::RedisError),

    #[error("pub/sub stream closed")]
    Closed,

    #[error("{0}")]
    Message(String),
}

impl From<Error> for meshdesk_common::Error {
    fn from(e: Error) -> Self {
        Self::unavailable(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
