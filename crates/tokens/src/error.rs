use thiserror::Error;

use meshdesk_common::ErrorKind;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("malformed token")]
    Malformed,

    #[error("invalid token signature")]
    InvalidSignature,

    #[error("token expired")]
    Expired,

    #[error("scope denied: {0}")]
    ScopeDenied(&'static str),
}

impl From<Error> for meshdesk_common::Error {
    fn from(e: Error) -> Self {
        let kind = match e {
            Error::Expired => ErrorKind::Expired,
            Error::ScopeDenied(_) => ErrorKind::Forbidden,
            Error::Malformed | Error::InvalidSignature => ErrorKind::Unauthenticated,
        };
        Self::new(kind, e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
