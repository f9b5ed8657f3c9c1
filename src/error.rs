use thiserror::Error;

/// Error taxonomy surfaced by the queue manager.
///
/// Every variant is a stable tag; the HTTP layer maps tags to status
/// codes and nothing in the core compares error strings.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("malformed identifier: {0}")]
    MalformedId(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("document size {0} bytes exceeds the 16 MiB limit")]
    DocTooLarge(usize),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("timed out: {0}")]
    Timeout(String),
}

impl QueueError {
    pub fn not_found(what: impl Into<String>) -> Self {
        QueueError::NotFound(what.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        QueueError::BadRequest(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        QueueError::Conflict(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        QueueError::Persistence(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
