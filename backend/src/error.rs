use crate::models::ErrorResponse;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    #[error("child {child} exceeded {limit} restarts within {window:?}")]
    SupervisionExhausted {
        child: String,
        limit: usize,
        window: Duration,
    },
    #[error("keyword must not be blank")]
    InvalidKeyword,
    #[error("session {0} has no running coordinator")]
    SessionUnavailable(String),
}

impl From<reqwest::Error> for CacheError {
    fn from(err: reqwest::Error) -> Self {
        CacheError::Transport(err.to_string())
    }
}

impl From<url::ParseError> for CacheError {
    fn from(err: url::ParseError) -> Self {
        CacheError::Transport(format!("invalid provider url: {err}"))
    }
}

pub type CacheResult<T> = Result<T, CacheError>;

impl From<CacheError> for ErrorResponse {
    fn from(err: CacheError) -> Self {
        let (error, status) = match &err {
            CacheError::Transport(_) => ("transport", 502),
            CacheError::Timeout(_) => ("timeout", 504),
            CacheError::SupervisionExhausted { .. } => ("supervision_exhausted", 503),
            CacheError::InvalidKeyword => ("invalid_keyword", 400),
            CacheError::SessionUnavailable(_) => ("session_unavailable", 503),
        };
        ErrorResponse {
            error: error.to_string(),
            message: err.to_string(),
            status,
        }
    }
}
