//! Boundary to the external text-completion service.
//!
//! Classification and generation both go through `Oracle::ask`; every
//! interpretation of the returned free text happens in `answer::parse_answer`.

pub mod answer;
pub mod mock;
pub mod ollama;

pub use answer::*;
pub use mock::*;
pub use ollama::*;

use async_trait::async_trait;
use thiserror::Error;

use crate::pipeline::retry::RateLimitSignal;

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("Oracle is not reachable at {0}")]
    Connection(String),

    #[error("Oracle returned error (status {status}): {body}")]
    Status { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),

    #[error("Oracle failure: {0}")]
    Other(String),
}

impl RateLimitSignal for OracleError {
    fn status_code(&self) -> Option<u16> {
        match self {
            OracleError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// External completion service: system prompt + user prompt in, free text out.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn ask(&self, system: &str, user: &str) -> Result<String, OracleError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::retry::is_rate_limited;

    #[test]
    fn status_429_is_rate_limited() {
        let err = OracleError::Status {
            status: 429,
            body: "slow down".into(),
        };
        assert!(is_rate_limited(&err));
    }

    #[test]
    fn throttle_text_is_rate_limited() {
        let err = OracleError::Other("Rate limit reached, try again in 3s".into());
        assert!(is_rate_limited(&err));
    }

    #[test]
    fn connection_error_is_fatal() {
        assert!(!is_rate_limited(&OracleError::Connection(
            "http://localhost:11434".into()
        )));
    }

    #[test]
    fn oracle_is_object_safe() {
        fn _assert(_: &dyn Oracle) {}
    }
}
