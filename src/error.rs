//! Error types for the trading engine

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the trading engine
///
/// Signal rejections and breaker trips are not errors; they travel as
/// `WaitReason`, `RejectReason` and `RiskBlock` values instead.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Data collaborator errors
    #[error("Feed error: {0}")]
    Feed(String),

    #[error("Feed timeout after {0}ms")]
    FeedTimeout(u64),

    #[error("All quote sources failed: {0}")]
    AllSourcesFailed(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Decode error: {0}")]
    Decode(String),

    // Broker errors
    #[error("Position already open: {side} {qty}")]
    PositionAlreadyOpen { side: String, qty: f64 },

    #[error("No open position")]
    NoOpenPosition,

    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    // Invariant violations (hard reject of a single decision)
    #[error("Invariant violated: {0}")]
    Invariant(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Feed(_) | Error::FeedTimeout(_) | Error::AllSourcesFailed(_) | Error::Http(_)
        )
    }

    /// Check if this error must only reject the current decision
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Error::Invariant(_)
                | Error::InvalidOrder(_)
                | Error::PositionAlreadyOpen { .. }
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::FeedTimeout(0)
        } else if e.is_decode() {
            Error::Decode(e.to_string())
        } else {
            Error::Http(e.to_string())
        }
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::FeedTimeout(2500).is_retryable());
        assert!(Error::Http("503".into()).is_retryable());
        assert!(!Error::Invariant("missing tp".into()).is_retryable());
    }

    #[test]
    fn test_invariant_classification() {
        assert!(Error::Invariant("missing tp".into()).is_invariant_violation());
        let open = Error::PositionAlreadyOpen { side: "long".into(), qty: 1.0 };
        assert!(open.is_invariant_violation());
        assert!(!Error::NoOpenPosition.is_invariant_violation());
    }
}
