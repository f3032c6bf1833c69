use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An internal contract was broken. The estimator state can no longer be
    /// trusted and the caller should not keep feeding it.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error(transparent)]
    Codec(#[from] serde_json::Error),
}

impl SignalError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, SignalError::InvariantViolation(_))
    }
}
