//! Error types for transaction construction

use thiserror::Error;

/// Errors raised while selecting funds, assembling or signing a transaction
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed, zero, negative or non-numeric decimal amount
    #[error("Invalid amount '{value}': {reason}")]
    InvalidAmount { value: String, reason: String },

    /// Candidate inputs cannot fund outputs plus fee
    #[error("Insufficient balance on {protocol} for {token}: required {required}, available {available}")]
    InsufficientBalance {
        protocol: String,
        token: String,
        required: u128,
        available: u128,
    },

    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    /// Mutually exclusive request fields supplied together
    #[error("Invalid parameter combination: {0}")]
    InvalidParameterCombination(String),

    /// Missing or malformed mandatory field
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter { parameter: String, reason: String },

    /// Attached data payload has the wrong type or exceeds the size ceiling
    #[error("Data payload error: {0}")]
    DataPayload(String),

    /// Self-check after signing failed. Never retried.
    #[error("Signature verification failed on {protocol}: {reason}")]
    SignatureVerification { protocol: String, reason: String },

    /// Fee oracle, indexer or mining service unreachable or returned an error
    #[error("External service '{service}' failed: {reason}")]
    ExternalService { service: String, reason: String },

    #[error("Mining job {job_id} not done after {attempts} attempts")]
    MiningTimeout { job_id: String, attempts: u32 },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    pub(crate) fn invalid_parameter(parameter: &str, reason: impl Into<String>) -> Self {
        Error::InvalidParameter {
            parameter: parameter.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn external(service: &str, reason: impl ToString) -> Self {
        Error::ExternalService {
            service: service.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn verification(protocol: impl ToString, reason: impl ToString) -> Self {
        Error::SignatureVerification {
            protocol: protocol.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether a caller may retry the same request unchanged.
    ///
    /// Only collaborator outages qualify; validation failures and the mining
    /// timeout need a changed request or fresh inputs.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ExternalService { .. })
    }
}

/// Result type for transaction construction
pub type Result<T> = std::result::Result<T, Error>;
