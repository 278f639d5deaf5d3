//! Error types for the PayCentral environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// A required environment variable is not set
    #[error("Environment variable not set: {0}")]
    MissingVariable(String),
    
    /// Secret material could not be decoded or is too short
    #[error("Invalid signing secret: {0}")]
    InvalidSecret(String),
    
    /// A mandate identifier could not be parsed
    #[error("Invalid mandate id: {0}")]
    InvalidMandateId(String),
}

impl EnvError {
    /// Creates an invalid secret error.
    pub fn invalid_secret(msg: impl Into<String>) -> Self {
        Self::InvalidSecret(msg.into())
    }
}
