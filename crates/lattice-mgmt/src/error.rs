//! Error types for the lattice-mgmt crate

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BeanError {
    #[error("invalid bean name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("bean not registered: {0}")]
    NotRegistered(String),

    #[error("bean already registered: {0}")]
    AlreadyRegistered(String),

    #[error("attribute not found: {bean} has no attribute '{attribute}'")]
    AttributeNotFound { bean: String, attribute: String },

    #[error("attribute '{attribute}' of {bean} is read-only")]
    AttributeReadOnly { bean: String, attribute: String },

    #[error("operation not found: {bean} has no operation '{operation}'")]
    OperationNotFound { bean: String, operation: String },

    #[error("invalid argument for {operation}: {reason}")]
    InvalidArgument { operation: String, reason: String },

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("bean error: {0}")]
    Other(String),
}

impl BeanError {
    /// Shorthand for an invalid-name error.
    pub fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        BeanError::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
