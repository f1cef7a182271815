//! Error types and handling for the load balancer
//!
//! Every failure a poll cycle can hit maps onto one of these variants. None of
//! them is fatal to the process: the run loop logs the error, keeps the last
//! published snapshot and tries again on the next tick.

use thiserror::Error;

/// Result type alias for load balancer operations
pub type Result<T> = std::result::Result<T, BalancerError>;

/// Main error type for the load balancer
#[derive(Debug, Error)]
pub enum BalancerError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Validation errors (configuration fields and operator input)
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// A required sensor is missing or its value cannot be used
    #[error("Sensor error: {message}")]
    Sensor { message: String },

    /// An actuator command was rejected by the host
    #[error("Actuation error: {message}")]
    Actuation { message: String },

    /// A bounded wait elapsed without confirmation
    #[error("Timeout error: {message}")]
    Timeout { message: String },

    /// Another control cycle currently owns the outputs
    #[error("Busy: {message}")]
    Busy { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// HTTP server errors
    #[error("Web server error: {message}")]
    Web { message: String },

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

impl BalancerError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        BalancerError::Config {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<F: Into<String>, S: Into<String>>(field: F, message: S) -> Self {
        BalancerError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new sensor error
    pub fn sensor<S: Into<String>>(message: S) -> Self {
        BalancerError::Sensor {
            message: message.into(),
        }
    }

    /// Create a new actuation error
    pub fn actuation<S: Into<String>>(message: S) -> Self {
        BalancerError::Actuation {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        BalancerError::Timeout {
            message: message.into(),
        }
    }

    /// Create a new busy error
    pub fn busy<S: Into<String>>(message: S) -> Self {
        BalancerError::Busy {
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        BalancerError::Io {
            message: message.into(),
        }
    }

    /// Create a new web error
    pub fn web<S: Into<String>>(message: S) -> Self {
        BalancerError::Web {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        BalancerError::Generic {
            message: message.into(),
        }
    }

    /// Whether the failure is expected to clear on its own by re-polling
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BalancerError::Sensor { .. }
                | BalancerError::Actuation { .. }
                | BalancerError::Timeout { .. }
                | BalancerError::Busy { .. }
        )
    }
}

impl From<std::io::Error> for BalancerError {
    fn from(err: std::io::Error) -> Self {
        BalancerError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for BalancerError {
    fn from(err: serde_yaml::Error) -> Self {
        BalancerError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for BalancerError {
    fn from(err: serde_json::Error) -> Self {
        BalancerError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<chrono::ParseError> for BalancerError {
    fn from(err: chrono::ParseError) -> Self {
        BalancerError::validation("time", err.to_string())
    }
}
