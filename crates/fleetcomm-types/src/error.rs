//! Shared error types for the fleetcomm system.

use thiserror::Error;

/// Top-level error type for the fleetcomm system.
#[derive(Error, Debug)]
pub enum FleetError {
    /// A configuration value was malformed or could not be persisted.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An endpoint string could not be parsed.
    #[error("Malformed endpoint '{endpoint}': {reason}")]
    MalformedEndpoint {
        /// The offending endpoint string.
        endpoint: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Starting or stopping the communications services failed.
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// The transport container reported a failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The agent directory could not be consulted.
    #[error("Agent directory error: {0}")]
    Directory(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid caller input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Alias for Result with FleetError.
pub type FleetResult<T> = Result<T, FleetError>;

impl FleetError {
    /// Whether this error is one the caller is expected to see (configuration
    /// or lifecycle) rather than one converted at a component boundary.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FleetError::Config(_) | FleetError::MalformedEndpoint { .. } | FleetError::Lifecycle(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_endpoint_display() {
        let err = FleetError::MalformedEndpoint {
            endpoint: "socket://".to_string(),
            reason: "missing host".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Malformed endpoint 'socket://': missing host"
        );
    }

    #[test]
    fn test_fatal_classification() {
        assert!(FleetError::Config("x".into()).is_fatal());
        assert!(FleetError::Lifecycle("x".into()).is_fatal());
        assert!(!FleetError::Directory("x".into()).is_fatal());
        assert!(!FleetError::Transport("x".into()).is_fatal());
    }
}
