//! Kernel-specific error types.

use fleetcomm_types::FleetError;
use std::path::PathBuf;
use thiserror::Error;

/// Kernel error type wrapping FleetError with kernel-specific context.
#[derive(Error, Debug)]
pub enum KernelError {
    /// A wrapped FleetError.
    #[error(transparent)]
    Fleet(#[from] FleetError),

    /// The configuration file does not exist.
    #[error("Cannot find configuration file: {0}")]
    ConfigFileNotFound(PathBuf),

    /// The configuration file could not be imported; prior preferences were restored.
    #[error("Failed to import configuration file {path}: {reason}")]
    ConfigImport { path: PathBuf, reason: String },

    /// A server property could not be written.
    #[error("Failed to save server property [{name}={value}] to {path}: {reason}")]
    PropertyPersist {
        name: String,
        value: String,
        path: PathBuf,
        reason: String,
    },

    /// The transport container failed to start.
    #[error("Communications services failed to start: {0}")]
    StartFailed(String),
}

/// Alias for kernel results.
pub type KernelResult<T> = Result<T, KernelError>;
