//! Platform-specific errors

use focusdns_core::TunnelError;
use std::io;
use thiserror::Error;

/// Platform-specific errors
#[derive(Error, Debug)]
pub enum PlatformError {
    /// Virtual interface could not be created
    #[error("Device creation failed: {0}")]
    DeviceCreate(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// External command could not be started
    #[error("Failed to run '{program}': {source}")]
    CommandSpawn {
        /// Program name
        program: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// External command exited unsuccessfully
    #[error("Command '{command}' failed ({status}): {stderr}")]
    CommandFailed {
        /// Full command line
        command: String,
        /// Exit status description
        status: String,
        /// Captured standard error
        stderr: String,
    },

    /// Not available on this operating system
    #[error("Not supported on {0}")]
    Unsupported(&'static str),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl PlatformError {
    /// Whether the failure was caused by missing privileges
    pub fn is_permission_error(&self) -> bool {
        match self {
            Self::PermissionDenied(_) => true,
            Self::Io(e) | Self::CommandSpawn { source: e, .. } => {
                e.kind() == io::ErrorKind::PermissionDenied
            }
            Self::CommandFailed { stderr, .. } => {
                stderr.contains("Operation not permitted") || stderr.contains("Permission denied")
            }
            Self::DeviceCreate(_) | Self::Unsupported(_) => false,
        }
    }
}

impl From<PlatformError> for TunnelError {
    fn from(err: PlatformError) -> Self {
        if err.is_permission_error() {
            return TunnelError::PermissionDenied(err.to_string());
        }
        match err {
            PlatformError::Io(e) => TunnelError::Io(e),
            other => TunnelError::Establish(other.to_string()),
        }
    }
}

/// Platform result type
pub type Result<T> = std::result::Result<T, PlatformError>;
