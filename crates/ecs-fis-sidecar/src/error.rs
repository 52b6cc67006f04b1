//! Error types for the sidecar supervisor
//!
//! Every variant except those raised during teardown ends the sidecar with
//! exit status 1. Teardown failures are logged by the supervisor and never
//! surface here.

use thiserror::Error;

/// Result type alias for the supervisor
pub type Result<T> = std::result::Result<T, SidecarError>;

/// Main error type for the supervisor
#[derive(Error, Debug)]
pub enum SidecarError {
    /// A required environment variable is absent or empty
    #[error("Environment variable {0} not set")]
    MissingEnv(String),

    /// Another agent process already owns this container
    #[error("SSM agent is already running")]
    AlreadyRunning,

    /// The metadata endpoint variable is absent
    #[error("ECS Container Metadata not found")]
    MetadataUnavailable,

    /// The metadata endpoint could not be read
    #[error("Task metadata request failed: {0}")]
    Metadata(#[from] reqwest::Error),

    /// The availability zone does not end in a zone letter
    #[error("Cannot derive a region from availability zone {0:?}")]
    InvalidAvailabilityZone(String),

    /// An external command exited unsuccessfully
    #[error("{command} failed with exit code {code:?}: {stderr}")]
    CommandFailed {
        /// Command line, without secrets
        command: String,
        /// Exit code, `None` when killed by a signal
        code: Option<i32>,
        /// Captured standard error
        stderr: String,
    },

    /// An external command printed something we could not parse
    #[error("Unexpected output from {command}: {source}")]
    UnexpectedOutput {
        /// Command line
        command: String,
        /// Parse failure
        source: serde_json::Error,
    },

    /// Agent registration was refused
    #[error("Failed to register with AWS Systems Manager (SSM): {0}")]
    Registration(String),

    /// The agent's registration file is missing or malformed
    #[error("No managed instance registration in {path}: {reason}")]
    RegistrationFile {
        /// File path
        path: String,
        /// What went wrong
        reason: String,
    },

    /// Signal delivery failed
    #[error("Failed to signal process {pid}: {source}")]
    Signal {
        /// Target process
        pid: u32,
        /// errno
        source: nix::errno::Errno,
    },

    /// Settings errors from the shared configuration
    #[error(transparent)]
    Config(#[from] ecs_fis_core::FisError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
