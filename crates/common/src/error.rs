//! Common error types for devloop components.

use crate::config::ConfigError;
use crate::dotenv::DotenvError;
use crate::poll::PollError;
use thiserror::Error;

/// Failure classes shared by every devloop task.
///
/// Configuration problems are fatal and never retried. Tool failures carry the
/// tool's own output verbatim. Timeouts mean a bounded wait gave up; nothing
/// proceeds past one.
#[derive(Error, Debug)]
pub enum DevloopError {
    /// Missing argument, file or variable; the message says how to fix it
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// External tool exited nonzero
    #[error("{tool} failed:\n{output}")]
    Tool {
        /// Program name (helm, kubectl, ...)
        tool: String,
        /// Captured output, verbatim
        output: String,
    },

    /// External tool was refused by the registry; the message carries remediation
    #[error("Registry authentication failed: {0}")]
    RegistryAuth(String),

    /// Registry username could not be derived from the token
    #[error("Identity lookup failed: {0}")]
    Identity(String),

    /// A convergence wait ran out of attempts
    #[error("Timed out: {0}")]
    Timeout(String),

    /// A watched process went away while we were waiting on it
    #[error("Aborted: {0}")]
    Aborted(String),

    /// The smoke suite ran and reported failures
    #[error("Smoke tests failed: {0}")]
    SmokeSuite(String),

    /// I/O failure outside of a tool invocation
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using `DevloopError`
pub type Result<T> = std::result::Result<T, DevloopError>;

impl From<ConfigError> for DevloopError {
    fn from(err: ConfigError) -> Self {
        DevloopError::Configuration(err.to_string())
    }
}

impl From<DotenvError> for DevloopError {
    fn from(err: DotenvError) -> Self {
        DevloopError::Configuration(err.to_string())
    }
}

impl From<PollError> for DevloopError {
    fn from(err: PollError) -> Self {
        match err {
            PollError::Exhausted { .. } => DevloopError::Timeout(err.to_string()),
            PollError::Aborted { .. } => DevloopError::Aborted(err.to_string()),
        }
    }
}
