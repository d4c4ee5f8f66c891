//! Container runtime error types.

use thiserror::Error;

/// Result type for container operations.
pub type ContainerResult<T> = Result<T, ContainerError>;

/// Errors that can occur during container operations.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// The container CLI command failed.
    #[error("container {command} failed: {message}")]
    CommandFailed { command: String, message: String },

    /// A command executed inside a container exited non-zero.
    #[error("exec exited with status {status}: {stderr}")]
    ExecFailed { status: i32, stderr: String },

    /// Container was not found.
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// Invalid input provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Generic IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ContainerError::ExecFailed {
            status: 2,
            stderr: "no such file".to_string(),
        };
        assert_eq!(err.to_string(), "exec exited with status 2: no such file");
    }
}
