//! Agent bridge error types.

use thiserror::Error;

/// Result type for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

/// Errors that can occur bridging the external agent CLI.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The agent binary was not reachable at startup.
    #[error("agent binary unavailable: {0}")]
    Unavailable(String),

    /// One-shot execution exceeded its deadline.
    #[error("agent execution timed out after {0}s")]
    Timeout(u64),

    /// The agent process exited non-zero.
    #[error("agent exited with status {status}: {stderr}")]
    Failed { status: i32, stderr: String },

    /// Generic IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AgentError::Timeout(30);
        assert_eq!(err.to_string(), "agent execution timed out after 30s");
    }
}
