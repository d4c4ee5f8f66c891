//! Project lifecycle error types.

use thiserror::Error;

use crate::container::ContainerError;

/// Result type for project operations.
pub type ProjectResult<T> = Result<T, ProjectError>;

/// Errors that can occur during project operations.
#[derive(Debug, Error)]
pub enum ProjectError {
    /// Project (or its container) was not found.
    #[error("project not found: {0}")]
    NotFound(String),

    /// A file path resolved outside the project root.
    #[error("access denied: path escapes project root: {0}")]
    AccessDenied(String),

    /// Container provisioning failed.
    #[error("provisioning failed: {0}")]
    Provisioning(String),

    /// Template scaffolding failed.
    #[error("template error: {0}")]
    Template(String),

    /// A command executed in the container exited non-zero.
    #[error("exec exited with status {status}: {stderr}")]
    Exec { status: i32, stderr: String },

    /// Generic IO error (retry-safe).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ContainerError> for ProjectError {
    fn from(err: ContainerError) -> Self {
        match err {
            ContainerError::ExecFailed { status, stderr } => ProjectError::Exec { status, stderr },
            ContainerError::ContainerNotFound(id) => ProjectError::NotFound(id),
            other => ProjectError::Provisioning(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_error_maps_through() {
        let err: ProjectError = ContainerError::ExecFailed {
            status: 1,
            stderr: "boom".to_string(),
        }
        .into();
        assert!(matches!(err, ProjectError::Exec { status: 1, .. }));
    }
}
