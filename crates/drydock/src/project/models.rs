//! Project data model.

use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Project lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    /// Storage and container are being provisioned.
    Creating,
    /// Container is running.
    Active,
    /// No container is running (e.g. after a backend restart).
    Inactive,
    /// Provisioning or reconciliation failed.
    Error,
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProjectStatus::Creating => write!(f, "creating"),
            ProjectStatus::Active => write!(f, "active"),
            ProjectStatus::Inactive => write!(f, "inactive"),
            ProjectStatus::Error => write!(f, "error"),
        }
    }
}

/// A logical workspace with its own container and storage directory.
///
/// Persisted as `project.json` inside `storage_path` and reloaded at
/// process start; on reload the status is normalized to `inactive` since
/// no container survives a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Unique project ID.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Template the storage was scaffolded from.
    pub template: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Creation timestamp (RFC3339).
    pub created_at: String,
    /// Last access timestamp (RFC3339).
    pub last_accessed: String,
    /// Storage directory on the host.
    pub storage_path: PathBuf,
    /// ID of the bound container, when one is running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    /// Current lifecycle status.
    pub status: ProjectStatus,
}

impl Project {
    /// Whether the project currently has a running container.
    pub fn is_active(&self) -> bool {
        self.status == ProjectStatus::Active
    }

    /// Refresh the last-accessed timestamp.
    pub fn touch(&mut self) {
        self.last_accessed = Utc::now().to_rfc3339();
    }
}

/// Request to create a project.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    #[serde(default = "default_template")]
    pub template: String,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_template() -> String {
    "empty".to_string()
}

/// A file or directory entry returned by `list_files`.
#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    /// Name within its parent directory.
    pub name: String,
    /// Path relative to the project root.
    pub path: String,
    /// Whether this entry is a directory.
    pub is_dir: bool,
    /// File size in bytes (0 for directories).
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&ProjectStatus::Creating).unwrap();
        assert_eq!(json, "\"creating\"");
    }

    #[test]
    fn test_create_request_defaults() {
        let req: CreateProjectRequest = serde_json::from_str(r#"{"name":"demo"}"#).unwrap();
        assert_eq!(req.template, "empty");
        assert!(req.description.is_none());
    }
}
