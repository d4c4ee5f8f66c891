//! Project service - orchestrates project storage and container lifecycle.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};
use tokio::fs;
use uuid::Uuid;

use drydock_protocol::{topic, Event};

use crate::agent::AgentBridge;
use crate::container::{ContainerConfig, ContainerRuntimeApi};
use crate::pty::PtyPool;
use crate::registry::Registry;
use crate::ws::EventSink;

use super::error::{ProjectError, ProjectResult};
use super::models::{CreateProjectRequest, FileEntry, Project, ProjectStatus};
use super::templates;

/// Name of the per-project configuration record.
const RECORD_FILE: &str = "project.json";

/// Project service configuration.
#[derive(Debug, Clone)]
pub struct ProjectServiceConfig {
    /// Base directory holding `projects/<id>` storage directories.
    pub data_dir: PathBuf,
    /// Optional directory of custom templates (overrides built-ins).
    pub templates_dir: Option<PathBuf>,
    /// Container image for project containers.
    pub image: String,
    /// Command keeping the project container alive.
    pub container_command: Vec<String>,
    /// Memory limit per container (e.g. "512m").
    pub memory_limit: String,
    /// CPU limit per container (fractional cores).
    pub cpus: f64,
    /// Seconds to wait for a container to stop before it is killed.
    pub stop_timeout_secs: u32,
}

impl Default for ProjectServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            templates_dir: None,
            image: "drydock-dev:latest".to_string(),
            container_command: vec!["sleep".to_string(), "infinity".to_string()],
            memory_limit: "512m".to_string(),
            cpus: 1.0,
            stop_timeout_secs: 10,
        }
    }
}

/// Service owning project state, storage directories and containers.
///
/// The on-disk project directory is owned solely by this service; all file
/// access goes through its read/write/list operations so path confinement
/// cannot be bypassed.
pub struct ProjectService {
    projects: Registry<Project>,
    runtime: Arc<dyn ContainerRuntimeApi>,
    events: Arc<dyn EventSink>,
    ptys: Arc<PtyPool>,
    agent: Arc<AgentBridge>,
    config: ProjectServiceConfig,
}

impl ProjectService {
    /// Create a new project service.
    pub fn new(
        runtime: Arc<dyn ContainerRuntimeApi>,
        events: Arc<dyn EventSink>,
        ptys: Arc<PtyPool>,
        agent: Arc<AgentBridge>,
        config: ProjectServiceConfig,
    ) -> Self {
        Self {
            projects: Registry::new(),
            runtime,
            events,
            ptys,
            agent,
            config,
        }
    }

    fn projects_root(&self) -> PathBuf {
        self.config.data_dir.join("projects")
    }

    /// Reload persisted project records at process start.
    ///
    /// Status is normalized to `inactive`: no container is actually running
    /// after a restart.
    pub async fn load_existing(&self) -> ProjectResult<usize> {
        let root = self.projects_root();
        if !root.exists() {
            return Ok(0);
        }

        let mut loaded = 0;
        let mut entries = fs::read_dir(&root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let record_path = entry.path().join(RECORD_FILE);
            let contents = match fs::read_to_string(&record_path).await {
                Ok(c) => c,
                Err(e) => {
                    warn!("Skipping {}: {}", record_path.display(), e);
                    continue;
                }
            };
            let mut project: Project = match serde_json::from_str(&contents) {
                Ok(p) => p,
                Err(e) => {
                    warn!("Skipping malformed record {}: {}", record_path.display(), e);
                    continue;
                }
            };
            project.status = ProjectStatus::Inactive;
            project.container_id = None;
            self.projects.insert(project.id.clone(), project);
            loaded += 1;
        }

        info!("Loaded {} project record(s)", loaded);
        Ok(loaded)
    }

    /// Create a project: storage, template files, record, and container.
    ///
    /// Any failure after the storage directory exists rolls the directory
    /// back before the error propagates.
    pub async fn create(&self, request: CreateProjectRequest) -> ProjectResult<Project> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(ProjectError::Template("project name cannot be empty".to_string()));
        }

        let project_id = Uuid::new_v4().to_string();
        let storage_path = self.projects_root().join(&project_id);
        fs::create_dir_all(&storage_path).await?;

        match self.provision(&project_id, &name, &request, &storage_path).await {
            Ok(project) => {
                self.events.publish(
                    &topic::project(&project_id),
                    Event::ProjectCreated {
                        project_id: project_id.clone(),
                        name,
                    },
                );
                info!("Created project {} ({})", project_id, project.name);
                Ok(project)
            }
            Err(e) => {
                self.projects.remove(&project_id);
                if let Err(rm_err) = fs::remove_dir_all(&storage_path).await {
                    warn!(
                        "Rollback of {} failed: {}",
                        storage_path.display(),
                        rm_err
                    );
                }
                Err(e)
            }
        }
    }

    async fn provision(
        &self,
        project_id: &str,
        name: &str,
        request: &CreateProjectRequest,
        storage_path: &Path,
    ) -> ProjectResult<Project> {
        templates::scaffold(
            &request.template,
            self.config.templates_dir.as_deref(),
            storage_path,
        )
        .await?;

        let now = Utc::now().to_rfc3339();
        let mut project = Project {
            id: project_id.to_string(),
            name: name.to_string(),
            template: request.template.clone(),
            description: request.description.clone(),
            created_at: now.clone(),
            last_accessed: now,
            storage_path: storage_path.to_path_buf(),
            container_id: None,
            status: ProjectStatus::Creating,
        };
        self.persist_record(&project).await?;
        self.projects.insert(project_id.to_string(), project.clone());

        // Volume binds must be absolute
        let host_path = fs::canonicalize(storage_path).await?;
        let container_name = format!("drydock-{}", &project_id[..8]);
        let container_config = ContainerConfig::new(&self.config.image)
            .name(&container_name)
            .volume(host_path.display().to_string(), "/workspace")
            .workdir("/workspace")
            .env("DRYDOCK_PROJECT_ID", project_id)
            .memory(&self.config.memory_limit)
            .cpus(self.config.cpus)
            .command(self.config.container_command.clone());

        let container_id = self.runtime.create_container(&container_config).await?;

        project.container_id = Some(container_id.clone());
        project.status = ProjectStatus::Active;
        if let Err(e) = self.persist_record(&project).await {
            // The record write failed after the container came up; tear the
            // container down so the outer rollback leaves nothing behind.
            if let Err(stop_err) = self
                .runtime
                .stop_container(&container_id, Some(self.config.stop_timeout_secs))
                .await
            {
                warn!("Failed to stop container {}: {}", container_id, stop_err);
            }
            if let Err(rm_err) = self.runtime.remove_container(&container_id, true).await {
                warn!("Failed to remove container {}: {}", container_id, rm_err);
            }
            return Err(e);
        }
        self.projects.insert(project_id.to_string(), project.clone());

        Ok(project)
    }

    /// Get a project by ID, refreshing its last-accessed timestamp.
    pub async fn get(&self, project_id: &str) -> ProjectResult<Project> {
        let project = {
            let mut entry = self
                .projects
                .get_mut(project_id)
                .ok_or_else(|| ProjectError::NotFound(project_id.to_string()))?;
            entry.touch();
            entry.clone()
        };
        if let Err(e) = self.persist_record(&project).await {
            debug!("Failed to persist access time for {}: {}", project_id, e);
        }
        Ok(project)
    }

    /// List all projects, refreshing last-accessed timestamps.
    pub fn list(&self) -> Vec<Project> {
        let mut projects = Vec::new();
        for id in self.projects.keys() {
            if let Some(mut entry) = self.projects.get_mut(&id) {
                entry.touch();
                projects.push(entry.clone());
            }
        }
        projects.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        projects
    }

    /// Remove a project: its terminals, agent session, container and storage.
    ///
    /// Idempotent: removing an unknown or already-removed project succeeds,
    /// and a container that is already gone never prevents directory removal.
    pub async fn remove(&self, project_id: &str) -> ProjectResult<()> {
        let Some(project) = self.projects.remove(project_id) else {
            debug!("Project {} already removed", project_id);
            return Ok(());
        };

        // Force-end attached sessions before the container goes away.
        let killed = self.ptys.kill_for_project(project_id).await;
        if killed > 0 {
            info!("Ended {} terminal(s) for project {}", killed, project_id);
        }
        self.agent.terminate_session(project_id).await;

        if let Some(ref container_id) = project.container_id {
            if let Err(e) = self
                .runtime
                .stop_container(container_id, Some(self.config.stop_timeout_secs))
                .await
            {
                warn!("Failed to stop container {}: {}", container_id, e);
            }
            if let Err(e) = self.runtime.remove_container(container_id, true).await {
                warn!("Failed to remove container {}: {}", container_id, e);
            }
        }

        if project.storage_path.exists() {
            fs::remove_dir_all(&project.storage_path).await?;
        }

        self.events.publish(
            &topic::project(project_id),
            Event::ProjectDeleted {
                project_id: project_id.to_string(),
            },
        );
        info!("Removed project {}", project_id);
        Ok(())
    }

    /// Read a file within the project root.
    pub async fn read_file(&self, project_id: &str, relative_path: &str) -> ProjectResult<String> {
        let project = self.get(project_id).await?;
        let path = self
            .confined_path(&project.storage_path, relative_path)
            .await?;
        fs::read_to_string(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProjectError::NotFound(relative_path.to_string())
            } else {
                ProjectError::Io(e)
            }
        })
    }

    /// Write a file within the project root, creating parent directories.
    pub async fn write_file(
        &self,
        project_id: &str,
        relative_path: &str,
        content: &str,
    ) -> ProjectResult<()> {
        let project = self.get(project_id).await?;
        let path = self
            .confined_path(&project.storage_path, relative_path)
            .await?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, content).await?;
        Ok(())
    }

    /// List directory entries within the project root.
    pub async fn list_files(
        &self,
        project_id: &str,
        relative_path: &str,
    ) -> ProjectResult<Vec<FileEntry>> {
        let project = self.get(project_id).await?;
        let dir = self
            .confined_path(&project.storage_path, relative_path)
            .await?;

        let mut entries = Vec::new();
        let mut read_dir = fs::read_dir(&dir).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProjectError::NotFound(relative_path.to_string())
            } else {
                ProjectError::Io(e)
            }
        })?;
        while let Some(entry) = read_dir.next_entry().await? {
            let meta = entry.metadata().await?;
            let name = entry.file_name().to_string_lossy().to_string();
            let rel = if relative_path.is_empty() || relative_path == "." {
                name.clone()
            } else {
                format!("{}/{}", relative_path.trim_end_matches('/'), name)
            };
            entries.push(FileEntry {
                name,
                path: rel,
                is_dir: meta.is_dir(),
                size: if meta.is_dir() { 0 } else { meta.len() },
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Resolve a working directory inside the project root for attaching
    /// terminal or agent sessions. The same confinement rules as file
    /// operations apply.
    pub async fn session_working_dir(
        &self,
        project_id: &str,
        relative: Option<&str>,
    ) -> ProjectResult<PathBuf> {
        let project = self.get(project_id).await?;
        match relative {
            Some(rel) if !rel.is_empty() && rel != "." => {
                self.confined_path(&project.storage_path, rel).await
            }
            _ => Ok(project.storage_path.clone()),
        }
    }

    /// Execute a command inside the project's container.
    pub async fn exec(&self, project_id: &str, command: &str) -> ProjectResult<String> {
        let project = self.get(project_id).await?;
        let container_id = match project.container_id {
            Some(ref id) if project.is_active() => id.clone(),
            _ => {
                return Err(ProjectError::NotFound(format!(
                    "no running container for project {project_id}"
                )))
            }
        };

        let result = self
            .runtime
            .exec_output(&container_id, &["/bin/sh", "-c", command])
            .await;

        match result {
            Ok(output) => {
                self.events.publish(
                    &topic::project(project_id),
                    Event::CommandExecuted {
                        project_id: project_id.to_string(),
                        command: command.to_string(),
                        output: output.stdout.clone(),
                    },
                );
                Ok(output.stdout)
            }
            Err(e) => {
                self.events.publish(
                    &topic::project(project_id),
                    Event::CommandFailed {
                        project_id: project_id.to_string(),
                        command: command.to_string(),
                        error: e.to_string(),
                    },
                );
                Err(e.into())
            }
        }
    }

    /// Stop and remove all live containers; used during graceful shutdown.
    pub async fn shutdown_all(&self) {
        for id in self.projects.keys() {
            let container_id = self
                .projects
                .get(&id)
                .and_then(|p| p.container_id.clone());
            let Some(container_id) = container_id else {
                continue;
            };
            info!("Stopping container {} for project {}", container_id, id);
            if let Err(e) = self
                .runtime
                .stop_container(&container_id, Some(self.config.stop_timeout_secs))
                .await
            {
                warn!("Failed to stop container {}: {}", container_id, e);
            }
            if let Err(e) = self.runtime.remove_container(&container_id, true).await {
                warn!("Failed to remove container {}: {}", container_id, e);
            }
            if let Some(mut entry) = self.projects.get_mut(&id) {
                entry.container_id = None;
                entry.status = ProjectStatus::Inactive;
                let snapshot = entry.clone();
                drop(entry);
                if let Err(e) = self.persist_record(&snapshot).await {
                    warn!("Failed to persist record for {}: {}", id, e);
                }
            }
        }
    }

    async fn persist_record(&self, project: &Project) -> ProjectResult<()> {
        let record_path = project.storage_path.join(RECORD_FILE);
        let json = serde_json::to_string_pretty(project)
            .map_err(|e| ProjectError::Provisioning(format!("serializing record: {e}")))?;
        fs::write(&record_path, json).await?;
        Ok(())
    }

    /// Resolve `relative_path` against `root`, rejecting any escape before
    /// touching the filesystem contents.
    async fn confined_path(&self, root: &Path, relative_path: &str) -> ProjectResult<PathBuf> {
        let resolved = lexical_confine(root, relative_path)?;
        deny_symlink_escape(root, &resolved, relative_path).await?;
        Ok(resolved)
    }
}

/// Lexically resolve `relative` under `root`; `..`, absolute paths and
/// prefix components are rejected outright.
fn lexical_confine(root: &Path, relative: &str) -> ProjectResult<PathBuf> {
    let rel = Path::new(relative);
    if rel.is_absolute() {
        return Err(ProjectError::AccessDenied(relative.to_string()));
    }

    let mut resolved = root.to_path_buf();
    for component in rel.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            _ => return Err(ProjectError::AccessDenied(relative.to_string())),
        }
    }
    Ok(resolved)
}

/// Reject paths whose nearest existing ancestor resolves (through symlinks)
/// outside the canonical project root.
async fn deny_symlink_escape(
    root: &Path,
    resolved: &Path,
    relative: &str,
) -> ProjectResult<()> {
    let canonical_root = fs::canonicalize(root).await?;
    let mut probe = resolved.to_path_buf();
    loop {
        match fs::canonicalize(&probe).await {
            Ok(canonical) => {
                if canonical.starts_with(&canonical_root) {
                    return Ok(());
                }
                return Err(ProjectError::AccessDenied(relative.to_string()));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if !probe.pop() {
                    return Err(ProjectError::AccessDenied(relative.to_string()));
                }
            }
            Err(e) => return Err(ProjectError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lexical_confine_allows_nested() {
        let root = Path::new("/data/projects/p1");
        let resolved = lexical_confine(root, "src/main.rs").unwrap();
        assert_eq!(resolved, root.join("src/main.rs"));
    }

    #[test]
    fn test_lexical_confine_rejects_parent_traversal() {
        let root = Path::new("/data/projects/p1");
        let err = lexical_confine(root, "../../etc/passwd").unwrap_err();
        assert!(matches!(err, ProjectError::AccessDenied(_)));
    }

    #[test]
    fn test_lexical_confine_rejects_absolute() {
        let root = Path::new("/data/projects/p1");
        let err = lexical_confine(root, "/etc/passwd").unwrap_err();
        assert!(matches!(err, ProjectError::AccessDenied(_)));
    }

    #[test]
    fn test_lexical_confine_rejects_hidden_traversal() {
        let root = Path::new("/data/projects/p1");
        let err = lexical_confine(root, "src/../../other").unwrap_err();
        assert!(matches!(err, ProjectError::AccessDenied(_)));
    }

    #[tokio::test]
    async fn test_symlink_escape_denied() {
        let base = tempfile::tempdir().unwrap();
        let root = base.path().join("root");
        let outside = base.path().join("outside");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::create_dir_all(&outside).unwrap();

        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(&outside, root.join("link")).unwrap();
            let resolved = lexical_confine(&root, "link/secret.txt").unwrap();
            let err = deny_symlink_escape(&root, &resolved, "link/secret.txt")
                .await
                .unwrap_err();
            assert!(matches!(err, ProjectError::AccessDenied(_)));
        }
    }

    #[tokio::test]
    async fn test_missing_path_confined_to_root_allowed() {
        let base = tempfile::tempdir().unwrap();
        let root = base.path().join("root");
        std::fs::create_dir_all(&root).unwrap();

        let resolved = lexical_confine(&root, "new/file.txt").unwrap();
        deny_symlink_escape(&root, &resolved, "new/file.txt")
            .await
            .unwrap();
    }
}
