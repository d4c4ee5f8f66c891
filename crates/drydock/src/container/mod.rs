//! Container runtime management module.
//!
//! Provides an async interface to manage project containers via the Docker
//! or Podman CLI. The runtime is auto-detected or can be configured
//! explicitly.

mod container;
mod error;

pub use container::{validate_container_id_or_name, validate_image_name, ContainerConfig};
pub use error::{ContainerError, ContainerResult};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use tokio::process::Command;

/// Container runtime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    /// Docker runtime (default for macOS/Windows dev)
    Docker,
    /// Podman runtime (default for Linux prod)
    #[default]
    Podman,
}

impl RuntimeType {
    /// Get the default binary name for this runtime.
    pub fn default_binary(&self) -> &'static str {
        match self {
            RuntimeType::Docker => "docker",
            RuntimeType::Podman => "podman",
        }
    }

    /// Whether this runtime requires SELinux volume labels (:Z suffix).
    pub fn needs_selinux_labels(&self) -> bool {
        match self {
            RuntimeType::Docker => false,
            RuntimeType::Podman => true,
        }
    }
}

impl std::fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeType::Docker => write!(f, "docker"),
            RuntimeType::Podman => write!(f, "podman"),
        }
    }
}

/// Output of a command executed inside a container.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Container runtime abstraction.
///
/// The trait exists so the lifecycle manager can be exercised in tests
/// without a container runtime installed.
#[async_trait]
pub trait ContainerRuntimeApi: Send + Sync {
    /// Check that the runtime CLI is reachable; returns its version output.
    async fn health_check(&self) -> ContainerResult<String>;

    /// Create and start a container, returning its ID.
    async fn create_container(&self, config: &ContainerConfig) -> ContainerResult<String>;

    /// Stop a running container.
    async fn stop_container(
        &self,
        container_id: &str,
        timeout_seconds: Option<u32>,
    ) -> ContainerResult<()>;

    /// Remove a container.
    async fn remove_container(&self, container_id: &str, force: bool) -> ContainerResult<()>;

    /// Get the container state status string (e.g. "running", "exited").
    /// Returns `Ok(None)` when the container does not exist.
    async fn container_state_status(&self, id_or_name: &str) -> ContainerResult<Option<String>>;

    /// Execute a command in a container and wait for its output.
    /// Non-zero exit fails with [`ContainerError::ExecFailed`].
    async fn exec_output(&self, container_id: &str, command: &[&str])
        -> ContainerResult<ExecOutput>;
}

/// Container runtime client for managing containers.
///
/// Supports both Docker and Podman with automatic detection.
#[derive(Debug, Clone)]
pub struct ContainerRuntime {
    /// The runtime type (docker or podman)
    runtime_type: RuntimeType,
    /// Path to the container binary
    binary: String,
}

impl Default for ContainerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerRuntime {
    /// Create a new container runtime with auto-detection.
    ///
    /// Tries Docker first (for macOS dev), then falls back to Podman.
    pub fn new() -> Self {
        #[cfg(target_os = "macos")]
        {
            if Self::is_binary_available("docker") {
                return Self {
                    runtime_type: RuntimeType::Docker,
                    binary: "docker".to_string(),
                };
            }
        }

        if Self::is_binary_available("podman") {
            Self {
                runtime_type: RuntimeType::Podman,
                binary: "podman".to_string(),
            }
        } else if Self::is_binary_available("docker") {
            Self {
                runtime_type: RuntimeType::Docker,
                binary: "docker".to_string(),
            }
        } else {
            // Fall back to podman, will fail at runtime
            Self {
                runtime_type: RuntimeType::Podman,
                binary: "podman".to_string(),
            }
        }
    }

    /// Create a container runtime with a specific type.
    pub fn with_type(runtime_type: RuntimeType) -> Self {
        Self {
            binary: runtime_type.default_binary().to_string(),
            runtime_type,
        }
    }

    /// Create a container runtime with a custom binary path.
    pub fn with_binary(runtime_type: RuntimeType, binary: impl Into<String>) -> Self {
        Self {
            runtime_type,
            binary: binary.into(),
        }
    }

    /// Get the runtime type.
    pub fn runtime_type(&self) -> RuntimeType {
        self.runtime_type
    }

    /// Check if a binary is available in PATH.
    fn is_binary_available(name: &str) -> bool {
        std::process::Command::new("which")
            .arg(name)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    async fn run_cli(&self, command: &str, args: &[String]) -> ContainerResult<std::process::Output> {
        let output = Command::new(&self.binary)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ContainerError::CommandFailed {
                command: command.to_string(),
                message: e.to_string(),
            })?;
        Ok(output)
    }
}

#[async_trait]
impl ContainerRuntimeApi for ContainerRuntime {
    async fn health_check(&self) -> ContainerResult<String> {
        let args = vec!["version".to_string(), "--format".to_string(), "json".to_string()];
        let output = self.run_cli("version", &args).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ContainerError::CommandFailed {
                command: "version".to_string(),
                message: stderr.to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn create_container(&self, config: &ContainerConfig) -> ContainerResult<String> {
        // Validate all inputs before the command line is assembled
        config.validate()?;

        let mut owned_args: Vec<String> = Vec::new();

        owned_args.push("run".to_string());
        owned_args.push("-d".to_string());

        if let Some(ref name) = config.name {
            owned_args.push("--name".to_string());
            owned_args.push(name.clone());
        }

        // Resource limits
        if let Some(ref memory) = config.memory {
            owned_args.push("--memory".to_string());
            owned_args.push(memory.clone());
        }
        if let Some(cpus) = config.cpus {
            owned_args.push("--cpus".to_string());
            owned_args.push(cpus.to_string());
        }

        // Volume mounts - handle SELinux labels for Podman
        for (host, container) in &config.volumes {
            owned_args.push("-v".to_string());
            if self.runtime_type.needs_selinux_labels() {
                owned_args.push(format!("{}:{}:Z", host, container));
            } else {
                owned_args.push(format!("{}:{}", host, container));
            }
        }

        for (key, value) in &config.env {
            owned_args.push("-e".to_string());
            owned_args.push(format!("{}={}", key, value));
        }

        if let Some(ref workdir) = config.workdir {
            owned_args.push("-w".to_string());
            owned_args.push(workdir.clone());
        }

        owned_args.push(config.image.clone());

        for cmd in &config.command {
            owned_args.push(cmd.clone());
        }

        let output = self.run_cli("run", &owned_args).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ContainerError::CommandFailed {
                command: "run".to_string(),
                message: stderr.to_string(),
            });
        }

        // Return container ID (trimmed)
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn stop_container(
        &self,
        container_id: &str,
        timeout: Option<u32>,
    ) -> ContainerResult<()> {
        validate_container_id_or_name(container_id)?;

        let mut owned_args: Vec<String> = vec!["stop".to_string()];

        if let Some(t) = timeout {
            owned_args.push("-t".to_string());
            owned_args.push(t.to_string());
        }

        owned_args.push(container_id.to_string());

        let output = self.run_cli("stop", &owned_args).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ContainerError::CommandFailed {
                command: "stop".to_string(),
                message: stderr.to_string(),
            });
        }

        Ok(())
    }

    async fn remove_container(&self, container_id: &str, force: bool) -> ContainerResult<()> {
        validate_container_id_or_name(container_id)?;

        let mut owned_args: Vec<String> = vec!["rm".to_string()];

        if force {
            owned_args.push("-f".to_string());
        }

        owned_args.push(container_id.to_string());

        let output = self.run_cli("rm", &owned_args).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ContainerError::CommandFailed {
                command: "rm".to_string(),
                message: stderr.to_string(),
            });
        }

        Ok(())
    }

    async fn container_state_status(
        &self,
        id_or_name: &str,
    ) -> ContainerResult<Option<String>> {
        validate_container_id_or_name(id_or_name)?;

        let args = vec![
            "inspect".to_string(),
            "--format".to_string(),
            "{{.State.Status}}".to_string(),
            id_or_name.to_string(),
        ];
        let output = self.run_cli("inspect", &args).await?;

        if !output.status.success() {
            // Container not found is not an error; callers treat it as missing.
            return Ok(None);
        }

        let status = String::from_utf8_lossy(&output.stdout)
            .trim()
            .trim_matches('"')
            .to_string();
        if status.is_empty() {
            return Ok(None);
        }

        Ok(Some(status))
    }

    async fn exec_output(
        &self,
        container_id: &str,
        command: &[&str],
    ) -> ContainerResult<ExecOutput> {
        validate_container_id_or_name(container_id)?;

        let mut args: Vec<String> = vec!["exec".to_string(), container_id.to_string()];
        args.extend(command.iter().map(|s| (*s).to_string()));

        let output = self.run_cli("exec", &args).await?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            // Podman/docker report a missing container on exec with 125/126
            if stderr.contains("no such container") || stderr.contains("No such container") {
                return Err(ContainerError::ContainerNotFound(container_id.to_string()));
            }
            return Err(ContainerError::ExecFailed {
                status: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(ExecOutput { stdout, stderr })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_container_runtime_health_check() {
        let runtime = ContainerRuntime::new();
        // This test will only pass if docker or podman is installed
        if let Ok(version) = runtime.health_check().await {
            assert!(!version.is_empty());
        }
    }

    #[test]
    fn test_runtime_type_selinux() {
        assert!(!RuntimeType::Docker.needs_selinux_labels());
        assert!(RuntimeType::Podman.needs_selinux_labels());
    }

    #[tokio::test]
    async fn test_invalid_id_rejected_before_cli() {
        let runtime = ContainerRuntime::with_binary(RuntimeType::Docker, "/nonexistent");
        // Validation fires before the (missing) binary would be invoked.
        let err = runtime.stop_container("bad id", None).await.unwrap_err();
        assert!(matches!(err, ContainerError::InvalidInput(_)));
    }
}
