//! Container configuration and input validation.

use std::collections::HashMap;

use super::error::{ContainerError, ContainerResult};

/// Configuration for creating a new container.
///
/// Every project container is resource-bounded: `memory` and `cpus` are
/// always passed through to the runtime.
#[derive(Debug, Clone, Default)]
pub struct ContainerConfig {
    /// Container name (optional).
    pub name: Option<String>,
    /// OCI image to use.
    pub image: String,
    /// Command to run.
    pub command: Vec<String>,
    /// Environment variables.
    pub env: HashMap<String, String>,
    /// Volume mounts (host_path -> container_path).
    pub volumes: Vec<(String, String)>,
    /// Working directory inside the container.
    pub workdir: Option<String>,
    /// Memory limit (e.g. "512m", "2g").
    pub memory: Option<String>,
    /// CPU limit (fractional cores, e.g. 1.5).
    pub cpus: Option<f64>,
}

impl ContainerConfig {
    /// Create a new container config with the given image.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    /// Validate all container configuration fields.
    ///
    /// Must be called before creating a container so malformed or hostile
    /// input never reaches the runtime CLI.
    pub fn validate(&self) -> ContainerResult<()> {
        validate_image_name(&self.image)?;

        if let Some(ref name) = self.name {
            validate_container_name(name)?;
        }

        for key in self.env.keys() {
            validate_env_var_key(key)?;
        }

        for (host_path, container_path) in &self.volumes {
            validate_volume_path(host_path, "host")?;
            validate_volume_path(container_path, "container")?;
        }

        if let Some(ref memory) = self.memory {
            validate_memory_limit(memory)?;
        }

        if let Some(cpus) = self.cpus {
            if !cpus.is_finite() || cpus <= 0.0 {
                return Err(ContainerError::InvalidInput(format!(
                    "cpu limit must be a positive number, got {cpus}"
                )));
            }
        }

        Ok(())
    }

    /// Set the container name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the command to run.
    pub fn command(mut self, cmd: Vec<String>) -> Self {
        self.command = cmd;
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Add a volume mount.
    pub fn volume(
        mut self,
        host_path: impl Into<String>,
        container_path: impl Into<String>,
    ) -> Self {
        self.volumes.push((host_path.into(), container_path.into()));
        self
    }

    /// Set the working directory.
    pub fn workdir(mut self, workdir: impl Into<String>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    /// Set the memory limit.
    pub fn memory(mut self, memory: impl Into<String>) -> Self {
        self.memory = Some(memory.into());
        self
    }

    /// Set the CPU limit.
    pub fn cpus(mut self, cpus: f64) -> Self {
        self.cpus = Some(cpus);
        self
    }
}

// ============================================================================
// Input Validation Functions
// ============================================================================

/// Validate an OCI image name.
///
/// Image names follow the pattern: `[registry/][namespace/]name[:tag][@digest]`.
pub fn validate_image_name(image: &str) -> ContainerResult<()> {
    if image.is_empty() {
        return Err(ContainerError::InvalidInput(
            "image name cannot be empty".to_string(),
        ));
    }

    if image.len() > 256 {
        return Err(ContainerError::InvalidInput(
            "image name exceeds maximum length of 256 characters".to_string(),
        ));
    }

    let valid_chars =
        |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '/' | ':' | '@');
    if !image.chars().all(valid_chars) {
        return Err(ContainerError::InvalidInput(format!(
            "image name '{image}' contains invalid characters"
        )));
    }

    Ok(())
}

/// Validate a container name.
pub fn validate_container_name(name: &str) -> ContainerResult<()> {
    if name.is_empty() {
        return Err(ContainerError::InvalidInput(
            "container name cannot be empty".to_string(),
        ));
    }

    if name.len() > 128 {
        return Err(ContainerError::InvalidInput(
            "container name exceeds maximum length".to_string(),
        ));
    }

    let mut chars = name.chars();
    let first_ok = chars
        .next()
        .map(|c| c.is_ascii_alphanumeric())
        .unwrap_or(false);
    let rest_ok = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !first_ok || !rest_ok {
        return Err(ContainerError::InvalidInput(format!(
            "container name '{name}' contains invalid characters"
        )));
    }

    Ok(())
}

/// Validate a container ID or name as passed to lifecycle commands.
///
/// Container IDs are hex strings; names are alphanumeric with `-` and `_`.
pub fn validate_container_id_or_name(id: &str) -> ContainerResult<()> {
    if id.is_empty() {
        return Err(ContainerError::InvalidInput(
            "container ID or name cannot be empty".to_string(),
        ));
    }

    if id.len() > 128 {
        return Err(ContainerError::InvalidInput(
            "container ID or name exceeds maximum length".to_string(),
        ));
    }

    let valid_chars = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_';
    if !id.chars().all(valid_chars) {
        return Err(ContainerError::InvalidInput(format!(
            "container ID or name '{id}' contains invalid characters"
        )));
    }

    Ok(())
}

/// Validate an environment variable key.
fn validate_env_var_key(key: &str) -> ContainerResult<()> {
    if key.is_empty() {
        return Err(ContainerError::InvalidInput(
            "environment variable key cannot be empty".to_string(),
        ));
    }

    let valid = key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid || key.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(ContainerError::InvalidInput(format!(
            "invalid environment variable key '{key}'"
        )));
    }

    Ok(())
}

/// Validate a volume mount path.
///
/// Both sides must be absolute and free of characters that would break the
/// `host:container` mount syntax.
fn validate_volume_path(path: &str, side: &str) -> ContainerResult<()> {
    if path.is_empty() {
        return Err(ContainerError::InvalidInput(format!(
            "{side} volume path cannot be empty"
        )));
    }

    if !path.starts_with('/') {
        return Err(ContainerError::InvalidInput(format!(
            "{side} volume path must be absolute: '{path}'"
        )));
    }

    if path.contains(':') || path.contains(',') {
        return Err(ContainerError::InvalidInput(format!(
            "{side} volume path contains invalid characters: '{path}'"
        )));
    }

    Ok(())
}

/// Validate a memory limit string like "512m" or "2g".
fn validate_memory_limit(memory: &str) -> ContainerResult<()> {
    let digits = memory.trim_end_matches(|c: char| c.is_ascii_alphabetic());
    let suffix = &memory[digits.len()..];

    let digits_ok = !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit());
    let suffix_ok = matches!(suffix, "" | "b" | "k" | "m" | "g" | "K" | "M" | "G");
    if !digits_ok || !suffix_ok {
        return Err(ContainerError::InvalidInput(format!(
            "invalid memory limit '{memory}'"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_image_name() {
        assert!(validate_image_name("ubuntu:latest").is_ok());
        assert!(validate_image_name("registry.io/ns/img:v1.0").is_ok());
        assert!(validate_image_name("").is_err());
        assert!(validate_image_name("bad image").is_err());
        assert!(validate_image_name("img;rm -rf /").is_err());
    }

    #[test]
    fn test_validate_container_name() {
        assert!(validate_container_name("drydock-abc123").is_ok());
        assert!(validate_container_name("-leading").is_err());
        assert!(validate_container_name("has space").is_err());
    }

    #[test]
    fn test_validate_id_or_name() {
        assert!(validate_container_id_or_name("0123abcdef").is_ok());
        assert!(validate_container_id_or_name("").is_err());
        assert!(validate_container_id_or_name("$(evil)").is_err());
    }

    #[test]
    fn test_validate_volume_paths() {
        let config = ContainerConfig::new("img").volume("/data/p1", "/workspace");
        assert!(config.validate().is_ok());

        let config = ContainerConfig::new("img").volume("relative/path", "/workspace");
        assert!(config.validate().is_err());

        let config = ContainerConfig::new("img").volume("/data:evil", "/workspace");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_resource_limits() {
        assert!(ContainerConfig::new("img").memory("512m").validate().is_ok());
        assert!(ContainerConfig::new("img").memory("2g").validate().is_ok());
        assert!(ContainerConfig::new("img").memory("lots").validate().is_err());
        assert!(ContainerConfig::new("img").cpus(1.5).validate().is_ok());
        assert!(ContainerConfig::new("img").cpus(-1.0).validate().is_err());
    }

    #[test]
    fn test_validate_env_keys() {
        let config = ContainerConfig::new("img").env("DRYDOCK_PROJECT_ID", "p1");
        assert!(config.validate().is_ok());

        let config = ContainerConfig::new("img").env("BAD-KEY", "v");
        assert!(config.validate().is_err());
    }
}
