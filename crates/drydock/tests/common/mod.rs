//! Test utilities and common setup.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;

use drydock::agent::{AgentBridge, AgentBridgeConfig};
use drydock::api::{create_router, AppState};
use drydock::container::{
    ContainerConfig, ContainerError, ContainerResult, ContainerRuntimeApi, ExecOutput,
};
use drydock::project::{ProjectService, ProjectServiceConfig};
use drydock::pty::{PtyPool, PtyPoolConfig};
use drydock::ws::EventHub;

/// Observable state of the mock runtime.
#[derive(Debug, Default)]
pub struct MockState {
    pub created: Vec<String>,
    pub removed: Vec<String>,
    pub running: HashSet<String>,
    pub fail_create: bool,
}

/// In-memory stand-in for the container CLI.
#[derive(Debug, Default)]
pub struct MockRuntime {
    pub state: Mutex<MockState>,
}

impl MockRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl ContainerRuntimeApi for MockRuntime {
    async fn health_check(&self) -> ContainerResult<String> {
        Ok("mock-runtime 1.0".to_string())
    }

    async fn create_container(&self, config: &ContainerConfig) -> ContainerResult<String> {
        config.validate()?;
        let mut state = self.state.lock().unwrap();
        if state.fail_create {
            return Err(ContainerError::CommandFailed {
                command: "run".to_string(),
                message: "mock provisioning failure".to_string(),
            });
        }
        let id = format!("mock-{}", state.created.len());
        state.created.push(id.clone());
        state.running.insert(id.clone());
        Ok(id)
    }

    async fn stop_container(
        &self,
        container_id: &str,
        _timeout_seconds: Option<u32>,
    ) -> ContainerResult<()> {
        let mut state = self.state.lock().unwrap();
        state.running.remove(container_id);
        Ok(())
    }

    async fn remove_container(&self, container_id: &str, _force: bool) -> ContainerResult<()> {
        let mut state = self.state.lock().unwrap();
        state.running.remove(container_id);
        state.removed.push(container_id.to_string());
        Ok(())
    }

    async fn container_state_status(&self, id_or_name: &str) -> ContainerResult<Option<String>> {
        let state = self.state.lock().unwrap();
        if state.running.contains(id_or_name) {
            Ok(Some("running".to_string()))
        } else {
            Ok(None)
        }
    }

    async fn exec_output(
        &self,
        container_id: &str,
        command: &[&str],
    ) -> ContainerResult<ExecOutput> {
        let state = self.state.lock().unwrap();
        if !state.running.contains(container_id) {
            return Err(ContainerError::ContainerNotFound(container_id.to_string()));
        }
        let shell_command = command.last().copied().unwrap_or_default();
        if shell_command.contains("false") {
            return Err(ContainerError::ExecFailed {
                status: 1,
                stderr: "mock command failed".to_string(),
            });
        }
        Ok(ExecOutput {
            stdout: format!("ran: {shell_command}"),
            stderr: String::new(),
        })
    }
}

/// Everything a test needs to poke at the stack behind the router.
pub struct TestCtx {
    pub runtime: Arc<MockRuntime>,
    pub hub: Arc<EventHub>,
    pub data_root: PathBuf,
    _data_dir: tempfile::TempDir,
}

/// Create a test application with all services initialized.
///
/// Uses the mock container runtime, `/bin/sh` terminals, and `cat` as the
/// agent binary with short timeouts.
pub async fn test_app() -> (Router, TestCtx) {
    let data_dir = tempfile::tempdir().unwrap();
    let data_root = data_dir.path().to_path_buf();
    let runtime = MockRuntime::new();
    let (router, hub) = build_app(data_root.clone(), runtime.clone()).await;
    (
        router,
        TestCtx {
            runtime,
            hub,
            data_root,
            _data_dir: data_dir,
        },
    )
}

/// Build a router over an existing data directory.
///
/// Reloads persisted project records, like a server restart would.
pub async fn build_app(data_root: PathBuf, runtime: Arc<MockRuntime>) -> (Router, Arc<EventHub>) {
    let hub = EventHub::new();

    let pool = PtyPool::new(
        hub.clone(),
        PtyPoolConfig {
            shell: Some("/bin/sh".to_string()),
            kill_grace_secs: 1,
        },
    );

    let bridge = AgentBridge::new(
        hub.clone(),
        AgentBridgeConfig {
            binary: "cat".to_string(),
            args: Vec::new(),
            exec_timeout_secs: 2,
            term_grace_secs: 1,
            probe_timeout_secs: 2,
        },
    )
    .await;

    let projects = Arc::new(ProjectService::new(
        runtime.clone(),
        hub.clone(),
        pool.clone(),
        bridge.clone(),
        ProjectServiceConfig {
            data_dir: data_root,
            templates_dir: None,
            image: "drydock-test:latest".to_string(),
            container_command: vec!["sleep".to_string(), "infinity".to_string()],
            memory_limit: "256m".to_string(),
            cpus: 0.5,
            stop_timeout_secs: 1,
        },
    ));
    projects.load_existing().await.unwrap();

    let state = AppState::new(projects, pool, bridge, hub.clone(), runtime);
    let router = create_router(state);

    (router, hub)
}
