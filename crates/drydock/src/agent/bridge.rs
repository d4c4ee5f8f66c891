//! Bridge to the external coding-agent CLI.
//!
//! Manages one-shot command execution plus at most one long-lived
//! interactive agent process per project. Session replacement goes through
//! the registry's atomic upsert; the displaced process is terminated
//! gracefully, then forcefully after a grace window.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, RwLock};

use drydock_protocol::{topic, Event, OutputStream};

use crate::registry::Registry;
use crate::ws::EventSink;

use super::error::{AgentError, AgentResult};

/// Agent bridge configuration.
#[derive(Debug, Clone)]
pub struct AgentBridgeConfig {
    /// Path to the agent binary.
    pub binary: String,
    /// Extra arguments passed on every invocation.
    pub args: Vec<String>,
    /// Deadline for one-shot execution.
    pub exec_timeout_secs: u64,
    /// Grace window between SIGTERM and SIGKILL on terminate.
    pub term_grace_secs: u64,
    /// Deadline for the availability probe.
    pub probe_timeout_secs: u64,
}

impl Default for AgentBridgeConfig {
    fn default() -> Self {
        Self {
            binary: "pi".to_string(),
            args: Vec::new(),
            exec_timeout_secs: 30,
            term_grace_secs: 3,
            probe_timeout_secs: 5,
        }
    }
}

/// Cached result of probing the agent binary.
#[derive(Debug, Clone, Serialize)]
pub struct AgentHealth {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Public view of an interactive agent session.
#[derive(Debug, Clone, Serialize)]
pub struct AgentSessionInfo {
    pub project_id: String,
    pub working_dir: PathBuf,
    pub started_at: String,
    pub pid: u32,
    pub is_interactive: bool,
}

/// A live interactive agent session.
struct AgentSession {
    project_id: String,
    working_dir: PathBuf,
    started_at: String,
    pid: u32,
    is_interactive: bool,
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Option<Child>>,
    /// Guards the single teardown path; first setter wins.
    ended: AtomicBool,
    last_activity: StdMutex<Instant>,
}

impl AgentSession {
    fn touch(&self) {
        if let Ok(mut last) = self.last_activity.lock() {
            *last = Instant::now();
        }
    }

    fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .map(|last| last.elapsed())
            .unwrap_or_default()
    }

    fn info(&self) -> AgentSessionInfo {
        AgentSessionInfo {
            project_id: self.project_id.clone(),
            working_dir: self.working_dir.clone(),
            started_at: self.started_at.clone(),
            pid: self.pid,
            is_interactive: self.is_interactive,
        }
    }
}

/// Bridge owning all agent processes.
pub struct AgentBridge {
    sessions: Registry<Arc<AgentSession>>,
    events: Arc<dyn EventSink>,
    config: AgentBridgeConfig,
    health: RwLock<AgentHealth>,
}

impl AgentBridge {
    /// Create the bridge, probing the agent binary once at startup.
    ///
    /// When the probe fails, every subsequent spawning call fails fast with
    /// [`AgentError::Unavailable`] instead of spawning doomed processes.
    pub async fn new(events: Arc<dyn EventSink>, config: AgentBridgeConfig) -> Arc<Self> {
        let bridge = Arc::new(Self {
            sessions: Registry::new(),
            events,
            health: RwLock::new(AgentHealth {
                available: false,
                version: None,
            }),
            config,
        });

        let health = bridge.probe().await;
        if health.available {
            info!(
                "Agent binary '{}' available (version: {})",
                bridge.config.binary,
                health.version.as_deref().unwrap_or("unknown")
            );
        } else {
            warn!(
                "Agent binary '{}' unavailable; agent calls will fail fast",
                bridge.config.binary
            );
        }
        *bridge.health.write().await = health;

        bridge
    }

    /// Probe `<binary> --version`.
    async fn probe(&self) -> AgentHealth {
        let result = Command::new(&self.config.binary)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output();

        let timeout = Duration::from_secs(self.config.probe_timeout_secs);
        match tokio::time::timeout(timeout, result).await {
            Ok(Ok(output)) if output.status.success() => AgentHealth {
                available: true,
                version: Some(String::from_utf8_lossy(&output.stdout).trim().to_string()),
            },
            _ => AgentHealth {
                available: false,
                version: None,
            },
        }
    }

    /// Liveness report: re-runs the probe and refreshes the cache.
    pub async fn health_check(&self) -> AgentHealth {
        let health = self.probe().await;
        *self.health.write().await = health.clone();
        health
    }

    async fn ensure_available(&self) -> AgentResult<()> {
        if self.health.read().await.available {
            Ok(())
        } else {
            Err(AgentError::Unavailable(self.config.binary.clone()))
        }
    }

    fn base_command(&self, working_dir: &Path, project_id: &str) -> Command {
        let mut cmd = Command::new(&self.config.binary);
        cmd.args(&self.config.args)
            .current_dir(working_dir)
            .env("DRYDOCK_PROJECT_ID", project_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Execute a one-shot agent command.
    ///
    /// Writes the command to the process's input, closes input unless
    /// `interactive`, and enforces the configured deadline: on timeout the
    /// process is force-terminated and the call fails [`AgentError::Timeout`].
    pub async fn execute(
        &self,
        project_id: &str,
        command: &str,
        working_dir: &Path,
        interactive: bool,
    ) -> AgentResult<String> {
        self.ensure_available().await?;

        let mut child = self.base_command(working_dir, project_id).spawn()?;

        let mut stdin = child.stdin.take();
        if let Some(ref mut pipe) = stdin {
            pipe.write_all(command.as_bytes()).await?;
            pipe.write_all(b"\n").await?;
            pipe.flush().await?;
        }
        // Closing input signals end-of-request; interactive callers keep the
        // pipe open until the process finishes on its own.
        let _held_stdin = if interactive { stdin } else { None };

        let deadline = Duration::from_secs(self.config.exec_timeout_secs);
        let output = match tokio::time::timeout(deadline, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                // kill_on_drop reaps the process; the handle was consumed by
                // the timed-out future.
                warn!(
                    "Agent execution for project {} timed out after {:?}",
                    project_id, deadline
                );
                return Err(AgentError::Timeout(self.config.exec_timeout_secs));
            }
        };

        if !output.status.success() {
            return Err(AgentError::Failed {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Start an interactive agent session for a project.
    ///
    /// At most one session exists per project: any existing session is
    /// terminated (gracefully, then forcefully) before the replacement is
    /// registered via atomic upsert.
    pub async fn start_interactive_session(
        self: &Arc<Self>,
        project_id: &str,
        working_dir: &Path,
    ) -> AgentResult<AgentSessionInfo> {
        self.ensure_available().await?;

        if let Some(existing) = self.sessions.remove(project_id) {
            info!(
                "Replacing existing agent session for project {}",
                project_id
            );
            self.reap(existing).await;
        }

        let mut child = self.base_command(working_dir, project_id).spawn()?;
        let pid = child.id().unwrap_or(0);
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let session = Arc::new(AgentSession {
            project_id: project_id.to_string(),
            working_dir: working_dir.to_path_buf(),
            started_at: Utc::now().to_rfc3339(),
            pid,
            is_interactive: true,
            stdin: Mutex::new(stdin),
            child: Mutex::new(Some(child)),
            ended: AtomicBool::new(false),
            last_activity: StdMutex::new(Instant::now()),
        });
        let info = session.info();

        if let Some(displaced) = self
            .sessions
            .replace(project_id.to_string(), Arc::clone(&session))
        {
            // Lost a race with a concurrent start; the newest insert wins
            // and the displaced process is torn down like any other.
            self.reap(displaced).await;
        }

        // Stdout reader: publish output chunks and detect process exit.
        {
            let bridge = Arc::clone(self);
            let session = Arc::clone(&session);
            let project_id = project_id.to_string();
            tokio::spawn(async move {
                if let Some(stdout) = stdout {
                    let mut lines = BufReader::new(stdout).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        session.touch();
                        bridge.events.publish(
                            &topic::project(&project_id),
                            Event::AgentOutput {
                                project_id: project_id.clone(),
                                stream: OutputStream::Stdout,
                                data: line,
                            },
                        );
                    }
                }
                // EOF: the process is gone. Converge into the same teardown
                // as explicit terminate; the registry entry is only removed
                // if it still belongs to this session.
                bridge
                    .sessions
                    .remove_if(&project_id, |current| Arc::ptr_eq(current, &session));
                bridge.reap(session).await;
            });
        }

        // Stderr reader: error stream chunks only.
        if let Some(stderr) = stderr {
            let events = Arc::clone(&self.events);
            let session = Arc::clone(&session);
            let project_id = project_id.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    session.touch();
                    events.publish(
                        &topic::project(&project_id),
                        Event::AgentOutput {
                            project_id: project_id.clone(),
                            stream: OutputStream::Stderr,
                            data: line,
                        },
                    );
                }
            });
        }

        info!(
            "Started agent session for project {} (pid {})",
            project_id, pid
        );
        Ok(info)
    }

    /// Write a message to a project's live session.
    ///
    /// Never creates a session implicitly; returns false when none exists
    /// or the pipe is gone.
    pub async fn send_to_session(&self, project_id: &str, text: &str) -> bool {
        let Some(session) = self.session(project_id) else {
            return false;
        };

        let mut stdin = session.stdin.lock().await;
        let Some(pipe) = stdin.as_mut() else {
            return false;
        };

        let write = async {
            pipe.write_all(text.as_bytes()).await?;
            pipe.write_all(b"\n").await?;
            pipe.flush().await
        };
        match write.await {
            Ok(()) => {
                session.touch();
                true
            }
            Err(e) => {
                debug!(
                    "Failed to write to agent session for project {}: {}",
                    project_id, e
                );
                false
            }
        }
    }

    /// Terminate a project's session. Idempotent: returns false when
    /// nothing was running.
    pub async fn terminate_session(&self, project_id: &str) -> bool {
        let Some(session) = self.sessions.remove(project_id) else {
            return false;
        };
        self.reap(session).await;
        true
    }

    /// Whether a project currently has a live session.
    pub fn has_session(&self, project_id: &str) -> bool {
        self.sessions.contains(project_id)
    }

    /// Public info for a project's session.
    pub fn get_session(&self, project_id: &str) -> Option<AgentSessionInfo> {
        self.session(project_id).map(|s| s.info())
    }

    /// Project ids whose sessions are idle longer than `threshold`.
    pub fn idle_sessions(&self, threshold: Duration) -> Vec<String> {
        let mut ids = Vec::new();
        self.sessions.for_each(|id, session| {
            if session.idle_for() > threshold {
                ids.push(id.to_string());
            }
        });
        ids
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Terminate all sessions; used during graceful shutdown.
    pub async fn shutdown(&self) {
        for (project_id, session) in self.sessions.drain() {
            debug!("Shutting down agent session for project {}", project_id);
            self.reap(session).await;
        }
    }

    fn session(&self, project_id: &str) -> Option<Arc<AgentSession>> {
        self.sessions.get(project_id).map(|s| Arc::clone(&s))
    }

    /// Single teardown path for a session, graceful then forceful.
    ///
    /// Safe to call from both the exit watcher and explicit terminate; the
    /// `ended` flag lets only the first caller act, so exactly one
    /// `agent-session-ended` event is published per session.
    async fn reap(&self, session: Arc<AgentSession>) {
        if session.ended.swap(true, Ordering::AcqRel) {
            return;
        }

        // Drop our stdin handle so a well-behaved agent sees EOF.
        session.stdin.lock().await.take();

        let child = session.child.lock().await.take();
        let Some(mut child) = child else {
            return;
        };

        if session.pid > 0 {
            #[cfg(unix)]
            unsafe {
                libc::kill(session.pid as i32, libc::SIGTERM);
            }
        }

        let grace = Duration::from_secs(self.config.term_grace_secs);
        let code = match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => status.code(),
            Ok(Err(e)) => {
                warn!(
                    "Error waiting for agent session of project {}: {}",
                    session.project_id, e
                );
                None
            }
            Err(_) => {
                warn!(
                    "Agent session for project {} ignored SIGTERM; force killing",
                    session.project_id
                );
                if let Err(e) = child.kill().await {
                    warn!("Force kill failed: {}", e);
                }
                child.wait().await.ok().and_then(|status| status.code())
            }
        };

        self.events.publish(
            &topic::project(&session.project_id),
            Event::AgentSessionEnded {
                project_id: session.project_id.clone(),
                code,
            },
        );
        info!(
            "Agent session for project {} ended (code {:?})",
            session.project_id, code
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::EventHub;

    fn config(binary: &str, args: &[&str]) -> AgentBridgeConfig {
        AgentBridgeConfig {
            binary: binary.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            exec_timeout_secs: 2,
            term_grace_secs: 1,
            probe_timeout_secs: 2,
        }
    }

    #[tokio::test]
    async fn test_unavailable_binary_fails_fast() {
        let hub = EventHub::new();
        let bridge = AgentBridge::new(hub, config("/nonexistent/agent", &[])).await;

        let dir = tempfile::tempdir().unwrap();
        let err = bridge
            .execute("p1", "hello", dir.path(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Unavailable(_)));

        let err = bridge
            .start_interactive_session("p1", dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_execute_captures_stdout() {
        let hub = EventHub::new();
        // `cat --version` probes fine and `cat` echoes its input back.
        let bridge = AgentBridge::new(hub, config("cat", &[])).await;

        let dir = tempfile::tempdir().unwrap();
        let output = bridge
            .execute("p1", "hello agent", dir.path(), false)
            .await
            .unwrap();
        assert_eq!(output.trim(), "hello agent");
    }

    #[tokio::test]
    async fn test_execute_timeout_kills_process() {
        let hub = EventHub::new();
        // `sleep 60` ignores stdin and outlives the deadline.
        let mut cfg = config("sleep", &["60"]);
        cfg.exec_timeout_secs = 1;
        let bridge = AgentBridge::new(hub, cfg).await;

        let dir = tempfile::tempdir().unwrap();
        let started = Instant::now();
        let err = bridge
            .execute("p1", "ignored", dir.path(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Timeout(1)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_single_session_per_project() {
        let hub = EventHub::new();
        let bridge = AgentBridge::new(hub, config("cat", &[])).await;

        let dir = tempfile::tempdir().unwrap();
        let first = bridge
            .start_interactive_session("p1", dir.path())
            .await
            .unwrap();
        let second = bridge
            .start_interactive_session("p1", dir.path())
            .await
            .unwrap();

        assert_ne!(first.pid, second.pid);
        assert_eq!(bridge.session_count(), 1);
        assert_eq!(bridge.get_session("p1").unwrap().pid, second.pid);

        assert!(bridge.terminate_session("p1").await);
        assert!(!bridge.terminate_session("p1").await);
        assert_eq!(bridge.session_count(), 0);
    }

    #[tokio::test]
    async fn test_send_to_session_requires_live_session() {
        let hub = EventHub::new();
        let bridge = AgentBridge::new(hub, config("cat", &[])).await;
        assert!(!bridge.send_to_session("p1", "hello").await);

        let dir = tempfile::tempdir().unwrap();
        bridge
            .start_interactive_session("p1", dir.path())
            .await
            .unwrap();
        assert!(bridge.send_to_session("p1", "hello").await);
        bridge.terminate_session("p1").await;
    }

    #[tokio::test]
    async fn test_session_output_reaches_subscribers() {
        let hub = EventHub::new();
        let bridge = AgentBridge::new(hub.clone(), config("cat", &[])).await;

        let (conn_id, mut rx) = hub.register_connection();
        hub.join(&conn_id, &topic::project("p1"));

        let dir = tempfile::tempdir().unwrap();
        bridge
            .start_interactive_session("p1", dir.path())
            .await
            .unwrap();
        assert!(bridge.send_to_session("p1", "ping").await);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let event = tokio::time::timeout(remaining, rx.recv())
                .await
                .expect("agent output before deadline")
                .expect("hub channel open");
            if let Event::AgentOutput { data, .. } = event {
                assert_eq!(data, "ping");
                break;
            }
        }

        bridge.terminate_session("p1").await;
        // Termination publishes exactly one session-ended event.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let event = tokio::time::timeout(remaining, rx.recv())
                .await
                .expect("session end before deadline")
                .expect("hub channel open");
            if matches!(event, Event::AgentSessionEnded { .. }) {
                break;
            }
        }
    }
}
