//! PTY pool: interactive shell sessions, one-to-many per project.
//!
//! Each session owns a pseudo-terminal running the configured shell. A
//! blocking reader thread feeds a per-session dispatcher task which stamps
//! activity and publishes output chunks in read order; a blocking wait
//! thread reports process exit. Explicit kill and spontaneous exit converge
//! into the same finalize routine, so there is exactly one bookkeeping
//! path out of the registry.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, info, warn};
use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use drydock_protocol::{topic, Event};

use crate::registry::Registry;
use crate::ws::EventSink;

/// Default terminal dimensions.
const DEFAULT_ROWS: u16 = 24;
const DEFAULT_COLS: u16 = 80;

/// Control bytes for interrupt (ETX) and clear (form feed).
const ETX: u8 = 0x03;
const FORM_FEED: u8 = 0x0c;

/// Result type for PTY operations that can fail.
pub type PtyResult<T> = Result<T, PtyError>;

/// Errors opening a terminal session.
#[derive(Debug, Error)]
pub enum PtyError {
    /// Opening the PTY or spawning the shell failed.
    #[error("failed to spawn terminal: {0}")]
    Spawn(String),

    /// Generic IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// PTY pool configuration.
#[derive(Debug, Clone)]
pub struct PtyPoolConfig {
    /// Shell binary; falls back to `$SHELL`, then `/bin/bash`.
    pub shell: Option<String>,
    /// Grace period between SIGTERM and forced removal on kill.
    pub kill_grace_secs: u64,
}

impl Default for PtyPoolConfig {
    fn default() -> Self {
        Self {
            shell: None,
            kill_grace_secs: 5,
        }
    }
}

/// Public view of a terminal session.
#[derive(Debug, Clone, Serialize)]
pub struct TerminalInfo {
    pub session_id: String,
    pub project_id: String,
    pub working_dir: PathBuf,
    pub start_time: String,
    pub is_active: bool,
}

/// A live terminal session.
struct PtySession {
    session_id: String,
    project_id: String,
    working_dir: PathBuf,
    start_time: String,
    /// Master side, kept for resize.
    master: StdMutex<Box<dyn MasterPty + Send>>,
    /// Input bytes consumed by the blocking writer thread.
    input_tx: mpsc::Sender<Vec<u8>>,
    pid: Option<u32>,
    is_active: AtomicBool,
    last_activity: StdMutex<Instant>,
}

impl PtySession {
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

    /// Signal the shell's process group.
    ///
    /// portable_pty calls setsid() when spawning, so the child leads its
    /// own process group and sub-processes receive the signal too.
    fn signal(&self, signal: i32) {
        let Some(pid) = self.pid else { return };
        if pid == 0 || pid > i32::MAX as u32 {
            return;
        }
        #[cfg(unix)]
        unsafe {
            libc::kill(-(pid as i32), signal);
        }
    }

    fn info(&self) -> TerminalInfo {
        TerminalInfo {
            session_id: self.session_id.clone(),
            project_id: self.project_id.clone(),
            working_dir: self.working_dir.clone(),
            start_time: self.start_time.clone(),
            is_active: self.is_active.load(Ordering::Acquire),
        }
    }
}

/// Pool of terminal sessions across all projects.
pub struct PtyPool {
    sessions: Registry<Arc<PtySession>>,
    events: Arc<dyn EventSink>,
    config: PtyPoolConfig,
}

impl PtyPool {
    /// Create a new pool.
    pub fn new(events: Arc<dyn EventSink>, config: PtyPoolConfig) -> Arc<Self> {
        Arc::new(Self {
            sessions: Registry::new(),
            events,
            config,
        })
    }

    fn shell_binary(&self) -> String {
        self.config
            .shell
            .clone()
            .or_else(|| std::env::var("SHELL").ok())
            .unwrap_or_else(|| "/bin/bash".to_string())
    }

    /// Open a new terminal session for a project.
    pub async fn open(
        self: &Arc<Self>,
        project_id: &str,
        working_dir: &Path,
    ) -> PtyResult<TerminalInfo> {
        let session_id = Uuid::new_v4().to_string();

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: DEFAULT_ROWS,
                cols: DEFAULT_COLS,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::Spawn(format!("openpty: {e}")))?;

        let shell = self.shell_binary();
        let mut cmd = CommandBuilder::new(&shell);
        cmd.cwd(working_dir);
        cmd.env("DRYDOCK_PROJECT_ID", project_id);
        cmd.env("TERM", "xterm-256color");

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::Spawn(format!("spawning {shell}: {e}")))?;
        let pid = child.process_id();

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::Spawn(format!("cloning reader: {e}")))?;
        let mut writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::Spawn(format!("taking writer: {e}")))?;

        let (chunk_tx, mut chunk_rx) = mpsc::channel::<Vec<u8>>(256);
        let (input_tx, mut input_rx) = mpsc::channel::<Vec<u8>>(256);
        let (exit_tx, exit_rx) = oneshot::channel::<i32>();

        let session = Arc::new(PtySession {
            session_id: session_id.clone(),
            project_id: project_id.to_string(),
            working_dir: working_dir.to_path_buf(),
            start_time: Utc::now().to_rfc3339(),
            master: StdMutex::new(pair.master),
            input_tx,
            pid,
            is_active: AtomicBool::new(true),
            last_activity: StdMutex::new(Instant::now()),
        });
        let info = session.info();
        self.sessions.insert(session_id.clone(), Arc::clone(&session));

        // Blocking reader: PTY master -> chunk channel, in read order.
        tokio::task::spawn_blocking(move || {
            use std::io::Read;
            let mut buffer = [0u8; 8192];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(count) => {
                        if chunk_tx.blocking_send(buffer[..count].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        // Blocking writer: input channel -> PTY master.
        tokio::task::spawn_blocking(move || {
            use std::io::Write;
            while let Some(payload) = input_rx.blocking_recv() {
                if writer.write_all(&payload).is_err() {
                    break;
                }
                if writer.flush().is_err() {
                    break;
                }
            }
        });

        // Blocking exit monitor: reaps the child and reports its code.
        tokio::task::spawn_blocking(move || {
            let code = child.wait().map(|status| status.exit_code() as i32).unwrap_or(-1);
            let _ = exit_tx.send(code);
        });

        // Dispatcher: chunk channel -> event hub, stamping activity.
        {
            let session = Arc::clone(&session);
            let events = Arc::clone(&self.events);
            let session_id = session_id.clone();
            tokio::spawn(async move {
                while let Some(chunk) = chunk_rx.recv().await {
                    session.touch();
                    events.publish(
                        &topic::terminal(&session_id),
                        Event::TerminalOutput {
                            session_id: session_id.clone(),
                            data: String::from_utf8_lossy(&chunk).to_string(),
                        },
                    );
                }
            });
        }

        // Exit watcher: converges spontaneous exit and kill into finalize.
        {
            let pool = Arc::clone(self);
            let session_id = session_id.clone();
            tokio::spawn(async move {
                let code = exit_rx.await.unwrap_or(-1);
                pool.finalize(&session_id, code);
            });
        }

        info!(
            "Opened terminal {} for project {} (pid {:?})",
            session_id, project_id, pid
        );
        Ok(info)
    }

    /// Write bytes to a session's input. Returns false when the session is
    /// missing or inactive.
    pub fn write(&self, session_id: &str, data: &[u8]) -> bool {
        let Some(session) = self.session(session_id) else {
            return false;
        };
        if !session.is_active.load(Ordering::Acquire) {
            return false;
        }
        session.touch();
        session.input_tx.try_send(data.to_vec()).is_ok()
    }

    /// Resize a session's terminal. Returns false when missing or inactive.
    pub fn resize(&self, session_id: &str, cols: u16, rows: u16) -> bool {
        let Some(session) = self.session(session_id) else {
            return false;
        };
        if !session.is_active.load(Ordering::Acquire) {
            return false;
        }
        let size = PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        };
        session
            .master
            .lock()
            .map(|master| master.resize(size).is_ok())
            .unwrap_or(false)
    }

    /// Send an interrupt (Ctrl-C) to a session.
    pub fn interrupt(&self, session_id: &str) -> bool {
        self.write(session_id, &[ETX])
    }

    /// Clear a session's screen (Ctrl-L).
    pub fn clear(&self, session_id: &str) -> bool {
        self.write(session_id, &[FORM_FEED])
    }

    /// Kill a session.
    ///
    /// The session is marked inactive immediately so its id cannot accept
    /// further input, but registry removal happens only on reported exit or
    /// after the grace window, whichever comes first.
    pub fn kill(self: &Arc<Self>, session_id: &str) -> bool {
        let Some(session) = self.session(session_id) else {
            return false;
        };

        session.is_active.store(false, Ordering::Release);
        session.signal(libc::SIGTERM);
        debug!("Sent SIGTERM to terminal {}", session_id);

        let pool = Arc::clone(self);
        let grace = Duration::from_secs(self.config.kill_grace_secs);
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(session) = pool.session(&session_id) {
                warn!(
                    "Terminal {} did not exit within {:?}; force killing",
                    session_id, grace
                );
                session.signal(libc::SIGKILL);
                // One more beat for the exit monitor to report, then make
                // sure the registry entry is gone either way.
                tokio::time::sleep(Duration::from_millis(500)).await;
                pool.finalize(&session_id, -1);
            }
        });

        true
    }

    /// Kill every session belonging to a project; returns how many.
    pub async fn kill_for_project(self: &Arc<Self>, project_id: &str) -> usize {
        let ids: Vec<String> = self.sessions_for_project(project_id);
        let mut killed = 0;
        for id in ids {
            if self.kill(&id) {
                killed += 1;
            }
        }
        killed
    }

    /// Session ids belonging to a project.
    pub fn sessions_for_project(&self, project_id: &str) -> Vec<String> {
        let mut ids = Vec::new();
        self.sessions.for_each(|id, session| {
            if session.project_id == project_id {
                ids.push(id.to_string());
            }
        });
        ids
    }

    /// Public info for a session.
    pub fn get(&self, session_id: &str) -> Option<TerminalInfo> {
        self.session(session_id).map(|s| s.info())
    }

    /// Session ids idle longer than `threshold`.
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
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the pool has no sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Kill all sessions; used during graceful shutdown.
    pub fn shutdown(self: &Arc<Self>) {
        for id in self.sessions.keys() {
            self.kill(&id);
        }
    }

    /// Single exit path: remove from the registry and announce the exit.
    /// Idempotent; the second caller finds the registry entry gone.
    fn finalize(&self, session_id: &str, code: i32) {
        if let Some(session) = self.sessions.remove(session_id) {
            session.is_active.store(false, Ordering::Release);
            self.events.publish(
                &topic::terminal(session_id),
                Event::TerminalExit {
                    session_id: session_id.to_string(),
                    code,
                },
            );
            info!("Terminal {} exited with code {}", session_id, code);
        }
    }

    fn session(&self, session_id: &str) -> Option<Arc<PtySession>> {
        self.sessions.get(session_id).map(|s| Arc::clone(&s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::EventHub;
    use drydock_protocol::Event;

    fn test_pool(grace_secs: u64) -> (Arc<PtyPool>, Arc<EventHub>) {
        let hub = EventHub::new();
        let pool = PtyPool::new(
            hub.clone(),
            PtyPoolConfig {
                shell: Some("/bin/sh".to_string()),
                kill_grace_secs: grace_secs,
            },
        );
        (pool, hub)
    }

    #[tokio::test]
    async fn test_ops_on_missing_session_return_false() {
        let (pool, _hub) = test_pool(1);
        assert!(!pool.write("nope", b"ls\n"));
        assert!(!pool.resize("nope", 120, 40));
        assert!(!pool.interrupt("nope"));
        assert!(!pool.clear("nope"));
        assert!(!pool.kill("nope"));
    }

    #[tokio::test]
    async fn test_open_write_and_output_order() {
        let (pool, hub) = test_pool(2);
        let dir = tempfile::tempdir().unwrap();
        let info = pool.open("p1", dir.path()).await.unwrap();

        let (conn_id, mut rx) = hub.register_connection();
        hub.join(&conn_id, &topic::terminal(&info.session_id));

        assert!(pool.write(&info.session_id, b"echo first; echo second\n"));

        // Collect output until both markers appear, asserting order.
        let mut collected = String::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let event = tokio::time::timeout(remaining, rx.recv())
                .await
                .expect("terminal output before deadline")
                .expect("hub channel open");
            if let Event::TerminalOutput { data, .. } = event {
                collected.push_str(&data);
            }
            if collected.contains("second") {
                break;
            }
        }
        let first_at = collected.find("first").expect("first marker");
        let second_at = collected.rfind("second").expect("second marker");
        assert!(first_at < second_at);

        pool.kill(&info.session_id);
    }

    #[tokio::test]
    async fn test_kill_converges_to_single_exit() {
        let (pool, hub) = test_pool(2);
        let dir = tempfile::tempdir().unwrap();
        let info = pool.open("p1", dir.path()).await.unwrap();

        let (conn_id, mut rx) = hub.register_connection();
        hub.join(&conn_id, &topic::terminal(&info.session_id));

        assert!(pool.kill(&info.session_id));
        // Marked inactive immediately: further input is refused.
        assert!(!pool.write(&info.session_id, b"echo nope\n"));

        // Exactly one terminal_exit arrives.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        let mut exits = 0;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(Event::TerminalExit { .. })) => {
                    exits += 1;
                    // Drain briefly to catch a duplicate.
                    let extra =
                        tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
                    if let Ok(Some(Event::TerminalExit { .. })) = extra {
                        exits += 1;
                    }
                    break;
                }
                Ok(Some(_)) => continue,
                _ => break,
            }
        }
        assert_eq!(exits, 1);
        assert!(pool.get(&info.session_id).is_none());

        // Killing again is a no-op.
        assert!(!pool.kill(&info.session_id));
    }

    #[tokio::test]
    async fn test_kill_for_project_only_touches_that_project() {
        let (pool, _hub) = test_pool(2);
        let dir = tempfile::tempdir().unwrap();
        let a = pool.open("p1", dir.path()).await.unwrap();
        let b = pool.open("p2", dir.path()).await.unwrap();

        let killed = pool.kill_for_project("p1").await;
        assert_eq!(killed, 1);
        assert!(pool.get(&b.session_id).is_some());

        pool.kill(&b.session_id);
        let _ = a;
    }
}
