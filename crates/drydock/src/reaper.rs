//! Idle reaper: periodic eviction of idle sessions and connections.
//!
//! Advisory only. Each sweep runs to completion before the next interval is
//! armed, so sweeps never overlap; eviction goes through each manager's own
//! kill/terminate/unregister path.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::sync::broadcast;

use crate::agent::AgentBridge;
use crate::pty::PtyPool;
use crate::ws::EventHub;

/// Idle reaper configuration.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// Seconds between sweeps.
    pub interval_secs: u64,
    /// Idle threshold after which a session/connection is evicted.
    pub idle_timeout_secs: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            idle_timeout_secs: 1800,
        }
    }
}

/// Background sweep over PTY sessions, agent sessions and connections.
pub struct IdleReaper {
    ptys: Arc<PtyPool>,
    agent: Arc<AgentBridge>,
    hub: Arc<EventHub>,
    config: ReaperConfig,
}

impl IdleReaper {
    /// Create a new reaper.
    pub fn new(
        ptys: Arc<PtyPool>,
        agent: Arc<AgentBridge>,
        hub: Arc<EventHub>,
        config: ReaperConfig,
    ) -> Self {
        Self {
            ptys,
            agent,
            hub,
            config,
        }
    }

    /// Run the sweep loop until the shutdown signal fires.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let interval = Duration::from_secs(self.config.interval_secs);
        info!(
            "Idle reaper running (interval {:?}, timeout {}s)",
            interval, self.config.idle_timeout_secs
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.sweep().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Idle reaper shutting down");
                    break;
                }
            }
        }
    }

    /// One full sweep across all three managers.
    pub async fn sweep(&self) {
        let threshold = Duration::from_secs(self.config.idle_timeout_secs);

        let mut terminals = 0;
        for session_id in self.ptys.idle_sessions(threshold) {
            debug!("Evicting idle terminal {}", session_id);
            if self.ptys.kill(&session_id) {
                terminals += 1;
            }
        }

        let mut agents = 0;
        for project_id in self.agent.idle_sessions(threshold) {
            debug!("Evicting idle agent session for project {}", project_id);
            if self.agent.terminate_session(&project_id).await {
                agents += 1;
            }
        }

        let mut connections = 0;
        for conn_id in self.hub.idle_connections(threshold) {
            debug!("Evicting idle connection {}", conn_id);
            self.hub.unregister_connection(&conn_id);
            connections += 1;
        }

        if terminals + agents + connections > 0 {
            info!(
                "Idle sweep evicted {} terminal(s), {} agent session(s), {} connection(s)",
                terminals, agents, connections
            );
        } else {
            debug!("Idle sweep evicted nothing");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentBridgeConfig;
    use crate::pty::PtyPoolConfig;
    use crate::ws::EventHub;

    #[tokio::test]
    async fn test_sweep_evicts_idle_connections() {
        let hub = EventHub::new();
        let pool = PtyPool::new(hub.clone(), PtyPoolConfig::default());
        let bridge = AgentBridge::new(
            hub.clone(),
            AgentBridgeConfig {
                binary: "/nonexistent".to_string(),
                ..Default::default()
            },
        )
        .await;

        let (_conn_id, _rx) = hub.register_connection();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let reaper = IdleReaper::new(
            pool,
            bridge,
            hub.clone(),
            ReaperConfig {
                interval_secs: 300,
                idle_timeout_secs: 0,
            },
        );
        reaper.sweep().await;
        assert!(hub.idle_connections(Duration::from_secs(0)).is_empty());
    }

    #[tokio::test]
    async fn test_sweep_evicts_idle_terminals() {
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
                binary: "/nonexistent".to_string(),
                ..Default::default()
            },
        )
        .await;

        let dir = tempfile::tempdir().unwrap();
        let info = pool.open("p1", dir.path()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let reaper = IdleReaper::new(
            pool.clone(),
            bridge,
            hub,
            ReaperConfig {
                interval_secs: 300,
                idle_timeout_secs: 0,
            },
        );
        reaper.sweep().await;

        // Kill is asynchronous past the SIGTERM; wait for the registry to drain.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while pool.get(&info.session_id).is_some() {
            assert!(tokio::time::Instant::now() < deadline, "terminal not reaped");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}
