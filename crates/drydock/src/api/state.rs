//! Shared application state for the API layer.

use std::sync::Arc;

use crate::agent::AgentBridge;
use crate::container::ContainerRuntimeApi;
use crate::project::ProjectService;
use crate::pty::PtyPool;
use crate::ws::EventHub;

/// Application state shared across request handlers.
#[derive(Clone)]
pub struct AppState {
    pub projects: Arc<ProjectService>,
    pub ptys: Arc<PtyPool>,
    pub agent: Arc<AgentBridge>,
    pub hub: Arc<EventHub>,
    pub runtime: Arc<dyn ContainerRuntimeApi>,
}

impl AppState {
    /// Create new application state.
    pub fn new(
        projects: Arc<ProjectService>,
        ptys: Arc<PtyPool>,
        agent: Arc<AgentBridge>,
        hub: Arc<EventHub>,
        runtime: Arc<dyn ContainerRuntimeApi>,
    ) -> Self {
        Self {
            projects,
            ptys,
            agent,
            hub,
            runtime,
        }
    }
}
