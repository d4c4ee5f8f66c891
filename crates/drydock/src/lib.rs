//! Drydock: a multi-tenant AI workspace backend.
//!
//! Orchestrates three classes of long-lived external processes per project:
//! one isolated container, any number of interactive PTY shell sessions,
//! and at most one external coding-agent session. Output from all of them
//! fans out in real time to WebSocket subscribers by topic.

pub mod agent;
pub mod api;
pub mod container;
pub mod project;
pub mod pty;
pub mod reaper;
pub mod registry;
pub mod ws;
