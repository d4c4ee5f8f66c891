//! Wire protocol types for drydock.
//!
//! This crate defines the event and command formats spoken over the
//! WebSocket boundary:
//!
//! ```text
//! Client <--[WS: events/commands]--> Backend (project / terminal / agent managers)
//! ```
//!
//! Events are ephemeral signals for real-time updates; they are never
//! persisted and there is no replay for late joiners. Delivery is scoped by
//! topic: a connection only receives events for topics it has joined.

pub mod commands;
pub mod events;
pub mod topic;

pub use commands::Command;
pub use events::{Event, OutputStream};
