//! External coding-agent bridge.

mod bridge;
mod error;

pub use bridge::{AgentBridge, AgentBridgeConfig, AgentHealth, AgentSessionInfo};
pub use error::{AgentError, AgentResult};
