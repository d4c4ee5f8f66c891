//! Commands sent from clients to the backend.

use serde::{Deserialize, Serialize};

/// Commands a connection may send over WebSocket.
///
/// All state-changing operations go through the REST surface; the socket
/// only manages topic membership and keepalive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Subscribe this connection to a topic.
    Join { topic: String },

    /// Unsubscribe this connection from a topic.
    Leave { topic: String },

    /// Pong response to a ping.
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_parsing() {
        let cmd: Command = serde_json::from_str(r#"{"type":"join","topic":"project:p1"}"#).unwrap();
        match cmd {
            Command::Join { topic } => assert_eq!(topic, "project:p1"),
            _ => panic!("expected join"),
        }
    }
}
