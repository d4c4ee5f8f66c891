//! Events sent from the backend to subscribed connections.

use serde::{Deserialize, Serialize};

/// Which output stream of the agent process a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Events sent from backend to clients over WebSocket.
///
/// Delivery is at-most-once and best-effort; ordering is guaranteed only
/// within a single upstream source (one terminal session, one agent
/// process).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Connection established.
    Connected,

    /// Heartbeat/keepalive ping.
    Ping,

    /// Error surfaced to this connection.
    Error { message: String },

    /// A project was created and its container started.
    ProjectCreated { project_id: String, name: String },

    /// A project, its container and its storage were removed.
    ProjectDeleted { project_id: String },

    /// A chunk of terminal output, in write order within the session.
    TerminalOutput { session_id: String, data: String },

    /// A terminal session ended.
    TerminalExit { session_id: String, code: i32 },

    /// A chunk of output from an interactive agent session.
    AgentOutput {
        project_id: String,
        stream: OutputStream,
        data: String,
    },

    /// An interactive agent session ended.
    AgentSessionEnded {
        project_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<i32>,
    },

    /// A command executed inside the project container succeeded.
    CommandExecuted {
        project_id: String,
        command: String,
        output: String,
    },

    /// A command executed inside the project container failed.
    CommandFailed {
        project_id: String,
        command: String,
        error: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tagging() {
        let event = Event::TerminalOutput {
            session_id: "t-1".to_string(),
            data: "hi\n".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "terminal_output");
        assert_eq!(json["session_id"], "t-1");
    }

    #[test]
    fn test_agent_session_ended_omits_missing_code() {
        let event = Event::AgentSessionEnded {
            project_id: "p".to_string(),
            code: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("code"));
    }
}
