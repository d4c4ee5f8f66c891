//! Topic naming for event routing.
//!
//! Connections subscribe to topics; managers publish to them. Two families
//! exist: per-project and per-terminal.

/// Topic carrying a project's lifecycle, agent, and exec events.
pub fn project(project_id: &str) -> String {
    format!("project:{project_id}")
}

/// Topic carrying one terminal session's output and exit events.
pub fn terminal(session_id: &str) -> String {
    format!("terminal:{session_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_names() {
        assert_eq!(project("abc"), "project:abc");
        assert_eq!(terminal("t-1"), "terminal:t-1");
    }
}
