//! Control socket for the running daemon
//!
//! Unix Domain Socket IPC between the `ad` CLI and the daemon. The CLI uses it
//! for ping/status/shutdown; task actions reuse the same client as their
//! local-agent RPC capability.

use std::path::PathBuf;

pub mod client;
pub mod listener;
pub mod messages;

pub use client::AgentClient;
pub use messages::{AgentRequest, AgentResponse, StatusReport};

/// Get the daemon control socket path
///
/// Uses the same base directory as other daemon files (PID file, version file).
pub fn get_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("agentd")
        .join("agent.sock")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_path_ends_with_agent_sock() {
        let path = get_socket_path();
        assert!(path.ends_with("agentd/agent.sock"));
    }
}
