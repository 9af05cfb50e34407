//! Control socket message types
//!
//! Simple JSON-over-newline protocol. Each message is a single line of JSON followed by `\n`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taskclock::TaskInfo;

/// Requests from CLI to the running daemon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum AgentRequest {
    /// Check if the daemon is alive
    Ping,

    /// Snapshot of daemon state and pending tasks
    Status,

    /// Request orderly daemon shutdown
    Shutdown,
}

/// Responses from the daemon to the CLI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum AgentResponse {
    /// Acknowledgment
    Ok,

    /// Pong response to ping
    Pong { version: String },

    /// Status snapshot
    Status(StatusReport),

    /// Error response
    Error { message: String },
}

/// Daemon state as reported over the control socket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusReport {
    /// False once shutdown has been requested
    pub running: bool,

    pub pid: u32,

    /// When the daemon process came up
    pub started_at: DateTime<Utc>,

    /// Pending scheduled tasks
    pub task_count: usize,

    /// Pending tasks in execution order
    pub tasks: Vec<TaskInfo>,
}
