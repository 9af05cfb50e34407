//! agentd - device-resident service agent
//!
//! agentd keeps a device talking to its backend: it collects and publishes
//! monitoring reports, posts status, refreshes the shared access token, and
//! pulls remote config overrides. All of that is periodic work, driven by the
//! taskclock scheduler; a service here is nothing more than its first
//! scheduled task plus whatever that task reschedules.
//!
//! # Core Concepts
//!
//! - **One timing loop**: every service runs as a task on one [`taskclock`]
//!   scheduler; nothing spawns its own timer thread
//! - **Capabilities, not globals**: task actions capture trait objects for
//!   HTTP, publishing, process execution, and agent RPC, so tests swap in
//!   mocks and no service reads process-wide state
//! - **Config is live**: services snapshot [`config::SharedConfig`] at each
//!   reschedule; overrides from SIGHUP or config sync apply next cycle
//!
//! # Modules
//!
//! - [`services`] - monitoring, device status, access token, config sync
//! - [`capabilities`] - trait seams the services consume
//! - [`config`] - configuration types, loading, shared snapshot
//! - [`ipc`] - control socket between the CLI and the daemon
//! - [`daemon`] - PID file and process lifecycle management
//! - [`cli`] - command-line interface

pub mod capabilities;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod identity;
pub mod ipc;
pub mod services;
pub mod token;

// Re-export commonly used types
pub use capabilities::{AgentRpc, HttpApi, ProcessRunner, Publisher};
pub use config::{Config, SharedConfig};
pub use token::{AccessToken, TokenCache};
