//! Local agent RPC capability

use async_trait::async_trait;
use eyre::Result;

use crate::ipc::{AgentClient, StatusReport};

/// RPC against the local agent's control socket, used by services that report
/// on the agent itself.
#[async_trait]
pub trait AgentRpc: Send + Sync {
    /// Liveness check; returns the agent version.
    async fn ping(&self) -> Result<String>;

    /// Full status snapshot.
    async fn status(&self) -> Result<StatusReport>;
}

#[async_trait]
impl AgentRpc for AgentClient {
    async fn ping(&self) -> Result<String> {
        AgentClient::ping(self).await
    }

    async fn status(&self) -> Result<StatusReport> {
        AgentClient::status(self).await
    }
}
