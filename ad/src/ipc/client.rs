//! Control socket client
//!
//! Used by the CLI to talk to a running daemon, and handed to task actions as
//! the local-agent RPC capability.

use std::path::PathBuf;
use std::time::Duration;

use eyre::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

use super::get_socket_path;
use super::messages::{AgentRequest, AgentResponse, StatusReport};

/// Default timeout for control socket operations
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum message size; status responses carry the pending task list
const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Client for the daemon control socket
#[derive(Debug, Clone)]
pub struct AgentClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl Default for AgentClient {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentClient {
    /// Create a new client with the default socket path
    pub fn new() -> Self {
        Self {
            socket_path: get_socket_path(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Create a client with a custom socket path (for testing)
    pub fn with_socket_path(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set a custom timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check if the daemon socket exists
    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    /// Check if the daemon is alive and get its version
    pub async fn ping(&self) -> Result<String> {
        debug!("AgentClient: pinging daemon");
        let response = self.send_request(AgentRequest::Ping).await?;
        match response {
            AgentResponse::Pong { version } => Ok(version),
            AgentResponse::Error { message } => Err(eyre::eyre!("Daemon error: {}", message)),
            _ => Err(eyre::eyre!("Unexpected response")),
        }
    }

    /// Fetch the daemon's status snapshot
    pub async fn status(&self) -> Result<StatusReport> {
        debug!("AgentClient: requesting status");
        let response = self.send_request(AgentRequest::Status).await?;
        match response {
            AgentResponse::Status(report) => Ok(report),
            AgentResponse::Error { message } => Err(eyre::eyre!("Daemon error: {}", message)),
            _ => Err(eyre::eyre!("Unexpected response")),
        }
    }

    /// Request the daemon to shut down gracefully
    pub async fn shutdown(&self) -> Result<()> {
        debug!("AgentClient: requesting daemon shutdown");
        let response = self.send_request(AgentRequest::Shutdown).await?;
        match response {
            AgentResponse::Ok => Ok(()),
            AgentResponse::Error { message } => Err(eyre::eyre!("Daemon error: {}", message)),
            _ => Err(eyre::eyre!("Unexpected response")),
        }
    }

    /// Send a request and wait for the response
    async fn send_request(&self, request: AgentRequest) -> Result<AgentResponse> {
        debug!(?self.socket_path, ?request, "AgentClient: sending request");

        // Connect with timeout
        let stream = tokio::time::timeout(self.timeout, UnixStream::connect(&self.socket_path))
            .await
            .context("Connection timeout")?
            .context("Failed to connect to daemon socket")?;

        self.send_on_stream(stream, request).await
    }

    /// Send a request on an existing stream (extracted for testing)
    async fn send_on_stream(&self, mut stream: UnixStream, request: AgentRequest) -> Result<AgentResponse> {
        let request_json = serde_json::to_string(&request).context("Failed to serialize request")?;

        if request_json.len() > MAX_MESSAGE_SIZE {
            return Err(eyre::eyre!("Request too large: {} bytes", request_json.len()));
        }

        // Send request with newline
        tokio::time::timeout(self.timeout, async {
            stream
                .write_all(request_json.as_bytes())
                .await
                .context("Failed to write request")?;
            stream.write_all(b"\n").await.context("Failed to write newline")?;
            stream.flush().await.context("Failed to flush stream")?;
            Ok::<_, eyre::Error>(())
        })
        .await
        .context("Write timeout")??;

        // Read response with size limit
        let mut reader = BufReader::new(&mut stream);
        let mut response_line = String::new();

        tokio::time::timeout(self.timeout, async {
            let bytes_read = reader
                .read_line(&mut response_line)
                .await
                .context("Failed to read response")?;

            if bytes_read > MAX_MESSAGE_SIZE {
                return Err(eyre::eyre!("Response too large: {} bytes", bytes_read));
            }

            Ok::<_, eyre::Error>(())
        })
        .await
        .context("Read timeout")??;

        let response: AgentResponse =
            serde_json::from_str(response_line.trim()).context("Failed to parse daemon response")?;

        debug!(?response, "AgentClient: received response");
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_client_default() {
        let client = AgentClient::default();
        assert!(client.socket_path.ends_with("agent.sock"));
    }

    #[test]
    fn test_client_with_custom_path() {
        let path = PathBuf::from("/custom/path/agent.sock");
        let client = AgentClient::with_socket_path(path.clone());
        assert_eq!(client.socket_path, path);
    }

    #[test]
    fn test_client_with_timeout() {
        let client = AgentClient::new().with_timeout(Duration::from_secs(10));
        assert_eq!(client.timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_socket_exists_false() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nonexistent.sock");
        let client = AgentClient::with_socket_path(path);
        assert!(!client.socket_exists());
    }
}
