//! Backend HTTP API capability

use async_trait::async_trait;
use eyre::{Context, Result};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// JSON-speaking HTTP capability for task actions.
///
/// Deliberately thin: url in, JSON value out. Services own their request and
/// response shapes; this seam exists so tests never open a socket.
#[async_trait]
pub trait HttpApi: Send + Sync {
    /// GET a JSON document.
    async fn get_json(&self, url: &str) -> Result<serde_json::Value>;

    /// POST a JSON body, optionally with a bearer token. An empty response
    /// body comes back as `Value::Null`.
    async fn post_json(&self, url: &str, body: &serde_json::Value, bearer: Option<&str>) -> Result<serde_json::Value>;
}

/// Production `HttpApi` backed by reqwest with a per-request timeout, so
/// every task action stays bounded.
pub struct ReqwestApi {
    http: Client,
}

impl ReqwestApi {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { http })
    }
}

#[async_trait]
impl HttpApi for ReqwestApi {
    async fn get_json(&self, url: &str) -> Result<serde_json::Value> {
        debug!(%url, "ReqwestApi::get_json: called");

        let response = self.http.get(url).send().await.context("HTTP GET failed")?;
        let status = response.status();
        if !status.is_success() {
            return Err(eyre::eyre!("GET {} returned {}", url, status));
        }

        parse_body(response).await
    }

    async fn post_json(&self, url: &str, body: &serde_json::Value, bearer: Option<&str>) -> Result<serde_json::Value> {
        debug!(%url, bearer = bearer.is_some(), "ReqwestApi::post_json: called");

        let mut request = self.http.post(url).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.context("HTTP POST failed")?;
        let status = response.status();
        if !status.is_success() {
            return Err(eyre::eyre!("POST {} returned {}", url, status));
        }

        parse_body(response).await
    }
}

async fn parse_body(response: reqwest::Response) -> Result<serde_json::Value> {
    let text = response.text().await.context("Failed to read response body")?;
    if text.trim().is_empty() {
        return Ok(serde_json::Value::Null);
    }
    serde_json::from_str(&text).context("Failed to parse response JSON")
}
