//! Report publishing capability

use std::sync::Arc;

use async_trait::async_trait;
use eyre::Result;
use tracing::debug;

use crate::config::SharedConfig;
use crate::token::TokenCache;

use super::http::HttpApi;

/// Topic-addressed publish seam for outbound reports. Broker details stay on
/// the other side of this trait.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: &serde_json::Value) -> Result<()>;
}

/// Publisher that POSTs report envelopes to the backend ingest endpoint,
/// `{base-url}/ingest/{topic}`, with the current bearer token when one is
/// cached. Base URL is read fresh per publish so config changes apply.
pub struct HttpPublisher {
    api: Arc<dyn HttpApi>,
    config: SharedConfig,
    tokens: TokenCache,
}

impl HttpPublisher {
    pub fn new(api: Arc<dyn HttpApi>, config: SharedConfig, tokens: TokenCache) -> Self {
        Self { api, config, tokens }
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    async fn publish(&self, topic: &str, payload: &serde_json::Value) -> Result<()> {
        let config = self.config.snapshot().await;
        let url = format!("{}/ingest/{}", config.api.base_url.trim_end_matches('/'), topic);
        let bearer = self.tokens.bearer().await;

        debug!(%topic, %url, "HttpPublisher::publish: posting report");
        self.api.post_json(&url, payload, bearer.as_deref()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::token::AccessToken;
    use chrono::Utc;
    use std::sync::Mutex as StdMutex;

    /// Records every post it sees.
    struct RecordingApi {
        posts: StdMutex<Vec<(String, serde_json::Value, Option<String>)>>,
    }

    #[async_trait]
    impl HttpApi for RecordingApi {
        async fn get_json(&self, _url: &str) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }

        async fn post_json(
            &self,
            url: &str,
            body: &serde_json::Value,
            bearer: Option<&str>,
        ) -> Result<serde_json::Value> {
            self.posts
                .lock()
                .unwrap()
                .push((url.to_string(), body.clone(), bearer.map(str::to_string)));
            Ok(serde_json::Value::Null)
        }
    }

    #[tokio::test]
    async fn test_publish_builds_ingest_url_and_passes_bearer() {
        let api = Arc::new(RecordingApi {
            posts: StdMutex::new(Vec::new()),
        });

        let mut config = Config::default();
        config.api.base_url = "https://api.example.com/".to_string();

        let tokens = TokenCache::new();
        tokens
            .store(AccessToken {
                token: "tok-123".to_string(),
                issued_at_seconds: Utc::now().timestamp(),
                expires_at_seconds: Utc::now().timestamp() + 7_200,
            })
            .await;

        let publisher = HttpPublisher::new(api.clone(), SharedConfig::new(config), tokens);
        publisher
            .publish("monitoring/device-data", &serde_json::json!({"x": 1}))
            .await
            .unwrap();

        let posts = api.posts.lock().unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].0, "https://api.example.com/ingest/monitoring/device-data");
        assert_eq!(posts[0].1, serde_json::json!({"x": 1}));
        assert_eq!(posts[0].2.as_deref(), Some("tok-123"));
    }

    #[tokio::test]
    async fn test_publish_without_token_omits_bearer() {
        let api = Arc::new(RecordingApi {
            posts: StdMutex::new(Vec::new()),
        });

        let publisher = HttpPublisher::new(api.clone(), SharedConfig::new(Config::default()), TokenCache::new());
        publisher.publish("t", &serde_json::json!({})).await.unwrap();

        let posts = api.posts.lock().unwrap();
        assert_eq!(posts[0].2, None);
    }
}
