//! Access token cache and persistence
//!
//! The backend token is shared by every service that authenticates, refreshed
//! ahead of expiry by the access-token service, and persisted so a restart
//! does not burn a refresh.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Seconds before expiry at which a token counts as stale and gets refreshed.
pub const EXPIRY_MARGIN_SECS: i64 = 3_600;

/// A backend access token, in the shape the token endpoint returns and the
/// `access-token.json` file stores.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub issued_at_seconds: i64,
    pub expires_at_seconds: i64,
}

impl AccessToken {
    /// Inside the refresh margin (or past expiry).
    pub fn needs_refresh(&self, now: i64) -> bool {
        now >= self.expires_at_seconds - EXPIRY_MARGIN_SECS
    }

    /// Past expiry; unusable for auth.
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at_seconds
    }
}

/// Shared in-memory token slot. Cheap clone; writers are the access-token
/// service, readers are whoever needs a bearer.
#[derive(Clone, Default)]
pub struct TokenCache {
    inner: Arc<RwLock<Option<AccessToken>>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the cache from the persisted token file. A missing or unreadable
    /// file just leaves the cache empty.
    pub fn load(path: &Path) -> Self {
        match read_token_file(path) {
            Ok(Some(token)) => {
                debug!(expires_at = token.expires_at_seconds, "TokenCache::load: loaded persisted token");
                Self {
                    inner: Arc::new(RwLock::new(Some(token))),
                }
            }
            Ok(None) => Self::new(),
            Err(error) => {
                warn!(%error, path = %path.display(), "Failed to load persisted token, starting empty");
                Self::new()
            }
        }
    }

    pub async fn current(&self) -> Option<AccessToken> {
        self.inner.read().await.clone()
    }

    pub async fn store(&self, token: AccessToken) {
        *self.inner.write().await = Some(token);
    }

    /// Token string usable for bearer auth right now. A token inside the
    /// refresh margin is still valid here; only expiry disqualifies it.
    pub async fn bearer(&self) -> Option<String> {
        let now = Utc::now().timestamp();
        self.inner
            .read()
            .await
            .as_ref()
            .filter(|token| !token.is_expired(now))
            .map(|token| token.token.clone())
    }
}

/// Read the persisted token, `None` when the file is absent.
pub fn read_token_file(path: &Path) -> Result<Option<AccessToken>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path).context("Failed to read token file")?;
    let token: AccessToken = serde_json::from_str(&content).context("Failed to parse token file")?;
    Ok(Some(token))
}

/// Persist the token next to the device id.
pub fn write_token_file(path: &Path, token: &AccessToken) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create data directory")?;
    }
    let content = serde_json::to_string_pretty(token).context("Failed to serialize token")?;
    std::fs::write(path, content).context("Failed to write token file")?;
    Ok(())
}
