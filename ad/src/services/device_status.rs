//! Device status service
//!
//! Self-rescheduling one-shot: POST the device's view of itself to the
//! backend, record the status the backend assigns in return, and schedule the
//! next report at the current `device-status` interval. The first successful
//! post clears the on-boot flag; everything after that reports a steady-state
//! device.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use eyre::{Context, Result};
use serde_json::json;
use taskclock::{ActionFuture, Scheduler, SchedulerError, TaskId};
use tracing::{debug, warn};

use crate::capabilities::{AgentRpc, HttpApi};
use crate::config::SharedConfig;
use crate::token::TokenCache;

use super::due_at;

pub const LABEL: &str = "device-status";

const STATUS_ENDPOINT: &str = "/api/device-status";

/// Status the backend assigns to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceStatus {
    Online,
    Offline,
    #[default]
    Unknown,
}

impl DeviceStatus {
    /// Map the backend's `deviceStatus` integer. Anything unrecognized is
    /// `Unknown` rather than an error; the backend adds codes faster than
    /// devices update.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Online,
            2 => Self::Offline,
            _ => Self::Unknown,
        }
    }
}

/// Everything a device-status cycle needs.
pub struct DeviceStatusCtx {
    pub config: SharedConfig,
    pub device_id: String,
    pub api: Arc<dyn HttpApi>,
    pub tokens: TokenCache,
    /// Local agent RPC; status posts carry its version when it is reachable.
    pub agent: Option<Arc<dyn AgentRpc>>,
    /// True until the first successful post.
    pub on_boot: AtomicBool,
}

impl DeviceStatusCtx {
    pub fn new(
        config: SharedConfig,
        device_id: String,
        api: Arc<dyn HttpApi>,
        tokens: TokenCache,
        agent: Option<Arc<dyn AgentRpc>>,
    ) -> Self {
        Self {
            config,
            device_id,
            api,
            tokens,
            agent,
            on_boot: AtomicBool::new(true),
        }
    }
}

/// Schedule the first status report. It runs on the next drain; each cycle
/// schedules its successor.
pub async fn install(sched: &Scheduler, ctx: Arc<DeviceStatusCtx>) -> Result<TaskId, SchedulerError> {
    sched.schedule_once(Utc::now(), LABEL, cycle_action(ctx)).await
}

fn cycle_action(ctx: Arc<DeviceStatusCtx>) -> impl FnMut(Scheduler) -> ActionFuture + Send {
    move |handle| {
        let ctx = ctx.clone();
        Box::pin(async move {
            match run_cycle(&ctx).await {
                Ok(status) => debug!(?status, "device-status: reported"),
                Err(error) => warn!(%error, "device-status cycle failed"),
            }

            let config = ctx.config.snapshot().await;
            let delay = config.intervals.device_status_interval();
            let next = Utc::now().timestamp() + delay as i64;
            debug!(delay, "device-status: next report scheduled");
            handle.schedule_once(due_at(next), LABEL, cycle_action(ctx.clone())).await?;
            Ok(())
        })
    }
}

/// One report: post the device state, parse the assigned status, flip the
/// on-boot flag on success.
pub async fn run_cycle(ctx: &DeviceStatusCtx) -> Result<DeviceStatus> {
    let config = ctx.config.snapshot().await;
    let url = format!("{}{}", config.api.base_url.trim_end_matches('/'), STATUS_ENDPOINT);

    let mut body = json!({
        "device_id": ctx.device_id,
        "on_boot": ctx.on_boot.load(Ordering::SeqCst),
    });

    // The agent block is best-effort; an unreachable agent is itself signal.
    if let Some(agent) = &ctx.agent {
        match agent.ping().await {
            Ok(version) => {
                body["agent"] = json!({ "reachable": true, "version": version });
            }
            Err(error) => {
                debug!(%error, "device-status: local agent unreachable");
                body["agent"] = json!({ "reachable": false });
            }
        }
    }

    let bearer = ctx.tokens.bearer().await;
    let response = ctx
        .api
        .post_json(&url, &body, bearer.as_deref())
        .await
        .context("Device status post failed")?;

    let status = response
        .get("deviceStatus")
        .and_then(serde_json::Value::as_i64)
        .map(DeviceStatus::from_code)
        .ok_or_else(|| eyre::eyre!("deviceStatus field missing or not an integer"))?;

    ctx.on_boot.store(false, Ordering::SeqCst);
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// Replays a canned response, recording every post.
    struct ScriptedApi {
        response: Result<serde_json::Value, String>,
        posts: StdMutex<Vec<(String, serde_json::Value, Option<String>)>>,
    }

    impl ScriptedApi {
        fn responding(response: serde_json::Value) -> Arc<Self> {
            Arc::new(Self {
                response: Ok(response),
                posts: StdMutex::new(Vec::new()),
            })
        }

        fn failing(message: &str) -> Arc<Self> {
            Arc::new(Self {
                response: Err(message.to_string()),
                posts: StdMutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl HttpApi for ScriptedApi {
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
            match &self.response {
                Ok(value) => Ok(value.clone()),
                Err(message) => Err(eyre::eyre!("{message}")),
            }
        }
    }

    fn ctx_with(api: Arc<ScriptedApi>) -> DeviceStatusCtx {
        DeviceStatusCtx::new(
            SharedConfig::new(Config::default()),
            "dev-1".to_string(),
            api,
            TokenCache::new(),
            None,
        )
    }

    #[test]
    fn test_status_from_code() {
        assert_eq!(DeviceStatus::from_code(1), DeviceStatus::Online);
        assert_eq!(DeviceStatus::from_code(2), DeviceStatus::Offline);
        assert_eq!(DeviceStatus::from_code(0), DeviceStatus::Unknown);
        assert_eq!(DeviceStatus::from_code(99), DeviceStatus::Unknown);
    }

    #[tokio::test]
    async fn test_first_post_carries_on_boot_then_clears_it() {
        let api = ScriptedApi::responding(json!({"deviceStatus": 1}));
        let ctx = ctx_with(api.clone());

        let status = run_cycle(&ctx).await.unwrap();
        assert_eq!(status, DeviceStatus::Online);
        assert!(!ctx.on_boot.load(Ordering::SeqCst));

        run_cycle(&ctx).await.unwrap();

        let posts = api.posts.lock().unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].1["on_boot"], json!(true));
        assert_eq!(posts[1].1["on_boot"], json!(false));
        assert_eq!(posts[0].1["device_id"], json!("dev-1"));
        assert!(posts[0].0.ends_with(STATUS_ENDPOINT));
    }

    #[tokio::test]
    async fn test_failed_post_keeps_on_boot_set() {
        let api = ScriptedApi::failing("connection refused");
        let ctx = ctx_with(api);

        assert!(run_cycle(&ctx).await.is_err());
        assert!(ctx.on_boot.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_missing_status_field_errors_and_keeps_on_boot() {
        let api = ScriptedApi::responding(json!({"unexpected": true}));
        let ctx = ctx_with(api);

        assert!(run_cycle(&ctx).await.is_err());
        assert!(ctx.on_boot.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cycle_reschedules_at_configured_interval() {
        let mut config = Config::default();
        config.intervals.device_status = 120;

        let ctx = Arc::new(DeviceStatusCtx::new(
            SharedConfig::new(config),
            "dev-1".to_string(),
            ScriptedApi::responding(json!({"deviceStatus": 1})),
            TokenCache::new(),
            None,
        ));

        let sched = Scheduler::new();
        install(&sched, ctx).await.unwrap();

        let before = Utc::now().timestamp();
        assert_eq!(sched.drain(Utc::now()).await, 1);
        let after = Utc::now().timestamp();

        let pending = sched.list().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].label, LABEL);
        let due = pending[0].due_at.timestamp();
        assert!(due >= before + 120 && due <= after + 120, "due {due} outside window");
    }
}
