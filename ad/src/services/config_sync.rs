//! Config sync service
//!
//! The one genuinely periodic timer: every `config-sync` interval, GET the
//! device's remote config document and fold its whitelisted interval
//! overrides into the shared config. Other services pick the new values up at
//! their next reschedule. When an override changes the config-sync interval
//! itself, the running timer is retired by its own id and a replacement is
//! installed at the new cadence, so one logical service never owns two
//! concurrent timers.

use std::sync::Arc;
use std::time::Duration;

use eyre::{Context, Result};
use taskclock::{ActionFuture, Scheduler, SchedulerError, TaskId};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::capabilities::HttpApi;
use crate::config::SharedConfig;

pub const LABEL: &str = "config-sync";

/// The timer this service currently owns.
#[derive(Debug, Clone, Copy)]
struct InstalledTimer {
    task_id: TaskId,
    interval_secs: u64,
}

/// Everything a config sync cycle needs, plus the record of its own timer.
pub struct ConfigSyncCtx {
    pub config: SharedConfig,
    pub device_id: String,
    pub api: Arc<dyn HttpApi>,
    installed: Mutex<Option<InstalledTimer>>,
}

impl ConfigSyncCtx {
    pub fn new(config: SharedConfig, device_id: String, api: Arc<dyn HttpApi>) -> Self {
        Self {
            config,
            device_id,
            api,
            installed: Mutex::new(None),
        }
    }

    /// Id of the timer currently installed for this service.
    pub async fn task_id(&self) -> Option<TaskId> {
        self.installed.lock().await.as_ref().map(|timer| timer.task_id)
    }
}

/// Install the periodic sync timer at the currently configured interval.
pub async fn install(sched: &Scheduler, ctx: Arc<ConfigSyncCtx>) -> Result<TaskId, SchedulerError> {
    let interval_secs = ctx.config.snapshot().await.intervals.config_sync_interval();
    install_at(sched, ctx, interval_secs).await
}

async fn install_at(sched: &Scheduler, ctx: Arc<ConfigSyncCtx>, interval_secs: u64) -> Result<TaskId, SchedulerError> {
    let id = sched
        .schedule_every(Duration::from_secs(interval_secs), LABEL, cycle_action(ctx.clone()))
        .await?;
    *ctx.installed.lock().await = Some(InstalledTimer {
        task_id: id,
        interval_secs,
    });
    debug!(%id, interval_secs, "config-sync: timer installed");
    Ok(id)
}

/// Retire the current timer and install a replacement at the configured
/// interval. Used by the SIGHUP reload path; a no-op when nothing changed.
pub async fn reinstall_if_changed(sched: &Scheduler, ctx: Arc<ConfigSyncCtx>) -> Result<()> {
    let wanted = ctx.config.snapshot().await.intervals.config_sync_interval();
    let current = *ctx.installed.lock().await;

    let Some(timer) = current else {
        install_at(sched, ctx, wanted).await?;
        return Ok(());
    };
    if timer.interval_secs == wanted {
        return Ok(());
    }

    info!(old = timer.interval_secs, new = wanted, "config-sync: interval changed, reinstalling timer");
    if let Err(error) = sched.cancel(timer.task_id).await {
        // Already gone (mid-drain retire); installing the replacement is
        // still the right move.
        debug!(%error, "config-sync: old timer not found during reinstall");
    }
    install_at(sched, ctx, wanted).await?;
    Ok(())
}

fn cycle_action(ctx: Arc<ConfigSyncCtx>) -> impl FnMut(Scheduler) -> ActionFuture + Send {
    move |handle| {
        let ctx = ctx.clone();
        Box::pin(async move {
            match run_cycle(&ctx).await {
                Ok(applied) if !applied.is_empty() => {
                    info!(?applied, "config-sync: overrides applied");
                    // The remote document may have moved our own interval.
                    reinstall_if_changed(&handle, ctx.clone()).await?;
                }
                Ok(_) => debug!("config-sync: no overrides to apply"),
                Err(error) => warn!(%error, "config-sync cycle failed"),
            }
            Ok(())
        })
    }
}

/// One sync: fetch the remote document and apply its overrides. Returns the
/// names of the intervals that changed.
pub async fn run_cycle(ctx: &ConfigSyncCtx) -> Result<Vec<&'static str>> {
    let config = ctx.config.snapshot().await;
    let url = format!(
        "{}/api/devices/{}/config",
        config.api.base_url.trim_end_matches('/'),
        ctx.device_id
    );

    let document = ctx.api.get_json(&url).await.context("Config fetch failed")?;
    let applied = apply_overrides(&document, &ctx.config).await;
    Ok(applied)
}

/// Fold the document's `intervals` block into the shared config. Only the
/// whitelisted keys below are honored; everything else in the document is
/// ignored. Returns which intervals actually changed.
pub async fn apply_overrides(document: &serde_json::Value, config: &SharedConfig) -> Vec<&'static str> {
    let Some(intervals) = document.get("intervals").and_then(serde_json::Value::as_object) else {
        return Vec::new();
    };

    let read = |key: &str| intervals.get(key).and_then(serde_json::Value::as_u64);
    let mut applied = Vec::new();

    config
        .update(|live| {
            let slots: [(&'static str, &mut u64); 5] = [
                ("monitoring-min", &mut live.intervals.monitoring_min),
                ("monitoring-max", &mut live.intervals.monitoring_max),
                ("device-status", &mut live.intervals.device_status),
                ("access-token", &mut live.intervals.access_token),
                ("config-sync", &mut live.intervals.config_sync),
            ];
            for (key, slot) in slots {
                if let Some(value) = read(key)
                    && *slot != value
                {
                    *slot = value;
                    applied.push(key);
                }
            }
        })
        .await;

    applied
}
