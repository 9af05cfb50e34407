//! Access token service
//!
//! Self-rescheduling one-shot: keeps the shared bearer token fresh. A cycle
//! that finds the cached token still outside the expiry margin does nothing
//! but pick its next run; otherwise it requests a replacement, updates the
//! cache and the on-disk copy, and schedules itself against the new expiry.
//! A failed refresh retries on a short delay instead of waiting out the full
//! interval.

use std::sync::Arc;

use chrono::Utc;
use eyre::{Context, Result};
use serde_json::json;
use taskclock::{ActionFuture, Scheduler, SchedulerError, TaskId};
use tracing::{debug, info, warn};

use crate::capabilities::HttpApi;
use crate::config::SharedConfig;
use crate::token::{AccessToken, EXPIRY_MARGIN_SECS, TokenCache, write_token_file};

use super::due_at;

pub const LABEL: &str = "access-token";

const TOKEN_ENDPOINT: &str = "/api/access";

/// Never schedule the next check closer than this; a token already inside
/// its margin would otherwise busy-loop the service once per drain.
const MIN_NEXT_RUN_SECS: i64 = 60;

/// Delay before retrying after a failed refresh.
const RETRY_DELAY_SECS: i64 = 120;

/// Everything a token refresh cycle needs.
pub struct AccessTokenCtx {
    pub config: SharedConfig,
    pub device_id: String,
    pub api: Arc<dyn HttpApi>,
    pub tokens: TokenCache,
}

/// Outcome of one cycle, driving the reschedule decision.
#[derive(Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Cached token still fresh; nothing was requested.
    StillFresh { expires_at: i64 },
    /// A replacement token was fetched and stored.
    Refreshed { expires_at: i64 },
}

/// Schedule the first refresh check. It runs on the next drain; each cycle
/// schedules its successor.
pub async fn install(sched: &Scheduler, ctx: Arc<AccessTokenCtx>) -> Result<TaskId, SchedulerError> {
    sched.schedule_once(Utc::now(), LABEL, cycle_action(ctx)).await
}

fn cycle_action(ctx: Arc<AccessTokenCtx>) -> impl FnMut(Scheduler) -> ActionFuture + Send {
    move |handle| {
        let ctx = ctx.clone();
        Box::pin(async move {
            let now = Utc::now().timestamp();
            let config = ctx.config.snapshot().await;
            let interval = config.intervals.access_token_interval() as i64;

            let next = match run_cycle(&ctx).await {
                Ok(outcome) => {
                    debug!(?outcome, "access-token: cycle finished");
                    let expires_at = match outcome {
                        CycleOutcome::StillFresh { expires_at } | CycleOutcome::Refreshed { expires_at } => expires_at,
                    };
                    next_run(now, expires_at, interval)
                }
                Err(error) => {
                    warn!(%error, "access-token refresh failed, retrying sooner");
                    now + RETRY_DELAY_SECS
                }
            };

            debug!(in_secs = next - now, "access-token: next check scheduled");
            handle.schedule_once(due_at(next), LABEL, cycle_action(ctx.clone())).await?;
            Ok(())
        })
    }
}

/// One refresh check. Only talks to the backend when the cached token is
/// inside the expiry margin (or absent).
pub async fn run_cycle(ctx: &AccessTokenCtx) -> Result<CycleOutcome> {
    let now = Utc::now().timestamp();

    if let Some(current) = ctx.tokens.current().await
        && !current.needs_refresh(now)
    {
        return Ok(CycleOutcome::StillFresh {
            expires_at: current.expires_at_seconds,
        });
    }

    let config = ctx.config.snapshot().await;
    let url = format!("{}{}", config.api.base_url.trim_end_matches('/'), TOKEN_ENDPOINT);
    let body = json!({ "device_id": ctx.device_id });

    let response = ctx
        .api
        .post_json(&url, &body, None)
        .await
        .context("Access token request failed")?;
    let token: AccessToken = serde_json::from_value(response).context("Failed to parse access token response")?;

    if let Err(error) = write_token_file(&config.token_path(), &token) {
        // Cache still works for this process; only restarts lose out.
        warn!(%error, "Failed to persist access token");
    }

    let expires_at = token.expires_at_seconds;
    ctx.tokens.store(token).await;
    info!(expires_at, "access token refreshed");
    Ok(CycleOutcome::Refreshed { expires_at })
}

/// Earlier of "expiry minus margin" and "now plus interval", but never less
/// than [`MIN_NEXT_RUN_SECS`] ahead.
fn next_run(now: i64, expires_at: i64, interval: i64) -> i64 {
    let at_margin = expires_at - EXPIRY_MARGIN_SECS;
    let at_interval = now + interval;
    at_margin.min(at_interval).max(now + MIN_NEXT_RUN_SECS)
}
