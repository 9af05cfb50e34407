//! The agent's services
//!
//! A service is its first scheduled task plus whatever that task reschedules.
//! Each one owns a `*Ctx` struct carrying exactly the capabilities and shared
//! config it needs; nothing reads process-wide state. The scheduler never
//! calls a capability itself, only these task actions do.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use eyre::Result;
use taskclock::{Scheduler, TaskId};
use tracing::info;

pub mod access_token;
pub mod config_sync;
pub mod device_status;
pub mod monitoring;

pub use access_token::AccessTokenCtx;
pub use config_sync::ConfigSyncCtx;
pub use device_status::DeviceStatusCtx;
pub use monitoring::MonitoringCtx;

/// Unix seconds to the scheduler's due-time type. Out-of-range timestamps
/// cannot come out of `Utc::now()` arithmetic with config-bounded intervals.
pub(crate) fn due_at(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

/// Task ids handed back by [`install_all`], kept so the daemon can retire
/// individual timers later (config reload, shutdown diagnostics).
#[derive(Debug, Clone, Copy)]
pub struct InstalledServices {
    pub monitoring: TaskId,
    pub device_status: TaskId,
    pub access_token: TaskId,
    pub config_sync: TaskId,
}

/// Wire every service onto the scheduler.
pub async fn install_all(
    sched: &Scheduler,
    monitoring: Arc<MonitoringCtx>,
    device_status: Arc<DeviceStatusCtx>,
    access_token: Arc<AccessTokenCtx>,
    config_sync: Arc<ConfigSyncCtx>,
) -> Result<InstalledServices> {
    let installed = InstalledServices {
        monitoring: monitoring::install(sched, monitoring).await?,
        device_status: device_status::install(sched, device_status).await?,
        access_token: access_token::install(sched, access_token).await?,
        config_sync: config_sync::install(sched, config_sync).await?,
    };
    info!(?installed, "services installed");
    Ok(installed)
}
