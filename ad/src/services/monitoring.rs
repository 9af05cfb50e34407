//! Monitoring service
//!
//! Self-rescheduling one-shot: run the collector command, parse its
//! `key: value` stdout into metrics, publish the report envelope, then
//! schedule the next cycle at a freshly drawn randomized interval. A failed
//! cycle is logged and the next one is scheduled anyway.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use eyre::{Context, Result};
use serde::Serialize;
use taskclock::{ActionFuture, Scheduler, SchedulerError, TaskId};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::capabilities::{ProcessRunner, Publisher, split_command};
use crate::config::SharedConfig;

use super::due_at;

pub const LABEL: &str = "monitoring";

/// Collector runs get more room than plain HTTP calls; the command may poke
/// several subsystems.
const COLLECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything a monitoring cycle needs.
pub struct MonitoringCtx {
    pub config: SharedConfig,
    pub device_id: String,
    pub runner: Arc<dyn ProcessRunner>,
    pub publisher: Arc<dyn Publisher>,
}

/// Metrics parsed from the collector's `key: value` stdout. Unknown keys are
/// ignored, missing or malformed values stay zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceMetrics {
    pub wifi_clients: i64,
    pub memory_total: u64,
    pub memory_free: u64,
    pub memory_used: u64,
    pub memory_shared: u64,
    pub memory_buffered: u64,
    pub cpu_count: i64,
    pub cpu_load: f64,
    pub cpu_load_percent: i64,
    pub disk_used: u64,
    pub disk_size: u64,
    pub disk_available: u64,
    pub disk_used_percent: i64,
    pub radio_count: i64,
    pub radio_live: i64,
}

impl DeviceMetrics {
    pub fn parse(output: &str) -> Self {
        let mut metrics = Self::default();
        for line in output.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "wifi_clients" => metrics.wifi_clients = value.parse().unwrap_or_default(),
                "memory_total" => metrics.memory_total = value.parse().unwrap_or_default(),
                "memory_free" => metrics.memory_free = value.parse().unwrap_or_default(),
                "memory_used" => metrics.memory_used = value.parse().unwrap_or_default(),
                "memory_shared" => metrics.memory_shared = value.parse().unwrap_or_default(),
                "memory_buffered" => metrics.memory_buffered = value.parse().unwrap_or_default(),
                "cpu_count" => metrics.cpu_count = value.parse().unwrap_or_default(),
                "cpu_load" => metrics.cpu_load = value.parse().unwrap_or_default(),
                "cpu_load_percent" => metrics.cpu_load_percent = value.parse().unwrap_or_default(),
                "disk_used" => metrics.disk_used = value.parse().unwrap_or_default(),
                "disk_size" => metrics.disk_size = value.parse().unwrap_or_default(),
                "disk_available" => metrics.disk_available = value.parse().unwrap_or_default(),
                "disk_used_percent" => metrics.disk_used_percent = value.parse().unwrap_or_default(),
                "radio_count" => metrics.radio_count = value.parse().unwrap_or_default(),
                "radio_live" => metrics.radio_live = value.parse().unwrap_or_default(),
                _ => {}
            }
        }
        metrics
    }
}

/// Published report envelope: identity and timestamp alongside the flattened
/// metrics.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub measurement_id: String,
    pub device_id: String,
    pub timestamp: i64,
    #[serde(flatten)]
    pub metrics: DeviceMetrics,
}

/// Schedule the first monitoring cycle. It runs on the next drain; each cycle
/// schedules its successor.
pub async fn install(sched: &Scheduler, ctx: Arc<MonitoringCtx>) -> Result<TaskId, SchedulerError> {
    sched.schedule_once(Utc::now(), LABEL, cycle_action(ctx)).await
}

fn cycle_action(ctx: Arc<MonitoringCtx>) -> impl FnMut(Scheduler) -> ActionFuture + Send {
    move |handle| {
        let ctx = ctx.clone();
        Box::pin(async move {
            if let Err(error) = run_cycle(&ctx).await {
                warn!(%error, "monitoring cycle failed");
            }

            // Reschedule regardless; one bad cycle must not kill the service.
            let config = ctx.config.snapshot().await;
            let delay = config.intervals.draw_monitoring_interval();
            let next = Utc::now().timestamp() + delay as i64;
            debug!(delay, "monitoring: next cycle scheduled");
            handle.schedule_once(due_at(next), LABEL, cycle_action(ctx.clone())).await?;
            Ok(())
        })
    }
}

/// One collection: run the collector, parse, publish. Returns the report it
/// published.
pub async fn run_cycle(ctx: &MonitoringCtx) -> Result<Report> {
    let config = ctx.config.snapshot().await;

    let argv = split_command(&config.monitoring.command);
    if argv.is_empty() {
        return Err(eyre::eyre!("monitoring.command is empty"));
    }

    let output = ctx.runner.run(&argv, COLLECT_TIMEOUT).await?;
    if !output.success() {
        return Err(eyre::eyre!(
            "collector exited with {:?} (timed_out: {}, stderr: {})",
            output.exit_code,
            output.timed_out,
            output.stderr.trim()
        ));
    }

    let report = Report {
        measurement_id: Uuid::now_v7().to_string(),
        device_id: ctx.device_id.clone(),
        timestamp: Utc::now().timestamp(),
        metrics: DeviceMetrics::parse(&output.stdout),
    };

    let payload = serde_json::to_value(&report).context("Failed to serialize report")?;
    ctx.publisher.publish(&config.monitoring.topic, &payload).await?;
    debug!(measurement_id = %report.measurement_id, "monitoring: report published");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::RunOutput;
    use crate::config::Config;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    const SAMPLE_OUTPUT: &str = "\
wifi_clients: 5
memory_total: 524288
memory_free: 262144
memory_used: 230000
memory_shared: 1024
memory_buffered: 31120
cpu_count: 4
cpu_load: 0.42
cpu_load_percent: 11
disk_used: 1000
disk_size: 4000
disk_available: 3000
disk_used_percent: 25
radio_count: 2
radio_live: 2
";

    struct FixedRunner {
        output: RunOutput,
    }

    #[async_trait]
    impl ProcessRunner for FixedRunner {
        async fn run(&self, _argv: &[String], _timeout: Duration) -> Result<RunOutput> {
            Ok(self.output.clone())
        }
    }

    #[derive(Default)]
    struct RecordingPublisher {
        published: StdMutex<Vec<(String, serde_json::Value)>>,
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish(&self, topic: &str, payload: &serde_json::Value) -> Result<()> {
            self.published.lock().unwrap().push((topic.to_string(), payload.clone()));
            Ok(())
        }
    }

    fn ok_output(stdout: &str) -> RunOutput {
        RunOutput {
            exit_code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
            timed_out: false,
            duration: Duration::from_millis(10),
        }
    }

    fn ctx_with(runner: FixedRunner, publisher: Arc<RecordingPublisher>) -> MonitoringCtx {
        MonitoringCtx {
            config: SharedConfig::new(Config::default()),
            device_id: "dev-1".to_string(),
            runner: Arc::new(runner),
            publisher,
        }
    }

    #[test]
    fn test_parse_sample_output() {
        let metrics = DeviceMetrics::parse(SAMPLE_OUTPUT);

        assert_eq!(metrics.wifi_clients, 5);
        assert_eq!(metrics.memory_total, 524_288);
        assert_eq!(metrics.memory_buffered, 31_120);
        assert_eq!(metrics.cpu_count, 4);
        assert!((metrics.cpu_load - 0.42).abs() < f64::EPSILON);
        assert_eq!(metrics.disk_used_percent, 25);
        assert_eq!(metrics.radio_live, 2);
    }

    #[test]
    fn test_parse_ignores_junk_and_unknown_keys() {
        let metrics = DeviceMetrics::parse("garbage line\nunknown_key: 9\nwifi_clients: 3\ncpu_count: notanumber\n");

        assert_eq!(metrics.wifi_clients, 3);
        assert_eq!(metrics.cpu_count, 0);
        assert_eq!(metrics.memory_total, 0);
    }

    #[tokio::test]
    async fn test_run_cycle_publishes_flat_envelope() {
        let publisher = Arc::new(RecordingPublisher::default());
        let ctx = ctx_with(
            FixedRunner {
                output: ok_output(SAMPLE_OUTPUT),
            },
            publisher.clone(),
        );

        let report = run_cycle(&ctx).await.unwrap();
        assert_eq!(report.device_id, "dev-1");

        let published = publisher.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "monitoring/device-data");

        // Envelope is flat: identity fields next to the metrics.
        let payload = &published[0].1;
        assert_eq!(payload["device_id"], "dev-1");
        assert_eq!(payload["wifi_clients"], 5);
        assert_eq!(payload["memory_total"], 524_288);
        assert!(payload["measurement_id"].is_string());
        assert!(payload["timestamp"].is_i64());
    }

    #[tokio::test]
    async fn test_run_cycle_fails_on_collector_error_without_publishing() {
        let publisher = Arc::new(RecordingPublisher::default());
        let ctx = ctx_with(
            FixedRunner {
                output: RunOutput {
                    exit_code: Some(1),
                    stdout: String::new(),
                    stderr: "no such script".to_string(),
                    timed_out: false,
                    duration: Duration::from_millis(1),
                },
            },
            publisher.clone(),
        );

        assert!(run_cycle(&ctx).await.is_err());
        assert!(publisher.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cycle_reschedules_with_fresh_interval() {
        let mut config = Config::default();
        config.intervals.monitoring_min = 600;
        config.intervals.monitoring_max = 600;

        let publisher = Arc::new(RecordingPublisher::default());
        let ctx = Arc::new(MonitoringCtx {
            config: SharedConfig::new(config),
            device_id: "dev-1".to_string(),
            runner: Arc::new(FixedRunner {
                output: ok_output(SAMPLE_OUTPUT),
            }),
            publisher: publisher.clone(),
        });

        let sched = Scheduler::new();
        install(&sched, ctx).await.unwrap();

        let before = Utc::now().timestamp();
        assert_eq!(sched.drain(Utc::now()).await, 1);
        let after = Utc::now().timestamp();

        assert_eq!(publisher.published.lock().unwrap().len(), 1);

        // Exactly one follow-up, due one fixed interval out.
        let pending = sched.list().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].label, LABEL);
        let due = pending[0].due_at.timestamp();
        assert!(due >= before + 600 && due <= after + 600, "due {due} outside window");
    }

    #[tokio::test]
    async fn test_failed_cycle_still_reschedules() {
        let mut config = Config::default();
        config.intervals.monitoring_min = 300;
        config.intervals.monitoring_max = 300;

        let ctx = Arc::new(MonitoringCtx {
            config: SharedConfig::new(config),
            device_id: "dev-1".to_string(),
            runner: Arc::new(FixedRunner {
                output: RunOutput {
                    exit_code: None,
                    stdout: String::new(),
                    stderr: String::new(),
                    timed_out: true,
                    duration: Duration::from_secs(30),
                },
            }),
            publisher: Arc::new(RecordingPublisher::default()),
        });

        let sched = Scheduler::new();
        install(&sched, ctx).await.unwrap();
        sched.drain(Utc::now()).await;

        assert_eq!(sched.count().await, 1);
    }
}
