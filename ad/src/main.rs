//! agentd - device-resident service agent
//!
//! CLI entry point and the daemon main loop.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use taskclock::Scheduler;
use tracing::{debug, info, warn};

use agentd::capabilities::{HttpPublisher, ReqwestApi, TokioRunner};
use agentd::cli::{Cli, Command, OutputFormat};
use agentd::config::{Config, SharedConfig};
use agentd::daemon::{DaemonManager, VERSION};
use agentd::identity::ensure_device_id;
use agentd::ipc::{self, AgentClient, AgentRequest, AgentResponse, StatusReport};
use agentd::services::{self, AccessTokenCtx, ConfigSyncCtx, DeviceStatusCtx, MonitoringCtx};
use agentd::token::TokenCache;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("agentd")
        .join("logs");
    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Level priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            other => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", other);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("agentd.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    if cli.dev {
        config.agent.dev = true;
        config.agent.data_dir = PathBuf::from(".agentd");
    }

    debug!(?cli.config, dev = config.agent.dev, "main: dispatching command");
    match cli.command {
        Command::Start { foreground } => cmd_start(config, cli.config, foreground).await,
        Command::Stop => cmd_stop().await,
        Command::Status { format } => cmd_status(format).await,
        Command::Ping => cmd_ping().await,
        Command::Config => cmd_config(&config),
        Command::RunDaemon => cmd_run_daemon(config, cli.config).await,
    }
}

/// Start the daemon
async fn cmd_start(config: Config, config_path: Option<PathBuf>, foreground: bool) -> Result<()> {
    let daemon = DaemonManager::new();

    if let Some(pid) = daemon.running_pid() {
        println!("agentd is already running (PID: {})", pid);
        return Ok(());
    }

    if foreground {
        println!("Starting agentd in foreground mode...");
        run_daemon(config, config_path).await
    } else {
        let pid = daemon.start()?;
        println!("agentd started (PID: {})", pid);
        Ok(())
    }
}

/// Stop the daemon
///
/// Tries the control socket first for an orderly stop, falls back to SIGTERM.
async fn cmd_stop() -> Result<()> {
    let daemon = DaemonManager::new();

    if !daemon.is_running() {
        println!("agentd is not running");
        return Ok(());
    }

    let pid = daemon.running_pid();

    let client = AgentClient::new();
    if client.socket_exists() {
        match client.shutdown().await {
            Ok(()) => {
                let mut attempts = 0;
                while daemon.is_running() && attempts < 50 {
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    attempts += 1;
                }
                if !daemon.is_running() {
                    match pid {
                        Some(pid) => println!("agentd stopped gracefully (was PID: {})", pid),
                        None => println!("agentd stopped gracefully"),
                    }
                    return Ok(());
                }
                debug!("cmd_stop: socket shutdown timed out, falling back to SIGTERM");
            }
            Err(error) => {
                debug!(%error, "cmd_stop: socket shutdown failed, falling back to SIGTERM");
            }
        }
    }

    daemon.stop()?;
    match pid {
        Some(pid) => println!("agentd stopped (was PID: {})", pid),
        None => println!("agentd stopped"),
    }
    Ok(())
}

/// Ping the daemon over the control socket
async fn cmd_ping() -> Result<()> {
    let daemon = DaemonManager::new();
    if !daemon.is_running() {
        println!("agentd is not running");
        return Ok(());
    }

    let client = AgentClient::new();
    if !client.socket_exists() {
        println!("Daemon PID file exists but control socket not found");
        println!("The daemon may be starting up or in an inconsistent state");
        return Ok(());
    }

    match client.ping().await {
        Ok(version) => {
            println!("{} agentd is alive and responsive", "✓".green());
            println!("Version: {}", version);
        }
        Err(error) => {
            println!("{} daemon not responding on the control socket", "✗".red());
            println!("Error: {}", error);
        }
    }

    Ok(())
}

/// Show daemon status: PID-file state merged with the socket's view of the
/// scheduler when the daemon answers.
async fn cmd_status(format: OutputFormat) -> Result<()> {
    let daemon = DaemonManager::new();
    let status = daemon.status();

    let report = if status.running {
        let client = AgentClient::new();
        match client.status().await {
            Ok(report) => Some(report),
            Err(error) => {
                debug!(%error, "cmd_status: socket status unavailable");
                None
            }
        }
    } else {
        None
    };

    match format {
        OutputFormat::Json => {
            let json = match &report {
                Some(report) => serde_json::to_value(report)?,
                None => serde_json::json!({
                    "running": status.running,
                    "pid": status.pid,
                    "pid_file": status.pid_file.to_string_lossy(),
                }),
            };
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            println!("agentd status");
            println!("-------------");
            if status.running {
                println!("Status: {}", "running".green());
                if let Some(pid) = status.pid {
                    println!("PID: {}", pid);
                }
            } else {
                println!("Status: {}", "stopped".red());
            }
            println!("PID file: {}", status.pid_file.display());

            if let Some(report) = report {
                println!("Started: {}", report.started_at);
                println!("Pending tasks: {}", report.task_count);
                for task in &report.tasks {
                    let every = task
                        .every_secs
                        .map(|s| format!(" (every {}s)", s))
                        .unwrap_or_default();
                    println!("  [{}] {} due {}{}", task.id, task.label, task.due_at, every);
                }
            }
        }
    }

    Ok(())
}

/// Print the effective configuration as YAML
fn cmd_config(config: &Config) -> Result<()> {
    print!("{}", serde_yaml::to_string(config)?);
    Ok(())
}

/// Run as the daemon process (internal command)
async fn cmd_run_daemon(config: Config, config_path: Option<PathBuf>) -> Result<()> {
    let daemon = DaemonManager::new();
    daemon.register_self()?;
    run_daemon(config, config_path).await
}

/// The daemon main loop: wire capabilities and services onto one scheduler,
/// serve the control socket, and wait for a stop signal.
async fn run_daemon(config: Config, config_path: Option<PathBuf>) -> Result<()> {
    info!(version = VERSION, "Daemon starting...");

    // Fail fast on unusable config or an uncreatable data dir.
    config.validate()?;
    fs::create_dir_all(&config.agent.data_dir).with_context(|| {
        format!("Cannot create data directory {}", config.agent.data_dir.display())
    })?;

    let token_path = config.token_path();
    let runner = Arc::new(TokioRunner);
    let device_id = ensure_device_id(&config, runner.as_ref()).await?;
    info!(%device_id, "Startup validation passed");

    let shared = SharedConfig::new(config.clone());
    let tokens = TokenCache::load(&token_path);
    let api = Arc::new(ReqwestApi::new(config.http.timeout_secs)?);
    let publisher = Arc::new(HttpPublisher::new(api.clone(), shared.clone(), tokens.clone()));
    let agent_rpc = Arc::new(AgentClient::new());

    let sched = Scheduler::new();
    let config_sync_ctx = Arc::new(ConfigSyncCtx::new(shared.clone(), device_id.clone(), api.clone()));
    services::install_all(
        &sched,
        Arc::new(MonitoringCtx {
            config: shared.clone(),
            device_id: device_id.clone(),
            runner: runner.clone(),
            publisher: publisher.clone(),
        }),
        Arc::new(DeviceStatusCtx::new(
            shared.clone(),
            device_id.clone(),
            api.clone(),
            tokens.clone(),
            Some(agent_rpc),
        )),
        Arc::new(AccessTokenCtx {
            config: shared.clone(),
            device_id: device_id.clone(),
            api: api.clone(),
            tokens: tokens.clone(),
        }),
        config_sync_ctx.clone(),
    )
    .await?;

    // Control socket: one task per connection, shutdown requests funneled
    // into the main select loop.
    let (listener, socket_path) = ipc::listener::create_listener()?;
    info!(?socket_path, "Control socket listening");
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    let started_at = Utc::now();

    let accept_handle = {
        let sched = sched.clone();
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let sched = sched.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    let response = match ipc::listener::read_request(&mut stream).await {
                        Ok(AgentRequest::Ping) => AgentResponse::Pong {
                            version: VERSION.to_string(),
                        },
                        Ok(AgentRequest::Status) => AgentResponse::Status(StatusReport {
                            running: !sched.is_stopped(),
                            pid: std::process::id(),
                            started_at,
                            task_count: sched.count().await,
                            tasks: sched.list().await,
                        }),
                        Ok(AgentRequest::Shutdown) => {
                            let _ = shutdown_tx.send(()).await;
                            AgentResponse::Ok
                        }
                        Err(error) => AgentResponse::Error {
                            message: error.to_string(),
                        },
                    };
                    if let Err(error) = ipc::listener::send_response(&mut stream, response).await {
                        debug!(%error, "control socket response failed");
                    }
                });
            }
        })
    };

    let run_handle = {
        let sched = sched.clone();
        tokio::spawn(async move { sched.run().await })
    };

    info!("Daemon running. SIGHUP reloads config, SIGINT/SIGTERM stop.");

    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sighup = signal(SignalKind::hangup())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        loop {
            tokio::select! {
                _ = sighup.recv() => {
                    info!("SIGHUP received - reloading configuration");
                    match Config::load(config_path.as_ref()) {
                        Ok(new_config) => {
                            shared.replace(new_config).await;
                            // A new config-sync interval needs its timer
                            // retired and reinstalled; everything else is
                            // picked up at the next reschedule.
                            if let Err(error) =
                                services::config_sync::reinstall_if_changed(&sched, config_sync_ctx.clone()).await
                            {
                                warn!(%error, "Failed to reinstall config-sync timer after reload");
                            }
                            info!("Configuration reloaded");
                        }
                        Err(error) => {
                            warn!(%error, "Failed to reload configuration, keeping current");
                        }
                    }
                }
                _ = sigint.recv() => {
                    warn!("SIGINT received");
                    break;
                }
                _ = sigterm.recv() => {
                    warn!("SIGTERM received");
                    break;
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown requested over control socket");
                    break;
                }
            }
        }
    }

    info!("Daemon shutting down...");

    // Orderly stop: the loop finishes its tick, then every remaining task
    // and its context is released.
    sched.stop();
    let _ = run_handle.await;
    sched.shutdown().await;

    accept_handle.abort();
    ipc::listener::cleanup_socket(&socket_path);

    info!("Shutdown complete");
    Ok(())
}
