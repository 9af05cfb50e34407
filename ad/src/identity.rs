//! Device identity
//!
//! The device id outlives restarts: read it from the data dir when present,
//! otherwise mint one (configured identity command first, generated UUID as
//! the fallback) and persist it.

use std::path::Path;
use std::time::Duration;

use eyre::{Context, Result};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::capabilities::{ProcessRunner, split_command};
use crate::config::Config;

/// Identity commands are boot-path work; keep them tightly bounded.
const IDENTITY_TIMEOUT: Duration = Duration::from_secs(10);

/// Return the persisted device id, minting and persisting one if needed.
pub async fn ensure_device_id(config: &Config, runner: &dyn ProcessRunner) -> Result<String> {
    let path = config.device_id_path();

    if let Some(existing) = read_device_id(&path)? {
        debug!(device_id = %existing, "ensure_device_id: using persisted id");
        return Ok(existing);
    }

    let id = mint_device_id(config, runner).await;
    persist_device_id(&path, &id)?;
    info!(device_id = %id, "ensure_device_id: minted new device id");
    Ok(id)
}

fn read_device_id(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path).context("Failed to read device id file")?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    Ok(Some(trimmed.to_string()))
}

async fn mint_device_id(config: &Config, runner: &dyn ProcessRunner) -> String {
    if let Some(command) = &config.agent.identity_command {
        let argv = split_command(command);
        if !argv.is_empty() {
            match runner.run(&argv, IDENTITY_TIMEOUT).await {
                Ok(output) if output.success() && !output.stdout.trim().is_empty() => {
                    return output.stdout.trim().to_string();
                }
                Ok(output) => {
                    warn!(exit_code = ?output.exit_code, timed_out = output.timed_out, "Identity command failed, generating id");
                }
                Err(error) => {
                    warn!(%error, "Identity command could not run, generating id");
                }
            }
        }
    }
    Uuid::now_v7().to_string()
}

fn persist_device_id(path: &Path, id: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create data directory")?;
    }
    std::fs::write(path, format!("{id}\n")).context("Failed to write device id file")?;
    Ok(())
}
