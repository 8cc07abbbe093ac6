use anyhow::{Context, Result};
use clap::Args;
use std::fs;
use std::path::Path;
use tracing::info;
use viewsync_core::config::EngineConfig;

use super::{StateLocation, resolve_state_dir};
use crate::output::{OutputMode, render_ack};

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing config file.
    #[arg(long)]
    pub force: bool,

    /// Partition key written into `[session]`.
    #[arg(long)]
    pub partition: Option<String>,
}

/// Create `.viewsync/config.toml` with defaults and the state directory.
pub fn run_init(
    args: &InitArgs,
    location: &StateLocation,
    output: OutputMode,
    root: &Path,
) -> Result<()> {
    let config_dir = root.join(".viewsync");
    let config_path = config_dir.join("config.toml");

    if config_path.exists() && !args.force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }

    let mut config = EngineConfig::default();
    config.session.partition.clone_from(&args.partition);

    fs::create_dir_all(&config_dir)
        .with_context(|| format!("Failed to create {}", config_dir.display()))?;
    let rendered = toml::to_string_pretty(&config).context("Failed to render default config")?;
    fs::write(&config_path, rendered)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    let state_dir = resolve_state_dir(root, location)?;
    fs::create_dir_all(&state_dir)
        .with_context(|| format!("Failed to create {}", state_dir.display()))?;

    info!(config = %config_path.display(), state = %state_dir.display(), "initialized");
    render_ack(output, "init", config_path.display().to_string())
}
