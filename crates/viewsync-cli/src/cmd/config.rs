use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::io::Write;
use std::path::Path;
use viewsync_core::config::load_config;

use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Show the effective configuration (file + environment + defaults)
    Show,
    /// Validate `.viewsync/config.toml` without running anything
    Check,
}

pub fn run_config(args: &ConfigArgs, output: OutputMode, root: &Path) -> Result<()> {
    match args.command {
        ConfigCommand::Show => run_show(output, root),
        ConfigCommand::Check => run_check(output, root),
    }
}

fn run_show(output: OutputMode, root: &Path) -> Result<()> {
    let config = load_config(root)?;
    let toml_text = toml::to_string_pretty(&config).context("Failed to render config")?;

    render_mode(
        output,
        &config,
        |_, w| write!(w, "{toml_text}"),
        |c, w| {
            pretty_section(w, "viewsync configuration")?;
            pretty_kv(w, "history", format!("limit={} key={}", c.history.limit, c.history.storage_key))?;
            pretty_kv(
                w,
                "merge",
                format!("filters={} selections={}", c.merge.filters, c.merge.selections),
            )?;
            pretty_kv(
                w,
                "channels",
                format!("{} / {}", c.channels.filters, c.channels.selections),
            )?;
            pretty_kv(w, "partition", c.session.partition.as_deref().unwrap_or("(none)"))?;
            pretty_kv(w, "subject", c.session.subject_name.as_deref().unwrap_or("(none)"))
        },
    )
}

fn run_check(output: OutputMode, root: &Path) -> Result<()> {
    let config = load_config(root)?;
    crate::output::render_ack(
        output,
        "config-check",
        format!("valid (history.limit={})", config.history.limit),
    )
}
