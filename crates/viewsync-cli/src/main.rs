#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{CommandFactory, Parser, Subcommand};
use cmd::{StateLocation, Workspace};
use output::{OutputMode, resolve_output_mode};
use std::env;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "vsync: inspect and replay viewsync state histories",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON output (shorthand for --format json).
    #[arg(long, global = true)]
    json: bool,

    /// Output format: pretty, text or json.
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Project root holding `.viewsync/` (default: current directory).
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Directory holding persisted history files.
    #[arg(long, global = true, conflicts_with = "global")]
    state_dir: Option<PathBuf>,

    /// Keep history in the per-user data directory.
    #[arg(long, global = true)]
    global: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn output_mode(&self) -> OutputMode {
        resolve_output_mode(self.format, self.json)
    }

    fn state_location(&self) -> StateLocation {
        StateLocation {
            dir: self.state_dir.clone(),
            global: self.global,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Lifecycle",
        about = "Initialize a viewsync project",
        long_about = "Write .viewsync/config.toml with defaults and create the state directory.",
        after_help = "EXAMPLES:\n    # Initialize in the current directory\n    vsync init\n\n    # Stamp snapshots with a partition key\n    vsync init --partition study-42"
    )]
    Init(cmd::init::InitArgs),

    #[command(
        next_help_heading = "History",
        about = "Inspect and maintain persisted snapshots",
        long_about = "List, show, trim, reset or partition-prune the persisted snapshot history.",
        after_help = "EXAMPLES:\n    # List snapshots\n    vsync history list\n\n    # Show the newest snapshot\n    vsync history show -1\n\n    # Trim to three entries\n    vsync history trim --limit 3 --json"
    )]
    History(cmd::history::HistoryArgs),

    #[command(
        next_help_heading = "History",
        about = "Replay a script of state operations",
        long_about = "Drive a synchronizer from a JSON script and report sets, channels and events.",
        after_help = "EXAMPLES:\n    # Replay against the project history\n    vsync replay ops.json\n\n    # Replay without touching disk\n    vsync replay ops.json --in-memory --json"
    )]
    Replay(cmd::replay::ReplayArgs),

    #[command(
        next_help_heading = "Project Maintenance",
        about = "Show or validate configuration",
        after_help = "EXAMPLES:\n    # Effective configuration\n    vsync config show\n\n    # Validate only\n    vsync config check"
    )]
    Config(cmd::config::ConfigArgs),

    #[command(
        next_help_heading = "Project Maintenance",
        about = "Generate shell completion scripts",
        long_about = "Generate shell completion scripts for supported shells.",
        after_help = "EXAMPLES:\n    # Generate bash completions\n    vsync completions bash"
    )]
    Completions(cmd::completions::CompletionsArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("VIEWSYNC_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "viewsync=debug,info"
        } else {
            "viewsync=info,warn"
        })
    });

    let format = env::var("VIEWSYNC_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    if cli.verbose {
        info!("Verbose mode enabled");
    }

    let project_root = match &cli.root {
        Some(root) => root.clone(),
        None => env::current_dir()?,
    };
    let output = cli.output_mode();
    let location = cli.state_location();

    match &cli.command {
        Commands::Init(args) => cmd::init::run_init(args, &location, output, &project_root),
        Commands::History(args) => {
            let workspace = Workspace::open(&project_root, &location)?;
            cmd::history::run_history(args, output, &workspace)
        }
        Commands::Replay(args) => {
            let workspace = Workspace::open(&project_root, &location)?;
            cmd::replay::run_replay(args, output, &workspace)
        }
        Commands::Config(args) => cmd::config::run_config(args, output, &project_root),
        Commands::Completions(args) => {
            cmd::completions::run_completions(args.shell, &mut Cli::command())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_flag_is_global() {
        let cli = Cli::parse_from(["vsync", "history", "list", "--json"]);
        assert!(cli.json);
        assert_eq!(cli.output_mode(), OutputMode::Json);
    }

    #[test]
    fn format_flag_parses() {
        let cli = Cli::parse_from(["vsync", "--format", "text", "config", "show"]);
        assert_eq!(cli.format, Some(OutputMode::Text));
    }

    #[test]
    fn state_dir_and_global_conflict() {
        let result = Cli::try_parse_from(["vsync", "--state-dir", "x", "--global", "history", "list"]);
        assert!(result.is_err());
    }

    #[test]
    fn negative_show_index_parses() {
        let cli = Cli::parse_from(["vsync", "history", "show", "-1"]);
        assert!(matches!(cli.command, Commands::History(_)));
    }

    #[test]
    fn completions_subcommand_parses() {
        let cli = Cli::parse_from(["vsync", "completions", "bash"]);
        assert!(matches!(
            cli.command,
            Commands::Completions(cmd::completions::CompletionsArgs {
                shell: clap_complete::Shell::Bash,
            })
        ));
    }

    #[test]
    fn all_subcommands_listed() {
        let subcommands = [
            vec!["vsync", "init"],
            vec!["vsync", "init", "--force", "--partition", "p"],
            vec!["vsync", "history", "list"],
            vec!["vsync", "history", "list", "--partition", "p"],
            vec!["vsync", "history", "show", "0"],
            vec!["vsync", "history", "trim", "--limit", "2"],
            vec!["vsync", "history", "reset"],
            vec!["vsync", "history", "prune-partition", "p"],
            vec!["vsync", "replay", "ops.json", "--in-memory", "--detached"],
            vec!["vsync", "config", "show"],
            vec!["vsync", "config", "check"],
            vec!["vsync", "completions", "zsh"],
        ];
        for args in &subcommands {
            let result = Cli::try_parse_from(args.iter());
            assert!(result.is_ok(), "Failed to parse: {args:?}: {:?}", result.err());
        }
    }
}
