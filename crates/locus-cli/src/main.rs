//! `locus-cli` – Locus command line interface.
//!
//! 1. Loads `~/.locus/config.toml` (or `--config <path>`); prints a first-run
//!    notice and falls back to defaults when the file is absent.
//! 2. Dispatches a subcommand (`run`, `solve`, `schema`, `init`), or drops
//!    the user into the **interactive REPL** when none is given.
//! 3. Intercepts **Ctrl-C** to stop the tracking session and exit safely.

mod config;
mod repl;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Parser, Subcommand};
use colored::Colorize;
use locus_middleware::EventBus;
use locus_runtime::{TrackingSession, init_tracing};
use locus_types::RangeReport;
use tokio::sync::watch;
use tracing::{error, warn};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "locus")]
#[command(version)]
#[command(about = "Range-based indoor positioning with a danger-zone alert", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the configuration file (default `~/.locus/config.toml`)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a headless tracking session until Ctrl-C
    Run,

    /// Localize one set of ranges against the configured anchors
    Solve {
        /// Ranges to anchors 0..3
        #[arg(num_args = 4, value_names = ["D0", "D1", "D2", "D3"], allow_negative_numbers = true)]
        distances: Vec<String>,
    },

    /// Print the JSON schema of a range frame
    Schema,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _tracing = init_tracing("locus");
    let path = cli.config.clone().unwrap_or_else(config::config_path);

    match cli.command {
        Some(Commands::Schema) => cmd_schema(),
        Some(Commands::Init { force }) => cmd_init(&path, force),
        Some(Commands::Solve { distances }) => {
            let Some(cfg) = load_config(&path) else {
                return ExitCode::FAILURE;
            };
            repl::cmd_solve(&cfg, &distances[..]);
            ExitCode::SUCCESS
        }
        Some(Commands::Run) => {
            let Some(cfg) = load_config(&path) else {
                return ExitCode::FAILURE;
            };
            cmd_run(cfg)
        }
        None => {
            print_banner();
            let Some(cfg) = load_config(&path) else {
                return ExitCode::FAILURE;
            };
            let Some(runtime) = build_runtime() else {
                return ExitCode::FAILURE;
            };

            let shutdown = Arc::new(AtomicBool::new(false));
            let flag = shutdown.clone();
            if let Err(e) = ctrlc::set_handler(move || {
                // A second Ctrl-C while the shell is blocked on input exits at once.
                if flag.swap(true, Ordering::SeqCst) {
                    std::process::exit(130);
                }
                println!();
                println!(
                    "{}",
                    "⚠  Ctrl-C received – press Enter to stop the session and exit …"
                        .yellow()
                        .bold()
                );
            }) {
                warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
            }

            println!("  Type {} for a list of commands.\n", "/help".bold().cyan());
            repl::Shell::new(cfg, runtime).run(shutdown);
            ExitCode::SUCCESS
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Subcommands
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_run(cfg: Config) -> ExitCode {
    let Some(runtime) = build_runtime() else {
        return ExitCode::FAILURE;
    };
    let (stop_tx, mut stop_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = stop_tx.send(true);
    }) {
        error!(error = %e, "failed to install Ctrl-C handler");
        return ExitCode::FAILURE;
    }

    runtime.block_on(async move {
        let session = TrackingSession::start(cfg.session_config(), Arc::new(EventBus::default()));
        let tracker = session.tracker().clone();
        let mut connection = tracker.watch_connection();
        let mut position = tracker.watch_position();
        let mut danger = tracker.watch_danger();
        println!("  Streaming from {}. Press Ctrl-C to stop.", cfg.server_url.bold());

        loop {
            tokio::select! {
                Ok(()) = connection.changed() => {
                    let status = connection.borrow_and_update().clone();
                    println!("  connection: {status}");
                }
                Ok(()) = position.changed() => {
                    if let Some(fix) = *position.borrow_and_update() {
                        println!("  {}", repl::format_fix(&fix));
                    }
                }
                Ok(()) = danger.changed() => {
                    if *danger.borrow_and_update() {
                        println!("  {}", "⚠  DANGER".red().bold());
                    } else {
                        println!("  {}", "danger cleared".green());
                    }
                }
                _ = stop_rx.wait_for(|raised| *raised) => break,
            }
        }

        session.stop().await;
    });
    println!("{}", "  ✓ Exiting Locus.".green());
    ExitCode::SUCCESS
}

fn cmd_schema() -> ExitCode {
    let schema = schemars::schema_for!(RangeReport);
    match serde_json::to_string_pretty(&schema) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {}", "Error rendering schema".red(), e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_init(path: &std::path::Path, force: bool) -> ExitCode {
    if path.exists() && !force {
        println!(
            "  {} already exists. Pass {} to overwrite it.",
            path.display().to_string().bold(),
            "--force".bold()
        );
        return ExitCode::FAILURE;
    }
    match config::save_to(&Config::default(), path) {
        Ok(()) => {
            println!(
                "  {} Config saved to {}",
                "✓".green().bold(),
                path.display().to_string().bold()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("{}: {}", "Error saving config".red(), e);
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Load the config at `path`.  A missing file yields the defaults and a
/// first-run notice; an unreadable or invalid one is reported and yields `None`.
fn load_config(path: &std::path::Path) -> Option<Config> {
    match config::load_from(path) {
        Ok(Some(cfg)) => {
            println!("  Config loaded from {}", path.display().to_string().bold());
            Some(cfg)
        }
        Ok(None) => {
            println!(
                "  {} No configuration at {}. Using defaults; run `{}` to create one.",
                "First run:".bold().cyan(),
                path.display().to_string().bold(),
                "locus init".bold()
            );
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            match cfg.validate() {
                Ok(()) => Some(cfg),
                Err(e) => {
                    println!("{}: {}", "Config error".red(), e);
                    None
                }
            }
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            None
        }
    }
}

fn build_runtime() -> Option<tokio::runtime::Runtime> {
    match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => Some(rt),
        Err(e) => {
            error!(error = %e, "failed to start the async runtime");
            None
        }
    }
}

fn print_banner() {
    println!();
    println!("{}", r#"   __                    "#.bold().cyan());
    println!("{}", r#"  / /  ___  ______ _____"#.bold().cyan());
    println!("{}", r#" / /__/ _ \/ __/ // (_-<"#.bold().cyan());
    println!("{}", r#"/____/\___/\__/\_,_/___/"#.bold().cyan());
    println!();
    println!("  {} {}",
        "Locus".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Range-based indoor positioning");
    println!();
}
