//! REPL – interactive shell for a Locus tracking session.
//!
//! Supported slash-commands:
//!   /help             – show this list
//!   /connect          – start streaming from the configured server
//!   /disconnect       – stop the running session
//!   /status           – connection, last fix and danger flag
//!   /solve d0 d1 d2 d3 – localize one set of ranges offline
//!   /anchors          – print the configured anchor layout
//!   /quit | /exit     – gracefully exit the CLI

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use locus_geometry::Localizer;
use locus_middleware::EventBus;
use locus_runtime::TrackingSession;
use locus_types::{AnchorSet, ConnectionStatus, DistanceMeasurement, PositionFix};
use tokio::runtime::Runtime;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;

struct ActiveSession {
    session: TrackingSession,
    reporter: JoinHandle<()>,
}

/// Shell state: the loaded config, the runtime sessions are spawned on and
/// the session currently running, if any.
pub struct Shell {
    cfg: Config,
    runtime: Runtime,
    active: Option<ActiveSession>,
}

impl Shell {
    pub fn new(cfg: Config, runtime: Runtime) -> Self {
        Self {
            cfg,
            runtime,
            active: None,
        }
    }

    /// Entry point for the interactive REPL.
    ///
    /// `shutdown` is polled each iteration; when set the REPL exits cleanly.
    pub fn run(mut self, shutdown: Arc<AtomicBool>) {
        let stdin = io::stdin();
        let mut stdout = io::stdout();

        loop {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }

            print!("{} ", "locus>".bold().cyan());
            stdout.flush().ok();

            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) => break, // EOF
                Ok(_) => {}
                Err(e) => {
                    eprintln!("{}: {}", "Read error".red(), e);
                    break;
                }
            }

            let mut words = line.split_whitespace();
            let Some(cmd) = words.next() else {
                continue;
            };
            let args: Vec<&str> = words.collect();

            match cmd {
                "/help" => cmd_help(),
                "/connect" => self.cmd_connect(),
                "/disconnect" => self.cmd_disconnect(),
                "/status" => self.cmd_status(),
                "/solve" => cmd_solve(&self.cfg, &args[..]),
                "/anchors" => cmd_anchors(&self.cfg.anchors),
                "/quit" | "/exit" => {
                    println!("{}", "Goodbye.".green());
                    shutdown.store(true, Ordering::SeqCst);
                    break;
                }
                other => {
                    println!(
                        "{} '{}'. Type {} for available commands.",
                        "Unknown command:".red(),
                        other.yellow(),
                        "/help".bold()
                    );
                }
            }
        }

        self.cmd_disconnect();
    }

    fn cmd_connect(&mut self) {
        if self.active.is_some() {
            println!("  Already connected. Use {} first.", "/disconnect".bold());
            return;
        }
        let _guard = self.runtime.enter();
        let session = TrackingSession::start(
            self.cfg.session_config(),
            Arc::new(EventBus::default()),
        );
        let reporter = tokio::spawn(report_danger(session.tracker().watch_danger()));
        println!("  Streaming from {}", self.cfg.server_url.bold());
        self.active = Some(ActiveSession { session, reporter });
    }

    fn cmd_disconnect(&mut self) {
        let Some(ActiveSession { session, reporter }) = self.active.take() else {
            return;
        };
        reporter.abort();
        self.runtime.block_on(session.stop());
        println!("  {} Session stopped.", "✓".green().bold());
    }

    fn cmd_status(&self) {
        let Some(active) = &self.active else {
            println!("  {}", "No session. Use /connect to start one.".dimmed());
            return;
        };
        let tracker = active.session.tracker();
        println!("  Connection : {}", status_label(&tracker.connection()));
        match tracker.last_position() {
            Some(fix) => println!("  Position   : {}", format_fix(&fix)),
            None => println!("  Position   : {}", "none yet".dimmed()),
        }
        let danger = if tracker.danger_active() {
            "ACTIVE".red().bold()
        } else {
            "clear".green()
        };
        println!("  Danger     : {danger}");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "Locus Commands".bold().underline());
    println!("  {}           – start streaming from the configured server", "/connect".bold().cyan());
    println!("  {}        – stop the running session", "/disconnect".bold().cyan());
    println!("  {}            – connection, last fix and danger flag", "/status".bold().cyan());
    println!("  {}  – localize one set of ranges", "/solve d0 d1 d2 d3".bold().cyan());
    println!("  {}           – print the anchor layout", "/anchors".bold().cyan());
    println!("  {}       – exit the CLI", "/quit  /exit".bold().cyan());
    println!();
}

/// Localize one sample against the configured anchors and print the result.
pub(crate) fn cmd_solve<S: AsRef<str>>(cfg: &Config, args: &[S]) {
    let distances = match parse_distances(args) {
        Ok(d) => d,
        Err(e) => {
            println!("{}: {}", "Invalid ranges".red(), e);
            return;
        }
    };
    let localizer = Localizer::new(cfg.anchors).with_options(cfg.refine_options());
    match localizer.locate(&DistanceMeasurement::new(distances)) {
        Ok(r) => println!(
            "  {}",
            format_fix(&PositionFix {
                position: r.position,
                iterations: r.iterations,
                converged: r.converged,
            })
        ),
        Err(e) => println!("{}: {}", "Localization failed".red(), e),
    }
}

fn cmd_anchors(anchors: &AnchorSet) {
    println!("{}", "Anchors".bold().underline());
    for (i, a) in anchors.as_slice().iter().enumerate() {
        println!("  {} {}", format!("[{i}]").dimmed(), a);
    }
}

async fn report_danger(mut danger: watch::Receiver<bool>) {
    while danger.changed().await.is_ok() {
        if *danger.borrow_and_update() {
            println!("\n  {}", "⚠  DANGER: tag entered the danger zone".red().bold());
        } else {
            println!("\n  {}", "danger cleared".green());
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Parse exactly four whitespace-separated ranges.
pub(crate) fn parse_distances<S: AsRef<str>>(args: &[S]) -> Result<Vec<f64>, String> {
    if args.len() != AnchorSet::LEN {
        return Err(format!("expected {} ranges, got {}", AnchorSet::LEN, args.len()));
    }
    args.iter()
        .map(|s| {
            let s = s.as_ref();
            s.parse::<f64>().map_err(|_| format!("'{s}' is not a number"))
        })
        .collect()
}

pub(crate) fn format_fix(fix: &PositionFix) -> String {
    let p = &fix.position;
    let mut out = format!(
        "x = {:.3}  y = {:.3}  z = {:.3}  ({} iterations)",
        p.x, p.y, p.z, fix.iterations
    );
    if !fix.converged {
        out.push_str("  [not converged]");
    }
    out
}

fn status_label(status: &ConnectionStatus) -> colored::ColoredString {
    match status {
        ConnectionStatus::Connected => status.to_string().green(),
        ConnectionStatus::Connecting => status.to_string().yellow(),
        ConnectionStatus::Disconnected => status.to_string().dimmed(),
        ConnectionStatus::Failed(_) => status.to_string().red(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use locus_types::Point;

    #[test]
    fn parse_distances_accepts_four_numbers() {
        let d = parse_distances(&["7.0711", "7.0711", "7", "1e1"]).unwrap();
        assert_eq!(d, vec![7.0711, 7.0711, 7.0, 10.0]);
    }

    #[test]
    fn parse_distances_rejects_wrong_count_and_garbage() {
        let err = parse_distances(&["1", "2", "3"]).unwrap_err();
        assert!(err.contains("got 3"));
        let err = parse_distances(&["1", "2", "x", "4"]).unwrap_err();
        assert!(err.contains("'x'"));
    }

    #[test]
    fn format_fix_flags_unconverged_results() {
        let mut fix = PositionFix {
            position: Point::new(5.0, 5.0, 0.25),
            iterations: 4,
            converged: true,
        };
        assert_eq!(format_fix(&fix), "x = 5.000  y = 5.000  z = 0.250  (4 iterations)");
        fix.converged = false;
        assert!(format_fix(&fix).ends_with("[not converged]"));
    }
}
