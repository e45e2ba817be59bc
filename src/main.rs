mod config;
mod db;
mod error;
mod grading;
mod ipc;
mod model;
mod snapshot;
mod store;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use model::RunMode;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, prelude::*};

/// End-of-term grading service. Without a subcommand it serves JSON-lines requests on
/// stdin/stdout.
#[derive(Debug, Parser)]
#[command(name = "gradingd", version)]
struct Cli {
    /// Log at DEBUG instead of INFO.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Args)]
struct JobArgs {
    /// Workspace directory holding gradingd.sqlite3.
    #[arg(long)]
    workspace: PathBuf,
    /// Log intended mutations without writing them.
    #[arg(long, conflicts_with = "commit")]
    debug: bool,
    /// Write all mutations.
    #[arg(long)]
    commit: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Grade every eligible registration in the active term.
    Final {
        #[command(flatten)]
        job: JobArgs,
        /// Export a snapshot bundle here before a commit run.
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
    /// Resolve, stall or defer in-progress Incompletes.
    Incompletes {
        #[command(flatten)]
        job: JobArgs,
        /// Evaluation date (YYYY-MM-DD); defaults to the local date.
        #[arg(long)]
        today: Option<NaiveDate>,
    },
    /// Print final-grade and Incomplete counters for the active term.
    Stats {
        #[arg(long)]
        workspace: PathBuf,
    },
    /// Replace the workspace database from a snapshot bundle.
    Restore {
        #[arg(long)]
        workspace: PathBuf,
        #[arg(long)]
        snapshot: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let level = if verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
    // stdout carries the IPC protocol and batch reports.
    let fmt = fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .with_line_number(false);
    tracing_subscriber::registry().with(fmt).with(level).init();
}

fn resolve_mode(job: &JobArgs, cfg: &config::GradingConfig) -> RunMode {
    if job.commit {
        RunMode::Commit
    } else if job.debug {
        RunMode::Debug
    } else {
        cfg.default_mode
    }
}

fn open_workspace(workspace: &Path) -> anyhow::Result<rusqlite::Connection> {
    if !workspace.is_dir() {
        anyhow::bail!("workspace not found: {}", workspace.to_string_lossy());
    }
    db::open_db(workspace)
        .with_context(|| format!("failed to open workspace {}", workspace.to_string_lossy()))
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    let mut stdout = io::stdout();
    writeln!(stdout, "{}", serde_json::to_string_pretty(value)?)?;
    stdout.flush()?;
    Ok(())
}

fn run_command(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Final { job, snapshot } => {
            let conn = open_workspace(&job.workspace)?;
            let cfg = config::load(&conn)?;
            let mode = resolve_mode(&job, &cfg);
            let mut written = None;
            if let (RunMode::Commit, Some(path)) = (mode, snapshot.as_ref()) {
                let s = snapshot::export_snapshot(&conn, &job.workspace, path)?;
                written = Some(s.path.to_string_lossy().to_string());
            }
            let mut report = grading::finalize::run_final_grades(&conn, &cfg, mode)?;
            report.snapshot = written;
            print_json(&report)
        }
        Command::Incompletes { job, today } => {
            let conn = open_workspace(&job.workspace)?;
            let cfg = config::load(&conn)?;
            let mode = resolve_mode(&job, &cfg);
            let today = today.unwrap_or_else(|| chrono::Local::now().date_naive());
            let report = grading::incomplete::run_incompletes(&conn, &cfg, mode, today)?;
            print_json(&report)
        }
        Command::Stats { workspace } => {
            use store::GradingStore;
            let conn = open_workspace(&workspace)?;
            let cfg = config::load(&conn)?;
            let store = store::SqliteStore::new(&conn);
            let term = store.active_term()?.context("no active term")?.term;
            let counters = grading::stats::term_counters(&store, &cfg, &term)?;
            grading::stats::log_term_counters("current", &counters);
            print_json(&serde_json::json!({
                "term": term,
                "finalGrades": counters.final_grades,
                "incompletes": counters.incompletes,
            }))
        }
        Command::Restore {
            workspace,
            snapshot,
        } => {
            let restored = snapshot::restore_snapshot(&snapshot, &workspace)?;
            // Re-open once so additive migrations run against the restored file.
            db::open_db(&workspace)?;
            print_json(&serde_json::json!({
                "workspacePath": workspace.to_string_lossy(),
                "dbSha256": restored.db_sha256,
            }))
        }
    }
}

fn serve() {
    let mut state = ipc::AppState::default();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                let _ = writeln!(
                    stdout,
                    "{}",
                    serde_json::json!({
                        "ok": false,
                        "error": { "code": "bad_json", "message": e.to_string() }
                    })
                );
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        None => {
            tracing::debug!("serving requests on stdin");
            serve();
            Ok(())
        }
        Some(command) => run_command(command),
    }
}
