//! duetask - due-date task tracker
//!
//! `serve` と `worker` がプロセスの起動手順、それ以外は 1 回きりのコマンド。
//! 予約キューはプロセス内にしかないので、`add` / `update` で積んだジョブは
//! worker 側の起動時 priming と sweep が拾い直す。

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use duetask_core::app::{App, DEFAULT_PAGE_LIMIT, Page, TaskUpdate};
use duetask_core::config::LogConfig;
use duetask_core::{AppBuilder, Config, DueDate, Task, TaskId, TaskStatus};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Daily files kept per log, about one month.
const LOG_FILES_KEPT: usize = 31;

/// duetask - tasks that complete themselves when their due date passes
#[derive(Parser, Debug)]
#[command(name = "duetask")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file (`:memory:` for a throwaway store)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Log level or filter directive; RUST_LOG wins when set
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Also write daily log files into this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a PENDING task
    Add {
        #[arg(long)]
        title: String,

        /// RFC 3339, or zone-less `YYYY-MM-DDTHH:MM:SS` read as UTC
        #[arg(long)]
        due: DueDate,
    },

    /// Edit a task; a status edit bypasses the due-date logic
    Update {
        id: TaskId,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        due: Option<DueDate>,

        #[arg(long)]
        status: Option<TaskStatus>,
    },

    /// Delete a task
    Delete { id: TaskId },

    /// List tasks ordered by due date
    #[command(alias = "ls")]
    List {
        #[arg(long)]
        status: Option<TaskStatus>,

        /// Skip this many tasks
        #[arg(long, default_value_t = 0)]
        offset: usize,

        /// Return at most this many tasks
        #[arg(long, default_value_t = DEFAULT_PAGE_LIMIT)]
        limit: usize,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Count tasks by status, including overdue ones
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Run the status transition for one task
    Transition { id: TaskId },

    /// Run one reconciliation sweep
    Sweep,

    /// Run the startup catch-up and verify nothing overdue is left
    CatchUp,

    /// Serving-process boot: catch up, then run workers until Ctrl-C
    Serve,

    /// Worker-process boot: ready sweep, priming, workers and periodic sweep
    Worker {
        /// Number of workers
        #[arg(long)]
        concurrency: Option<usize>,

        /// Seconds between periodic sweeps (0 disables)
        #[arg(long)]
        sweep_interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli)?;
    // flushes the file writers on exit
    let _log_guards = init_tracing(&config.log)?;

    let app = AppBuilder::new()
        .with_config(config)
        .build()
        .context("failed to initialize duetask")?;

    run(&app, cli.command).await
}

/// Defaults → file → `DUETASK_*` → flags.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref()).context("failed to load config")?;

    if let Some(database) = &cli.database {
        config.database.path = database.clone();
    }
    if let Some(level) = &cli.log_level {
        config.log.level = level.clone();
    }
    if let Some(dir) = &cli.log_dir {
        config.log.dir = Some(dir.clone());
    }
    if let Commands::Worker {
        concurrency,
        sweep_interval,
    } = &cli.command
    {
        if let Some(concurrency) = concurrency {
            config.worker.concurrency = *concurrency;
        }
        if let Some(secs) = sweep_interval {
            config.sweep.interval_secs = *secs;
        }
    }
    Ok(config)
}

/// Console always. With `log.dir`, also a full log and a WARN+ error log,
/// both rotated daily.
fn init_tracing(log: &LogConfig) -> Result<Vec<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&log.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let mut guards = Vec::new();
    let (full_file, error_file) = match &log.dir {
        Some(dir) => {
            let (full, full_guard) = tracing_appender::non_blocking(rolling_file(dir, "duetask")?);
            let (errors, errors_guard) =
                tracing_appender::non_blocking(rolling_file(dir, "duetask.error")?);
            guards.push(full_guard);
            guards.push(errors_guard);
            (
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_line_number(true)
                        .with_writer(full),
                ),
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_line_number(true)
                        .with_writer(errors)
                        .with_filter(LevelFilter::WARN),
                ),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(full_file)
        .with(error_file)
        .init();
    Ok(guards)
}

fn rolling_file(dir: &Path, prefix: &str) -> Result<RollingFileAppender> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .filename_suffix("log")
        .max_log_files(LOG_FILES_KEPT)
        .build(dir)
        .with_context(|| format!("failed to open log files in {}", dir.display()))
}

async fn run(app: &App, command: Commands) -> Result<()> {
    match command {
        Commands::Add { title, due } => {
            let task = app.tasks().create(title, due).await?;
            println!("{}", task.id);
        }

        Commands::Update {
            id,
            title,
            due,
            status,
        } => {
            let update = TaskUpdate {
                title,
                due_date: due,
                status,
            };
            if update.is_empty() {
                bail!("nothing to update: pass --title, --due or --status");
            }
            match app.tasks().update(id, update).await? {
                Some(task) => print_task(&task),
                None => bail!("task {id} not found"),
            }
        }

        Commands::Delete { id } => {
            if !app.tasks().delete(id).await? {
                bail!("task {id} not found");
            }
            println!("deleted {id}");
        }

        Commands::List {
            status,
            offset,
            limit,
            json,
        } => {
            let tasks = app.tasks().list(status, Page::new(offset, limit)).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            } else {
                for task in &tasks {
                    print_task(task);
                }
            }
        }

        Commands::Status { json } => {
            let report = app.status().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "total={} pending={} done={} overdue={}",
                    report.total, report.pending, report.done, report.overdue
                );
            }
        }

        Commands::Transition { id } => {
            let outcome = app.transition().transition(id).await?;
            println!("{outcome}");
        }

        Commands::Sweep => {
            let transitioned = app.sweep().sweep().await?;
            println!("transitioned {transitioned}");
        }

        Commands::CatchUp => {
            let transitioned = app.catch_up().catch_up_synchronously().await?;
            println!("transitioned {transitioned}");
        }

        Commands::Serve => {
            let (caught_up, handle) = app
                .start_serving()
                .await
                .context("startup catch-up failed, refusing to serve")?;
            tracing::info!(caught_up, "serving; press Ctrl-C to stop");

            wait_for_shutdown().await?;
            handle.shutdown().await;
        }

        Commands::Worker { .. } => {
            let handle = app.start_worker().await?;
            tracing::info!(
                concurrency = app.config().worker.concurrency,
                "worker running; press Ctrl-C to stop"
            );

            wait_for_shutdown().await?;
            handle.shutdown().await;
        }
    }
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    tracing::info!("shutdown requested");
    Ok(())
}

fn print_task(task: &Task) {
    println!(
        "{}  {:<7}  {}  {}",
        task.id,
        task.status.as_str(),
        task.due_date,
        task.title
    );
}
