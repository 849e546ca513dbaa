//! TaskHive - durable background job engine
//!
//! Main entry point for the TaskHive CLI and worker process.

mod cli;
mod cmd_jobs;
mod cmd_run;
mod engine;
mod handlers;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::warn;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use taskhive_config::{ConfigLoader, ConfigValidator, LoggingConfig};

use cli::{Cli, Commands};

/// Initialize tracing with console and file output.
///
/// Log files are written to the configured directory with daily rotation.
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let log_dir = logging.log_dir();
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("taskhive")
        .filename_suffix("log")
        .max_log_files(30)
        .build(&log_dir)
        .context("creating log file appender")?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // The guard flushes buffered lines on drop; keep it for the whole process.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let console = if logging.json {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer().with_target(true).with_ansi(true).boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    init_tracing(&config.logging)?;

    let warnings = ConfigValidator::validate(&config).into_result()?;
    for warning in warnings {
        warn!("Config {}: {}", warning.path, warning.message);
    }

    match cli.command {
        None => cmd_run::run(config, None, false).await,
        Some(Commands::Run {
            workers,
            no_scheduler,
        }) => cmd_run::run(config, workers, no_scheduler).await,
        Some(Commands::Enqueue {
            job_type,
            payload,
            priority,
            delay,
            max_retries,
            timeout,
        }) => {
            let args = cmd_jobs::EnqueueArgs {
                job_type,
                payload,
                priority,
                delay,
                max_retries,
                timeout,
            };
            cmd_jobs::enqueue(&config, args).await
        }
        Some(Commands::Status { job_id, format }) => {
            cmd_jobs::status(&config, &job_id, &format).await
        }
        Some(Commands::Cancel { job_id }) => cmd_jobs::cancel(&config, &job_id).await,
        Some(Commands::Stats { format }) => cmd_jobs::stats(&config, &format).await,
        Some(Commands::Schedules) => cmd_jobs::schedules(&config),
    }
}
