//! CLI definitions for TaskHive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// TaskHive CLI.
#[derive(Parser)]
#[command(name = "taskhive")]
#[command(about = "Durable background job engine")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "taskhive.toml", global = true, env = "TASKHIVE_CONFIG")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run workers and the scheduler until Ctrl-C (default)
    Run {
        /// Override the configured worker count
        #[arg(short, long)]
        workers: Option<usize>,

        /// Do not start the recurring job scheduler
        #[arg(long)]
        no_scheduler: bool,
    },

    /// Submit a job
    Enqueue {
        /// Job type
        job_type: String,

        /// JSON payload
        #[arg(short, long, default_value = "null")]
        payload: String,

        /// Priority (higher runs first)
        #[arg(long)]
        priority: Option<i32>,

        /// Seconds to wait before the job becomes eligible
        #[arg(long)]
        delay: Option<u64>,

        /// Maximum retries after the first attempt
        #[arg(long)]
        max_retries: Option<u32>,

        /// Per-attempt timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Show a job
    Status {
        /// Job id
        job_id: String,

        /// Output format (text, json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Cancel a pending or scheduled job
    Cancel {
        /// Job id
        job_id: String,
    },

    /// Show queue counters
    Stats {
        /// Output format (text, json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// List configured recurring jobs and their next run
    Schedules,
}
