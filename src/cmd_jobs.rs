//! One-shot job and queue commands.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;

use taskhive_config::Config;
use taskhive_queue::{Job, JobId, JobStats, JobSubmitter};

use crate::engine;

/// Options of `taskhive enqueue` that override the `[jobs]` defaults.
pub(crate) struct EnqueueArgs {
    pub job_type: String,
    pub payload: String,
    pub priority: Option<i32>,
    pub delay: Option<u64>,
    pub max_retries: Option<u32>,
    pub timeout: Option<u64>,
}

pub(crate) async fn enqueue(config: &Config, args: EnqueueArgs) -> Result<()> {
    let payload: serde_json::Value =
        serde_json::from_str(&args.payload).context("payload is not valid JSON")?;

    let mut job_config = engine::default_job_config(&config.jobs)?;
    if let Some(priority) = args.priority {
        job_config.priority = priority;
    }
    if let Some(delay) = args.delay {
        job_config.delay = Duration::from_secs(delay);
    }
    if let Some(max_retries) = args.max_retries {
        job_config.max_retries = max_retries;
    }
    if let Some(timeout) = args.timeout {
        job_config.timeout = Duration::from_secs(timeout);
    }

    let queue = engine::open_queue(config).await?;
    let id = queue.submit(&args.job_type, payload, &job_config).await?;
    println!("{}", id);
    Ok(())
}

pub(crate) async fn status(config: &Config, job_id: &str, format: &str) -> Result<()> {
    let id = parse_id(job_id)?;
    let queue = engine::open_queue(config).await?;
    let job = queue.get(id).await?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&job)?),
        _ => print_job(&job),
    }
    Ok(())
}

pub(crate) async fn cancel(config: &Config, job_id: &str) -> Result<()> {
    let id = parse_id(job_id)?;
    let queue = engine::open_queue(config).await?;
    if queue.cancel(id).await? {
        println!("Cancelled {}", id);
    } else {
        let job = queue.get(id).await?;
        println!("Job {} is {} and cannot be cancelled", id, job.status);
    }
    Ok(())
}

pub(crate) async fn stats(config: &Config, format: &str) -> Result<()> {
    let queue = engine::open_queue(config).await?;
    let stats = queue.stats().await?;
    let ready = queue.ready_len().await?;
    let delayed = queue.delayed_len().await?;

    match format {
        "json" => {
            let mut value = serde_json::to_value(&stats)?;
            value["ready"] = ready.into();
            value["delayed"] = delayed.into();
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        _ => print_stats(&stats, ready, delayed),
    }
    Ok(())
}

/// Print configured recurring jobs with their next run.
pub(crate) fn schedules(config: &Config) -> Result<()> {
    if config.scheduler.jobs.is_empty() {
        println!("No recurring jobs configured.");
        return Ok(());
    }

    // Next runs are computed locally, nothing is submitted.
    let scheduler = engine::build_scheduler(config, Arc::new(NoopSubmitter))?;

    println!("{:<24} {:<16} {:<32} {:<8} {}", "ID", "JOB TYPE", "SCHEDULE", "ENABLED", "NEXT RUN");
    println!("{}", "-".repeat(104));
    for job in scheduler.list() {
        let next = scheduler
            .next_run(&job.id)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<24} {:<16} {:<32} {:<8} {}",
            job.id,
            job.job_type,
            job.schedule.to_string(),
            job.enabled,
            next
        );
    }
    Ok(())
}

struct NoopSubmitter;

#[async_trait::async_trait]
impl JobSubmitter for NoopSubmitter {
    async fn submit(
        &self,
        _job_type: &str,
        _payload: serde_json::Value,
        _config: &taskhive_queue::JobConfig,
    ) -> Result<JobId, taskhive_queue::QueueError> {
        Ok(JobId::nil())
    }
}

fn parse_id(raw: &str) -> Result<JobId> {
    raw.trim()
        .parse()
        .with_context(|| format!("'{}' is not a job id", raw))
}

fn print_job(job: &Job) {
    println!("ID:          {}", job.id);
    println!("Type:        {}", job.job_type);
    println!("Status:      {}", job.status);
    println!("Priority:    {}", job.priority);
    println!("Attempts:    {}/{}", job.attempts, job.max_retries + 1);
    println!("Created:     {}", job.created_at.to_rfc3339());
    println!("Scheduled:   {}", job.scheduled_at.to_rfc3339());
    if let Some(at) = job.started_at {
        println!("Started:     {}", at.to_rfc3339());
    }
    if let Some(at) = job.completed_at {
        println!("Completed:   {}", at.to_rfc3339());
    }
    if let Some(at) = job.failed_at {
        println!("Failed:      {}", at.to_rfc3339());
    }
    if let Some(error) = &job.error {
        println!("Error:       {}", error);
    }
    if let Some(result) = &job.result {
        println!("Result:      {}", result);
    }
    if job.status.is_queued() && job.scheduled_at > Utc::now() {
        let wait = (job.scheduled_at - Utc::now()).num_seconds();
        println!("Eligible in: {}s", wait);
    }
}

fn print_stats(stats: &JobStats, ready: u64, delayed: u64) {
    println!("Total:       {}", stats.total);
    println!("Pending:     {} ({} ready, {} delayed)", stats.pending, ready, delayed);
    println!("Processing:  {}", stats.processing);
    println!("Completed:   {}", stats.completed);
    println!("Failed:      {}", stats.failed);
    println!("Cancelled:   {}", stats.cancelled);
    match stats.last_processed {
        Some(at) => println!("Last run:    {}", at.to_rfc3339()),
        None => println!("Last run:    -"),
    }
}
