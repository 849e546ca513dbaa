//! Foreground engine: worker pool plus recurring job scheduler.

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use taskhive_config::Config;
use taskhive_queue::{Client, HandlerRegistry, WorkerHooks};

use crate::engine;
use crate::handlers;

/// Run until Ctrl-C.
pub(crate) async fn run(mut config: Config, workers: Option<usize>, no_scheduler: bool) -> Result<()> {
    info!("Starting TaskHive v{}", env!("CARGO_PKG_VERSION"));

    if let Some(count) = workers {
        config.workers.count = count;
    }

    let store = engine::open_store(&config.store).await?;

    let registry = Arc::new(HandlerRegistry::new());
    handlers::register_builtin(&registry);
    info!(job_types = ?registry.job_types(), "Handlers registered");

    let hooks = WorkerHooks::new()
        .on_success(|job, elapsed| {
            info!(job_id = %job.id, job_type = %job.job_type, elapsed_ms = elapsed.as_millis() as u64, "Job completed");
        })
        .on_error(|job, err| {
            warn!(job_id = %job.id, job_type = %job.job_type, status = %job.status, error = %err, "Job attempt failed");
        });

    let client = Arc::new(Client::with_hooks(
        store,
        registry,
        engine::client_config(&config),
        hooks,
    ));

    let token = CancellationToken::new();
    client.start(&token)?;

    let scheduler = if config.scheduler.enabled && !no_scheduler {
        let scheduler = Arc::new(engine::build_scheduler(&config, client.clone())?);
        let handle = scheduler.start(token.child_token());
        Some(handle)
    } else {
        info!("Scheduler disabled");
        None
    };

    info!(
        workers = config.workers.count,
        namespace = %config.store.namespace,
        "TaskHive ready, press Ctrl-C to stop"
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
    }

    info!("Shutting down...");
    token.cancel();
    if let Some(handle) = scheduler {
        if let Err(e) = handle.await {
            error!("Scheduler task failed: {}", e);
        }
    }
    client.stop().await;

    match client.stats().await {
        Ok(stats) => info!(
            completed = stats.completed,
            failed = stats.failed,
            pending = stats.pending,
            "Final queue counters"
        ),
        Err(e) => warn!("Could not read queue counters: {}", e),
    }

    Ok(())
}
