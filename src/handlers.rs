//! Built-in diagnostic handlers.

use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use taskhive_queue::{HandlerError, HandlerRegistry, JobContext};

#[derive(Debug, Deserialize)]
struct SleepPayload {
    ms: u64,
}

/// Register `echo` and `sleep`.
pub(crate) fn register_builtin(registry: &HandlerRegistry) {
    registry.register_fn("echo", |ctx: JobContext, payload: serde_json::Value| async move {
        info!(job_id = %ctx.job_id(), attempt = ctx.attempt(), payload = %payload, "echo");
        Ok::<_, HandlerError>(payload)
    });

    registry.register_fn("sleep", |ctx: JobContext, payload: SleepPayload| async move {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(payload.ms)) => {
                Ok(serde_json::json!({ "slept_ms": payload.ms }))
            }
            _ = ctx.cancelled() => Err(HandlerError::Cancelled),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    use taskhive_queue::{Job, JobHandler};

    fn context(job: &Job) -> JobContext {
        JobContext::new(job, None, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_echo_returns_payload() {
        let registry = HandlerRegistry::new();
        register_builtin(&registry);

        let job = Job::new("echo", serde_json::json!({"hello": "world"}));
        let handler = registry.get("echo").unwrap();
        let result = handler.handle(context(&job), &job).await.unwrap();
        assert_eq!(result, Some(serde_json::json!({"hello": "world"})));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep() {
        let registry = HandlerRegistry::new();
        register_builtin(&registry);

        let job = Job::new("sleep", serde_json::json!({"ms": 250}));
        let handler = registry.get("sleep").unwrap();
        let result = handler.handle(context(&job), &job).await.unwrap();
        assert_eq!(result, Some(serde_json::json!({"slept_ms": 250})));
    }

    #[tokio::test]
    async fn test_sleep_rejects_bad_payload() {
        let registry = HandlerRegistry::new();
        register_builtin(&registry);

        let job = Job::new("sleep", serde_json::json!({"seconds": 1}));
        let handler = registry.get("sleep").unwrap();
        let err = handler.handle(context(&job), &job).await.unwrap_err();
        assert!(matches!(err, HandlerError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn test_sleep_stops_on_cancel() {
        let registry = HandlerRegistry::new();
        register_builtin(&registry);

        let job = Job::new("sleep", serde_json::json!({"ms": 60_000}));
        let token = CancellationToken::new();
        token.cancel();
        let ctx = JobContext::new(&job, None, token);
        let err = registry.get("sleep").unwrap().handle(ctx, &job).await.unwrap_err();
        assert!(matches!(err, HandlerError::Cancelled));
    }
}
