use super::*;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

struct StaticHandler(&'static str);

#[async_trait]
impl JobHandler for StaticHandler {
    async fn handle(&self, _ctx: JobContext, _job: &Job) -> HandlerResult {
        Ok(Some(serde_json::json!(self.0)))
    }
}

#[derive(Deserialize)]
struct Email {
    to: String,
}

fn ctx_for(job: &Job) -> JobContext {
    JobContext::new(job, None, CancellationToken::new())
}

#[tokio::test]
async fn test_register_and_get() {
    let registry = HandlerRegistry::new();
    assert!(registry.is_empty());

    registry.register("send_email", StaticHandler("sent"));
    assert!(registry.contains("send_email"));
    assert_eq!(registry.len(), 1);

    let job = Job::new("send_email", serde_json::Value::Null);
    let handler = registry.get("send_email").unwrap();
    let output = handler.handle(ctx_for(&job), &job).await.unwrap();
    assert_eq!(output, Some(serde_json::json!("sent")));
}

#[test]
fn test_get_missing() {
    let registry = HandlerRegistry::new();
    assert!(registry.get("unknown").is_none());
}

#[tokio::test]
async fn test_last_writer_wins() {
    let registry = HandlerRegistry::new();
    assert!(registry.register("report", StaticHandler("v1")).is_none());
    assert!(registry.register("report", StaticHandler("v2")).is_some());
    assert_eq!(registry.len(), 1);

    let job = Job::new("report", serde_json::Value::Null);
    let output = registry.get("report").unwrap().handle(ctx_for(&job), &job).await.unwrap();
    assert_eq!(output, Some(serde_json::json!("v2")));
}

#[test]
fn test_unregister_and_list() {
    let registry = HandlerRegistry::new();
    registry.register("b", StaticHandler("b"));
    registry.register("a", StaticHandler("a"));
    assert_eq!(registry.job_types(), vec!["a".to_string(), "b".to_string()]);

    assert!(registry.unregister("a").is_some());
    assert!(registry.unregister("a").is_none());
    assert_eq!(registry.job_types(), vec!["b".to_string()]);
}

#[tokio::test]
async fn test_register_fn_typed_payload() {
    let registry = HandlerRegistry::new();
    registry.register_fn("send_email", |_ctx, email: Email| async move {
        Ok::<_, HandlerError>(serde_json::json!({ "delivered_to": email.to }))
    });

    let job = Job::new("send_email", serde_json::json!({"to": "a@example.com"}));
    let output = registry.get("send_email").unwrap().handle(ctx_for(&job), &job).await.unwrap();
    assert_eq!(output, Some(serde_json::json!({"delivered_to": "a@example.com"})));
}

#[tokio::test]
async fn test_register_fn_invalid_payload() {
    let registry = HandlerRegistry::new();
    registry.register_fn("send_email", |_ctx, _email: Email| async move { Ok::<_, HandlerError>(()) });

    let job = Job::new("send_email", serde_json::json!({"recipient": 42}));
    let err = registry.get("send_email").unwrap().handle(ctx_for(&job), &job).await.unwrap_err();
    assert!(matches!(err, HandlerError::InvalidPayload(_)));
}

#[tokio::test]
async fn test_register_fn_unit_result_is_empty() {
    let registry = HandlerRegistry::new();
    registry.register_fn("noop", |_ctx, _payload: serde_json::Value| async move {
        Ok::<_, HandlerError>(())
    });

    let job = Job::new("noop", serde_json::Value::Null);
    let output = registry.get("noop").unwrap().handle(ctx_for(&job), &job).await.unwrap();
    assert!(output.is_none());
}

#[tokio::test]
async fn test_register_fn_error_passthrough() {
    let registry = HandlerRegistry::new();
    registry.register_fn("flaky", |_ctx, _payload: serde_json::Value| async move {
        Err::<(), _>(HandlerError::failed("upstream unavailable"))
    });

    let job = Job::new("flaky", serde_json::Value::Null);
    let err = registry.get("flaky").unwrap().handle(ctx_for(&job), &job).await.unwrap_err();
    assert_eq!(err.to_string(), "upstream unavailable");
}
