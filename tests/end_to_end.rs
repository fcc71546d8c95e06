//! Submissions through the HTTP front door, compaction through the trigger
//! service, all sharing one staging context the way the monolith wires them.

use acceptor::{AcceptorSettings, AppState, create_router};
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use common::StagingContext;
use common::testing::TestConfigBuilder;
use compactor::{CompactionService, RunOutcome};
use serde_json::{Value, json};
use staging::{parse_batch, stage_batch};
use std::time::Duration;
use tower::ServiceExt;

fn router(context: &StagingContext, token: Option<&str>) -> Router {
    let settings = AcceptorSettings {
        auth_token: token.map(str::to_string),
        cors_allow_origin: "*".to_string(),
    };
    create_router(AppState::from(context), &settings)
}

async fn submit(router: &Router, article: Value, token: Option<&str>) -> (StatusCode, Value) {
    let mut request = Request::builder()
        .method("POST")
        .uri("/save")
        .header("content-type", "application/json");
    if let Some(token) = token {
        request = request.header("x-auth-token", token);
    }
    let request = request.body(Body::from(article.to_string())).unwrap();

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_submit_then_compact() {
    let config = TestConfigBuilder::new().build();
    let context = StagingContext::from_config(&config).unwrap();
    let router = router(&context, Some("secret"));

    let (status, _) = submit(
        &router,
        json!({"url": "https://a", "title": "A", "excerpt": "e", "tags": ["x"]}),
        Some("secret"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = submit(
        &router,
        json!({"url": "https://b", "title": "B", "excerpt": "f", "tags": []}),
        Some("secret"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = submit(
        &router,
        json!({"url": "https://c", "title": "C", "excerpt": "g", "tags": []}),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].as_str().unwrap().contains("x-auth-token"));

    let service = CompactionService::new(context.compactor.clone(), config.compactor.tick_interval);
    match service.run_once().await.unwrap() {
        RunOutcome::Compacted(report) => assert_eq!(report.counts(), (2, 2)),
        other => panic!("unexpected outcome: {other:?}"),
    }

    assert!(context.pending.list().await.unwrap().is_empty());
    let set = context.compactor.canonical().load().await.unwrap();
    assert_eq!(set.len(), 2);
    assert_eq!(set.get("https://b").unwrap().title(), "B");
}

#[tokio::test]
async fn test_resubmission_replaces_archived_article() {
    let dir = tempfile::tempdir().unwrap();
    let config = TestConfigBuilder::new()
        .with_local_storage(dir.path())
        .build();
    let context = StagingContext::from_config(&config).unwrap();
    let router = router(&context, None);

    submit(
        &router,
        json!({"url": "https://a", "title": "first", "excerpt": "e", "tags": []}),
        None,
    )
    .await;
    let report = context.compactor.compact().await.unwrap();
    assert_eq!(report.counts(), (1, 1));

    submit(
        &router,
        json!({"url": "https://a", "title": "second", "excerpt": "e", "tags": ["y"]}),
        None,
    )
    .await;
    let report = context.compactor.compact().await.unwrap();
    assert_eq!(report.counts(), (1, 1));
    assert_eq!(report.replaced, 1);

    // A separate process on the same directory sees the replacement
    let reopened = StagingContext::from_config(&config).unwrap();
    let set = reopened.compactor.canonical().load().await.unwrap();
    assert_eq!(set.len(), 1);
    assert_eq!(set.get("https://a").unwrap().title(), "second");
    assert_eq!(set.get("https://a").unwrap().tags(), ["y".to_string()]);
}

#[tokio::test]
async fn test_import_file_then_compact() {
    let config = TestConfigBuilder::new().build();
    let context = StagingContext::from_config(&config).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("articles.json");
    let batch = json!([
        {"url": "https://a", "title": "A", "excerpt": "e", "tags": []},
        {"title": "missing url", "excerpt": "e", "tags": []},
        {"url": "https://b", "title": "B", "source": "Feed", "excerpt": "f", "tags": ["t"],
         "timestamp": "2024-03-01T10:00:00"}
    ]);
    tokio::fs::write(&path, batch.to_string()).await.unwrap();

    let body = tokio::fs::read(&path).await.unwrap();
    let values = parse_batch(&body).unwrap();
    let report = stage_batch(&context.pending, values).await.unwrap();
    assert_eq!(report.staged.len(), 2);
    assert_eq!(report.rejected, vec![1]);

    let report = context.compactor.compact().await.unwrap();
    assert_eq!(report.counts(), (2, 2));

    let set = context.compactor.canonical().load().await.unwrap();
    assert_eq!(set.get("https://b").unwrap().source(), Some("Feed"));
}

#[tokio::test]
async fn test_compaction_loop_drains_submissions() {
    let config = TestConfigBuilder::new()
        .with_tick_interval(Duration::from_millis(20))
        .build();
    let context = StagingContext::from_config(&config).unwrap();
    let router = router(&context, None);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let service = CompactionService::new(context.compactor.clone(), config.compactor.tick_interval);
    let handle = tokio::spawn(async move {
        service
            .run(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    for i in 0..5 {
        let (status, _) = submit(
            &router,
            json!({"url": format!("https://site/{i}"), "title": "t", "excerpt": "e", "tags": []}),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let mut archived = 0;
    for _ in 0..100 {
        archived = context.compactor.canonical().load().await.unwrap().len();
        if archived == 5 && context.pending.list().await.unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(archived, 5);

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();

    let metrics = context.compactor.metrics();
    assert!(metrics.entries_merged() >= 5);
}
