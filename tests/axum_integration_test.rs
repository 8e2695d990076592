//! HTTP API tests driving the router in-process with `tower::ServiceExt::oneshot`

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use qml_queue::{create_router, submission_route, JobQueue, JobStatus, QueueConfig};
use serde_json::{json, Value};
use tower::ServiceExt;

fn app(queue: &JobQueue) -> Router {
    create_router(queue.clone()).route(
        "/api/orders/process",
        submission_route(queue.clone(), "order:process"),
    )
}

async fn send(app: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn test_health_check() {
    let queue = JobQueue::new(QueueConfig::default()).unwrap();

    let (status, body) = send(app(&queue), Method::GET, "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn test_job_statistics_reflect_queue() {
    let queue = JobQueue::new(QueueConfig::default()).unwrap();
    queue.add_default("email:send", json!({})).unwrap();
    queue.add_default("email:send", json!({})).unwrap();

    let (status, body) = send(app(&queue), Method::GET, "/api/jobs/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["pending"], 2);
    assert_eq!(body["data"]["total_jobs"], 2);

    let (status, body) = send(app(&queue), Method::GET, "/api/statistics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["running"], false);
    assert_eq!(body["data"]["recent_jobs"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_list_jobs_by_status() {
    let queue = JobQueue::new(QueueConfig::default()).unwrap();
    let id = queue.add_default("inventory:update", json!({ "sku": "A-1" })).unwrap();

    let (status, body) = send(app(&queue), Method::GET, "/api/jobs?status=pending", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["id"], id);

    let (status, body) = send(app(&queue), Method::GET, "/api/jobs?status=completed", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].as_array().unwrap().is_empty());

    let (status, body) = send(app(&queue), Method::GET, "/api/jobs?status=enqueued", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_job_details() {
    let queue = JobQueue::new(QueueConfig::default()).unwrap();
    let id = queue.add_default("currency:convert", json!({ "amount": 10 })).unwrap();

    let (status, body) = send(app(&queue), Method::GET, &format!("/api/jobs/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["job_type"], "currency:convert");
    assert_eq!(body["data"]["payload"]["amount"], 10);

    let (status, body) = send(app(&queue), Method::GET, "/api/jobs/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("missing"));
}

#[tokio::test]
async fn test_cancel_pending_job() {
    let queue = JobQueue::new(QueueConfig::default()).unwrap();
    let id = queue.add_default("email:send", json!({})).unwrap();
    let uri = format!("/api/jobs/{}", id);

    let (status, body) = send(app(&queue), Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["cancelled"], true);
    assert_eq!(body["data"]["advisory"], false);
    assert!(queue.get_job(&id).is_none());

    let (status, _) = send(app(&queue), Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancel_finished_job_conflicts() {
    let queue = JobQueue::new(QueueConfig::default()).unwrap();
    queue.register_fn("email:send", |_: Value, _| async { Ok(None) });
    queue.start().await.unwrap();
    let id = queue.add_default("email:send", json!({})).unwrap();
    let job = queue.wait_for(&id).await.unwrap();
    queue.shutdown().await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    let (status, _) = send(app(&queue), Method::DELETE, &format!("/api/jobs/{}", id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_submission_route_accepts_job() {
    let queue = JobQueue::new(QueueConfig::default()).unwrap();

    let request = json!({
        "payload": { "orderId": 1001 },
        "options": { "priority": 7, "maxAttempts": 2 }
    });
    let (status, body) = send(app(&queue), Method::POST, "/api/orders/process", Some(request)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["jobType"], "order:process");

    let job_id = body["data"]["jobId"].as_str().unwrap();
    let job = queue.get_job(job_id).unwrap();
    assert_eq!(job.priority, 7);
    assert_eq!(job.max_attempts, 2);
    assert_eq!(job.payload["orderId"], 1001);
}

#[tokio::test]
async fn test_submission_route_rejects_invalid_options() {
    let queue = JobQueue::new(QueueConfig::default()).unwrap();

    let request = json!({ "payload": {}, "options": { "priority": -1 } });
    let (status, body) = send(app(&queue), Method::POST, "/api/orders/process", Some(request)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(queue.get_stats().total(), 0);
}

#[tokio::test]
async fn test_submission_route_reports_full_queue() {
    let queue = JobQueue::new(QueueConfig::default().max_pending(1)).unwrap();
    queue.add_default("order:process", json!({})).unwrap();

    let request = json!({ "payload": {} });
    let (status, body) = send(app(&queue), Method::POST, "/api/orders/process", Some(request)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("full"));
}
