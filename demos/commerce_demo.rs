//! Commerce backend offloading work to a job queue
//!
//! Registers handlers for notifications, inventory, currency conversion and
//! order processing, submits a batch of jobs and logs their lifecycle events.
//!
//! Run with `--dashboard` to keep serving the HTTP API and dashboard on
//! `QML_DASHBOARD_HOST:QML_DASHBOARD_PORT` after the batch finishes.

use async_trait::async_trait;
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{info, warn};

use qml_queue::{
    submission_route, Backoff, DashboardConfig, DashboardServer, HandlerContext, JobEvent,
    JobHandler, JobOptions, JobQueue, QmlError, Result, Settings,
};

#[derive(Debug, Deserialize)]
struct EmailPayload {
    to: String,
    template: String,
}

#[derive(Debug, Deserialize)]
struct InventoryPayload {
    sku: String,
    delta: i64,
}

#[derive(Debug, Deserialize)]
struct ConversionPayload {
    amount: f64,
    from: String,
    to: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderPayload {
    order_id: u64,
    total: f64,
}

/// Charges orders through a flaky payment provider
struct OrderProcessor {
    failure_rate: f64,
}

#[async_trait]
impl JobHandler for OrderProcessor {
    type Payload = OrderPayload;

    async fn handle(&self, order: OrderPayload, ctx: HandlerContext) -> Result<Option<Value>> {
        if order.total <= 0.0 {
            return Err(QmlError::validation(format!(
                "order {} has no billable total",
                order.order_id
            )));
        }

        tokio::time::sleep(Duration::from_millis(150)).await;
        if ctx.is_cancelled() {
            return Err(QmlError::handler("order processing cancelled"));
        }
        if fastrand::f64() < self.failure_rate {
            return Err(QmlError::handler("payment provider unavailable"));
        }

        Ok(Some(json!({
            "orderId": order.order_id,
            "charged": order.total,
            "attempt": ctx.attempt,
        })))
    }
}

async fn send_email(email: EmailPayload, _ctx: HandlerContext) -> Result<Option<Value>> {
    tokio::time::sleep(Duration::from_millis(50)).await;
    info!("📧 Sent {} email to {}", email.template, email.to);
    Ok(None)
}

async fn update_inventory(update: InventoryPayload, _ctx: HandlerContext) -> Result<Option<Value>> {
    if update.sku.is_empty() {
        return Err(QmlError::validation("empty sku"));
    }
    tokio::time::sleep(Duration::from_millis(80)).await;
    Ok(Some(json!({ "sku": update.sku, "applied": update.delta })))
}

async fn convert_currency(
    conversion: ConversionPayload,
    _ctx: HandlerContext,
) -> Result<Option<Value>> {
    let rate = match (conversion.from.as_str(), conversion.to.as_str()) {
        ("USD", "EUR") => 0.92,
        ("EUR", "USD") => 1.09,
        (from, to) if from == to => 1.0,
        (from, to) => {
            return Err(QmlError::validation(format!(
                "no rate for {} -> {}",
                from, to
            )))
        }
    };
    Ok(Some(json!({ "converted": conversion.amount * rate, "currency": conversion.to })))
}

fn register_handlers(queue: &JobQueue) {
    queue.register_fn("email:send", send_email);
    queue.register_fn("inventory:update", update_inventory);
    queue.register_fn("currency:convert", convert_currency);
    queue.register_handler("order:process", OrderProcessor { failure_rate: 0.4 });
}

fn submit_sample_jobs(queue: &JobQueue) -> Result<Vec<String>> {
    let mut ids = Vec::new();

    for order_id in 1..=5u64 {
        ids.push(queue.add(
            "order:process",
            json!({ "orderId": order_id, "total": 20.0 * order_id as f64 }),
            JobOptions::new()
                .priority(5)
                .max_attempts(4)
                .backoff(Backoff::exponential(200).with_jitter()),
        )?);
    }

    ids.push(queue.add(
        "email:send",
        json!({ "to": "buyer@example.com", "template": "order-confirmation" }),
        JobOptions::new().priority(3),
    )?);
    ids.push(queue.add(
        "email:send",
        json!({ "to": "buyer@example.com", "template": "review-request" }),
        JobOptions::new().delay_ms(1_000),
    )?);
    ids.push(queue.add_default("inventory:update", json!({ "sku": "MUG-01", "delta": -2 }))?);
    ids.push(queue.add_default(
        "currency:convert",
        json!({ "amount": 100.0, "from": "USD", "to": "EUR" }),
    )?);
    ids.push(queue.add(
        "currency:convert",
        json!({ "amount": 5.0, "from": "USD", "to": "JPY" }),
        JobOptions::new().max_attempts(1),
    )?);
    // No handler for this type; it fails without being attempted
    ids.push(queue.add_default("loyalty:award", json!({ "points": 10 }))?);

    // Rejected at submission: the payload does not match the handler
    if let Err(e) = queue.add_default("inventory:update", json!({ "sku": 42 })) {
        warn!("Rejected job: {}", e);
    }

    Ok(ids)
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let settings = Settings::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&settings.log_level))
        .with_target(false)
        .init();

    info!("🚀 Starting commerce demo");

    let queue = JobQueue::new(settings.queue_config()?)?;
    register_handlers(&queue);

    let _events = queue.subscribe_all(|event| match event {
        JobEvent::Added { job_id, job_type, priority } => {
            info!("➕ {} {} added (priority {})", job_type, job_id, priority)
        }
        JobEvent::Started { job_id, job_type, attempt } => {
            info!("▶️  {} {} started (attempt {})", job_type, job_id, attempt)
        }
        JobEvent::Completed { job_id, job_type, duration_ms, .. } => {
            info!("✅ {} {} completed in {}ms", job_type, job_id, duration_ms)
        }
        JobEvent::Failed { job_id, job_type, error, will_retry, .. } => {
            warn!("❌ {} {} failed: {} (retry: {})", job_type, job_id, error, will_retry)
        }
    });

    queue.start().await?;
    let ids = submit_sample_jobs(&queue)?;
    info!("📦 Submitted {} jobs", ids.len());

    queue.wait_idle().await;
    let stats = queue.get_stats();
    info!(
        "📊 completed: {}, failed: {}, pending: {}",
        stats.completed, stats.failed, stats.pending
    );

    if std::env::args().any(|arg| arg == "--dashboard") {
        let routes = Router::new()
            .route("/api/orders", submission_route(queue.clone(), "order:process"))
            .route("/api/emails", submission_route(queue.clone(), "email:send"));
        let dashboard = DashboardServer::new(queue.clone(), DashboardConfig::from_settings(&settings))
            .with_routes(routes);

        info!("🖥️  Dashboard available at http://{}", settings.dashboard_addr());
        tokio::select! {
            result = dashboard.start() => result?,
            _ = tokio::signal::ctrl_c() => info!("Received shutdown signal"),
        }
    }

    queue.shutdown().await?;
    info!("👋 Commerce demo finished");
    Ok(())
}
