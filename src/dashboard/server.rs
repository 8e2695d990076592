use axum::{http::StatusCode, response::Html, routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use crate::dashboard::{
    routes::create_router,
    service::DashboardService,
    websocket::{websocket_handler, WebSocketManager},
};
use crate::processing::JobQueue;
use crate::settings::Settings;

#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub host: String,
    pub port: u16,
    /// Seconds between statistics pushes to websocket clients
    pub statistics_update_interval: u64,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            statistics_update_interval: 5,
        }
    }
}

impl DashboardConfig {
    /// Host and port from loaded settings
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            host: settings.dashboard_host.clone(),
            port: settings.dashboard_port,
            ..Default::default()
        }
    }
}

/// HTTP server exposing a queue's API, event stream and dashboard page
pub struct DashboardServer {
    config: DashboardConfig,
    queue: JobQueue,
    websocket_manager: Arc<WebSocketManager>,
    extra_routes: Router,
}

impl DashboardServer {
    pub fn new(queue: JobQueue, config: DashboardConfig) -> Self {
        let dashboard_service = Arc::new(DashboardService::new(queue.clone()));
        let websocket_manager = Arc::new(WebSocketManager::new(dashboard_service));

        Self {
            config,
            queue,
            websocket_manager,
            extra_routes: Router::new(),
        }
    }

    /// Merge additional routes, typically built with
    /// [`submission_route`](crate::dashboard::submission_route)
    pub fn with_routes(mut self, routes: Router) -> Self {
        self.extra_routes = self.extra_routes.merge(routes);
        self
    }

    /// Start the dashboard server and serve until the listener fails
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port).parse()?;
        let app = self.router();

        self.websocket_manager
            .start_periodic_updates(Duration::from_secs(self.config.statistics_update_interval.max(1)));

        tracing::info!("Starting queue dashboard on http://{}", addr);

        let listener = TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    /// The complete application router
    pub fn router(&self) -> Router {
        let api_router = create_router(self.queue.clone());

        let ws_router = Router::new()
            .route("/ws", get(websocket_handler))
            .with_state(Arc::clone(&self.websocket_manager));

        let ui_router = Router::new()
            .route("/", get(dashboard_ui))
            .route("/dashboard", get(dashboard_ui));

        Router::new()
            .merge(api_router)
            .merge(ws_router)
            .merge(ui_router)
            .merge(self.extra_routes.clone())
            .layer(ServiceBuilder::new().layer(CorsLayer::permissive()).into_inner())
    }

    /// Get the WebSocket manager for external use
    pub fn websocket_manager(&self) -> Arc<WebSocketManager> {
        Arc::clone(&self.websocket_manager)
    }
}

/// Dashboard UI handler - serves the main HTML page
async fn dashboard_ui() -> Result<Html<&'static str>, StatusCode> {
    Ok(Html(DASHBOARD_HTML))
}

/// Embedded HTML for the dashboard UI
const DASHBOARD_HTML: &str = r#"
<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Job Queue</title>
    <style>
        body { font-family: system-ui, sans-serif; background: #f4f5f7; color: #222; margin: 0; }
        header { background: #1f2933; color: #fff; padding: 1rem 2rem; }
        main { max-width: 1100px; margin: 0 auto; padding: 1.5rem; }
        .cards { display: grid; grid-template-columns: repeat(5, 1fr); gap: 1rem; margin-bottom: 1.5rem; }
        .card { background: #fff; border-radius: 6px; padding: 1rem; text-align: center; }
        .card .n { font-size: 1.8rem; font-weight: 600; }
        section { background: #fff; border-radius: 6px; padding: 1rem; margin-bottom: 1rem; }
        table { width: 100%; border-collapse: collapse; }
        th, td { padding: 6px 8px; border-bottom: 1px solid #e4e7eb; text-align: left; font-size: 0.9rem; }
        .status { padding: 2px 6px; border-radius: 3px; font-size: 0.75rem; text-transform: uppercase; }
        .pending { background: #fff3cd; } .active { background: #d1ecf1; }
        .retrying { background: #fce4ec; } .completed { background: #d4edda; } .failed { background: #f8d7da; }
        #log { font-family: monospace; font-size: 0.8rem; max-height: 240px; overflow-y: auto; }
        #conn { float: right; }
    </style>
</head>
<body>
    <header><span id="conn">connecting</span><strong id="title">Job Queue</strong></header>
    <main>
        <div class="cards" id="cards"></div>
        <section>
            <h3>Recent jobs</h3>
            <table>
                <thead><tr><th>ID</th><th>Type</th><th>Status</th><th>Priority</th><th>Attempts</th><th>Error</th><th></th></tr></thead>
                <tbody id="jobs"></tbody>
            </table>
        </section>
        <section>
            <h3>Events</h3>
            <div id="log"></div>
        </section>
    </main>
    <script>
        const STATUSES = ['pending', 'active', 'retrying', 'completed', 'failed'];

        function render(data) {
            document.getElementById('title').textContent = `${data.queue_name} (${data.concurrency} slots)`;
            document.getElementById('cards').innerHTML = STATUSES.map(s =>
                `<div class="card"><div>${s}</div><div class="n">${data.jobs[s]}</div></div>`).join('');
            document.getElementById('jobs').innerHTML = data.recent_jobs.map(job => `
                <tr>
                    <td>${job.id.substring(0, 8)}</td>
                    <td>${job.job_type}</td>
                    <td><span class="status ${job.status}">${job.status}</span></td>
                    <td>${job.priority}</td>
                    <td>${job.attempts}/${job.max_attempts}</td>
                    <td>${job.error_message || ''}</td>
                    <td>${['pending', 'retrying', 'active'].includes(job.status)
                        ? `<button onclick="cancelJob('${job.id}')">cancel</button>` : ''}</td>
                </tr>`).join('');
        }

        function logEvent(event) {
            const log = document.getElementById('log');
            const line = document.createElement('div');
            line.textContent = `${new Date().toLocaleTimeString()} ${event.event} ${event.jobType} ${event.jobId}`
                + (event.error ? ` ${event.error}` : '');
            log.prepend(line);
        }

        async function refresh() {
            const response = await fetch('/api/statistics');
            const body = await response.json();
            if (body.success) render(body.data);
        }

        async function cancelJob(id) {
            await fetch(`/api/jobs/${id}`, { method: 'DELETE' });
            refresh();
        }

        function connect() {
            const protocol = location.protocol === 'https:' ? 'wss:' : 'ws:';
            const ws = new WebSocket(`${protocol}//${location.host}/ws`);
            ws.onopen = () => document.getElementById('conn').textContent = 'connected';
            ws.onclose = () => {
                document.getElementById('conn').textContent = 'disconnected';
                setTimeout(connect, 5000);
            };
            ws.onmessage = (message) => {
                const msg = JSON.parse(message.data);
                if (msg.type === 'statistics_update') render(msg.data);
                if (msg.type === 'job_event') { logEvent(msg.event); refresh(); }
            };
        }

        connect();
    </script>
</body>
</html>
"#;
