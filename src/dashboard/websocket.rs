use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::dashboard::service::{DashboardService, ServerStatistics};
use crate::processing::JobEvent;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DashboardMessage {
    #[serde(rename = "statistics_update")]
    StatisticsUpdate { data: ServerStatistics },

    #[serde(rename = "job_event")]
    JobEvent { event: JobEvent },

    #[serde(rename = "connection_info")]
    ConnectionInfo {
        client_id: String,
        connected_clients: usize,
    },

    #[serde(rename = "error")]
    Error { message: String },
}

/// Fans queue events and statistics out to connected dashboard clients
pub struct WebSocketManager {
    connections: Arc<RwLock<HashMap<String, chrono::DateTime<chrono::Utc>>>>,
    statistics_sender: broadcast::Sender<DashboardMessage>,
    dashboard_service: Arc<DashboardService>,
}

impl WebSocketManager {
    pub fn new(dashboard_service: Arc<DashboardService>) -> Self {
        let (statistics_sender, _) = broadcast::channel(64);

        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            statistics_sender,
            dashboard_service,
        }
    }

    /// Handle new WebSocket connection
    pub fn handle_websocket(self: &Arc<Self>, ws: WebSocketUpgrade) -> Response {
        let manager = Arc::clone(self);
        ws.on_upgrade(move |socket| async move { manager.handle_socket(socket).await })
    }

    /// Handle individual WebSocket connection
    async fn handle_socket(&self, socket: WebSocket) {
        let client_id = Uuid::new_v4().to_string();
        // Subscribe before the greeting so no event is missed in between
        let mut events = self.dashboard_service.queue().events();
        let mut statistics = self.statistics_sender.subscribe();

        let (mut sender, mut socket_receiver) = socket.split();

        let connected_clients = {
            let mut connections = self.connections.write().await;
            connections.insert(client_id.clone(), chrono::Utc::now());
            connections.len()
        };

        let greeting = [
            DashboardMessage::ConnectionInfo {
                client_id: client_id.clone(),
                connected_clients,
            },
            DashboardMessage::StatisticsUpdate {
                data: self.dashboard_service.get_server_statistics(),
            },
        ];
        for message in &greeting {
            if send_message(&mut sender, message).await.is_err() {
                self.disconnect(&client_id).await;
                return;
            }
        }

        tokio::select! {
            _ = async {
                while let Some(msg) = socket_receiver.next().await {
                    match msg {
                        Ok(Message::Text(text)) => {
                            tracing::debug!("Received WebSocket message: {}", text);
                        }
                        Ok(Message::Close(_)) => {
                            tracing::info!("WebSocket connection closed by client: {}", client_id);
                            break;
                        }
                        Err(e) => {
                            tracing::error!("WebSocket error: {}", e);
                            break;
                        }
                        _ => {}
                    }
                }
            } => {}

            _ = async {
                loop {
                    let message = tokio::select! {
                        event = events.recv() => match event {
                            Ok(event) => DashboardMessage::JobEvent { event },
                            Err(RecvError::Lagged(skipped)) => DashboardMessage::Error {
                                message: format!("{} events skipped", skipped),
                            },
                            Err(RecvError::Closed) => break,
                        },
                        update = statistics.recv() => match update {
                            Ok(update) => update,
                            Err(RecvError::Lagged(_)) => continue,
                            Err(RecvError::Closed) => break,
                        },
                    };

                    if send_message(&mut sender, &message).await.is_err() {
                        tracing::info!("Failed to send message to client {}, removing connection", client_id);
                        break;
                    }
                }
            } => {}
        }

        self.disconnect(&client_id).await;
    }

    async fn disconnect(&self, client_id: &str) {
        self.connections.write().await.remove(client_id);
        tracing::info!("WebSocket connection {} disconnected", client_id);
    }

    /// Broadcast a statistics snapshot to all connected clients
    pub fn broadcast_statistics_update(&self) {
        let data = self.dashboard_service.get_server_statistics();
        let _ = self
            .statistics_sender
            .send(DashboardMessage::StatisticsUpdate { data });
    }

    /// Get number of connected clients
    pub async fn connected_clients_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Start periodic statistics broadcast
    pub fn start_periodic_updates(self: &Arc<Self>, interval: Duration) {
        let manager = Arc::clone(self);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval);
            loop {
                interval.tick().await;
                if manager.statistics_sender.receiver_count() > 0 {
                    manager.broadcast_statistics_update();
                }
            }
        });
    }
}

async fn send_message<S>(sender: &mut S, message: &DashboardMessage) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let text = serde_json::to_string(message).map_err(|e| {
        tracing::error!("Failed to serialize dashboard message: {}", e);
    })?;
    sender.send(Message::Text(text)).await.map_err(|_| ())
}

/// Create WebSocket handler function for axum router
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(ws_manager): State<Arc<WebSocketManager>>,
) -> Response {
    ws_manager.handle_websocket(ws)
}
