//! HTTP boundary for a job queue
//!
//! JSON routes for stats, job listings and cancellation, builders for job
//! submission routes, a websocket event stream and a small dashboard page.

pub mod routes;
pub mod server;
pub mod service;
pub mod websocket;

pub use routes::{create_router, submission_route, ApiError, ApiResponse, SubmitJobRequest};
pub use server::{DashboardConfig, DashboardServer};
pub use service::{DashboardService, JobDetails, JobStatistics, ServerStatistics};
pub use websocket::{DashboardMessage, WebSocketManager};
