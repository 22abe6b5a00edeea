pub mod health;

use axum::{routing::get, Router};
use serde::Deserialize;

use crate::analysis::handlers as analyses;
use crate::feedback::handlers as feedback;
use crate::state::AppState;

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

/// `?limit&offset` shared by the list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Pagination {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Feedback intake
        .route(
            "/api/v1/feedback",
            get(feedback::handle_list_feedback).post(feedback::handle_create_feedback),
        )
        // Analysis read API
        .route("/api/v1/analyses", get(analyses::handle_list_analyses))
        .route(
            "/api/v1/analyses/latest",
            get(analyses::handle_latest_analysis),
        )
        .route(
            "/api/v1/analyses/scheduler",
            get(analyses::handle_scheduler_status),
        )
        .route("/api/v1/analyses/:id", get(analyses::handle_get_analysis))
        .route(
            "/api/v1/analyses/:id/topics/:topic_id/feedback",
            get(analyses::handle_topic_feedback),
        )
        .with_state(state)
}
