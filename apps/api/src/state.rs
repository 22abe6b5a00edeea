use std::sync::Arc;

use sqlx::PgPool;

use crate::analysis::repository::AnalysisRepository;
use crate::analysis::scheduler::AnalysisScheduler;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    /// Read side of analysis storage. The scheduler holds the same instance.
    pub analyses: Arc<dyn AnalysisRepository>,
    /// Accepts committed feedback; handlers only ever call `enqueue` and `status`.
    pub scheduler: AnalysisScheduler,
}
