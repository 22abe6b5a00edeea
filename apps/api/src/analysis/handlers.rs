use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::analysis::scheduler::SchedulerStatus;
use crate::errors::AppError;
use crate::models::analysis::{AnalysisSnapshot, TopicAssignment};
use crate::routes::Pagination;
use crate::state::AppState;

#[derive(Serialize)]
pub struct AnalysisDetailResponse {
    #[serde(flatten)]
    pub analysis: AnalysisSnapshot,
    pub topics: Vec<TopicAssignment>,
}

#[derive(Serialize)]
pub struct TopicFeedbackResponse {
    pub analysis_id: Uuid,
    pub topic_id: Uuid,
    pub topic: String,
    pub feedback_ids: Vec<Uuid>,
}

/// GET /api/v1/analyses
pub async fn handle_list_analyses(
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<AnalysisSnapshot>>, AppError> {
    let snapshots = state
        .analyses
        .list_snapshots(page.limit(), page.offset())
        .await?;
    Ok(Json(snapshots))
}

/// GET /api/v1/analyses/latest
/// The most recent successful analysis, i.e. the one the next batch builds on.
pub async fn handle_latest_analysis(
    State(state): State<AppState>,
) -> Result<Json<AnalysisSnapshot>, AppError> {
    let latest = state
        .analyses
        .latest_snapshot()
        .await?
        .ok_or_else(|| AppError::NotFound("No completed analysis yet".to_string()))?;
    Ok(Json(latest))
}

/// GET /api/v1/analyses/:id
pub async fn handle_get_analysis(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AnalysisDetailResponse>, AppError> {
    let analysis = state
        .analyses
        .snapshot_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Analysis {id} not found")))?;
    let topics = state.analyses.topics_by_snapshot_id(id).await?;
    Ok(Json(AnalysisDetailResponse { analysis, topics }))
}

/// GET /api/v1/analyses/:id/topics/:topic_id/feedback
pub async fn handle_topic_feedback(
    State(state): State<AppState>,
    Path((id, topic_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<TopicFeedbackResponse>, AppError> {
    let topic = state
        .analyses
        .topics_by_snapshot_id(id)
        .await?
        .into_iter()
        .find(|t| t.id == topic_id)
        .ok_or_else(|| {
            AppError::NotFound(format!("Topic {topic_id} not found in analysis {id}"))
        })?;
    let feedback_ids = state.analyses.feedback_ids_by_topic_id(topic_id).await?;

    Ok(Json(TopicFeedbackResponse {
        analysis_id: id,
        topic_id,
        topic: topic.topic.to_string(),
        feedback_ids,
    }))
}

/// GET /api/v1/analyses/scheduler
pub async fn handle_scheduler_status(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status())
}
