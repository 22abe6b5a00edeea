use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use tracing::info;

use crate::errors::AppError;
use crate::feedback::store::{create_feedback, list_feedback, CreateFeedbackRequest, NewFeedback};
use crate::models::feedback::{FeedbackRow, PendingItem};
use crate::routes::Pagination;
use crate::state::AppState;

/// POST /api/v1/feedback
/// Persists the feedback, then hands it to the analysis scheduler.
pub async fn handle_create_feedback(
    State(state): State<AppState>,
    Json(req): Json<CreateFeedbackRequest>,
) -> Result<(StatusCode, Json<FeedbackRow>), AppError> {
    let new = NewFeedback::new(req.rating, &req.comment).map_err(AppError::Validation)?;
    let row = create_feedback(&state.db, &new).await?;

    // Only committed rows may reach the backlog.
    state.scheduler.enqueue(PendingItem::from(&row));
    info!("Feedback {} recorded (rating {})", row.id, row.rating);

    Ok((StatusCode::CREATED, Json(row)))
}

/// GET /api/v1/feedback
pub async fn handle_list_feedback(
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<FeedbackRow>>, AppError> {
    let rows = list_feedback(&state.db, page.limit(), page.offset()).await?;
    Ok(Json(rows))
}
