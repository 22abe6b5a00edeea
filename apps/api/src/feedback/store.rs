//! Customer feedback persistence. Rows are immutable once written; the
//! analysis pipeline only ever references them by id.

use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::feedback::FeedbackRow;

pub const MIN_RATING: i16 = 1;
pub const MAX_RATING: i16 = 5;
pub const MAX_COMMENT_CHARS: usize = 2000;

/// Request body for `POST /api/v1/feedback`.
#[derive(Debug, Deserialize)]
pub struct CreateFeedbackRequest {
    pub rating: i16,
    pub comment: String,
}

/// Feedback that has passed validation. Only constructible through `new`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFeedback {
    rating: i16,
    comment: String,
}

impl NewFeedback {
    /// Validates a submission, reporting every violation at once.
    pub fn new(rating: i16, comment: &str) -> Result<Self, Vec<String>> {
        let mut errors = Vec::new();

        if !(MIN_RATING..=MAX_RATING).contains(&rating) {
            errors.push(format!(
                "rating must be between {MIN_RATING} and {MAX_RATING}, got {rating}"
            ));
        }

        let comment = comment.trim();
        if comment.is_empty() {
            errors.push("comment must not be empty".to_string());
        } else if comment.chars().count() > MAX_COMMENT_CHARS {
            errors.push(format!(
                "comment must be at most {MAX_COMMENT_CHARS} characters"
            ));
        }

        if errors.is_empty() {
            Ok(Self {
                rating,
                comment: comment.to_string(),
            })
        } else {
            Err(errors)
        }
    }

    pub fn rating(&self) -> i16 {
        self.rating
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }
}

pub async fn create_feedback(pool: &PgPool, new: &NewFeedback) -> Result<FeedbackRow, sqlx::Error> {
    sqlx::query_as::<_, FeedbackRow>(
        r#"
        INSERT INTO feedbacks (id, rating, comment)
        VALUES ($1, $2, $3)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(new.rating())
    .bind(new.comment())
    .fetch_one(pool)
    .await
}

/// Newest first.
pub async fn list_feedback(
    pool: &PgPool,
    limit: i64,
    offset: i64,
) -> Result<Vec<FeedbackRow>, sqlx::Error> {
    sqlx::query_as::<_, FeedbackRow>(
        "SELECT * FROM feedbacks ORDER BY created_at DESC, id LIMIT $1 OFFSET $2",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}
