use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FeedbackRow {
    pub id: Uuid,
    pub rating: i16,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

/// A committed feedback item waiting to be folded into an analysis.
/// Immutable once created; identity is `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingItem {
    pub id: Uuid,
    pub rating: u8,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

impl From<&FeedbackRow> for PendingItem {
    fn from(row: &FeedbackRow) -> Self {
        Self {
            id: row.id,
            // The column is CHECK-constrained to 1..=5.
            rating: row.rating.clamp(1, 5) as u8,
            comment: row.comment.clone(),
            created_at: row.created_at,
        }
    }
}
