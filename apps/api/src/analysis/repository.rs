//! Analysis Repository: durable storage for snapshots, topic assignments,
//! and their feedback junctions.
//!
//! The scheduler only sees the `AnalysisRepository` trait; `PgAnalysisRepository`
//! is the production backend.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::models::analysis::{
    AnalysisRow, AnalysisSnapshot, AnalysisStatus, NewSnapshot, NewTopicAssignment,
    SnapshotCompletion, TopicAssignment, TopicRow, PLACEHOLDER_SUMMARY,
};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Analysis {0} not found")]
    NotFound(Uuid),

    #[error("Analysis {id} is already {status}; terminal snapshots cannot change")]
    AlreadyTerminal { id: Uuid, status: AnalysisStatus },

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("{field} value {value} does not fit its column")]
    OutOfRange { field: &'static str, value: u64 },
}

/// Shared by every dispatch; implementations must be safe for concurrent use.
#[async_trait]
pub trait AnalysisRepository: Send + Sync {
    async fn create_snapshot(&self, new: NewSnapshot) -> Result<AnalysisSnapshot, RepositoryError>;

    /// Moves a `processing` snapshot to its terminal state. Fails with
    /// `AlreadyTerminal` if the snapshot has already completed.
    async fn update_snapshot(
        &self,
        id: Uuid,
        completion: SnapshotCompletion,
    ) -> Result<AnalysisSnapshot, RepositoryError>;

    /// Most recent successful snapshot: the context new analyses build on.
    async fn latest_snapshot(&self) -> Result<Option<AnalysisSnapshot>, RepositoryError>;

    async fn snapshot_by_id(&self, id: Uuid) -> Result<Option<AnalysisSnapshot>, RepositoryError>;

    /// Newest first.
    async fn list_snapshots(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AnalysisSnapshot>, RepositoryError>;

    /// Records which feedback items an analysis covered. Idempotent.
    async fn create_feedback_membership(
        &self,
        analysis_id: Uuid,
        feedback_ids: &[Uuid],
    ) -> Result<(), RepositoryError>;

    async fn create_topic_assignment(
        &self,
        new: NewTopicAssignment,
    ) -> Result<TopicAssignment, RepositoryError>;

    /// Idempotent.
    async fn create_topic_links(
        &self,
        analysis_id: Uuid,
        topic_id: Uuid,
        feedback_ids: &[Uuid],
    ) -> Result<(), RepositoryError>;

    async fn topics_by_snapshot_id(
        &self,
        analysis_id: Uuid,
    ) -> Result<Vec<TopicAssignment>, RepositoryError>;

    async fn feedback_ids_by_topic_id(&self, topic_id: Uuid) -> Result<Vec<Uuid>, RepositoryError>;
}

// ────────────────────────────────────────────────────────────────────────────
// PostgreSQL backend
// ────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct PgAnalysisRepository {
    pool: PgPool,
}

impl PgAnalysisRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn to_i32(field: &'static str, value: u32) -> Result<i32, RepositoryError> {
    i32::try_from(value).map_err(|_| RepositoryError::OutOfRange {
        field,
        value: value.into(),
    })
}

fn to_i64(field: &'static str, value: u64) -> Result<i64, RepositoryError> {
    i64::try_from(value).map_err(|_| RepositoryError::OutOfRange { field, value })
}

fn to_snapshot(row: AnalysisRow) -> Result<AnalysisSnapshot, RepositoryError> {
    AnalysisSnapshot::try_from(row).map_err(RepositoryError::Corrupt)
}

#[async_trait]
impl AnalysisRepository for PgAnalysisRepository {
    async fn create_snapshot(&self, new: NewSnapshot) -> Result<AnalysisSnapshot, RepositoryError> {
        let placeholder = new.into_snapshot();
        let feedback_count = to_i32("feedback_count", placeholder.feedback_count)?;
        let new_feedback_count = placeholder
            .new_feedback_count
            .map(|n| to_i32("new_feedback_count", n))
            .transpose()?;

        let row = sqlx::query_as::<_, AnalysisRow>(
            r#"
            INSERT INTO feedback_analyses
                (id, previous_analysis_id, period_start, period_end, feedback_count,
                 new_feedback_count, summary, sentiment, key_insights, model,
                 tokens_used, duration_ms, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 0, 0, 'processing', $11)
            RETURNING *
            "#,
        )
        .bind(placeholder.id)
        .bind(placeholder.previous_analysis_id)
        .bind(placeholder.period_start)
        .bind(placeholder.period_end)
        .bind(feedback_count)
        .bind(new_feedback_count)
        .bind(PLACEHOLDER_SUMMARY)
        .bind(placeholder.sentiment.as_str())
        .bind(&placeholder.key_insights)
        .bind(&placeholder.model)
        .bind(placeholder.created_at)
        .fetch_one(&self.pool)
        .await?;

        to_snapshot(row)
    }

    async fn update_snapshot(
        &self,
        id: Uuid,
        completion: SnapshotCompletion,
    ) -> Result<AnalysisSnapshot, RepositoryError> {
        let completed_at = Utc::now();
        let target = completion.status();

        // Guarded on status so a terminal snapshot is never rewritten.
        let row = match completion {
            SnapshotCompletion::Success {
                summary,
                sentiment,
                key_insights,
                tokens_used,
                duration_ms,
            } => {
                let tokens_used = to_i32("tokens_used", tokens_used)?;
                let duration_ms = to_i64("duration_ms", duration_ms)?;
                sqlx::query_as::<_, AnalysisRow>(
                    r#"
                    UPDATE feedback_analyses
                    SET status = 'success', summary = $2, sentiment = $3, key_insights = $4,
                        tokens_used = $5, duration_ms = $6, completed_at = $7
                    WHERE id = $1 AND status = 'processing'
                    RETURNING *
                    "#,
                )
                .bind(id)
                .bind(&summary)
                .bind(sentiment.as_str())
                .bind(&key_insights)
                .bind(tokens_used)
                .bind(duration_ms)
                .bind(completed_at)
                .fetch_optional(&self.pool)
                .await?
            }
            SnapshotCompletion::Failed {
                reason,
                duration_ms,
            } => {
                let duration_ms = to_i64("duration_ms", duration_ms)?;
                sqlx::query_as::<_, AnalysisRow>(
                    r#"
                    UPDATE feedback_analyses
                    SET status = 'failed', failure_reason = $2, duration_ms = $3, completed_at = $4
                    WHERE id = $1 AND status = 'processing'
                    RETURNING *
                    "#,
                )
                .bind(id)
                .bind(&reason)
                .bind(duration_ms)
                .bind(completed_at)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        match row {
            Some(row) => to_snapshot(row),
            None => match self.snapshot_by_id(id).await? {
                Some(existing) if existing.status.is_terminal() => {
                    Err(RepositoryError::AlreadyTerminal {
                        id,
                        status: existing.status,
                    })
                }
                Some(existing) => Err(RepositoryError::Corrupt(format!(
                    "analysis {id} is still {} after an update to {target}",
                    existing.status
                ))),
                None => Err(RepositoryError::NotFound(id)),
            },
        }
    }

    async fn latest_snapshot(&self) -> Result<Option<AnalysisSnapshot>, RepositoryError> {
        sqlx::query_as::<_, AnalysisRow>(
            r#"
            SELECT * FROM feedback_analyses
            WHERE status = 'success'
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?
        .map(to_snapshot)
        .transpose()
    }

    async fn snapshot_by_id(&self, id: Uuid) -> Result<Option<AnalysisSnapshot>, RepositoryError> {
        sqlx::query_as::<_, AnalysisRow>("SELECT * FROM feedback_analyses WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(to_snapshot)
            .transpose()
    }

    async fn list_snapshots(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AnalysisSnapshot>, RepositoryError> {
        sqlx::query_as::<_, AnalysisRow>(
            "SELECT * FROM feedback_analyses ORDER BY created_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(to_snapshot)
        .collect()
    }

    async fn create_feedback_membership(
        &self,
        analysis_id: Uuid,
        feedback_ids: &[Uuid],
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO feedback_analysis_members (analysis_id, feedback_id)
            SELECT $1, UNNEST($2::uuid[])
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(analysis_id)
        .bind(feedback_ids)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_topic_assignment(
        &self,
        new: NewTopicAssignment,
    ) -> Result<TopicAssignment, RepositoryError> {
        let feedback_count = to_i32("feedback_count", new.feedback_count)?;
        let row = sqlx::query_as::<_, TopicRow>(
            r#"
            INSERT INTO analysis_topics
                (id, analysis_id, topic, summary, feedback_count, sentiment)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.analysis_id)
        .bind(new.topic.as_str())
        .bind(&new.summary)
        .bind(feedback_count)
        .bind(new.sentiment.as_str())
        .fetch_one(&self.pool)
        .await?;

        TopicAssignment::try_from(row).map_err(RepositoryError::Corrupt)
    }

    async fn create_topic_links(
        &self,
        analysis_id: Uuid,
        topic_id: Uuid,
        feedback_ids: &[Uuid],
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO feedback_topic_links (analysis_id, topic_id, feedback_id)
            SELECT $1, $2, UNNEST($3::uuid[])
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(analysis_id)
        .bind(topic_id)
        .bind(feedback_ids)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn topics_by_snapshot_id(
        &self,
        analysis_id: Uuid,
    ) -> Result<Vec<TopicAssignment>, RepositoryError> {
        sqlx::query_as::<_, TopicRow>(
            r#"
            SELECT * FROM analysis_topics
            WHERE analysis_id = $1
            ORDER BY feedback_count DESC, topic ASC
            "#,
        )
        .bind(analysis_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| TopicAssignment::try_from(row).map_err(RepositoryError::Corrupt))
        .collect()
    }

    async fn feedback_ids_by_topic_id(&self, topic_id: Uuid) -> Result<Vec<Uuid>, RepositoryError> {
        Ok(sqlx::query_scalar(
            "SELECT feedback_id FROM feedback_topic_links WHERE topic_id = $1 ORDER BY feedback_id",
        )
        .bind(topic_id)
        .fetch_all(&self.pool)
        .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_within_column_range_convert() {
        assert_eq!(to_i32("feedback_count", 10).unwrap(), 10);
        assert_eq!(to_i64("duration_ms", 1_500).unwrap(), 1_500);
    }

    #[test]
    fn test_oversized_count_is_rejected_not_wrapped() {
        let err = to_i32("tokens_used", u32::MAX).unwrap_err();
        assert!(
            matches!(err, RepositoryError::OutOfRange { field: "tokens_used", value } if value == u64::from(u32::MAX)),
            "got: {err:?}"
        );

        let err = to_i64("duration_ms", u64::MAX).unwrap_err();
        assert!(matches!(err, RepositoryError::OutOfRange { field: "duration_ms", .. }));
    }
}
