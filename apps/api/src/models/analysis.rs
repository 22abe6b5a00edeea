use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::analysis::topics::FeedbackTopic;
use crate::models::feedback::PendingItem;

/// Summary text stored on a snapshot while its LLM call is outstanding.
pub const PLACEHOLDER_SUMMARY: &str = "Analysis in progress";

// ────────────────────────────────────────────────────────────────────────────
// Enumerations
// ────────────────────────────────────────────────────────────────────────────

/// Lifecycle of one analysis run. `Success` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Processing,
    Success,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Processing => "processing",
            AnalysisStatus::Success => "success",
            AnalysisStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, AnalysisStatus::Processing)
    }
}

impl FromStr for AnalysisStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(AnalysisStatus::Processing),
            "success" => Ok(AnalysisStatus::Success),
            "failed" => Ok(AnalysisStatus::Failed),
            other => Err(format!("unknown analysis status '{other}'")),
        }
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Mixed,
    Negative,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Mixed => "mixed",
            Sentiment::Negative => "negative",
        }
    }
}

impl FromStr for Sentiment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" => Ok(Sentiment::Positive),
            "mixed" => Ok(Sentiment::Mixed),
            "negative" => Ok(Sentiment::Negative),
            other => Err(format!("unknown sentiment '{other}'")),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Snapshots
// ────────────────────────────────────────────────────────────────────────────

/// One persisted execution of the aggregate feedback analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisSnapshot {
    pub id: Uuid,
    pub previous_analysis_id: Option<Uuid>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub feedback_count: u32,
    pub new_feedback_count: Option<u32>,
    pub summary: String,
    pub sentiment: Sentiment,
    pub key_insights: Vec<String>,
    pub model: String,
    pub tokens_used: u32,
    pub duration_ms: u64,
    pub status: AnalysisStatus,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Placeholder snapshot written before the LLM call is made.
#[derive(Debug, Clone)]
pub struct NewSnapshot {
    pub id: Uuid,
    pub previous_analysis_id: Option<Uuid>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub feedback_count: u32,
    pub new_feedback_count: Option<u32>,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

impl NewSnapshot {
    /// Builds the `processing` placeholder for a batch.
    /// Returns `None` for an empty batch, which has no period to cover.
    pub fn placeholder(
        batch: &[PendingItem],
        previous: Option<&AnalysisSnapshot>,
        model: &str,
    ) -> Option<Self> {
        let period_start = batch.iter().map(|item| item.created_at).min()?;
        let period_end = batch.iter().map(|item| item.created_at).max()?;
        let feedback_count = batch.len() as u32;

        Some(Self {
            id: Uuid::new_v4(),
            previous_analysis_id: previous.map(|p| p.id),
            period_start,
            period_end,
            feedback_count,
            new_feedback_count: previous.map(|_| feedback_count),
            model: model.to_string(),
            created_at: Utc::now(),
        })
    }

    pub fn into_snapshot(self) -> AnalysisSnapshot {
        AnalysisSnapshot {
            id: self.id,
            previous_analysis_id: self.previous_analysis_id,
            period_start: self.period_start,
            period_end: self.period_end,
            feedback_count: self.feedback_count,
            new_feedback_count: self.new_feedback_count,
            summary: PLACEHOLDER_SUMMARY.to_string(),
            sentiment: Sentiment::Mixed,
            key_insights: Vec::new(),
            model: self.model,
            tokens_used: 0,
            duration_ms: 0,
            status: AnalysisStatus::Processing,
            failure_reason: None,
            created_at: self.created_at,
            completed_at: None,
        }
    }
}

/// Terminal update applied to a `processing` snapshot.
#[derive(Debug, Clone)]
pub enum SnapshotCompletion {
    Success {
        summary: String,
        sentiment: Sentiment,
        key_insights: Vec<String>,
        tokens_used: u32,
        duration_ms: u64,
    },
    Failed {
        reason: String,
        duration_ms: u64,
    },
}

impl SnapshotCompletion {
    pub fn status(&self) -> AnalysisStatus {
        match self {
            SnapshotCompletion::Success { .. } => AnalysisStatus::Success,
            SnapshotCompletion::Failed { .. } => AnalysisStatus::Failed,
        }
    }

    /// Applies the completion to an in-memory snapshot.
    #[cfg(test)]
    pub fn apply(self, snapshot: &mut AnalysisSnapshot, completed_at: DateTime<Utc>) {
        snapshot.status = self.status();
        snapshot.completed_at = Some(completed_at);
        match self {
            SnapshotCompletion::Success {
                summary,
                sentiment,
                key_insights,
                tokens_used,
                duration_ms,
            } => {
                snapshot.summary = summary;
                snapshot.sentiment = sentiment;
                snapshot.key_insights = key_insights;
                snapshot.tokens_used = tokens_used;
                snapshot.duration_ms = duration_ms;
            }
            SnapshotCompletion::Failed {
                reason,
                duration_ms,
            } => {
                snapshot.failure_reason = Some(reason);
                snapshot.duration_ms = duration_ms;
            }
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct AnalysisRow {
    pub id: Uuid,
    pub previous_analysis_id: Option<Uuid>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub feedback_count: i32,
    pub new_feedback_count: Option<i32>,
    pub summary: String,
    pub sentiment: String,
    pub key_insights: Vec<String>,
    pub model: String,
    pub tokens_used: i32,
    pub duration_ms: i64,
    pub status: String,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<AnalysisRow> for AnalysisSnapshot {
    type Error = String;

    fn try_from(row: AnalysisRow) -> Result<Self, Self::Error> {
        Ok(AnalysisSnapshot {
            id: row.id,
            previous_analysis_id: row.previous_analysis_id,
            period_start: row.period_start,
            period_end: row.period_end,
            feedback_count: non_negative(row.feedback_count, "feedback_count")?,
            new_feedback_count: row
                .new_feedback_count
                .map(|n| non_negative(n, "new_feedback_count"))
                .transpose()?,
            summary: row.summary,
            sentiment: row.sentiment.parse()?,
            key_insights: row.key_insights,
            model: row.model,
            tokens_used: non_negative(row.tokens_used, "tokens_used")?,
            duration_ms: u64::try_from(row.duration_ms)
                .map_err(|_| format!("negative duration_ms {}", row.duration_ms))?,
            status: row.status.parse()?,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Topics
// ────────────────────────────────────────────────────────────────────────────

/// One predefined topic as it applied to one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicAssignment {
    pub id: Uuid,
    pub analysis_id: Uuid,
    pub topic: FeedbackTopic,
    pub summary: String,
    pub feedback_count: u32,
    pub sentiment: Sentiment,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTopicAssignment {
    pub analysis_id: Uuid,
    pub topic: FeedbackTopic,
    pub summary: String,
    pub feedback_count: u32,
    pub sentiment: Sentiment,
}

#[derive(Debug, Clone, FromRow)]
pub struct TopicRow {
    pub id: Uuid,
    pub analysis_id: Uuid,
    pub topic: String,
    pub summary: String,
    pub feedback_count: i32,
    pub sentiment: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<TopicRow> for TopicAssignment {
    type Error = String;

    fn try_from(row: TopicRow) -> Result<Self, Self::Error> {
        Ok(TopicAssignment {
            id: row.id,
            analysis_id: row.analysis_id,
            topic: row.topic.parse()?,
            summary: row.summary,
            feedback_count: non_negative(row.feedback_count, "feedback_count")?,
            sentiment: row.sentiment.parse()?,
            created_at: row.created_at,
        })
    }
}

fn non_negative(value: i32, column: &str) -> Result<u32, String> {
    u32::try_from(value).map_err(|_| format!("negative {column} {value}"))
}
