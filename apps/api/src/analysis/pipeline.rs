//! Analysis pipeline: runs one admitted batch through the snapshot lifecycle.
//!
//! Flow: placeholder (`processing`) → membership links → LLM analyze →
//!       terminal update → topic assignments + links.
//!
//! The prior snapshot is supplied by the caller: the batch was sized against
//! it, so the same context must reach the prompt.
//!
//! A failed LLM call is recorded on the snapshot and never retried. Topic rows
//! are supplementary: losing some of them never demotes a `success` snapshot.

use std::collections::HashSet;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::analysis::analyzer::{FeedbackAnalyzer, RawTopic};
use crate::analysis::repository::{AnalysisRepository, RepositoryError};
use crate::analysis::topics::FeedbackTopic;
use crate::models::analysis::{
    AnalysisSnapshot, NewSnapshot, NewTopicAssignment, Sentiment, SnapshotCompletion,
    TopicAssignment,
};
use crate::models::feedback::PendingItem;

/// Failure reason recorded when shutdown interrupts an outstanding LLM call.
pub const CANCELLED_REASON: &str = "analysis cancelled during shutdown";

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Cannot analyse an empty batch")]
    EmptyBatch,

    #[error("Failed to create placeholder analysis: {0}")]
    Placeholder(#[source] RepositoryError),

    #[error("Failed to record feedback membership for analysis {analysis_id}: {source}")]
    Membership {
        analysis_id: Uuid,
        #[source]
        source: RepositoryError,
    },

    #[error("Failed to record the outcome of analysis {analysis_id}: {source}")]
    Completion {
        analysis_id: Uuid,
        #[source]
        source: RepositoryError,
    },

    #[error(
        "Analysis {analysis_id} succeeded but {} topic write(s) failed: {}",
        .failures.len(),
        .failures.join("; ")
    )]
    TopicPersistence {
        analysis_id: Uuid,
        failures: Vec<String>,
    },
}

/// What one dispatch produced.
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    /// Always in a terminal state.
    pub snapshot: AnalysisSnapshot,
    pub topics: Vec<TopicAssignment>,
    /// Non-fatal problems with the LLM output (discarded topics or ids).
    pub warnings: Vec<String>,
}

/// A topic that passed validation against the closed catalogue and the batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedTopic {
    pub topic: FeedbackTopic,
    pub summary: String,
    pub sentiment: Sentiment,
    pub feedback_ids: Vec<Uuid>,
}

/// Runs the full lifecycle for one batch.
///
/// Steps:
/// 1. placeholder snapshot spanning the batch's period, chained to `prior`
/// 2. analysis ↔ feedback membership
/// 3. LLM call, timed; abandoned if `cancel` fires
/// 4. terminal update: `failed` with the reason, or `success` with the result
/// 5. one topic assignment + links per validated topic
pub async fn perform_analysis(
    repo: &dyn AnalysisRepository,
    analyzer: &dyn FeedbackAnalyzer,
    batch: Vec<PendingItem>,
    prior: Option<AnalysisSnapshot>,
    cancel: &CancellationToken,
) -> Result<AnalysisReport, AnalysisError> {
    // Step 1: Placeholder
    let placeholder = NewSnapshot::placeholder(&batch, prior.as_ref(), analyzer.model())
        .ok_or(AnalysisError::EmptyBatch)?;
    let snapshot = repo
        .create_snapshot(placeholder)
        .await
        .map_err(AnalysisError::Placeholder)?;
    let analysis_id = snapshot.id;
    info!(
        "Analysis {} started: {} feedback items (previous: {:?})",
        analysis_id,
        batch.len(),
        snapshot.previous_analysis_id
    );

    // Step 2: Membership
    let feedback_ids: Vec<Uuid> = batch.iter().map(|item| item.id).collect();
    if let Err(source) = repo.create_feedback_membership(analysis_id, &feedback_ids).await {
        error!("Analysis {analysis_id}: membership write failed: {source}");
        let reason = format!("failed to record feedback membership: {source}");
        fail_snapshot(repo, analysis_id, reason, 0).await?;
        return Err(AnalysisError::Membership {
            analysis_id,
            source,
        });
    }

    // Step 3: LLM call
    let started = Instant::now();
    let outcome = tokio::select! {
        result = analyzer.analyze(&batch, prior.as_ref()) => result.map_err(|e| e.to_string()),
        _ = cancel.cancelled() => Err(CANCELLED_REASON.to_string()),
    };
    let duration_ms = started.elapsed().as_millis() as u64;

    // Step 4: Terminal update
    let result = match outcome {
        Ok(result) => result,
        Err(reason) => {
            warn!("Analysis {analysis_id} failed after {duration_ms}ms: {reason}");
            let snapshot = fail_snapshot(repo, analysis_id, reason, duration_ms).await?;
            return Ok(AnalysisReport {
                snapshot,
                topics: Vec::new(),
                warnings: Vec::new(),
            });
        }
    };

    let batch_ids: HashSet<Uuid> = feedback_ids.into_iter().collect();
    let (validated, warnings) = validate_topics(&result.topics, &batch_ids, result.sentiment);
    for warning in &warnings {
        warn!("Analysis {analysis_id}: {warning}");
    }

    let snapshot = repo
        .update_snapshot(
            analysis_id,
            SnapshotCompletion::Success {
                summary: result.summary,
                sentiment: result.sentiment,
                key_insights: result.key_insights,
                tokens_used: result.tokens_used,
                duration_ms,
            },
        )
        .await
        .map_err(|source| AnalysisError::Completion {
            analysis_id,
            source,
        })?;

    // Step 5: Topics
    let (topics, failures) = persist_topics(repo, analysis_id, validated).await;

    info!(
        "Analysis {} succeeded: {} topics, {} tokens, {}ms",
        analysis_id,
        topics.len(),
        snapshot.tokens_used,
        duration_ms
    );

    if !failures.is_empty() {
        error!(
            "Analysis {analysis_id}: {} topic write(s) failed; snapshot stays successful",
            failures.len()
        );
        return Err(AnalysisError::TopicPersistence {
            analysis_id,
            failures,
        });
    }

    Ok(AnalysisReport {
        snapshot,
        topics,
        warnings,
    })
}

async fn fail_snapshot(
    repo: &dyn AnalysisRepository,
    analysis_id: Uuid,
    reason: String,
    duration_ms: u64,
) -> Result<AnalysisSnapshot, AnalysisError> {
    repo.update_snapshot(
        analysis_id,
        SnapshotCompletion::Failed {
            reason,
            duration_ms,
        },
    )
    .await
    .map_err(|source| AnalysisError::Completion {
        analysis_id,
        source,
    })
}

/// Persists each validated topic and its links. A failing topic does not stop
/// the others; failures are returned as messages.
async fn persist_topics(
    repo: &dyn AnalysisRepository,
    analysis_id: Uuid,
    validated: Vec<ValidatedTopic>,
) -> (Vec<TopicAssignment>, Vec<String>) {
    let mut persisted = Vec::with_capacity(validated.len());
    let mut failures = Vec::new();

    for topic in validated {
        let assignment = match repo
            .create_topic_assignment(NewTopicAssignment {
                analysis_id,
                topic: topic.topic,
                summary: topic.summary,
                feedback_count: topic.feedback_ids.len() as u32,
                sentiment: topic.sentiment,
            })
            .await
        {
            Ok(assignment) => assignment,
            Err(e) => {
                failures.push(format!("topic {}: {e}", topic.topic));
                continue;
            }
        };

        if let Err(e) = repo
            .create_topic_links(analysis_id, assignment.id, &topic.feedback_ids)
            .await
        {
            failures.push(format!("links for topic {}: {e}", topic.topic));
        }
        persisted.push(assignment);
    }

    (persisted, failures)
}

/// Checks LLM topics against the closed catalogue and the batch.
///
/// Discarded with a warning:
/// - topic values outside `FeedbackTopic`
/// - a topic repeated after its first occurrence
/// - feedback ids that are not strings, not UUIDs, or not in the batch
/// - topics left with no valid feedback ids
///
/// An unrecognised per-topic sentiment falls back to the overall sentiment.
pub fn validate_topics(
    raw_topics: &[RawTopic],
    batch_ids: &HashSet<Uuid>,
    overall: Sentiment,
) -> (Vec<ValidatedTopic>, Vec<String>) {
    let mut validated: Vec<ValidatedTopic> = Vec::new();
    let mut warnings = Vec::new();

    for raw in raw_topics {
        let topic = match raw.topic.parse::<FeedbackTopic>() {
            Ok(topic) => topic,
            Err(e) => {
                warnings.push(format!("discarded topic: {e}"));
                continue;
            }
        };

        if validated.iter().any(|v| v.topic == topic) {
            warnings.push(format!("discarded duplicate topic '{topic}'"));
            continue;
        }

        let mut ids: Vec<Uuid> = Vec::with_capacity(raw.feedback_ids.len());
        for value in &raw.feedback_ids {
            let parsed = value.as_str().and_then(|s| Uuid::parse_str(s.trim()).ok());
            match parsed {
                Some(id) if batch_ids.contains(&id) => {
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                }
                Some(id) => warnings.push(format!(
                    "topic '{topic}': feedback id {id} is not part of this batch"
                )),
                None => warnings.push(format!(
                    "topic '{topic}': unparsable feedback id reference {value}"
                )),
            }
        }

        if ids.is_empty() {
            warnings.push(format!("discarded topic '{topic}': no valid feedback ids"));
            continue;
        }

        let sentiment = match raw.sentiment.parse::<Sentiment>() {
            Ok(sentiment) => sentiment,
            Err(e) => {
                warnings.push(format!(
                    "topic '{topic}': {e}; using overall sentiment '{}'",
                    overall.as_str()
                ));
                overall
            }
        };

        validated.push(ValidatedTopic {
            topic,
            summary: raw.summary.trim().to_string(),
            sentiment,
            feedback_ids: ids,
        });
    }

    (validated, warnings)
}
