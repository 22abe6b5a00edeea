//! Feedback analyzer: pluggable, trait-based backend for the expensive
//! aggregate analysis call.
//!
//! Default: `LlmFeedbackAnalyzer` (Claude via `llm_client`).
//! The scheduler holds an `Arc<dyn FeedbackAnalyzer>`, so tests swap in a
//! scripted implementation without touching the pipeline.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::analysis::prompts::{ANALYSIS_PROMPT_TEMPLATE, ANALYSIS_SYSTEM, NO_PREVIOUS_ANALYSIS};
use crate::analysis::topics::FeedbackTopic;
use crate::llm_client::prompts::GROUNDING_INSTRUCTION;
use crate::llm_client::{LlmClient, LlmError};
use crate::models::analysis::{AnalysisSnapshot, Sentiment};
use crate::models::feedback::PendingItem;

// ────────────────────────────────────────────────────────────────────────────
// Output data models
// ────────────────────────────────────────────────────────────────────────────

/// A topic exactly as the model reported it. Validated by the pipeline,
/// not here: one bad topic must not fail the whole analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTopic {
    pub topic: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub sentiment: String,
    /// Left untyped so a malformed id only costs that one reference.
    #[serde(default)]
    pub feedback_ids: Vec<Value>,
}

/// Structured result of one successful analysis call.
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub summary: String,
    pub sentiment: Sentiment,
    pub key_insights: Vec<String>,
    pub topics: Vec<RawTopic>,
    pub tokens_used: u32,
}

// ────────────────────────────────────────────────────────────────────────────
// Trait definition
// ────────────────────────────────────────────────────────────────────────────

/// Implementations must be safe to call concurrently: overlapping dispatches
/// share one instance.
#[async_trait]
pub trait FeedbackAnalyzer: Send + Sync {
    /// Model identifier recorded on every snapshot.
    fn model(&self) -> &str;

    async fn analyze(
        &self,
        batch: &[PendingItem],
        previous: Option<&AnalysisSnapshot>,
    ) -> Result<AnalysisResult, LlmError>;
}

// ────────────────────────────────────────────────────────────────────────────
// LlmFeedbackAnalyzer
// ────────────────────────────────────────────────────────────────────────────

pub struct LlmFeedbackAnalyzer {
    llm: LlmClient,
}

impl LlmFeedbackAnalyzer {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }
}

#[derive(Debug, Deserialize)]
struct AnalysisReply {
    summary: String,
    sentiment: String,
    #[serde(default)]
    key_insights: Vec<String>,
    #[serde(default)]
    topics: Vec<RawTopic>,
}

#[async_trait]
impl FeedbackAnalyzer for LlmFeedbackAnalyzer {
    fn model(&self) -> &str {
        self.llm.model()
    }

    async fn analyze(
        &self,
        batch: &[PendingItem],
        previous: Option<&AnalysisSnapshot>,
    ) -> Result<AnalysisResult, LlmError> {
        let prompt = build_analysis_prompt(batch, previous)?;
        let (reply, usage) = self
            .llm
            .call_json::<AnalysisReply>(&prompt, ANALYSIS_SYSTEM)
            .await?;

        into_result(reply, usage.total())
    }
}

fn into_result(reply: AnalysisReply, tokens_used: u32) -> Result<AnalysisResult, LlmError> {
    let summary = reply.summary.trim().to_string();
    if summary.is_empty() {
        return Err(LlmError::Schema("summary is empty".to_string()));
    }
    let sentiment = reply.sentiment.parse::<Sentiment>().map_err(LlmError::Schema)?;
    let key_insights = reply
        .key_insights
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    Ok(AnalysisResult {
        summary,
        sentiment,
        key_insights,
        topics: reply.topics,
        tokens_used,
    })
}

/// Builds the analysis prompt by filling the template with the batch and the
/// previous snapshot's context.
pub fn build_analysis_prompt(
    batch: &[PendingItem],
    previous: Option<&AnalysisSnapshot>,
) -> Result<String, LlmError> {
    let feedback_json = serde_json::to_string_pretty(
        &batch
            .iter()
            .map(|item| {
                serde_json::json!({
                    "id": item.id,
                    "rating": item.rating,
                    "comment": item.comment,
                    "created_at": item.created_at,
                })
            })
            .collect::<Vec<_>>(),
    )?;

    let previous_analysis = match previous {
        None => NO_PREVIOUS_ANALYSIS.to_string(),
        Some(snapshot) => render_previous(snapshot),
    };

    Ok(ANALYSIS_PROMPT_TEMPLATE
        .replace("{grounding_instruction}", GROUNDING_INSTRUCTION)
        .replace("{topic_catalogue}", &FeedbackTopic::catalogue())
        .replace("{previous_analysis}", &previous_analysis)
        .replace("{feedback_json}", &feedback_json))
}

fn render_previous(snapshot: &AnalysisSnapshot) -> String {
    let mut out = format!(
        "Period: {} to {} ({} feedback items)\nSentiment: {}\nSummary: {}\n",
        snapshot.period_start.to_rfc3339(),
        snapshot.period_end.to_rfc3339(),
        snapshot.feedback_count,
        snapshot.sentiment.as_str(),
        snapshot.summary
    );
    if !snapshot.key_insights.is_empty() {
        out.push_str("Key insights:\n");
        for insight in &snapshot.key_insights {
            out.push_str(&format!("- {insight}\n"));
        }
    }
    out
}
