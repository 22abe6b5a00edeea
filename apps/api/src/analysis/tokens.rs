//! Token Estimator: deterministic, character-based token cost forecasts.
//!
//! Only the selection planner composes these. They never touch a tokenizer:
//! the budget is a conservative guard, not an exact count.

use crate::analysis::prompts::{ANALYSIS_PROMPT_TEMPLATE, ANALYSIS_SYSTEM};
use crate::analysis::topics::FeedbackTopic;
use crate::llm_client::prompts::GROUNDING_INSTRUCTION;
use crate::models::analysis::AnalysisSnapshot;
use crate::models::feedback::PendingItem;

/// Heuristic: one token per four characters of text.
pub const CHARS_PER_TOKEN: u32 = 4;
/// Added to every text estimate (role markers, separators).
pub const TEXT_OVERHEAD_TOKENS: u32 = 4;
/// Rating is a single digit.
pub const RATING_TOKENS: u32 = 1;
/// JSON framing around one feedback item: braces, keys, quotes, timestamp.
pub const ITEM_STRUCTURE_TOKENS: u32 = 16;
/// Labels and framing around the previous analysis block.
pub const PRIOR_CONTEXT_STRUCTURE_TOKENS: u32 = 40;
/// Array brackets and section headers around the feedback payload.
pub const PAYLOAD_STRUCTURE_TOKENS: u32 = 20;
/// Fixed part of the expected response (summary, sentiment, insights).
pub const RESPONSE_BASE_TOKENS: u32 = 400;
/// Expected response growth per analysed item (topic ids, topic summaries).
pub const RESPONSE_PER_ITEM_TOKENS: u32 = 25;

pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count() as u32;
    chars / CHARS_PER_TOKEN + TEXT_OVERHEAD_TOKENS
}

pub fn estimate_feedback_item_tokens(item: &PendingItem) -> u32 {
    estimate_tokens(&item.id.to_string())
        + estimate_tokens(&item.comment)
        + RATING_TOKENS
        + ITEM_STRUCTURE_TOKENS
}

/// Cost of the static instructions: system prompt, template, topic catalogue.
pub fn estimate_system_prompt_tokens() -> u32 {
    estimate_tokens(ANALYSIS_SYSTEM)
        + estimate_tokens(ANALYSIS_PROMPT_TEMPLATE)
        + estimate_tokens(GROUNDING_INSTRUCTION)
        + estimate_tokens(&FeedbackTopic::catalogue())
}

pub fn estimate_prior_context_tokens(previous: Option<&AnalysisSnapshot>) -> u32 {
    match previous {
        None => 0,
        Some(snapshot) => {
            estimate_tokens(&snapshot.summary)
                + estimate_tokens(&snapshot.key_insights.join("\n"))
                + PRIOR_CONTEXT_STRUCTURE_TOKENS
        }
    }
}

pub fn estimate_response_tokens(item_count: usize) -> u32 {
    RESPONSE_BASE_TOKENS + item_count as u32 * RESPONSE_PER_ITEM_TOKENS
}

/// Full request + response forecast for a batch, using the same accounting
/// as the planner.
#[cfg(test)]
pub fn estimate_batch_tokens(items: &[PendingItem], previous: Option<&AnalysisSnapshot>) -> u32 {
    estimate_system_prompt_tokens()
        + estimate_prior_context_tokens(previous)
        + PAYLOAD_STRUCTURE_TOKENS
        + items.iter().map(estimate_feedback_item_tokens).sum::<u32>()
        + estimate_response_tokens(items.len())
}
