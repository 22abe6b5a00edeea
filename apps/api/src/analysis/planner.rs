//! Selection Planner: splits the backlog into the batch sent to the LLM
//! and the items deferred to a later tick.
//!
//! FIFO is the only ordering rule: older feedback is always considered first,
//! and nothing is ever reordered by rating or content.

use crate::analysis::tokens::{
    estimate_feedback_item_tokens, estimate_prior_context_tokens, estimate_system_prompt_tokens,
    estimate_response_tokens, PAYLOAD_STRUCTURE_TOKENS,
};
use crate::models::analysis::AnalysisSnapshot;
use crate::models::feedback::PendingItem;

/// Outcome of one planning pass. Together the two halves hold exactly the
/// items that were planned over.
#[derive(Debug, Clone, Default)]
pub struct SelectionPlan {
    pub selected: Vec<PendingItem>,
    pub remaining: Vec<PendingItem>,
    /// Estimated request + response tokens for `selected`.
    pub estimated_tokens: u32,
}

impl SelectionPlan {
    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }
}

/// Plans the next batch.
///
/// Algorithm:
/// 1. The first `max_items` backlog items are candidates; the rest are deferred
/// 2. The running total starts at the fixed cost: instructions, previous
///    analysis context, payload framing and the response base
/// 3. Each candidate costs its own tokens plus one per-item response unit
/// 4. The first candidate that would push the total over `max_tokens` stops
///    the walk; it and every later candidate are deferred
/// 5. `remaining` = unconsumed candidates, then the items beyond `max_items`
pub fn plan(
    backlog: &[PendingItem],
    previous: Option<&AnalysisSnapshot>,
    max_tokens: u32,
    max_items: usize,
) -> SelectionPlan {
    if backlog.is_empty() {
        return SelectionPlan::default();
    }

    let split = max_items.min(backlog.len());
    let (candidates, overflow) = backlog.split_at(split);

    let mut running = estimate_system_prompt_tokens()
        + estimate_prior_context_tokens(previous)
        + PAYLOAD_STRUCTURE_TOKENS
        + estimate_response_tokens(0);

    let mut taken = 0usize;
    for item in candidates {
        let response_growth = estimate_response_tokens(taken + 1) - estimate_response_tokens(taken);
        let cost = estimate_feedback_item_tokens(item) + response_growth;
        match running.checked_add(cost) {
            Some(total) if total <= max_tokens => {
                running = total;
                taken += 1;
            }
            _ => break,
        }
    }

    let selected = candidates[..taken].to_vec();
    let mut remaining = Vec::with_capacity(backlog.len() - taken);
    remaining.extend_from_slice(&candidates[taken..]);
    remaining.extend_from_slice(overflow);

    SelectionPlan {
        estimated_tokens: if selected.is_empty() { 0 } else { running },
        selected,
        remaining,
    }
}
