// Shared prompt constants and prompt-building utilities.
// Each service that needs LLM calls defines its own prompts.rs alongside it.
// This file contains cross-cutting prompt fragments.

/// Common instruction appended to prompts that reference input records by id.
pub const GROUNDING_INSTRUCTION: &str = "\
    CRITICAL: Every statement you make must be traceable to the feedback items \
    provided below. Do NOT infer, interpolate, or invent details. \
    When you reference feedback, use the exact `id` values given in the input.";
