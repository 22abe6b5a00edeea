// All LLM prompt constants for the Analysis module.
// Reuses cross-cutting fragments from llm_client::prompts.

/// System prompt for aggregate feedback analysis. Enforces JSON-only output.
pub const ANALYSIS_SYSTEM: &str = "You are an experienced product analyst. \
    You read batches of customer feedback (a 1-5 star rating plus a free-text comment) \
    and produce a concise aggregate analysis for the product team. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences.";

/// Analysis prompt template.
/// Replace: {grounding_instruction}, {topic_catalogue}, {previous_analysis}, {feedback_json}
pub const ANALYSIS_PROMPT_TEMPLATE: &str = r#"{grounding_instruction}

TOPIC CATALOGUE (use ONLY these exact values for "topic"):
{topic_catalogue}

PREVIOUS ANALYSIS (build on it; describe how things changed, do not repeat it verbatim):
{previous_analysis}

NEW FEEDBACK ITEMS:
{feedback_json}

Return a JSON object with this EXACT schema (no extra fields):
{
  "summary": "Two to four sentences describing the overall state of feedback",
  "sentiment": "positive",
  "key_insights": [
    "Checkout latency is the most frequent complaint this period"
  ],
  "topics": [
    {
      "topic": "performance_reliability",
      "summary": "One or two sentences about this topic",
      "sentiment": "negative",
      "feedback_ids": ["the-exact-id-from-the-items-above"]
    }
  ]
}

HARD RULES:
1. "sentiment" is one of "positive", "mixed", "negative" — at the top level and per topic
2. "topic" MUST be one of the catalogue values above — never invent a new topic
3. Every topic MUST list at least one feedback id, copied exactly from the input
4. A feedback item may appear under several topics
5. Omit topics that no feedback item mentions
6. At most 7 key insights, most important first"#;

/// Rendered in place of `{previous_analysis}` for the first-ever analysis.
pub const NO_PREVIOUS_ANALYSIS: &str = "None — this is the first analysis.";
