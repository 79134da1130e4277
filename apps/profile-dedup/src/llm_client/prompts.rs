// Shared prompt fragments.
// Each stage that calls the LLM defines its own prompts.rs alongside it.

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You are a precise, structured assistant. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Appended to every prompt that rewrites career text.
pub const NO_FABRICATION_INSTRUCTION: &str = "\
    CRITICAL: Only restate information present in the entries you are given. \
    Do NOT infer employers, dates, titles, metrics or technologies that are not stated. \
    If two entries disagree, keep both facts rather than choosing one silently.";
