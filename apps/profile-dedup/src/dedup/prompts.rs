// Dedup stage LLM prompt templates.
// All prompts for arbitration and merge are defined here.

pub const ARBITRATION_SYSTEM: &str = "\
You review career entries extracted from one person's resume and LinkedIn profile. \
Decide which entries describe the SAME position worded differently. \
You MUST respond with valid JSON only — no markdown fences, no explanations. \
Be conservative: when in doubt, treat entries as unique.";

pub const ARBITRATION_PROMPT: &str = r#"Analyze the entries below and group the ones that describe the IDENTICAL position.

ENTRIES:
{entries_json}

Two entries are duplicates ONLY if ALL of these hold:
1. Same company or organization (minor naming variations allowed)
2. Overlapping or identical date ranges
3. Same or equivalent job title for the same position
4. Same or equivalent location
5. Same core responsibilities and accomplishments, even if worded differently

Entries are UNIQUE if ANY of these hold:
- Different organizations, or non-overlapping periods
- Different roles at the same organization (each position is a separate experience)
- Different locations, projects, departments or teams

OUTPUT SCHEMA (return exactly this structure, using the entries' "id" values):
{
  "similar": [["id", "id"]],
  "unsimilar": ["id"]
}

RULES:
1. Every group in "similar" has 2 or more ids describing the same position
2. An entry with no duplicate goes in "unsimilar"
3. Every id appears exactly once across "similar" and "unsimilar"
4. Return ONLY the JSON object — nothing else, no code fences."#;

pub const MERGE_SYSTEM: &str = "\
You consolidate duplicate career entries into one standardized entry. \
You MUST respond with valid JSON only — no markdown fences, no explanations. \
Never invent details that are not present in the entries.";

pub const MERGE_PROMPT: &str = r#"The entries below were confirmed to describe the same experience. Merge them into one entry.

ENTRIES:
{cluster_json}

RULES FOR "embedding_text":
1. One coherent third-person narrative of 100-250 words
2. Keep every responsibility, metric, tool and outcome; drop only repetition
3. Keep the tone of the source text; no bullet points, no markdown

RULES FOR "metadata":
- "date_range": the most specific range available (explicit months over bare years)
- "company": the most complete, standardized name; a list if the entries name different organizations
- "job_title": the most descriptive title; a list if the entries disagree
- "location": the most detailed form; a list if the entries name different places
- "section_type": the section shared by the entries
- Omit any id or bookkeeping field

OUTPUT SCHEMA (return exactly this structure):
{
  "embedding_text": "string",
  "metadata": {
    "section_type": "string",
    "date_range": "string" | ["string"],
    "company": "string" | ["string"],
    "location": "string" | ["string"],
    "job_title": "string" | ["string"]
  }
}

Return ONLY the JSON object — nothing else, no code fences."#;
