// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 shoebox contributors

//! LLM prompt templates
//!
//! Centralizes every prompt the pipeline sends: facts extraction, batch
//! classification, JSON repair and image captioning.

/// Prompt to repair malformed JSON model output.
pub fn json_repair_prompt(snippet: &str) -> String {
    format!(
        "You must output VALID JSON only (no code fences, no extra text).\n\
         Fix the following output into a single JSON object. Keep the same keys and values as much as possible.\n\n\
         Broken output:\n\"\"\"{snippet}\"\"\"\n"
    )
}

/// Caption prompt for the vision model when OCR found no usable text.
pub fn image_caption_prompt(language: &str) -> String {
    let lang = caption_language(language);
    format!(
        "Describe this image in 2-4 sentences. Mention any visible text, people, \
         organizations, dates or amounts. If it looks like a photographed or scanned \
         document, say what kind of document it is. {lang}"
    )
}

fn caption_language(language: &str) -> &'static str {
    match language {
        "it" => "Answer in Italian.",
        "en" => "Answer in English.",
        _ => "Answer in the language most natural for the image content; if unclear, English.",
    }
}

fn facts_language_line(language: &str) -> &'static str {
    match language {
        "it" => {
            "Output language: Italian. All generated text fields MUST be Italian \
             (purpose, doc_type, tags, summary_long, skip_reason). \
             Keep proper names (people/orgs/addresses/identifiers) as-is."
        }
        "en" => {
            "Output language: English. All generated text fields MUST be English \
             (purpose, doc_type, tags, summary_long, skip_reason). \
             Keep proper names (people/orgs/addresses/identifiers) as-is."
        }
        _ => "Output language: match the input document language (if unclear: English)",
    }
}

/// Phase 1 prompt: extract structured facts from document content.
#[allow(clippy::too_many_arguments)]
pub fn facts_extraction_prompt(
    filename: &str,
    mtime_iso: &str,
    year_hint_filename: Option<&str>,
    year_hint_text: Option<&str>,
    content: &str,
    language: &str,
) -> String {
    let language_line = facts_language_line(language);
    let hint_fn = year_hint_filename.unwrap_or("null");
    let hint_txt = year_hint_text.unwrap_or("null");

    format!(
        r#"You are a document understanding assistant. Reply with VALID JSON only (no extra text).

Goal:
- Extract key facts from the document content below.
- Do NOT classify or propose a filename in this step.
- Prefer precision over brevity: if a value is present, copy it exactly; do not guess.
- {language_line}

Inputs:
filename: {filename}
mtime_iso: {mtime_iso}
year_hint_filename: {hint_fn}
year_hint_text: {hint_txt}
content:
"""{content}"""

Output JSON schema:
{{
  "language": "it"|"en"|"unknown",
  "doc_type": string|null,
  "purpose": string,        // WHAT this document IS (e.g. "electricity bill", "employment contract", "ID card photo"). NOT what you are doing with it. Do NOT mention extraction/classification/renaming.
  "tags": string[],
  "people": string[],
  "organizations": string[],
  "addresses": string[],
  "amounts": [{{"value": number, "currency": string, "raw": string}}],
  "identifiers": [{{"type": string, "value": string}}],
  "date_candidates": [{{"year": string, "type": "reference"|"production"|"other", "confidence": number, "source": "filename"|"content"}}],
  "summary_long": string,   // 6-12 sentences, include the most important extracted values (who/what/when/how much/ids)
  "confidence": number,
  "skip_reason": string|null
}}
"#
    )
}

fn classify_language_line(language: &str) -> &'static str {
    match language {
        "it" => {
            "Output language: Italian. All generated text fields MUST be Italian \
             (category labels come from taxonomy; summary/proposed_name should be Italian). \
             Keep proper names as-is."
        }
        "en" => {
            "Output language: English. All generated text fields MUST be English \
             (category labels come from taxonomy; summary/proposed_name should be English). \
             Keep proper names as-is."
        }
        _ => "Output language: match each document language; if unclear: English",
    }
}

/// Phase 2 prompt: classify and rename a batch of documents described by
/// their extracted facts. `payload_json` is a JSON list, one object per
/// document, each carrying a `path` the model must echo back.
pub fn classify_batch_prompt(
    allowed_categories: &[&str],
    taxonomy_block: &str,
    separator_description: &str,
    payload_json: &str,
    language: &str,
) -> String {
    let language_line = classify_language_line(language);
    let categories = allowed_categories.join(", ");

    format!(
        r#"You are a document archiving assistant. Reply with VALID JSON only.

Task:
- Given a batch of documents described by extracted facts (not the raw file content),
  classify and rename with maximum output quality.
- You MAY change category and reference_year if a better choice is supported by the facts.
- Produce consistent, uniform naming across the batch by using coherent templates per document cluster.
  Example: similar utility bills should share the same naming pattern (same ordering, same fields).

Constraints:
- category MUST be one of: [{categories}]
- proposed_name MUST be descriptive, 6-14 words when possible.
- Include key entities (organization/person) and a date/period if available in the facts or summary.
- Copy proper names as-is; do NOT guess spellings. If uncertain, omit the entity.
- Use {separator_description} between words (no mixed separators). Do NOT put separators inside a word.
- Do NOT include generic words like "document", "file", "text", "image".
- Do NOT include category/year in the name unless there is no other useful info.
- {language_line}

Taxonomy:
{taxonomy_block}

Input (JSON list):
{payload_json}

Output JSON schema (JSON list, same length as input, preserve 'path'):
[
  {{
    "path": string,
    "category": string,
    "reference_year": string|null,
    "proposed_name": string,
    "summary": string,
    "confidence": number|null
  }}
]
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facts_prompt_carries_hints_and_content() {
        let p = facts_extraction_prompt(
            "bill 2021.pdf",
            "2024-05-01T10:00:00",
            Some("2021"),
            None,
            "Total due 225,58 €",
            "it",
        );
        assert!(p.contains("year_hint_filename: 2021"));
        assert!(p.contains("year_hint_text: null"));
        assert!(p.contains("Total due 225,58 €"));
        assert!(p.contains("MUST be Italian"));
    }

    #[test]
    fn test_classify_prompt_lists_categories() {
        let cats = vec!["banking", "unknown"];
        let p = classify_batch_prompt(&cats, "- banking: money stuff", "spaces", "[]", "en");
        assert!(p.contains("[banking, unknown]"));
        assert!(p.contains("Use spaces between words"));
        assert!(p.contains("MUST be English"));
    }

    #[test]
    fn test_repair_prompt_embeds_snippet() {
        let p = json_repair_prompt("{\"a\": 1,");
        assert!(p.contains("{\"a\": 1,"));
        assert!(p.contains("VALID JSON only"));
    }
}
