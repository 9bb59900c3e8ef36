// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 shoebox contributors

//! Facts extraction stage
//!
//! Phase 1 of the pipeline: extract content, build a bounded evidence
//! excerpt, and ask a model for structured facts. A fast model goes
//! first; when its answer is weak (unparseable, low confidence, thin
//! summary, missing doc_type/purpose, or OCR-sourced content) the deep
//! model gets one shot and wins only if its output parses.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use crate::config::AppConfig;
use crate::extract::{self, Extraction};
use crate::item::{ItemStatus, WorkItem};
use crate::ollama::OllamaClient;
use crate::parse::{
    coerce_f64, coerce_string, coerce_string_list, extract_json_object, is_year,
    truncate_raw_output,
};
use crate::prompts;

/// Character budget for the evidence excerpt sent to the model.
pub const EXCERPT_BUDGET: usize = 14_000;
/// Facts below this confidence are skipped outright.
pub const CONFIDENCE_FLOOR: f64 = 0.30;
/// Fast-model results below this confidence escalate to the deep model.
pub const ESCALATE_CONFIDENCE: f64 = 0.55;
/// Fast-model summaries shorter than this escalate to the deep model.
pub const ESCALATE_SUMMARY_LEN: usize = 200;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Amount {
    pub value: f64,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub raw: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DateCandidate {
    pub year: String,
    /// "reference", "production" or "other".
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Structured facts as stored in `WorkItem::facts_json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Facts {
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub doc_type: Option<String>,
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub people: Vec<String>,
    #[serde(default)]
    pub organizations: Vec<String>,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub amounts: Vec<Amount>,
    #[serde(default)]
    pub identifiers: Vec<Identifier>,
    #[serde(default)]
    pub date_candidates: Vec<DateCandidate>,
    #[serde(default)]
    pub year_hint_filename: Option<String>,
    #[serde(default)]
    pub year_hint_text: Option<String>,
}

impl Facts {
    /// Parse facts back out of a stored JSON string, tolerating a partial
    /// or older shape.
    pub fn from_json(json: &str) -> Option<Self> {
        serde_json::from_str(json).ok()
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn prev_next_not_digit(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !before.is_some_and(|c| c.is_ascii_digit()) && !after.is_some_and(|c| c.is_ascii_digit())
}

fn first_bounded<'t>(re: &Regex, text: &'t str, group: usize) -> Option<&'t str> {
    for caps in re.captures_iter(text) {
        let whole = caps.get(0)?;
        if prev_next_not_digit(text, whole.start(), whole.end()) {
            return caps.get(group).map(|m| m.as_str());
        }
    }
    None
}

/// Best-effort year from the file's path: an exact-year path part wins,
/// then month-year, full dates, two-digit-year dates (pivot 69),
/// ISO dates, compact timestamps, and finally any year-looking token.
pub fn year_hint_from_path(path: &Path) -> Option<String> {
    static MONTH_YEAR: OnceLock<Regex> = OnceLock::new();
    static FULL_DATE: OnceLock<Regex> = OnceLock::new();
    static SHORT_DATE: OnceLock<Regex> = OnceLock::new();
    static ISO_DATE: OnceLock<Regex> = OnceLock::new();
    static TIMESTAMP: OnceLock<Regex> = OnceLock::new();
    static ANY_YEAR: OnceLock<Regex> = OnceLock::new();

    let parts: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    let text = format!(
        "{} {}",
        parts.join(" "),
        path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
    );

    for part in parts.iter().rev() {
        if is_year(part) {
            return Some(part.clone());
        }
    }

    let month_year =
        MONTH_YEAR.get_or_init(|| Regex::new(r"\d{1,2}[._-](19\d{2}|20\d{2})").expect("valid regex"));
    if let Some(y) = first_bounded(month_year, &text, 1) {
        return Some(y.to_string());
    }

    let full_date = FULL_DATE.get_or_init(|| {
        Regex::new(r"\d{1,2}[._-]\d{1,2}[._-](19\d{2}|20\d{2})").expect("valid regex")
    });
    if let Some(y) = first_bounded(full_date, &text, 1) {
        return Some(y.to_string());
    }

    let short_date = SHORT_DATE
        .get_or_init(|| Regex::new(r"\d{1,2}[._-]\d{1,2}[._-](\d{2})").expect("valid regex"));
    if let Some(yy) = first_bounded(short_date, &text, 1) {
        let yy: u32 = yy.parse().ok()?;
        // 00-69 -> 2000s, 70-99 -> 1900s.
        let year = if yy <= 69 { 2000 + yy } else { 1900 + yy };
        return Some(year.to_string());
    }

    let iso_date = ISO_DATE
        .get_or_init(|| Regex::new(r"(19\d{2}|20\d{2})-\d{1,2}-\d{1,2}").expect("valid regex"));
    if let Some(y) = first_bounded(iso_date, &text, 1) {
        return Some(y.to_string());
    }

    let timestamp = TIMESTAMP.get_or_init(|| {
        Regex::new(r"(19\d{2}|20\d{2})(0[1-9]|1[0-2])([0-2]\d|3[01])").expect("valid regex")
    });
    if let Some(y) = first_bounded(timestamp, &text, 1) {
        return Some(y.to_string());
    }

    let any_year =
        ANY_YEAR.get_or_init(|| Regex::new(r"(19\d{2}|20\d{2})").expect("valid regex"));
    first_bounded(any_year, &text, 1).map(String::from)
}

/// The most frequent year in the first part of the text; ties go to the
/// latest year.
pub fn year_hint_from_text(text: &str) -> Option<String> {
    static DIGIT_RUN: OnceLock<Regex> = OnceLock::new();
    let digit_run = DIGIT_RUN.get_or_init(|| Regex::new(r"\d+").expect("valid regex"));

    let sample: String = text.chars().take(8000).collect();
    let mut counts: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    for m in digit_run.find_iter(&sample) {
        let token = m.as_str();
        if is_year(token) {
            *counts.entry(token).or_insert(0) += 1;
        }
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(b.0)))
        .map(|(year, _)| year.to_string())
}

fn evidence_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"(?i)(€|\beur\b|\beuro\b",
            r"|\d{1,2}[./-]\d{1,2}[./-](19|20)\d{2}",
            r"|(19|20)\d{2}-\d{1,2}-\d{1,2}",
            r"|\b[A-Z]{2}\d{2}[A-Z0-9]{10,30}\b", // IBAN-shaped
            r"|\b\d{9,}\b)",                      // long identifiers
        ))
        .expect("valid regex")
    })
}

/// Bound the content fed to the model: head + tail of the document, with
/// a hard cap that shrinks for very large inputs. Lines carrying dates,
/// amounts or identifier-shaped tokens that fell outside the window are
/// appended so the model still sees them.
pub fn content_excerpt(text: &str) -> String {
    let t = text.trim();
    let len = t.chars().count();

    let mut budget = EXCERPT_BUDGET;
    if len > EXCERPT_BUDGET * 8 {
        budget = 6000;
    } else if len > EXCERPT_BUDGET * 4 {
        budget = 9000;
    }

    if len <= budget {
        return t.to_string();
    }

    let head_len = budget * 7 / 10;
    let tail_len = budget - head_len;
    let head: String = t.chars().take(head_len).collect();
    let tail: String = {
        let chars: Vec<char> = t.chars().collect();
        chars[chars.len() - tail_len..].iter().collect()
    };
    let mut excerpt = format!("{}\n\n…\n\n{}", head.trim_end(), tail.trim_start());

    // Rescue high-signal lines the window dropped.
    let re = evidence_line_re();
    let mut rescued: Vec<&str> = Vec::new();
    for line in t.lines() {
        let line = line.trim();
        if line.is_empty() || line.len() > 300 {
            continue;
        }
        if re.is_match(line) && !excerpt.contains(line) && !rescued.contains(&line) {
            rescued.push(line);
            if rescued.len() >= 12 {
                break;
            }
        }
    }
    if !rescued.is_empty() {
        excerpt.push_str("\n\nKEY LINES:\n");
        excerpt.push_str(&rescued.join("\n"));
    }
    excerpt.trim().to_string()
}

fn coerce_amounts(value: Option<&serde_json::Value>) -> Vec<Amount> {
    let Some(serde_json::Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|v| {
            let map = v.as_object()?;
            let value = coerce_f64(map.get("value"))?;
            Some(Amount {
                value,
                currency: coerce_string(map.get("currency")).unwrap_or_default(),
                raw: coerce_string(map.get("raw")).unwrap_or_default(),
            })
        })
        .collect()
}

fn coerce_identifiers(value: Option<&serde_json::Value>) -> Vec<Identifier> {
    let Some(serde_json::Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|v| {
            let map = v.as_object()?;
            let value = coerce_string(map.get("value"))?;
            Some(Identifier {
                kind: coerce_string(map.get("type")).unwrap_or_default(),
                value,
            })
        })
        .collect()
}

fn coerce_date_candidates(value: Option<&serde_json::Value>) -> Vec<DateCandidate> {
    let Some(serde_json::Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|v| {
            let map = v.as_object()?;
            let year = coerce_string(map.get("year"))?;
            if !is_year(&year) {
                return None;
            }
            let kind = coerce_string(map.get("type")).unwrap_or_default();
            let kind = match kind.as_str() {
                "reference" | "production" => kind,
                _ => "other".to_string(),
            };
            Some(DateCandidate {
                year,
                kind,
                confidence: coerce_f64(map.get("confidence")).unwrap_or(0.5),
                source: coerce_string(map.get("source")),
            })
        })
        .collect()
}

/// Assemble [`Facts`] from a parsed model reply, attaching the hints.
fn facts_from_map(
    map: &serde_json::Map<String, serde_json::Value>,
    year_hint_filename: Option<&str>,
    year_hint_text: Option<&str>,
) -> Facts {
    Facts {
        language: coerce_string(map.get("language")),
        doc_type: coerce_string(map.get("doc_type")),
        purpose: coerce_string(map.get("purpose")),
        tags: coerce_string_list(map.get("tags")),
        people: coerce_string_list(map.get("people")),
        organizations: coerce_string_list(map.get("organizations")),
        addresses: coerce_string_list(map.get("addresses")),
        amounts: coerce_amounts(map.get("amounts")),
        identifiers: coerce_identifiers(map.get("identifiers")),
        date_candidates: coerce_date_candidates(map.get("date_candidates")),
        year_hint_filename: year_hint_filename.map(String::from),
        year_hint_text: year_hint_text.map(String::from),
    }
}

struct ParsedFacts {
    facts: Facts,
    summary_long: Option<String>,
    confidence: Option<f64>,
    skip_reason: Option<String>,
}

struct FactsAttempt {
    parsed: Option<ParsedFacts>,
    model: String,
    llm_time_s: f64,
    raw_output: Option<String>,
    error: Option<String>,
}

async fn call_facts_model(
    candidates: &[String],
    prompt: &str,
    config: &AppConfig,
    ollama: &OllamaClient,
    year_hint_filename: Option<&str>,
    year_hint_text: Option<&str>,
) -> FactsAttempt {
    let t0 = Instant::now();
    let outcome = ollama
        .generate_with_fallbacks(
            candidates,
            prompt,
            Duration::from_secs(config.ai_engine.heavy_timeout_secs),
        )
        .await;

    if let Some(error) = outcome.error {
        return FactsAttempt {
            parsed: None,
            model: outcome.model,
            llm_time_s: t0.elapsed().as_secs_f64(),
            raw_output: None,
            error: Some(format!("Ollama error: {error}")),
        };
    }

    let mut raw_output = None;
    let mut data = extract_json_object(&outcome.text);
    if data.is_none() {
        raw_output = Some(truncate_raw_output(&outcome.text));
        // One repair attempt with a short timeout, on the model that answered.
        let repair = ollama
            .generate(
                &outcome.model,
                &prompts::json_repair_prompt(&outcome.text),
                Duration::from_secs(config.ai_engine.repair_timeout_secs),
            )
            .await;
        if repair.is_ok() {
            data = extract_json_object(&repair.text);
        }
    }

    let parsed = data.map(|map| ParsedFacts {
        facts: facts_from_map(&map, year_hint_filename, year_hint_text),
        summary_long: coerce_string(map.get("summary_long")),
        confidence: coerce_f64(map.get("confidence")),
        skip_reason: coerce_string(map.get("skip_reason")),
    });

    FactsAttempt {
        parsed,
        model: outcome.model,
        llm_time_s: t0.elapsed().as_secs_f64(),
        raw_output,
        error: None,
    }
}

/// Whether a fast-model attempt is weak enough to justify the deep model.
fn needs_deep(attempt: &FactsAttempt, extract_method: Option<&str>) -> bool {
    if matches!(extract_method, Some("ocr") | Some("vision+ocr")) {
        return true;
    }
    let Some(parsed) = &attempt.parsed else {
        return true;
    };
    if parsed.skip_reason.is_some() {
        return false;
    }
    if parsed.confidence.map_or(true, |c| c < ESCALATE_CONFIDENCE) {
        return true;
    }
    if parsed
        .summary_long
        .as_ref()
        .map_or(true, |s| s.chars().count() < ESCALATE_SUMMARY_LEN)
    {
        return true;
    }
    parsed.facts.doc_type.is_none() || parsed.facts.purpose.is_none()
}

fn apply_extraction(item: &mut WorkItem, extraction: &Extraction) {
    item.extract_method = extraction.method.clone();
    item.extract_time_s = Some(extraction.extract_time_s);
    item.ocr_time_s = extraction.ocr_time_s;
    item.ocr_mode = extraction.ocr_mode.clone();
}

/// Run the facts stage for one item, returning the updated record.
/// Items not in a startable status pass through unchanged.
pub async fn extract_facts_item(
    item: &WorkItem,
    config: &AppConfig,
    ollama: &OllamaClient,
) -> WorkItem {
    if !matches!(
        item.status,
        ItemStatus::Pending | ItemStatus::Skipped | ItemStatus::Error
    ) {
        return item.clone();
    }

    let stage_t0 = Instant::now();
    let mut out = item.reset_to_pending();
    let year_hint_filename = year_hint_from_path(&item.path);

    let extraction = extract::extract_content(item, config, ollama).await;
    apply_extraction(&mut out, &extraction);

    let Some(text) = extraction.text.as_deref() else {
        out.status = ItemStatus::Skipped;
        out.reason = extraction.reason.clone().or_else(|| Some("No extractable text".to_string()));
        out.facts_time_s = Some(stage_t0.elapsed().as_secs_f64());
        return out;
    };

    let year_hint_text = year_hint_from_text(text);
    let excerpt = content_excerpt(text);
    let prompt = prompts::facts_extraction_prompt(
        &item.file_name(),
        &item.modified,
        year_hint_filename.as_deref(),
        year_hint_text.as_deref(),
        &excerpt,
        &config.language,
    );

    let fast_candidates = crate::ollama::model_candidates(
        &config.ai_engine.models.text_fast,
        &config.ai_engine.models.fallbacks,
    );
    let mut attempt = call_facts_model(
        &fast_candidates,
        &prompt,
        config,
        ollama,
        year_hint_filename.as_deref(),
        year_hint_text.as_deref(),
    )
    .await;
    let mut llm_time = attempt.llm_time_s;

    if attempt.error.is_none() && needs_deep(&attempt, extraction.method.as_deref()) {
        let deep_model = &config.ai_engine.models.text_deep;
        if *deep_model != attempt.model {
            let deep = call_facts_model(
                std::slice::from_ref(deep_model),
                &prompt,
                config,
                ollama,
                year_hint_filename.as_deref(),
                year_hint_text.as_deref(),
            )
            .await;
            llm_time += deep.llm_time_s;
            // The deep result only wins when it actually parsed.
            if deep.error.is_none() && deep.parsed.is_some() {
                attempt = deep;
            }
        }
    }

    out.facts_time_s = Some(stage_t0.elapsed().as_secs_f64());
    out.facts_llm_time_s = Some(llm_time);
    out.facts_model = Some(attempt.model.clone());
    out.llm_raw_output = attempt.raw_output.clone();

    if let Some(error) = attempt.error {
        out.status = ItemStatus::Error;
        out.reason = Some(error);
        return out;
    }

    let Some(parsed) = attempt.parsed else {
        out.status = ItemStatus::Skipped;
        out.reason = Some("Unparseable output (JSON)".to_string());
        return out;
    };

    if let Some(skip_reason) = parsed.skip_reason {
        out.status = ItemStatus::Skipped;
        out.reason = Some(skip_reason);
        return out;
    }

    if let Some(conf) = parsed.confidence {
        if conf < CONFIDENCE_FLOOR {
            out.status = ItemStatus::Skipped;
            out.reason = Some("Low confidence".to_string());
            out.confidence = Some(conf);
            return out;
        }
    }

    out.status = ItemStatus::Scanned;
    out.confidence = parsed.confidence;
    out.summary_long = parsed
        .summary_long
        .map(|s| s.trim().chars().take(4000).collect::<String>())
        .filter(|s| !s.is_empty());
    out.facts_json = parsed.facts.to_json().ok();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_year_hint_from_path_prefers_year_directory() {
        assert_eq!(
            year_hint_from_path(Path::new("/docs/2021/bolletta marzo.pdf")),
            Some("2021".to_string())
        );
        assert_eq!(
            year_hint_from_path(Path::new("/docs/estratto_12.2019_conto.pdf")),
            Some("2019".to_string())
        );
        assert_eq!(
            year_hint_from_path(Path::new("/docs/scan 17.03.2020.pdf")),
            Some("2020".to_string())
        );
        assert_eq!(
            year_hint_from_path(Path::new("/docs/ricevuta 05.06.68.pdf")),
            Some("2068".to_string())
        );
        assert_eq!(
            year_hint_from_path(Path::new("/docs/foto 05.06.85.jpg")),
            Some("1985".to_string())
        );
        assert_eq!(
            year_hint_from_path(Path::new("/d/20200105_101112.jpg")),
            Some("2020".to_string())
        );
        assert_eq!(year_hint_from_path(Path::new("/docs/nothing here.pdf")), None);
    }

    #[test]
    fn test_year_hint_from_text_frequency_then_latest() {
        assert_eq!(
            year_hint_from_text("bill 2020, due 2020, issued 2019"),
            Some("2020".to_string())
        );
        // Tie: latest wins.
        assert_eq!(year_hint_from_text("2018 and 2021"), Some("2021".to_string()));
        assert_eq!(year_hint_from_text("no years, just 123456"), None);
    }

    #[test]
    fn test_excerpt_short_text_unchanged() {
        assert_eq!(content_excerpt("  short doc  "), "short doc");
    }

    #[test]
    fn test_excerpt_keeps_head_and_tail() {
        let body = "x".repeat(30_000);
        let text = format!("HEAD-MARKER {body} TAIL-MARKER");
        let excerpt = content_excerpt(&text);
        assert!(excerpt.starts_with("HEAD-MARKER"));
        assert!(excerpt.ends_with("TAIL-MARKER"));
        assert!(excerpt.chars().count() < text.chars().count());
    }

    #[test]
    fn test_excerpt_rescues_evidence_lines() {
        let filler = "lorem ipsum dolor\n".repeat(1500);
        let text = format!("{filler}\nTotale fattura: 225,58 €\nIBAN IT60X0542811101000000123456\n");
        let excerpt = content_excerpt(&text);
        // The trailing lines are in the tail window already; force them out.
        let text = format!("start\nTotale fattura: 999,99 €\n{filler}");
        let excerpt2 = content_excerpt(&text);
        assert!(excerpt2.contains("Totale fattura: 999,99 €"));
        assert!(excerpt.contains("KEY LINES:") || excerpt.contains("225,58"));
    }

    #[test]
    fn test_facts_json_round_trip() {
        let facts = Facts {
            doc_type: Some("bolletta".into()),
            organizations: vec!["Enel".into()],
            date_candidates: vec![DateCandidate {
                year: "2021".into(),
                kind: "reference".into(),
                confidence: 0.9,
                source: Some("content".into()),
            }],
            ..Facts::default()
        };
        let json = facts.to_json().unwrap();
        assert_eq!(Facts::from_json(&json), Some(facts));
    }

    fn parsed_attempt(conf: Option<f64>, summary_len: usize, with_type: bool) -> FactsAttempt {
        FactsAttempt {
            parsed: Some(ParsedFacts {
                facts: Facts {
                    doc_type: with_type.then(|| "bill".to_string()),
                    purpose: with_type.then(|| "electricity bill".to_string()),
                    ..Facts::default()
                },
                summary_long: Some("s".repeat(summary_len)),
                confidence: conf,
                skip_reason: None,
            }),
            model: "fast".into(),
            llm_time_s: 0.1,
            raw_output: None,
            error: None,
        }
    }

    #[test]
    fn test_needs_deep_triggers() {
        let strong = parsed_attempt(Some(0.9), 400, true);
        assert!(!needs_deep(&strong, Some("text")));
        // OCR-sourced content always escalates.
        assert!(needs_deep(&strong, Some("ocr")));
        assert!(needs_deep(&parsed_attempt(Some(0.4), 400, true), Some("text")));
        assert!(needs_deep(&parsed_attempt(None, 400, true), Some("text")));
        assert!(needs_deep(&parsed_attempt(Some(0.9), 50, true), Some("text")));
        assert!(needs_deep(&parsed_attempt(Some(0.9), 400, false), Some("text")));
        let unparsed = FactsAttempt {
            parsed: None,
            model: "fast".into(),
            llm_time_s: 0.1,
            raw_output: Some("junk".into()),
            error: None,
        };
        assert!(needs_deep(&unparsed, Some("text")));
    }

    #[test]
    fn test_coerce_date_candidates_filters_bad_years() {
        let value: serde_json::Value = serde_json::json!([
            {"year": "2021", "type": "reference", "confidence": 0.8},
            {"year": "banana", "type": "reference", "confidence": 0.8},
            {"year": 2019, "type": "weird"},
        ]);
        let out = coerce_date_candidates(Some(&value));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].year, "2021");
        assert_eq!(out[1].year, "2019");
        assert_eq!(out[1].kind, "other");
        assert!((out[1].confidence - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_facts_failure_retries_across_fallbacks() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"electricity bill from Enel for 2021").unwrap();

        // Accepts and immediately drops every connection, so each model
        // attempt fails.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            loop {
                let Ok((sock, _)) = listener.accept().await else { break };
                counter.fetch_add(1, Ordering::SeqCst);
                drop(sock);
            }
        });

        let mut config = AppConfig::default();
        config.ai_engine.models.text_fast = "fast-model".to_string();
        // Same deep model, so the run stays within the fast candidate chain.
        config.ai_engine.models.text_deep = "fast-model".to_string();
        config.ai_engine.models.fallbacks = vec!["fb-one".to_string(), "fb-two".to_string()];
        let ollama = OllamaClient::new(&format!("http://{addr}")).unwrap();

        let item = WorkItem::new(path, crate::item::FileKind::Txt, 1, String::new());
        let out = extract_facts_item(&item, &config, &ollama).await;

        assert_eq!(out.status, ItemStatus::Error);
        assert!(out.reason.as_deref().is_some_and(|r| r.starts_with("Ollama error")));
        assert!(
            hits.load(Ordering::SeqCst) >= 3,
            "primary and both fallbacks should be attempted"
        );
    }

    #[tokio::test]
    async fn test_non_startable_item_passes_through() {
        let item = WorkItem {
            status: ItemStatus::Moved,
            ..WorkItem::new(PathBuf::from("/x/a.pdf"), crate::item::FileKind::Pdf, 1, String::new())
        };
        let config = AppConfig::default();
        let ollama = OllamaClient::new("http://127.0.0.1:9").unwrap();
        let out = extract_facts_item(&item, &config, &ollama).await;
        assert_eq!(out.status, ItemStatus::Moved);
    }
}
