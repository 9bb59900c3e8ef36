// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 shoebox contributors

//! Classification and naming stage
//!
//! Phase 2: scanned items go to the model in chunks, described by their
//! extracted facts rather than raw content. Every model answer is then
//! post-processed deterministically: category checked against the
//! taxonomy (with a keyword-repair fallback), year checked against the
//! evidence, and low-signal names rebuilt from the facts.

use serde_json::json;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::AppConfig;
use crate::facts::Facts;
use crate::item::{ItemStatus, WorkItem};
use crate::naming::{
    ensure_extension, name_token_count, normalize_separators, propose_name_from_facts,
    sanitize_name, short_entity, tokenize_for_match, Separator,
};
use crate::ollama::OllamaClient;
use crate::parse::{coerce_f64, coerce_string, extract_json_any, is_year};
use crate::prompts;
use crate::taxonomy::Taxonomy;

/// Items per model call.
pub const CHUNK_SIZE: usize = 25;

/// Minimum keyword score for the deterministic category repair.
const REPAIR_MIN_SCORE: f64 = 3.0;
/// Minimum lead over the runner-up category.
const REPAIR_MIN_MARGIN: f64 = 1.0;

/// One model answer row, post-processed and ready to apply.
#[derive(Debug, Clone)]
pub struct RowUpdate {
    pub category: String,
    pub reference_year: Option<String>,
    pub proposed_name: String,
    pub summary: Option<String>,
    pub confidence: Option<f64>,
}

/// Result of classifying one chunk.
pub struct ChunkOutcome {
    /// Updates keyed by the item's path string.
    pub by_path: HashMap<String, RowUpdate>,
    pub model: String,
    pub llm_time_s: f64,
    /// Chunk-level failure (model error or unparseable reply). When set,
    /// every item of the chunk is marked errored by the caller.
    pub error: Option<String>,
    /// Truncated model output kept when the reply was unparseable.
    pub raw_output: Option<String>,
}

/// Map facts to a taxonomy category without a model: user taxonomy
/// descriptions and examples act as the keyword signal. Phrase hits
/// weigh 3, token hits 1; the winner needs a score of at least 3 and a
/// clear margin over the runner-up.
pub fn category_repair(
    taxonomy: &Taxonomy,
    summary_long: Option<&str>,
    facts: &Facts,
) -> Option<String> {
    let mut fields: Vec<String> = Vec::new();
    if let Some(doc_type) = &facts.doc_type {
        fields.push(doc_type.clone());
    }
    fields.extend(facts.tags.iter().cloned());
    if !facts.people.is_empty() {
        fields.push("people".to_string());
    }
    if !facts.organizations.is_empty() {
        fields.push("organization".to_string());
    }
    if let Some(s) = summary_long {
        if !s.trim().is_empty() {
            fields.push(s.to_string());
        }
    }
    let haystack = fields.join(" ");
    if haystack.trim().is_empty() {
        return None;
    }

    let tokens: std::collections::HashSet<String> =
        tokenize_for_match(&haystack).into_iter().collect();
    let haystack_l = haystack.to_lowercase();

    let mut scored: Vec<(f64, &str)> = Vec::new();
    for cat in &taxonomy.categories {
        if cat.name == "unknown" {
            continue;
        }
        let mut phrases: Vec<&str> = vec![cat.name.as_str()];
        if !cat.description.is_empty() {
            phrases.push(cat.description.as_str());
        }
        phrases.extend(cat.examples.iter().map(String::as_str));

        let mut score = 0.0;
        for phrase in phrases {
            let p = phrase.trim().to_lowercase();
            if p.is_empty() {
                continue;
            }
            if p.chars().count() >= 6 && haystack_l.contains(&p) {
                score += 3.0;
                continue;
            }
            for tok in tokenize_for_match(&p) {
                if tokens.contains(&tok) {
                    score += 1.0;
                }
            }
        }
        if score > 0.0 {
            scored.push((score, cat.name.as_str()));
        }
    }

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    let (best_score, best_cat) = *scored.first()?;
    let second_score = scored.get(1).map(|s| s.0).unwrap_or(0.0);
    if best_score < REPAIR_MIN_SCORE || best_score - second_score < REPAIR_MIN_MARGIN {
        return None;
    }
    Some(best_cat.to_string())
}

/// Whether `year` occurs in `text` as a standalone digit run.
fn contains_year_token(text: &str, year: &str) -> bool {
    let bytes: Vec<char> = text.chars().collect();
    let target: Vec<char> = year.chars().collect();
    let n = target.len();
    if n == 0 || bytes.len() < n {
        return false;
    }
    for i in 0..=bytes.len() - n {
        if bytes[i..i + n] != target[..] {
            continue;
        }
        let before_ok = i == 0 || !bytes[i - 1].is_ascii_digit();
        let after_ok = i + n == bytes.len() || !bytes[i + n].is_ascii_digit();
        if before_ok && after_ok {
            return true;
        }
    }
    false
}

/// Best evidenced year: date candidates first (confidence-scored, with a
/// bonus for reference dates), then the phase-1 hints, then any year in
/// the summary or the proposed name.
pub fn best_year_from_facts(
    facts: &Facts,
    summary_long: Option<&str>,
    proposed_name: Option<&str>,
) -> Option<String> {
    let mut best: Option<(f64, &str)> = None;
    for c in &facts.date_candidates {
        let year = c.year.trim();
        if !is_year(year) {
            continue;
        }
        let mut score = c.confidence;
        if c.kind.trim().eq_ignore_ascii_case("reference") {
            score += 0.2;
        }
        if best.map_or(true, |(s, _)| score > s) {
            best = Some((score, year));
        }
    }
    if let Some((_, year)) = best {
        return Some(year.to_string());
    }

    for hint in [&facts.year_hint_text, &facts.year_hint_filename] {
        if let Some(v) = hint {
            let v = v.trim();
            if is_year(v) {
                return Some(v.to_string());
            }
        }
    }

    for text in [summary_long.unwrap_or(""), proposed_name.unwrap_or("")] {
        for token in text.split(|c: char| !c.is_ascii_digit()) {
            if is_year(token) {
                return Some(token.to_string());
            }
        }
    }

    None
}

fn parse_item_facts(item: &WorkItem) -> Facts {
    item.facts_json
        .as_deref()
        .and_then(Facts::from_json)
        .unwrap_or_default()
}

/// Post-process one model row into a final update for `item`.
fn finish_row(
    category: Option<String>,
    year: Option<String>,
    name: Option<String>,
    summary: Option<String>,
    confidence: Option<f64>,
    item: &WorkItem,
    taxonomy: &Taxonomy,
    sep: Separator,
) -> RowUpdate {
    let facts = parse_item_facts(item);
    let original_name = item.file_name();

    let mut category = match category {
        Some(c) if taxonomy.contains(&c) => c,
        _ => "unknown".to_string(),
    };
    if category == "unknown" {
        if let Some(repaired) = category_repair(taxonomy, item.summary_long.as_deref(), &facts) {
            if taxonomy.contains(&repaired) {
                category = repaired;
            }
        }
    }

    let mut year = year.filter(|y| is_year(y.trim())).map(|y| y.trim().to_string());

    let mut name = match name {
        Some(n) if !n.trim().is_empty() => n.trim().to_string(),
        _ => original_name.clone(),
    };
    name = ensure_extension(&sanitize_name(&name), &original_name);
    name = normalize_separators(&name, sep);

    let derived_year = best_year_from_facts(&facts, item.summary_long.as_deref(), Some(&name));

    if year.is_none() {
        year = derived_year.clone();
    } else if let (Some(y), Some(d)) = (&year, &derived_year) {
        if y != d {
            let evidence = format!("{} {}", item.summary_long.as_deref().unwrap_or(""), name);
            let has_year = contains_year_token(&evidence, y);
            let has_derived = contains_year_token(&evidence, d);
            let model_implausible = y.parse::<i32>().map_or(false, |v| v < 1950)
                && d.parse::<i32>().map_or(false, |v| v >= 1950);
            if (!has_year && has_derived) || model_implausible {
                year = derived_year.clone();
            }
        }
    }

    // Rebuild the name when the model's is low-signal or misses the
    // leading organization.
    if item.summary_long.is_some() {
        let org_hint = facts
            .organizations
            .first()
            .map(|o| short_entity(o))
            .unwrap_or_default();
        let stem_len = std::path::Path::new(&name)
            .file_stem()
            .map(|s| s.to_string_lossy().chars().count())
            .unwrap_or(0);
        let low_signal = stem_len < 18 || name_token_count(&name) < 4;
        let missing_entity = !org_hint.is_empty()
            && org_hint
                .split_whitespace()
                .next()
                .map_or(false, |w| !name.to_lowercase().contains(&w.to_lowercase()));
        if low_signal || missing_entity {
            if let Some(better) = propose_name_from_facts(
                item.summary_long.as_deref(),
                &facts,
                year.as_deref(),
                &original_name,
                sep,
            ) {
                name = better;
            }
        }
    }

    RowUpdate {
        category,
        reference_year: year,
        proposed_name: name,
        summary: summary
            .map(|s| s.trim().chars().take(200).collect::<String>())
            .filter(|s| !s.is_empty()),
        confidence,
    }
}

fn payload_for(item: &WorkItem) -> serde_json::Value {
    let mut facts = parse_item_facts(item);
    // Purpose stays in the cache but must not steer classification.
    facts.purpose = None;
    json!({
        "path": item.path.to_string_lossy(),
        "kind": item.kind,
        "summary_long": item.summary_long,
        "facts": facts,
        "current": {
            "category": item.category,
            "reference_year": item.reference_year,
            "proposed_name": item.proposed_name,
        },
    })
}

/// Classify one chunk of scanned items with a single model call.
pub async fn classify_chunk(
    batch: &[WorkItem],
    config: &AppConfig,
    ollama: &OllamaClient,
    taxonomy: &Taxonomy,
    models: &[String],
) -> ChunkOutcome {
    let sep = config.rules.separator;
    let payload: Vec<serde_json::Value> = batch.iter().map(payload_for).collect();
    let payload_json = serde_json::to_string(&payload).unwrap_or_else(|_| "[]".to_string());

    let prompt = prompts::classify_batch_prompt(
        &taxonomy.allowed_names(),
        &taxonomy.to_prompt_block(),
        sep.description(),
        &payload_json,
        &config.language,
    );

    let t0 = Instant::now();
    let outcome = ollama
        .generate_with_fallbacks(
            models,
            &prompt,
            Duration::from_secs(config.ai_engine.heavy_timeout_secs),
        )
        .await;
    let llm_time_s = t0.elapsed().as_secs_f64();

    if let Some(error) = outcome.error {
        return ChunkOutcome {
            by_path: HashMap::new(),
            model: outcome.model,
            llm_time_s,
            error: Some(format!("Ollama error: {error}")),
            raw_output: None,
        };
    }

    let Some(serde_json::Value::Array(rows)) = extract_json_any(&outcome.text) else {
        return ChunkOutcome {
            by_path: HashMap::new(),
            model: outcome.model.clone(),
            llm_time_s,
            error: Some("Unparseable output (JSON list)".to_string()),
            raw_output: Some(crate::parse::truncate_raw_output(&outcome.text)),
        };
    };

    let by_input: HashMap<String, &WorkItem> = batch
        .iter()
        .map(|it| (it.path.to_string_lossy().to_string(), it))
        .collect();

    let mut by_path: HashMap<String, RowUpdate> = HashMap::new();
    let mut fallback_row: Option<&serde_json::Map<String, serde_json::Value>> = None;

    for row in &rows {
        let Some(map) = row.as_object() else { continue };
        let path = coerce_string(map.get("path"));
        let Some(path) = path else {
            // Some models drop the path; recoverable only for a 1-item chunk.
            if batch.len() == 1 && fallback_row.is_none() {
                fallback_row = Some(map);
            }
            continue;
        };
        let Some(item) = by_input.get(&path) else {
            if batch.len() == 1 && fallback_row.is_none() {
                fallback_row = Some(map);
            }
            continue;
        };
        let update = finish_row(
            coerce_string(map.get("category")),
            coerce_string(map.get("reference_year")),
            coerce_string(map.get("proposed_name")),
            coerce_string(map.get("summary")),
            coerce_f64(map.get("confidence")),
            item,
            taxonomy,
            sep,
        );
        by_path.insert(path, update);
    }

    if batch.len() == 1 && by_path.is_empty() {
        if let Some(map) = fallback_row {
            let item = &batch[0];
            let path = item.path.to_string_lossy().to_string();
            let update = finish_row(
                coerce_string(map.get("category")),
                coerce_string(map.get("reference_year")),
                coerce_string(map.get("proposed_name")),
                coerce_string(map.get("summary")),
                coerce_f64(map.get("confidence")),
                item,
                taxonomy,
                sep,
            );
            by_path.insert(path, update);
        }
    }

    ChunkOutcome {
        by_path,
        model: outcome.model,
        llm_time_s,
        error: None,
        raw_output: None,
    }
}

/// Apply a finished row to a scanned item, producing the classified record.
pub fn apply_update(item: &WorkItem, update: &RowUpdate, model: &str, llm_time_s: f64) -> WorkItem {
    WorkItem {
        status: ItemStatus::Classified,
        reason: None,
        category: Some(update.category.clone()),
        reference_year: update.reference_year.clone(),
        proposed_name: Some(update.proposed_name.clone()),
        summary: update.summary.clone(),
        confidence: update.confidence.or(item.confidence),
        classify_model: Some(model.to_string()),
        classify_llm_time_s: Some(llm_time_s),
        ..item.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::DateCandidate;
    use crate::taxonomy::{parse_taxonomy_lines, Taxonomy};
    use std::path::PathBuf;

    fn taxonomy() -> Taxonomy {
        let (tax, _) = parse_taxonomy_lines(&[
            "house | home utilities and contracts | electricity bill; gas bill; rent contract",
            "banking | accounts and cards | bank statement; estratto conto",
            "travel | trips and bookings | hotel booking; flight ticket",
        ]);
        tax
    }

    fn scanned_item(name: &str, facts: &Facts, summary_long: &str) -> WorkItem {
        let mut item = WorkItem::new(
            PathBuf::from(format!("/docs/{name}")),
            crate::item::FileKind::Pdf,
            100,
            "2024-01-01T00:00:00".to_string(),
        );
        item.status = ItemStatus::Scanned;
        item.summary_long = Some(summary_long.to_string());
        item.facts_json = facts.to_json().ok();
        item
    }

    #[test]
    fn test_category_repair_clear_winner() {
        let facts = Facts {
            doc_type: Some("electricity bill".into()),
            tags: vec!["utilities".into()],
            ..Facts::default()
        };
        let repaired = category_repair(&taxonomy(), Some("Monthly electricity bill from Enel"), &facts);
        assert_eq!(repaired.as_deref(), Some("house"));
    }

    #[test]
    fn test_category_repair_needs_margin() {
        // Signal hitting two categories equally stays ambiguous.
        let facts = Facts {
            doc_type: Some("bill statement booking".into()),
            ..Facts::default()
        };
        let repaired = category_repair(
            &taxonomy(),
            Some("bank statement and hotel booking together"),
            &facts,
        );
        assert!(repaired.is_none());
    }

    #[test]
    fn test_best_year_prefers_reference_candidates() {
        let facts = Facts {
            date_candidates: vec![
                DateCandidate { year: "2019".into(), kind: "production".into(), confidence: 0.9, source: None },
                DateCandidate { year: "2021".into(), kind: "reference".into(), confidence: 0.8, source: None },
            ],
            year_hint_text: Some("2015".into()),
            ..Facts::default()
        };
        // 0.8 plus the reference bonus outranks the 0.9 production candidate.
        assert_eq!(best_year_from_facts(&facts, None, None), Some("2021".to_string()));
    }

    #[test]
    fn test_best_year_falls_back_to_hints_then_text() {
        let facts = Facts {
            year_hint_text: Some("2018".into()),
            year_hint_filename: Some("2017".into()),
            ..Facts::default()
        };
        assert_eq!(best_year_from_facts(&facts, None, None), Some("2018".to_string()));
        let empty = Facts::default();
        assert_eq!(
            best_year_from_facts(&empty, Some("paid in 2020"), None),
            Some("2020".to_string())
        );
        assert_eq!(best_year_from_facts(&empty, None, None), None);
    }

    #[tokio::test]
    async fn test_classify_chunk_retries_across_fallbacks() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        // Accepts and immediately drops every connection.
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

        let config = AppConfig::default();
        let ollama = OllamaClient::new(&format!("http://{addr}")).unwrap();
        let item = scanned_item("a.pdf", &Facts::default(), "some document");
        let models = vec!["primary".to_string(), "fallback".to_string()];

        let outcome = classify_chunk(&[item], &config, &ollama, &taxonomy(), &models).await;

        assert!(outcome.error.as_deref().is_some_and(|e| e.starts_with("Ollama error")));
        assert_eq!(outcome.model, "fallback");
        assert!(hits.load(Ordering::SeqCst) >= 2, "both candidates should be attempted");
    }

    #[test]
    fn test_finish_row_rejects_unknown_category_and_repairs() {
        let facts = Facts {
            doc_type: Some("electricity bill".into()),
            organizations: vec!["Enel Energia".into()],
            ..Facts::default()
        };
        let item = scanned_item("scan.pdf", &facts, "Electricity bill from Enel Energia for 2021");
        let update = finish_row(
            Some("made-up-category".into()),
            None,
            Some("Enel Energia electricity bill march period 2021".into()),
            Some("a bill".into()),
            Some(0.8),
            &item,
            &taxonomy(),
            Separator::Space,
        );
        assert_eq!(update.category, "house");
        assert_eq!(update.reference_year.as_deref(), Some("2021"));
        assert!(update.proposed_name.ends_with(".pdf"));
    }

    #[test]
    fn test_finish_row_prefers_evidenced_year() {
        let facts = Facts {
            date_candidates: vec![DateCandidate {
                year: "2021".into(),
                kind: "reference".into(),
                confidence: 0.9,
                source: None,
            }],
            ..Facts::default()
        };
        let item = scanned_item("bill.pdf", &facts, "Bill for the year 2021 from Enel");
        // Model invents 1899; the derived year is evidenced, the model's is not.
        let update = finish_row(
            Some("house".into()),
            Some("1899".into()),
            Some("Enel electricity bill for supply in march period".into()),
            None,
            None,
            &item,
            &taxonomy(),
            Separator::Space,
        );
        assert_eq!(update.reference_year.as_deref(), Some("2021"));
    }

    #[test]
    fn test_finish_row_rebuilds_low_signal_name() {
        let facts = Facts {
            doc_type: Some("electricity bill".into()),
            organizations: vec!["Dolomiti Energia S.p.A.".into()],
            ..Facts::default()
        };
        let item = scanned_item(
            "scan001.pdf",
            &facts,
            "Electricity bill issued on 17.03.2020 by Dolomiti Energia, total 225,58 €",
        );
        let update = finish_row(
            Some("house".into()),
            Some("2020".into()),
            Some("doc.pdf".into()),
            None,
            None,
            &item,
            &taxonomy(),
            Separator::Space,
        );
        assert!(update.proposed_name.contains("Dolomiti"));
        assert!(update.proposed_name.to_lowercase().contains("electricity"));
    }

    #[test]
    fn test_contains_year_token() {
        assert!(contains_year_token("paid 2021 in full", "2021"));
        assert!(!contains_year_token("phone 32021", "2021"));
        assert!(!contains_year_token("nothing", "2021"));
    }

    #[test]
    fn test_apply_update_sets_classified() {
        let item = scanned_item("a.pdf", &Facts::default(), "summary");
        let update = RowUpdate {
            category: "banking".into(),
            reference_year: Some("2020".into()),
            proposed_name: "statement march 2020.pdf".into(),
            summary: Some("short".into()),
            confidence: Some(0.7),
        };
        let out = apply_update(&item, &update, "qwen2.5:7b-instruct", 1.5);
        assert_eq!(out.status, ItemStatus::Classified);
        assert_eq!(out.category.as_deref(), Some("banking"));
        assert_eq!(out.classify_model.as_deref(), Some("qwen2.5:7b-instruct"));
        // Facts survive classification.
        assert!(out.facts_json.is_some());
    }
}
