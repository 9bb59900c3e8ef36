// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 shoebox contributors

//! Filename sanitation and deterministic name proposals
//!
//! Everything here is pure string work: cleaning model-proposed names,
//! normalizing separators, and rebuilding a descriptive filename from
//! extracted facts when the model output is low-signal.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;

use crate::facts::Facts;
use crate::parse::is_year;

/// The configured word separator for proposed filenames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Separator {
    #[default]
    Space,
    Underscore,
    Dash,
}

impl Separator {
    pub fn as_char(&self) -> char {
        match self {
            Self::Space => ' ',
            Self::Underscore => '_',
            Self::Dash => '-',
        }
    }

    /// Human description used inside prompts ("spaces", "underscores", ...).
    pub fn description(&self) -> &'static str {
        match self {
            Self::Space => "spaces",
            Self::Underscore => "underscores",
            Self::Dash => "dashes",
        }
    }
}

/// Generic low-signal words stripped from model-proposed names.
const GENERIC_NAME_TOKENS: &[&str] = &[
    "this", "document", "doc", "file", "text", "image", "photo", "picture", "scan",
    "scanned", "documento", "immagine", "foto", "testo", "scansione",
];

/// Stopwords filtered when deriving names from summaries (English + Italian).
const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "of", "to", "for", "in", "on", "with", "by", "from",
    "il", "lo", "la", "i", "gli", "le", "un", "uno", "una", "e", "o", "di", "da", "del",
    "della", "dei", "delle", "al", "alla", "alle", "agli", "per", "con", "su", "nel",
    "nella", "nelle", "all", "this", "document", "doc", "file", "text", "image", "photo",
    "picture", "scan", "scanned", "documento", "immagine", "foto", "testo", "scansione",
];

/// Short words that must not be merged into a following token during repair.
const JOIN_BLOCKLIST: &[&str] = &[
    "of", "the", "and", "or", "di", "da", "del", "della", "dei", "delle",
];

/// Company legal-form suffixes dropped when shortening entity names.
const LEGAL_SUFFIX_TOKENS: &[&str] = &[
    "sp", "spa", "srl", "sa", "sas", "llc", "inc", "ltd", "gmbh",
];

fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word.to_lowercase().as_str())
}

fn is_generic(word: &str) -> bool {
    GENERIC_NAME_TOKENS.contains(&word.to_lowercase().as_str())
}

fn illegal_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"[\\/:*?"<>|]"#).expect("valid regex"))
}

fn spaces_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

const MAX_NAME_LEN: usize = 180;

/// Remove path-illegal characters and collapse whitespace. Idempotent.
pub fn sanitize_name(name: &str) -> String {
    let text = illegal_re().replace_all(name.trim(), " ");
    let text = spaces_re().replace_all(&text, " ");
    let text = text.trim();
    text.chars().take(MAX_NAME_LEN).collect::<String>().trim().to_string()
}

fn stem_of(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| name.to_string())
}

fn ext_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default()
}

/// Split into tokens on whitespace/underscore/dash, dropping illegal chars.
pub fn split_tokens(text: &str) -> Vec<String> {
    text.trim()
        .split(|c: char| c.is_whitespace() || c == '_' || c == '-')
        .filter(|t| !t.is_empty())
        .filter_map(|t| {
            let cleaned = illegal_re().replace_all(t, " ").trim().to_string();
            if cleaned.is_empty() {
                None
            } else {
                Some(cleaned)
            }
        })
        .collect()
}

/// Split a stem into tokens and repair common OCR/separator artifacts by
/// joining a short leading fragment onto a lowercase continuation
/// ("Mi iti" -> "Miiti").
pub fn split_and_repair_tokens(stem: &str) -> Vec<String> {
    let mut tokens = split_tokens(stem);
    let mut i = 0;
    while i + 1 < tokens.len() {
        let a = tokens[i].clone();
        let b = tokens[i + 1].clone();
        let a_alpha = a.chars().all(|c| c.is_alphabetic());
        let b_alpha = b.chars().all(|c| c.is_alphabetic());
        let b_lower_start = b.chars().next().map(|c| c.is_lowercase()).unwrap_or(false);
        if a_alpha
            && b_alpha
            && b_lower_start
            && a.chars().count() <= 2
            && !JOIN_BLOCKLIST.contains(&a.to_lowercase().as_str())
        {
            tokens[i] = format!("{a}{b}");
            tokens.remove(i + 1);
            continue;
        }
        i += 1;
    }
    tokens
}

/// Normalize word separators in a filename to the desired separator.
pub fn normalize_separators(name: &str, sep: Separator) -> String {
    let stem = stem_of(name);
    let ext = ext_of(name);
    let tokens = split_and_repair_tokens(&stem);
    if tokens.is_empty() {
        return format!("{}{}", sanitize_name(&stem), ext);
    }
    let joined = tokens.join(&sep.as_char().to_string());
    format!("{}{}", sanitize_name(&joined), ext)
}

/// Ensure the proposed name carries the original file's extension.
pub fn ensure_extension(proposed_name: &str, original_filename: &str) -> String {
    let original_ext = ext_of(original_filename);
    if original_ext.is_empty() {
        return proposed_name.to_string();
    }
    if proposed_name.to_lowercase().ends_with(&original_ext.to_lowercase()) {
        return proposed_name.to_string();
    }
    format!("{}{}", proposed_name.trim_end_matches('.'), original_ext)
}

/// Remove generic filler words from a model-proposed name; falls back to the
/// original stem when nothing meaningful is left.
pub fn cleanup_generic_words(proposed_name: &str, original_filename: &str) -> String {
    let ext = {
        let e = ext_of(proposed_name);
        if e.is_empty() {
            ext_of(original_filename)
        } else {
            e
        }
    };
    let stem = stem_of(proposed_name);
    let cleaned: Vec<String> = split_and_repair_tokens(&stem)
        .into_iter()
        .filter(|t| !is_generic(t))
        .collect();
    if cleaned.is_empty() {
        return format!("{}{}", sanitize_name(&stem_of(original_filename)), ext);
    }
    format!("{}{}", sanitize_name(&cleaned.join(" ")), ext)
}

/// Count meaningful tokens in a filename stem.
pub fn name_token_count(name: &str) -> usize {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"[A-Za-zÀ-ÖØ-öø-ÿ0-9]+").expect("valid regex"));
    re.find_iter(&stem_of(name)).count()
}

/// Tokenize for fuzzy category matching: lowercase, punctuation-free,
/// minimum length 3 (digits always kept).
pub fn tokenize_for_match(text: &str) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"[^\w\sÀ-ÖØ-öø-ÿ]").expect("valid regex"));
    let lowered = text.to_lowercase();
    let t = re.replace_all(&lowered, " ");
    t.split_whitespace()
        .filter(|p| p.chars().count() >= 3 || p.chars().all(|c| c.is_ascii_digit()))
        .map(String::from)
        .collect()
}

fn legal_suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(s\.?p\.?a\.?|s\.?r\.?l\.?|srl|spa|inc\.?|llc|ltd\.?|gmbh|s\.?a\.?s\.?)\b")
            .expect("valid regex")
    })
}

/// Shorten an entity name: strip legal suffixes, keep the first three words.
pub fn short_entity(entity: &str) -> String {
    static PUNCT: OnceLock<Regex> = OnceLock::new();
    let punct = PUNCT.get_or_init(|| Regex::new(r"[^\w\sÀ-ÖØ-öø-ÿ]").expect("valid regex"));
    let e = punct.replace_all(entity, " ");
    let e = legal_suffix_re().replace_all(&e, "");
    let parts: Vec<&str> = e
        .split_whitespace()
        .filter(|p| p.chars().count() >= 2)
        .filter(|p| !LEGAL_SUFFIX_TOKENS.contains(&p.to_lowercase().as_str()))
        .take(3)
        .collect();
    parts.join(" ")
}

/// Month names recognized in date tokens (Italian + English).
fn month_number(name: &str) -> Option<u32> {
    let n = match name.to_lowercase().as_str() {
        "gennaio" | "january" => 1,
        "febbraio" | "february" => 2,
        "marzo" | "march" => 3,
        "aprile" | "april" => 4,
        "maggio" | "may" => 5,
        "giugno" | "june" => 6,
        "luglio" | "july" => 7,
        "agosto" | "august" => 8,
        "settembre" | "september" => 9,
        "ottobre" | "october" => 10,
        "novembre" | "november" => 11,
        "dicembre" | "december" => 12,
        _ => return None,
    };
    Some(n)
}

/// Extract a normalized `YYYY-MM-DD` date token from free text.
pub fn extract_date_token(text: &str) -> Option<String> {
    static ISO: OnceLock<Regex> = OnceLock::new();
    static EU: OnceLock<Regex> = OnceLock::new();
    static NAMED: OnceLock<Regex> = OnceLock::new();

    let iso = ISO.get_or_init(|| {
        Regex::new(r"(19\d{2}|20\d{2})-(\d{1,2})-(\d{1,2})").expect("valid regex")
    });
    if let Some(c) = iso.captures(text) {
        let (y, mo, d) = (&c[1], c[2].parse::<u32>().ok()?, c[3].parse::<u32>().ok()?);
        return Some(format!("{y}-{mo:02}-{d:02}"));
    }

    let eu = EU.get_or_init(|| {
        Regex::new(r"(\d{1,2})[./-](\d{1,2})[./-](19\d{2}|20\d{2})").expect("valid regex")
    });
    if let Some(c) = eu.captures(text) {
        let (d, mo, y) = (c[1].parse::<u32>().ok()?, c[2].parse::<u32>().ok()?, &c[3]);
        return Some(format!("{y}-{mo:02}-{d:02}"));
    }

    let named = NAMED.get_or_init(|| {
        Regex::new(r"(?i)(\d{1,2})\s+([A-Za-zÀ-ÖØ-öø-ÿ]+)\s+(19\d{2}|20\d{2})")
            .expect("valid regex")
    });
    if let Some(c) = named.captures(text) {
        let d = c[1].parse::<u32>().ok()?;
        let mo = month_number(&c[2])?;
        let y = &c[3];
        return Some(format!("{y}-{mo:02}-{d:02}"));
    }

    None
}

/// Extract a normalized currency amount ("225.58 EUR") from free text.
pub fn extract_amount_token(text: &str) -> Option<String> {
    static EURO_FIRST: OnceLock<Regex> = OnceLock::new();
    static EURO_LAST: OnceLock<Regex> = OnceLock::new();

    // With a comma decimal, dots are thousands separators; otherwise the
    // dot already is the decimal point.
    let normalize = |raw: &str| {
        if raw.contains(',') {
            raw.replace('.', "").replace(',', ".")
        } else {
            raw.to_string()
        }
    };

    let first = EURO_FIRST.get_or_init(|| {
        Regex::new(r"€\s*([0-9]{1,3}(?:[.,][0-9]{3})*[.,][0-9]{2})").expect("valid regex")
    });
    if let Some(c) = first.captures(text) {
        return Some(format!("{} EUR", normalize(&c[1])));
    }

    let last = EURO_LAST.get_or_init(|| {
        Regex::new(r"(?i)([0-9]{1,3}(?:[.,][0-9]{3})*[.,][0-9]{2})\s*(€|eur|euro)")
            .expect("valid regex")
    });
    if let Some(c) = last.captures(text) {
        return Some(format!("{} EUR", normalize(&c[1])));
    }

    None
}

/// Derive a fallback filename from a short summary when model output is poor.
pub fn fallback_name_from_summary(
    summary: Option<&str>,
    original_filename: &str,
    sep: Separator,
) -> String {
    let stem = stem_of(original_filename);
    let ext = ext_of(original_filename);
    let Some(summary) = summary else {
        return format!("{}{}", sanitize_name(&stem), ext);
    };

    static WORD: OnceLock<Regex> = OnceLock::new();
    let word = WORD.get_or_init(|| Regex::new(r"[A-Za-zÀ-ÖØ-öø-ÿ0-9]+").expect("valid regex"));

    let mut tokens: Vec<&str> = Vec::new();
    for m in word.find_iter(summary) {
        let w = m.as_str();
        if is_stopword(w) || is_year(w) || w.chars().count() <= 2 {
            continue;
        }
        tokens.push(w);
        if tokens.len() >= 10 {
            break;
        }
    }
    if tokens.is_empty() {
        return format!("{}{}", sanitize_name(&stem), ext);
    }
    let name = tokens.join(&sep.as_char().to_string());
    format!("{}{}", sanitize_name(&name), ext)
}

/// Build a descriptive filename from the long summary and extracted facts:
/// document type + shortened entity + date token + amount token, stopword
/// filtered and de-duplicated. Returns None when there is not enough signal.
pub fn propose_name_from_facts(
    summary_long: Option<&str>,
    facts: &Facts,
    reference_year: Option<&str>,
    original_filename: &str,
    sep: Separator,
) -> Option<String> {
    let summary_long = summary_long?;

    static GENERIC_KIND: OnceLock<Regex> = OnceLock::new();
    let generic_kind = GENERIC_KIND.get_or_init(|| {
        Regex::new(r"(?i)\b(document|documento|file|testo|immagine|image|text)\b")
            .expect("valid regex")
    });

    let mut doc_kind = facts.doc_type.clone().unwrap_or_default();
    if doc_kind.trim().is_empty() {
        if let Some(first_tag) = facts.tags.first() {
            doc_kind = first_tag.clone();
        }
    }
    let doc_kind = spaces_re()
        .replace_all(&generic_kind.replace_all(&doc_kind, ""), " ")
        .trim()
        .to_string();

    let entity = facts
        .organizations
        .first()
        .or_else(|| facts.people.first())
        .map(|e| short_entity(e))
        .unwrap_or_default();

    let date_token = extract_date_token(summary_long).or_else(|| {
        reference_year
            .filter(|y| is_year(y))
            .map(String::from)
    });
    let amount_token = extract_amount_token(summary_long);

    let mut pieces: Vec<String> = Vec::new();
    if !doc_kind.is_empty() {
        pieces.extend(split_and_repair_tokens(&doc_kind).into_iter().take(4));
    }
    if !entity.is_empty() {
        pieces.extend(split_and_repair_tokens(&entity).into_iter().take(3));
    }
    if let Some(d) = date_token {
        pieces.push(d);
    }
    if let Some(a) = amount_token {
        pieces.extend(split_and_repair_tokens(&a).into_iter().take(2));
    }

    // De-duplicate while preserving order.
    let mut seen = std::collections::HashSet::new();
    let mut cleaned: Vec<String> = Vec::new();
    for p in pieces {
        let pl = p.to_lowercase();
        if pl.is_empty() || is_stopword(&pl) || is_generic(&pl) {
            continue;
        }
        if !seen.insert(pl) {
            continue;
        }
        cleaned.push(p);
        if cleaned.len() >= 10 {
            break;
        }
    }

    if cleaned.len() < 3 {
        return None;
    }

    let ext = ext_of(original_filename);
    let name = cleaned.join(&sep.as_char().to_string());
    Some(format!("{}{}", sanitize_name(&name), ext))
}
