// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 shoebox contributors

//! Image extraction: caption first, OCR when it looks like a document
//!
//! The vision model is cheap relative to a full OCR sweep, so every image
//! gets a caption first. Only when the caption suggests a scanned or
//! photographed document (or captioning failed outright) does OCR run.
//! Low-signal OCR output is discarded so photo noise never reaches the
//! facts stage.

use base64::Engine;
use std::path::Path;
use std::time::{Duration, Instant};

use super::ocr;
use super::{truncate_chars, Extraction, MAX_CHARS};
use crate::config::AppConfig;
use crate::ollama::OllamaClient;
use crate::prompts;

/// Caption keywords suggesting a scanned document rather than a photo.
const DOCUMENT_KEYWORDS: &[&str] = &[
    "document", "documento", "paper", "carta", "letter", "lettera",
    "invoice", "fattura", "receipt", "ricevuta", "bill", "bolletta",
    "contract", "contratto", "form", "modulo", "certificate", "certificato",
    "statement", "estratto", "report", "rapporto", "notice", "avviso",
    "text", "testo", "printed", "stampato", "typed", "dattiloscritto",
    "handwritten", "manoscritto", "scan", "scansione", "page", "pagina",
    "table", "tabella", "spreadsheet", "foglio", "official", "ufficiale",
    "signature", "firma", "stamp", "timbro", "header", "intestazione",
    "letterhead", "memo", "memorandum", "pdf",
];

fn caption_indicates_document(caption: &str) -> bool {
    let lower = caption.to_lowercase();
    DOCUMENT_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// OCR output below this score and length is treated as photo noise.
const MIN_OCR_SCORE: f64 = 40.0;
const MIN_OCR_LEN: usize = 120;

async fn caption(path: &Path, config: &AppConfig, ollama: &OllamaClient) -> Option<String> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "image unreadable");
            return None;
        }
    };
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    let prompt = prompts::image_caption_prompt(&config.language);
    let models = crate::ollama::model_candidates(
        &config.ai_engine.models.vision,
        &config.ai_engine.models.vision_fallbacks,
    );
    let outcome = ollama
        .generate_with_image_fallbacks(
            &models,
            &prompt,
            &encoded,
            Duration::from_secs(config.ai_engine.heavy_timeout_secs),
        )
        .await;
    if let Some(error) = outcome.error {
        tracing::debug!(path = %path.display(), error, "caption failed");
        return None;
    }
    let text = outcome.text.trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

async fn gated_ocr(path: &Path, config: &AppConfig) -> Option<ocr::OcrOutcome> {
    let profile = config.extraction.ocr_profile;
    let deadline = Instant::now() + ocr::params(profile).image_budget;
    let outcome = ocr::ocr_image(path, profile, deadline).await?;
    if outcome.score < MIN_OCR_SCORE && outcome.text.chars().count() < MIN_OCR_LEN {
        tracing::debug!(path = %path.display(), score = outcome.score, "discarding low-signal OCR");
        return None;
    }
    Some(outcome)
}

/// Extract content from an image: OCR text when it reads like a document,
/// otherwise the vision caption tagged with an `IMAGE_CAPTION:` prefix.
pub async fn extract_image(path: &Path, config: &AppConfig, ollama: &OllamaClient) -> Extraction {
    let t0 = Instant::now();
    let profile = config.extraction.ocr_profile;
    let mode = format!("{profile:?}").to_lowercase();

    let Some(caption) = caption(path, config, ollama).await else {
        // No caption: OCR is the last chance, the image may still be a scan.
        if let Some(outcome) = gated_ocr(path, config).await {
            return Extraction {
                text: Some(truncate_chars(&outcome.text, MAX_CHARS)),
                method: Some("ocr".to_string()),
                extract_time_s: t0.elapsed().as_secs_f64(),
                ocr_time_s: Some(outcome.ocr_time_s),
                ocr_mode: Some(mode),
                ..Extraction::default()
            };
        }
        return Extraction::failed(
            "Vision caption failed and OCR found no text",
            t0.elapsed().as_secs_f64(),
        );
    };

    if caption_indicates_document(&caption) {
        if let Some(outcome) = gated_ocr(path, config).await {
            return Extraction {
                text: Some(truncate_chars(&outcome.text, MAX_CHARS)),
                method: Some("vision+ocr".to_string()),
                extract_time_s: t0.elapsed().as_secs_f64(),
                ocr_time_s: Some(outcome.ocr_time_s),
                ocr_mode: Some(mode),
                ..Extraction::default()
            };
        }
    }

    Extraction {
        text: Some(truncate_chars(&format!("IMAGE_CAPTION: {caption}"), MAX_CHARS)),
        method: Some("vision".to_string()),
        extract_time_s: t0.elapsed().as_secs_f64(),
        ..Extraction::default()
    }
}
