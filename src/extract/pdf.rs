// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 shoebox contributors

//! PDF text extraction chain
//!
//! Three attempts, cheapest first: the embedded text layer, poppler's
//! `pdftotext`, and finally rasterization with `pdftoppm` plus OCR.

use std::path::Path;
use std::time::{Duration, Instant};

use super::ocr;
use super::{run_tool, scratch_dir, tool_available, truncate_chars, Extraction, MAX_CHARS};
use crate::config::OcrProfile;

/// Extract text from a PDF, falling back to OCR for scanned documents.
pub async fn extract_pdf(path: &Path, profile: OcrProfile, ocr_max_pages: u32) -> Extraction {
    let t0 = Instant::now();

    if let Some(text) = text_layer(path) {
        return Extraction {
            text: Some(text),
            method: Some("text".to_string()),
            extract_time_s: t0.elapsed().as_secs_f64(),
            ..Extraction::default()
        };
    }

    if let Some(text) = pdftotext(path).await {
        return Extraction {
            text: Some(text),
            method: Some("pdftotext".to_string()),
            extract_time_s: t0.elapsed().as_secs_f64(),
            ..Extraction::default()
        };
    }

    if let Some((text, ocr_time_s)) = ocr_pages(path, profile, ocr_max_pages).await {
        return Extraction {
            text: Some(text),
            method: Some("ocr".to_string()),
            extract_time_s: t0.elapsed().as_secs_f64(),
            ocr_time_s: Some(ocr_time_s),
            ocr_mode: Some(format!("{profile:?}").to_lowercase()),
            ..Extraction::default()
        };
    }

    Extraction::failed(
        "No extractable text (install poppler and tesseract for scanned PDFs)",
        t0.elapsed().as_secs_f64(),
    )
}

/// Embedded text layer. The parser is known to panic on malformed files,
/// so the call is isolated behind catch_unwind.
fn text_layer(path: &Path) -> Option<String> {
    let path = path.to_path_buf();
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        pdf_extract::extract_text(&path)
    }));
    let text = match result {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            tracing::debug!(path = %path.display(), error = %e, "text layer extraction failed");
            return None;
        }
        Err(_) => {
            tracing::warn!(path = %path.display(), "text layer parser panicked");
            return None;
        }
    };
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(truncate_chars(text, MAX_CHARS))
    }
}

async fn pdftotext(path: &Path) -> Option<String> {
    if !tool_available("pdftotext") {
        return None;
    }
    let input = path.to_string_lossy().to_string();
    let stdout = run_tool("pdftotext", &[input.as_str(), "-"], Duration::from_secs(15)).await?;
    let text = String::from_utf8_lossy(&stdout);
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(truncate_chars(text, MAX_CHARS))
    }
}

fn page_count(path: &Path) -> Option<usize> {
    lopdf::Document::load(path).ok().map(|d| d.get_pages().len())
}

/// Rasterize the first pages and OCR them under a shared time budget.
async fn ocr_pages(path: &Path, profile: OcrProfile, ocr_max_pages: u32) -> Option<(String, f64)> {
    if !tool_available("tesseract") || !tool_available("pdftoppm") {
        return None;
    }
    let p = ocr::params(profile);
    let pages = p.max_pages.min(ocr_max_pages).max(1);
    let pages = match page_count(path) {
        Some(n) => pages.min(n as u32).max(1),
        None => pages,
    };

    let t0 = Instant::now();
    let deadline = t0 + p.pdf_budget;

    let (_guard, scratch) = scratch_dir("shoebox-pdf").ok()?;
    let prefix = scratch.join("page");
    let input = path.to_string_lossy().to_string();
    let prefix_s = prefix.to_string_lossy().to_string();
    let dpi = p.dpi.to_string();
    let last = pages.to_string();
    run_tool(
        "pdftoppm",
        &["-r", &dpi, "-png", "-f", "1", "-l", &last, input.as_str(), prefix_s.as_str()],
        Duration::from_secs(60),
    )
    .await?;

    // pdftoppm pads page numbers by total page count, glob instead of guessing.
    let mut page_images: Vec<std::path::PathBuf> = std::fs::read_dir(&scratch)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|e| e == "png"))
        .collect();
    page_images.sort();

    let mut parts: Vec<String> = Vec::new();
    for page_image in &page_images {
        if Instant::now() >= deadline {
            break;
        }
        if let Some(outcome) = ocr::ocr_image(page_image, profile, deadline).await {
            if !outcome.text.is_empty() {
                parts.push(outcome.text);
            }
        }
        if parts.iter().map(|p| p.len()).sum::<usize>() >= MAX_CHARS {
            break;
        }
    }

    let joined = parts.join("\n\n");
    let joined = joined.trim();
    if joined.is_empty() {
        return None;
    }
    Some((truncate_chars(joined, MAX_CHARS), t0.elapsed().as_secs_f64()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_garbage_pdf_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"not a pdf at all").unwrap();
        let result = extract_pdf(&path, OcrProfile::Fast, 2).await;
        assert!(result.text.is_none());
        assert!(result.reason.is_some());
    }
}
