// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 shoebox contributors

//! Content extraction
//!
//! One entry point, [`extract_content`], dispatches on file kind. Each
//! extractor is a chain of attempts from cheapest to most expensive;
//! external tools (pdftotext, tesseract, antiword, soffice, unrtf) are
//! probed on PATH and skipped when missing, so the pipeline degrades
//! instead of failing on a lean system.

pub mod image;
pub mod ocr;
pub mod office;
pub mod pdf;
pub mod textish;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use crate::config::AppConfig;
use crate::item::{FileKind, WorkItem};
use crate::ollama::OllamaClient;

/// Character budget for extracted content fed to the model.
pub const MAX_CHARS: usize = 15_000;

/// Outcome of one extraction attempt chain.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Extracted content; None when every method in the chain failed.
    pub text: Option<String>,
    /// Which method produced the text ("text", "pdftotext", "ocr", ...).
    pub method: Option<String>,
    /// Human-readable failure reason when `text` is None.
    pub reason: Option<String>,
    pub extract_time_s: f64,
    pub ocr_time_s: Option<f64>,
    pub ocr_mode: Option<String>,
}

impl Extraction {
    pub fn failed(reason: &str, extract_time_s: f64) -> Self {
        Self {
            reason: Some(reason.to_string()),
            extract_time_s,
            ..Self::default()
        }
    }
}

/// Extract content for a work item, dispatching on its kind.
pub async fn extract_content(
    item: &WorkItem,
    config: &AppConfig,
    ollama: &OllamaClient,
) -> Extraction {
    let profile = config.extraction.ocr_profile;
    match item.kind {
        FileKind::Pdf => pdf::extract_pdf(&item.path, profile, config.extraction.ocr_max_pages).await,
        FileKind::Image => image::extract_image(&item.path, config, ollama).await,
        kind if kind.is_office() => office::extract_office(&item.path, kind).await,
        kind => textish::extract_textish(&item.path, kind).await,
    }
}

/// Truncate on a char boundary to at most `max_chars` characters.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

/// Check whether an external tool is on PATH.
pub(crate) fn tool_available(name: &str) -> bool {
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| {
        let candidate = dir.join(name);
        candidate.is_file()
    })
}

/// Run an external tool with a timeout, returning its stdout on success.
/// Any failure (missing binary, non-zero exit, timeout) yields None.
pub(crate) async fn run_tool(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Option<Vec<u8>> {
    let child = tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn();
    let child = match child {
        Ok(c) => c,
        Err(e) => {
            tracing::debug!(program, error = %e, "external tool failed to start");
            return None;
        }
    };
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) if output.status.success() => Some(output.stdout),
        Ok(Ok(output)) => {
            tracing::debug!(program, status = %output.status, "external tool failed");
            None
        }
        Ok(Err(e)) => {
            tracing::debug!(program, error = %e, "external tool I/O error");
            None
        }
        Err(_) => {
            tracing::debug!(program, ?timeout, "external tool timed out");
            None
        }
    }
}

/// Read a file as lossy UTF-8, trimmed and capped.
pub(crate) fn read_text_lossy(path: &Path, max_chars: usize) -> Option<String> {
    let data = std::fs::read(path).ok()?;
    let text = String::from_utf8_lossy(&data);
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(truncate_chars(text, max_chars))
    }
}

/// A scratch directory removed on drop, for rasterized pages and OCR variants.
pub(crate) fn scratch_dir(label: &str) -> std::io::Result<(tempfile::TempDir, PathBuf)> {
    let dir = tempfile::Builder::new().prefix(label).tempdir()?;
    let path = dir.path().to_path_buf();
    Ok((dir, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 3), "hél");
        assert_eq!(truncate_chars("ok", 10), "ok");
    }

    #[test]
    fn test_tool_available_for_missing_tool() {
        assert!(!tool_available("definitely-not-a-real-tool-xyz"));
    }

    #[tokio::test]
    async fn test_run_tool_missing_binary() {
        let out = run_tool("definitely-not-a-real-tool-xyz", &[], Duration::from_secs(1)).await;
        assert!(out.is_none());
    }
}
