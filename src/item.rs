// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 shoebox contributors

//! Work items: the per-file record tracking pipeline progress
//!
//! Items are immutable value records; every stage produces a new record via
//! the `with_*` / `mark_*` helpers rather than mutating in place, which keeps
//! roll-back-on-cancel trivial.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File kind inferred from the extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Pdf,
    Image,
    Doc,
    Docx,
    Odt,
    Xls,
    Xlsx,
    Json,
    Md,
    Txt,
    Rtf,
    Svg,
    Kmz,
}

impl FileKind {
    /// Infer the kind from a path's extension. Returns None for unsupported files.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        let kind = match ext.as_str() {
            "pdf" => Self::Pdf,
            "jpg" | "jpeg" | "png" => Self::Image,
            "doc" => Self::Doc,
            "docx" => Self::Docx,
            "odt" => Self::Odt,
            "xls" => Self::Xls,
            "xlsx" => Self::Xlsx,
            "json" => Self::Json,
            "md" => Self::Md,
            "txt" => Self::Txt,
            "rtf" => Self::Rtf,
            "svg" => Self::Svg,
            "kmz" => Self::Kmz,
            _ => return None,
        };
        Some(kind)
    }

    pub fn is_office(&self) -> bool {
        matches!(self, Self::Doc | Self::Docx | Self::Odt | Self::Xls | Self::Xlsx)
    }

    pub fn is_textish(&self) -> bool {
        matches!(self, Self::Json | Self::Md | Self::Txt | Self::Rtf | Self::Svg | Self::Kmz)
    }
}

/// Pipeline status of a work item.
///
/// `Scanning`, `Classifying` and `Moving` are transient: they mark an item a
/// worker is currently on, are never cache-valid, and are rolled back when a
/// task is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Scanning,
    Scanned,
    Classifying,
    Classified,
    Moving,
    Moved,
    Skipped,
    Error,
}

impl ItemStatus {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Scanning | Self::Classifying | Self::Moving)
    }

    /// The stable status a transient state falls back to on cancellation.
    pub fn rollback_target(&self) -> ItemStatus {
        match self {
            Self::Scanning => Self::Pending,
            Self::Classifying => Self::Scanned,
            Self::Moving => Self::Classified,
            other => *other,
        }
    }

    /// The reason attached to items rolled back out of this transient state.
    pub fn stopped_reason(&self) -> &'static str {
        match self {
            Self::Scanning => "extraction stopped",
            Self::Classifying => "classification stopped",
            Self::Moving => "move stopped",
            _ => "stopped",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scanning => "scanning",
            Self::Scanned => "scanned",
            Self::Classifying => "classifying",
            Self::Classified => "classified",
            Self::Moving => "moving",
            Self::Moved => "moved",
            Self::Skipped => "skipped",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The record describing one file and its pipeline progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub path: PathBuf,
    pub kind: FileKind,
    pub size: u64,
    /// Modification time as ISO-8601 seconds, empty when stat failed.
    pub modified: String,
    pub status: ItemStatus,
    pub reason: Option<String>,
    pub category: Option<String>,
    pub reference_year: Option<String>,
    pub proposed_name: Option<String>,
    pub summary: Option<String>,
    pub summary_long: Option<String>,
    pub facts_json: Option<String>,
    /// Raw model output kept (truncated) for diagnosis of unparseable replies.
    pub llm_raw_output: Option<String>,
    pub confidence: Option<f64>,
    pub moved_to: Option<String>,
    pub extract_method: Option<String>,
    pub extract_time_s: Option<f64>,
    pub ocr_time_s: Option<f64>,
    pub ocr_mode: Option<String>,
    pub facts_time_s: Option<f64>,
    pub facts_llm_time_s: Option<f64>,
    pub facts_model: Option<String>,
    pub classify_time_s: Option<f64>,
    pub classify_llm_time_s: Option<f64>,
    pub classify_model: Option<String>,
}

impl WorkItem {
    pub fn new(path: PathBuf, kind: FileKind, size: u64, modified: String) -> Self {
        Self {
            path,
            kind,
            size,
            modified,
            status: ItemStatus::Pending,
            reason: None,
            category: None,
            reference_year: None,
            proposed_name: None,
            summary: None,
            summary_long: None,
            facts_json: None,
            llm_raw_output: None,
            confidence: None,
            moved_to: None,
            extract_method: None,
            extract_time_s: None,
            ocr_time_s: None,
            ocr_mode: None,
            facts_time_s: None,
            facts_llm_time_s: None,
            facts_model: None,
            classify_time_s: None,
            classify_llm_time_s: None,
            classify_model: None,
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Reset to `pending`, clearing every stage-derived field.
    pub fn reset_to_pending(&self) -> Self {
        Self {
            status: ItemStatus::Pending,
            reason: None,
            category: None,
            reference_year: None,
            proposed_name: None,
            summary: None,
            summary_long: None,
            facts_json: None,
            llm_raw_output: None,
            confidence: None,
            moved_to: None,
            extract_method: None,
            extract_time_s: None,
            ocr_time_s: None,
            ocr_mode: None,
            facts_time_s: None,
            facts_llm_time_s: None,
            facts_model: None,
            classify_time_s: None,
            classify_llm_time_s: None,
            classify_model: None,
            ..self.clone()
        }
    }

    /// Mark a pending item as being scanned, clearing classification leftovers.
    pub fn mark_scanning(&self) -> Self {
        Self {
            status: ItemStatus::Scanning,
            reason: None,
            category: None,
            reference_year: None,
            proposed_name: None,
            summary: None,
            llm_raw_output: None,
            classify_time_s: None,
            classify_llm_time_s: None,
            classify_model: None,
            ..self.clone()
        }
    }

    /// Mark a scanned item as being classified.
    pub fn mark_classifying(&self) -> Self {
        Self {
            status: ItemStatus::Classifying,
            reason: None,
            ..self.clone()
        }
    }

    /// Mark a classified item as being moved.
    pub fn mark_moving(&self) -> Self {
        Self {
            status: ItemStatus::Moving,
            reason: None,
            ..self.clone()
        }
    }

    /// Bring a classified item back to scanned, keeping facts and clearing
    /// the classification output.
    pub fn unclassify(&self) -> Self {
        Self {
            status: ItemStatus::Scanned,
            reason: None,
            category: None,
            reference_year: None,
            proposed_name: None,
            summary: None,
            confidence: None,
            classify_time_s: None,
            classify_llm_time_s: None,
            classify_model: None,
            ..self.clone()
        }
    }

    /// Roll a transient item back to its pre-task status with a stopped reason.
    pub fn rolled_back(&self) -> Self {
        if !self.status.is_transient() {
            return self.clone();
        }
        Self {
            status: self.status.rollback_target(),
            reason: Some(self.status.stopped_reason().to_string()),
            ..self.clone()
        }
    }
}
