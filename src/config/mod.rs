// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 shoebox contributors

//! Configuration management for Shoebox

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::naming::Separator;

/// Directory (inside the source folder) holding cache, taxonomy and logs.
pub const DATA_DIR_NAME: &str = ".shoebox";

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    /// Folder to scan for documents
    pub source_dir: String,

    /// Root of the archive tree (category/year/filename)
    pub archive_dir: String,

    /// AI engine configuration
    pub ai_engine: EngineConfig,

    /// Text extraction settings
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Naming and archive placement rules
    #[serde(default)]
    pub rules: RuleConfig,

    /// Primary document language ("en" or "it"); drives the default
    /// taxonomy and prompt phrasing
    #[serde(default = "default_language")]
    pub language: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EngineConfig {
    pub url: String,
    pub models: ModelConfig,
    /// Timeout for short model calls (JSON repair)
    #[serde(default = "default_repair_timeout")]
    pub repair_timeout_secs: u64,
    /// Default request timeout
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Timeout for heavy calls (facts, classification, vision)
    #[serde(default = "default_heavy_timeout")]
    pub heavy_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ModelConfig {
    /// Small model used for the first facts pass and classification
    #[serde(default = "default_fast_model")]
    pub text_fast: String,
    /// Larger model used when the fast pass is low-confidence
    #[serde(default = "default_deep_model")]
    pub text_deep: String,
    /// Vision model for image captioning
    #[serde(default = "default_vision_model")]
    pub vision: String,
    /// Vision models tried in order when the primary caption call fails
    #[serde(default = "default_vision_fallbacks")]
    pub vision_fallbacks: Vec<String>,
    /// Tried in order when a configured model is not installed
    #[serde(default = "default_fallback_models")]
    pub fallbacks: Vec<String>,
}

/// OCR effort level: resolution, page-segmentation modes tried, languages
/// and per-page timeout all scale with the profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OcrProfile {
    Fast,
    #[default]
    Balanced,
    High,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default)]
    pub ocr_profile: OcrProfile,
    /// Pages rasterized when a PDF needs OCR
    #[serde(default = "default_ocr_pages")]
    pub ocr_max_pages: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RuleConfig {
    /// Word separator in proposed filenames
    #[serde(default)]
    pub separator: Separator,
    /// Category directory for unclassifiable documents
    #[serde(default = "default_unknown_category")]
    pub unknown_category: String,
    /// Year directory for documents with no resolvable year
    #[serde(default = "default_undated_label")]
    pub undated_label: String,
}

// Default value functions
fn default_timeout() -> u64 { 120 }
fn default_repair_timeout() -> u64 { 60 }
fn default_heavy_timeout() -> u64 { 180 }
fn default_fast_model() -> String { "llama3.2:3b".to_string() }
fn default_deep_model() -> String { "qwen2.5:7b-instruct".to_string() }
fn default_vision_model() -> String { "moondream".to_string() }
fn default_language() -> String { "en".to_string() }
fn default_ocr_pages() -> u32 { 3 }
fn default_unknown_category() -> String { "unknown".to_string() }
fn default_undated_label() -> String { "undated".to_string() }

fn default_vision_fallbacks() -> Vec<String> {
    vec!["llava:7b".to_string(), "llama3.2-vision".to_string()]
}

fn default_fallback_models() -> Vec<String> {
    vec![
        "llama3.2:3b".to_string(),
        "llama3.2:1b".to_string(),
        "qwen2.5:3b-instruct".to_string(),
    ]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source_dir: "./inbox".to_string(),
            archive_dir: "./archive".to_string(),
            ai_engine: EngineConfig::default(),
            extraction: ExtractionConfig::default(),
            rules: RuleConfig::default(),
            language: default_language(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434".to_string(),
            models: ModelConfig::default(),
            repair_timeout_secs: default_repair_timeout(),
            timeout_secs: default_timeout(),
            heavy_timeout_secs: default_heavy_timeout(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            text_fast: default_fast_model(),
            text_deep: default_deep_model(),
            vision: default_vision_model(),
            vision_fallbacks: default_vision_fallbacks(),
            fallbacks: default_fallback_models(),
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            ocr_profile: OcrProfile::default(),
            ocr_max_pages: default_ocr_pages(),
        }
    }
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            separator: Separator::default(),
            unknown_category: default_unknown_category(),
            undated_label: default_undated_label(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content)
                .map_err(|e| crate::ShoeboxError::Config(format!("Failed to parse config: {}", e)))?;
            Ok(config)
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Data directory inside a scanned folder.
    pub fn data_dir(root: &Path) -> PathBuf {
        root.join(DATA_DIR_NAME)
    }

    /// Extraction/classification cache for a folder.
    pub fn cache_path(root: &Path) -> PathBuf {
        Self::data_dir(root).join("cache.json")
    }

    /// Custom taxonomy file for the source folder, one category per line.
    pub fn taxonomy_path(root: &Path) -> PathBuf {
        Self::data_dir(root).join("taxonomy.txt")
    }

    /// Append-only audit log of archive moves.
    pub fn moves_log_path(root: &Path) -> PathBuf {
        Self::data_dir(root).join("moves.jsonl")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_round_trips() {
        let config = AppConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let back: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.ai_engine.url, config.ai_engine.url);
        assert_eq!(back.rules.unknown_category, "unknown");
        assert_eq!(back.extraction.ocr_profile, OcrProfile::Balanced);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let json = r#"{
            "source_dir": "/tmp/inbox",
            "archive_dir": "/tmp/archive",
            "ai_engine": { "url": "http://box:11434", "models": {} }
        }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.ai_engine.url, "http://box:11434");
        assert_eq!(config.ai_engine.heavy_timeout_secs, 180);
        assert_eq!(config.ai_engine.models.text_fast, "llama3.2:3b");
        assert_eq!(
            config.ai_engine.models.vision_fallbacks,
            vec!["llava:7b", "llama3.2-vision"]
        );
        assert_eq!(config.language, "en");
    }

    #[test]
    fn test_data_paths() {
        let root = Path::new("/data/docs");
        assert_eq!(AppConfig::cache_path(root), PathBuf::from("/data/docs/.shoebox/cache.json"));
        assert_eq!(AppConfig::moves_log_path(root), PathBuf::from("/data/docs/.shoebox/moves.jsonl"));
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let config = AppConfig::load(Path::new("/nonexistent/config.json")).unwrap();
        assert_eq!(config.source_dir, "./inbox");
    }
}
