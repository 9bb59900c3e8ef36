// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 shoebox contributors

//! Error types for shoebox

use thiserror::Error;

/// Result type alias for shoebox operations
pub type Result<T> = std::result::Result<T, ShoeboxError>;

/// Shoebox error types
#[derive(Error, Debug)]
pub enum ShoeboxError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("API error: {0}")]
    Api(#[from] reqwest::Error),

    #[error("Ollama not available: {0}")]
    OllamaUnavailable(String),

    #[error("Taxonomy error: {0}")]
    Taxonomy(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Classification error: {0}")]
    Classification(String),

    #[error("Move failed: {0}")]
    Move(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Task already running: {0}")]
    TaskBusy(&'static str),
}
