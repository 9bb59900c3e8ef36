// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 shoebox contributors

//! Shoebox: Local AI Document Archiver
//!
//! Scans a folder of mixed documents, extracts text (with OCR and vision
//! captioning fallbacks), asks a local Ollama model for structured facts,
//! classifies each file into a user-editable taxonomy with a proposed
//! descriptive filename, and moves it into a `category/year/filename`
//! archive tree. Results are cached per folder so re-runs only touch
//! changed files.

pub mod archive;
pub mod cache;
pub mod classify;
pub mod config;
pub mod error;
pub mod extract;
pub mod facts;
pub mod item;
pub mod naming;
pub mod ollama;
pub mod parse;
pub mod prompts;
pub mod scanner;
pub mod tasks;
pub mod taxonomy;

pub use config::AppConfig;
pub use error::{Result, ShoeboxError};
