// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 shoebox contributors

//! Tesseract OCR with quality scoring
//!
//! Each page image is tried across preprocessing variants, page
//! segmentation modes and language packs; every candidate is scored and
//! the best one wins. The effort profile controls resolution, how many
//! combinations are tried and the overall time budget.

use image::GrayImage;
use std::path::Path;
use std::time::{Duration, Instant};

use super::{run_tool, scratch_dir, tool_available};
use crate::config::OcrProfile;

/// Per-profile OCR parameters.
#[derive(Debug, Clone, Copy)]
pub struct OcrParams {
    pub dpi: u32,
    pub max_pages: u32,
    pub psms: &'static [&'static str],
    pub langs: &'static [&'static str],
    pub heavy_preprocess: bool,
    pub pdf_budget: Duration,
    pub image_budget: Duration,
}

pub fn params(profile: OcrProfile) -> OcrParams {
    match profile {
        OcrProfile::Fast => OcrParams {
            dpi: 220,
            max_pages: 2,
            psms: &["6"],
            langs: &["ita+eng", "eng"],
            heavy_preprocess: false,
            pdf_budget: Duration::from_secs(20),
            image_budget: Duration::from_secs(12),
        },
        OcrProfile::Balanced => OcrParams {
            dpi: 260,
            max_pages: 3,
            psms: &["6", "3"],
            langs: &["ita+eng", "eng"],
            heavy_preprocess: true,
            pdf_budget: Duration::from_secs(45),
            image_budget: Duration::from_secs(25),
        },
        OcrProfile::High => OcrParams {
            dpi: 300,
            max_pages: 4,
            psms: &["3", "4", "6", "11"],
            langs: &["ita+eng", "eng+ita", "eng"],
            heavy_preprocess: true,
            pdf_budget: Duration::from_secs(120),
            image_budget: Duration::from_secs(60),
        },
    }
}

fn is_word_letter(c: char) -> bool {
    c.is_alphabetic()
}

/// Count broken-ligature artifacts: an underscore squeezed between letters.
fn count_artifacts(text: &str) -> usize {
    let chars: Vec<char> = text.chars().collect();
    chars
        .windows(3)
        .filter(|w| w[1] == '_' && is_word_letter(w[0]) && is_word_letter(w[2]))
        .count()
}

/// Remove underscores squeezed between letters (a common tesseract artifact).
pub fn clean_artifacts(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    for (i, &c) in chars.iter().enumerate() {
        if c == '_'
            && i > 0
            && i + 1 < chars.len()
            && is_word_letter(chars[i - 1])
            && is_word_letter(chars[i + 1])
        {
            continue;
        }
        out.push(c);
    }
    out
}

/// Score OCR output quality: rewards readable characters, penalizes
/// control bytes and ligature artifacts. Higher is better.
pub fn score_text(text: &str) -> f64 {
    let t = text.trim();
    if t.is_empty() {
        return 0.0;
    }
    let sample: String = t.chars().take(2000).collect();
    let alnum = sample.chars().filter(|c| c.is_alphanumeric()).count() as f64;
    let letters = sample.chars().filter(|c| c.is_alphabetic()).count() as f64;
    let spaces = sample.chars().filter(|c| c.is_whitespace()).count() as f64;
    let weird = sample
        .chars()
        .filter(|&c| (c as u32) < 9 || (c as u32) == 127)
        .count() as f64;
    let artifacts = count_artifacts(&sample) as f64;
    (alnum + letters * 0.5 + spaces * 0.1) - (weird * 5.0 + artifacts * 3.0)
}

#[derive(Debug, Clone)]
pub struct OcrOutcome {
    pub text: String,
    pub score: f64,
    pub ocr_time_s: f64,
}

/// Linear contrast stretch on a grayscale image.
fn stretch_contrast(gray: &GrayImage) -> GrayImage {
    let (mut lo, mut hi) = (255u8, 0u8);
    for p in gray.pixels() {
        lo = lo.min(p.0[0]);
        hi = hi.max(p.0[0]);
    }
    if hi <= lo {
        return gray.clone();
    }
    let span = (hi - lo) as f32;
    let mut out = gray.clone();
    for p in out.pixels_mut() {
        p.0[0] = (((p.0[0] - lo) as f32 / span) * 255.0) as u8;
    }
    out
}

fn binarize(gray: &GrayImage, threshold: u8) -> GrayImage {
    let mut out = gray.clone();
    for p in out.pixels_mut() {
        p.0[0] = if p.0[0] > threshold { 255 } else { 0 };
    }
    out
}

/// Write the preprocessing variants of an image next to the original.
/// The original file itself is always the first variant.
fn prepare_variants(path: &Path, heavy: bool, scratch: &Path) -> Vec<std::path::PathBuf> {
    let mut variants = vec![path.to_path_buf()];
    let Ok(img) = image::open(path) else {
        return variants;
    };
    let gray = img.to_luma8();
    let gray_path = scratch.join("gray.png");
    if gray.save(&gray_path).is_ok() {
        variants.push(gray_path);
    }
    if heavy {
        let stretched = stretch_contrast(&gray);
        let stretched_path = scratch.join("stretched.png");
        if stretched.save(&stretched_path).is_ok() {
            variants.push(stretched_path);
        }
        let binary = binarize(&stretched, 180);
        let binary_path = scratch.join("binary.png");
        if binary.save(&binary_path).is_ok() {
            variants.push(binary_path);
        }
    }
    variants
}

/// OCR one image file, trying variants, segmentation modes and languages
/// until the deadline. Returns the best-scoring candidate, if any.
pub async fn ocr_image(path: &Path, profile: OcrProfile, deadline: Instant) -> Option<OcrOutcome> {
    if !tool_available("tesseract") {
        return None;
    }
    let p = params(profile);
    let t0 = Instant::now();
    let Ok((_guard, scratch)) = scratch_dir("shoebox-ocr") else {
        return None;
    };
    let variants = prepare_variants(path, p.heavy_preprocess, &scratch);

    let mut best_text = String::new();
    let mut best_score = 0.0f64;

    'outer: for variant in &variants {
        for psm in p.psms {
            for lang in p.langs {
                if Instant::now() >= deadline {
                    break 'outer;
                }
                let input = variant.to_string_lossy().to_string();
                let args = [
                    input.as_str(),
                    "stdout",
                    "-l",
                    lang,
                    "--oem",
                    "1",
                    "--psm",
                    psm,
                    "-c",
                    "preserve_interword_spaces=1",
                ];
                let Some(stdout) = run_tool("tesseract", &args, Duration::from_secs(30)).await
                else {
                    continue;
                };
                let text = clean_artifacts(&String::from_utf8_lossy(&stdout));
                let score = score_text(&text);
                if score > best_score {
                    best_score = score;
                    best_text = text;
                }
            }
        }
    }

    let text = best_text.trim().to_string();
    if text.is_empty() {
        return None;
    }
    Some(OcrOutcome {
        text,
        score: best_score,
        ocr_time_s: t0.elapsed().as_secs_f64(),
    })
}
