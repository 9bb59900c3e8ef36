// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 shoebox contributors

//! Lightweight text-ish formats
//!
//! txt/md are read directly; json is flattened to dotted key/value lines;
//! rtf prefers `unrtf` with a naive stripper as fallback; svg collects the
//! human-visible text nodes; kmz digs out the embedded KML placemarks.

use quick_xml::events::Event;
use regex::Regex;
use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use super::{read_text_lossy, run_tool, tool_available, truncate_chars, Extraction, MAX_CHARS};
use crate::item::FileKind;

pub async fn extract_textish(path: &Path, kind: FileKind) -> Extraction {
    let t0 = Instant::now();

    let (text, method, fail_reason) = match kind {
        FileKind::Txt | FileKind::Md => {
            let method = if kind == FileKind::Md { "md" } else { "txt" };
            (read_text_lossy(path, MAX_CHARS), method, "Empty file")
        }
        FileKind::Json => (json_text(path), "json", "Empty JSON"),
        FileKind::Rtf => (
            rtf_text(path).await,
            "rtf",
            "No extractable RTF text (install unrtf for best results)",
        ),
        FileKind::Svg => (svg_text(path), "svg", "No extractable SVG text"),
        FileKind::Kmz => (kmz_text(path), "kmz", "No extractable KMZ/KML text"),
        _ => (None, "text", "Unsupported text type"),
    };

    match text {
        Some(text) => Extraction {
            text: Some(text),
            method: Some(method.to_string()),
            extract_time_s: t0.elapsed().as_secs_f64(),
            ..Extraction::default()
        },
        None => Extraction::failed(fail_reason, t0.elapsed().as_secs_f64()),
    }
}

/// Flatten a JSON document into `dotted.key: value` lines; raw text is the
/// fallback when it does not parse.
fn json_text(path: &Path) -> Option<String> {
    let raw = read_text_lossy(path, MAX_CHARS * 4)?;
    match serde_json::from_str::<serde_json::Value>(&raw) {
        Ok(value) => {
            let mut lines: Vec<String> = Vec::new();
            flatten_json(&value, &mut Vec::new(), &mut lines);
            let out = lines.join("\n");
            let out = out.trim();
            if out.is_empty() {
                let raw = raw.trim();
                if raw.is_empty() {
                    None
                } else {
                    Some(truncate_chars(raw, MAX_CHARS))
                }
            } else {
                Some(truncate_chars(out, MAX_CHARS))
            }
        }
        Err(_) => Some(truncate_chars(raw.trim(), MAX_CHARS)),
    }
}

const FLATTEN_LINE_BUDGET: usize = 1200;

fn flatten_json(node: &serde_json::Value, path: &mut Vec<String>, lines: &mut Vec<String>) {
    if lines.len() >= FLATTEN_LINE_BUDGET {
        return;
    }
    match node {
        serde_json::Value::Null => {}
        serde_json::Value::Object(map) => {
            for (k, v) in map {
                if lines.len() >= FLATTEN_LINE_BUDGET {
                    break;
                }
                path.push(k.clone());
                flatten_json(v, path, lines);
                path.pop();
            }
        }
        serde_json::Value::Array(items) => {
            for (idx, v) in items.iter().take(200).enumerate() {
                if lines.len() >= FLATTEN_LINE_BUDGET {
                    break;
                }
                path.push(idx.to_string());
                flatten_json(v, path, lines);
                path.pop();
            }
        }
        scalar => {
            let value = match scalar {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let mut value = value.split_whitespace().collect::<Vec<_>>().join(" ");
            if value.is_empty() {
                return;
            }
            if value.chars().count() > 400 {
                value = format!("{}…", truncate_chars(&value, 400));
            }
            if path.is_empty() {
                lines.push(value);
            } else {
                lines.push(format!("{}: {}", path.join("."), value));
            }
        }
    }
}

async fn rtf_text(path: &Path) -> Option<String> {
    if tool_available("unrtf") {
        let input = path.to_string_lossy().to_string();
        if let Some(stdout) =
            run_tool("unrtf", &["--text", input.as_str()], Duration::from_secs(30)).await
        {
            let text = String::from_utf8_lossy(&stdout);
            let text = text.trim();
            if !text.is_empty() {
                return Some(truncate_chars(text, MAX_CHARS));
            }
        }
    }

    // Naive fallback: strip control words and braces, keep visible text.
    static HEX: OnceLock<Regex> = OnceLock::new();
    static CONTROL: OnceLock<Regex> = OnceLock::new();
    static SPACES: OnceLock<Regex> = OnceLock::new();
    let hex = HEX.get_or_init(|| Regex::new(r"\\'[0-9a-fA-F]{2}").expect("valid regex"));
    let control = CONTROL.get_or_init(|| Regex::new(r"\\[a-zA-Z]+-?\d* ?").expect("valid regex"));
    let spaces = SPACES.get_or_init(|| Regex::new(r"\s+").expect("valid regex"));

    let raw = read_text_lossy(path, MAX_CHARS * 6)?;
    let s = hex.replace_all(&raw, " ");
    let s = control.replace_all(&s, " ");
    let s = s.replace(['{', '}'], " ");
    let s = spaces.replace_all(&s, " ");
    let s = s.trim();
    if s.is_empty() {
        None
    } else {
        Some(truncate_chars(s, MAX_CHARS))
    }
}

/// Human-visible SVG text: title/desc/text elements first, then the rest.
fn svg_text(path: &Path) -> Option<String> {
    let raw = read_text_lossy(path, MAX_CHARS * 4)?;
    let mut reader = quick_xml::Reader::from_str(&raw);
    let mut preferred: Vec<String> = Vec::new();
    let mut rest: Vec<String> = Vec::new();
    let mut stack: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                stack.push(name);
            }
            Ok(Event::End(_)) => {
                stack.pop();
            }
            Ok(Event::Text(e)) => {
                let Ok(t) = e.unescape() else { continue };
                let t = t.split_whitespace().collect::<Vec<_>>().join(" ");
                if t.is_empty() {
                    continue;
                }
                let current = stack.last().map(String::as_str).unwrap_or("");
                match current {
                    "style" | "script" => {}
                    "title" | "desc" | "text" | "tspan" => preferred.push(t),
                    _ => rest.push(t),
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        if preferred.iter().map(|p| p.len()).sum::<usize>() >= MAX_CHARS {
            break;
        }
    }

    preferred.extend(rest);
    let out = preferred.join("\n");
    let out = out.trim();
    if out.is_empty() {
        None
    } else {
        Some(truncate_chars(out, MAX_CHARS))
    }
}

/// KMZ: read the embedded KML and list document name plus placemarks.
fn kmz_text(path: &Path) -> Option<String> {
    let file = std::fs::File::open(path).ok()?;
    let mut archive = zip::ZipArchive::new(file).ok()?;

    let names: Vec<String> = (0..archive.len())
        .filter_map(|i| archive.by_index(i).ok().map(|f| f.name().to_string()))
        .collect();
    let mut kml_candidates: Vec<&String> =
        names.iter().filter(|n| n.to_lowercase().ends_with(".kml")).collect();
    kml_candidates.sort();
    // doc.kml is the conventional main document in KMZ exports.
    let chosen = kml_candidates
        .iter()
        .find(|n| n.to_lowercase().ends_with("doc.kml"))
        .or(kml_candidates.first())?
        .to_string();

    let mut entry = archive.by_name(&chosen).ok()?;
    let mut bytes = Vec::new();
    entry.read_to_end(&mut bytes).ok()?;
    let xml = String::from_utf8_lossy(&bytes).to_string();

    let placemarks = parse_kml_placemarks(&xml);
    let out = placemarks.trim().to_string();
    if out.is_empty() {
        None
    } else {
        Some(truncate_chars(&out, MAX_CHARS))
    }
}

#[derive(Default)]
struct Placemark {
    name: String,
    description: String,
    coordinates: String,
}

fn parse_kml_placemarks(xml: &str) -> String {
    static TAGS: OnceLock<Regex> = OnceLock::new();
    let tags = TAGS.get_or_init(|| Regex::new(r"<[^>]+>").expect("valid regex"));

    let mut reader = quick_xml::Reader::from_str(xml);
    let mut lines: Vec<String> = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    let mut document_name: Option<String> = None;
    let mut current: Option<Placemark> = None;
    let mut placemark_count = 0usize;
    let mut rendered = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if name == "Placemark" {
                    placemark_count += 1;
                    if rendered < 40 {
                        current = Some(Placemark::default());
                    }
                }
                stack.push(name);
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                stack.pop();
                if name == "Placemark" {
                    if let Some(pm) = current.take() {
                        rendered += 1;
                        if !pm.name.is_empty() {
                            lines.push(format!("- {}", pm.name));
                        }
                        if !pm.description.is_empty() {
                            let desc = tags.replace_all(&pm.description, " ");
                            let desc = desc.split_whitespace().collect::<Vec<_>>().join(" ");
                            let desc = if desc.chars().count() > 240 {
                                format!("{}…", truncate_chars(&desc, 240))
                            } else {
                                desc
                            };
                            if !desc.is_empty() {
                                lines.push(format!("  {desc}"));
                            }
                        }
                        if !pm.coordinates.is_empty() {
                            lines.push(format!("  coords: {}", truncate_chars(&pm.coordinates, 120)));
                        }
                    }
                }
            }
            Ok(Event::Text(e)) => {
                let Ok(t) = e.unescape() else { continue };
                let t = t.split_whitespace().collect::<Vec<_>>().join(" ");
                if t.is_empty() {
                    continue;
                }
                let tag = stack.last().map(String::as_str).unwrap_or("");
                match (&mut current, tag) {
                    (Some(pm), "name") => pm.name = t,
                    (Some(pm), "description") => pm.description = t,
                    (Some(pm), "coordinates") => pm.coordinates = t,
                    (None, "name") => {
                        let parent = stack.iter().rev().nth(1).map(String::as_str);
                        if parent == Some("Document") && document_name.is_none() {
                            document_name = Some(t);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::CData(e)) => {
                let t = String::from_utf8_lossy(&e).to_string();
                if let (Some(pm), Some("description")) =
                    (&mut current, stack.last().map(String::as_str))
                {
                    pm.description = t;
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        if lines.iter().map(|l| l.len()).sum::<usize>() >= MAX_CHARS {
            break;
        }
    }

    let mut out: Vec<String> = Vec::new();
    if let Some(doc) = document_name {
        out.push(format!("Document: {doc}"));
    }
    out.push(format!("Placemarks: {placemark_count}"));
    out.extend(lines);
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_txt_direct_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        std::fs::write(&path, "  appunti per la dichiarazione 2021  ").unwrap();
        let result = extract_textish(&path, FileKind::Txt).await;
        assert_eq!(result.text.as_deref(), Some("appunti per la dichiarazione 2021"));
        assert_eq!(result.method.as_deref(), Some("txt"));
    }

    #[tokio::test]
    async fn test_empty_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        std::fs::write(&path, "").unwrap();
        let result = extract_textish(&path, FileKind::Txt).await;
        assert!(result.text.is_none());
        assert_eq!(result.reason.as_deref(), Some("Empty file"));
    }

    #[tokio::test]
    async fn test_json_flattening() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(
            &path,
            r#"{"invoice": {"total": 225.58, "items": ["power", "fees"]}, "paid": true}"#,
        )
        .unwrap();
        let result = extract_textish(&path, FileKind::Json).await;
        let text = result.text.unwrap();
        assert!(text.contains("invoice.total: 225.58"));
        assert!(text.contains("invoice.items.0: power"));
        assert!(text.contains("paid: true"));
    }

    #[tokio::test]
    async fn test_svg_prefers_visible_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.svg");
        std::fs::write(
            &path,
            r#"<svg xmlns="http://www.w3.org/2000/svg"><title>Floor plan</title>
               <style>.a{fill:red}</style><text>Kitchen</text></svg>"#,
        )
        .unwrap();
        let result = extract_textish(&path, FileKind::Svg).await;
        let text = result.text.unwrap();
        assert!(text.starts_with("Floor plan"));
        assert!(text.contains("Kitchen"));
        assert!(!text.contains("fill:red"));
    }

    #[test]
    fn test_kml_placemarks() {
        let xml = r#"<kml><Document><name>Trip 2022</name>
            <Placemark><name>Hotel Roma</name>
            <description>&lt;b&gt;Night 1&lt;/b&gt;</description>
            <Point><coordinates>12.49,41.90,0</coordinates></Point></Placemark>
            </Document></kml>"#;
        let out = parse_kml_placemarks(xml);
        assert!(out.contains("Document: Trip 2022"));
        assert!(out.contains("Placemarks: 1"));
        assert!(out.contains("- Hotel Roma"));
        assert!(out.contains("coords: 12.49,41.90,0"));
        assert!(out.contains("Night 1"));
    }
}
