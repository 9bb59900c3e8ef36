// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 shoebox contributors

//! Office document extraction
//!
//! docx and odt are ZIP containers with a single main XML part; xlsx and
//! xls go through calamine. Legacy .doc needs an external converter
//! (antiword, then LibreOffice).

use calamine::{open_workbook_auto, Data, Reader};
use quick_xml::events::Event;
use std::io::Read;
use std::path::Path;
use std::time::{Duration, Instant};

use super::{run_tool, scratch_dir, tool_available, truncate_chars, Extraction, MAX_CHARS};
use crate::item::FileKind;

pub async fn extract_office(path: &Path, kind: FileKind) -> Extraction {
    let t0 = Instant::now();

    let (text, method, fail_reason) = match kind {
        FileKind::Docx => (
            zip_xml_text(path, "word/document.xml"),
            "docx",
            "No extractable DOCX text",
        ),
        FileKind::Odt => (
            zip_xml_text(path, "content.xml"),
            "odt",
            "No extractable ODT text",
        ),
        FileKind::Xlsx | FileKind::Xls => (
            spreadsheet_text(path),
            "spreadsheet",
            "No extractable spreadsheet text",
        ),
        FileKind::Doc => {
            match doc_text(path).await {
                Some((text, method)) => {
                    return Extraction {
                        text: Some(text),
                        method: Some(method.to_string()),
                        extract_time_s: t0.elapsed().as_secs_f64(),
                        ..Extraction::default()
                    }
                }
                None => (
                    None,
                    "doc",
                    "No extractable DOC text (install antiword or libreoffice)",
                ),
            }
        }
        _ => (None, "office", "Unsupported office type"),
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

/// Read one XML member of a ZIP container and flatten it to text, with a
/// newline per paragraph-like element.
fn zip_xml_text(path: &Path, member: &str) -> Option<String> {
    let file = std::fs::File::open(path).ok()?;
    let mut archive = zip::ZipArchive::new(file).ok()?;
    let mut entry = archive.by_name(member).ok()?;
    let mut xml = String::new();
    entry.read_to_string(&mut xml).ok()?;
    let text = xml_to_text(&xml);
    if text.is_empty() {
        None
    } else {
        Some(truncate_chars(&text, MAX_CHARS))
    }
}

fn xml_to_text(xml: &str) -> String {
    let mut reader = quick_xml::Reader::from_str(xml);
    let mut out = String::new();
    loop {
        match reader.read_event() {
            Ok(Event::Text(e)) => {
                if let Ok(t) = e.unescape() {
                    let t = t.trim();
                    if !t.is_empty() {
                        if !out.is_empty() && !out.ends_with('\n') {
                            out.push(' ');
                        }
                        out.push_str(t);
                    }
                }
            }
            Ok(Event::End(e)) => {
                // Paragraph-like closers become line breaks.
                let name = e.local_name();
                let name = String::from_utf8_lossy(name.as_ref()).to_string();
                if matches!(name.as_str(), "p" | "h" | "tr") && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        if out.len() >= MAX_CHARS * 2 {
            break;
        }
    }
    out.trim().to_string()
}

/// Spreadsheet cells as pipe-separated rows, a few hundred rows per sheet.
fn spreadsheet_text(path: &Path) -> Option<String> {
    let mut workbook = open_workbook_auto(path).ok()?;
    let sheet_names = workbook.sheet_names().to_vec();
    let mut lines: Vec<String> = Vec::new();

    for name in sheet_names.iter().take(8) {
        let Ok(range) = workbook.worksheet_range(name) else {
            continue;
        };
        if range.is_empty() {
            continue;
        }
        lines.push(format!("Sheet: {name}"));
        for row in range.rows().take(200) {
            let cells: Vec<String> = row
                .iter()
                .filter(|c| !matches!(c, Data::Empty))
                .map(|c| c.to_string())
                .filter(|s| !s.trim().is_empty())
                .collect();
            if !cells.is_empty() {
                lines.push(cells.join(" | "));
            }
            if lines.iter().map(|l| l.len()).sum::<usize>() >= MAX_CHARS {
                break;
            }
        }
        if lines.iter().map(|l| l.len()).sum::<usize>() >= MAX_CHARS {
            break;
        }
    }

    let out = lines.join("\n");
    let out = out.trim();
    if out.is_empty() {
        None
    } else {
        Some(truncate_chars(out, MAX_CHARS))
    }
}

/// Legacy .doc: antiword first, then a headless LibreOffice conversion.
async fn doc_text(path: &Path) -> Option<(String, &'static str)> {
    let input = path.to_string_lossy().to_string();

    if tool_available("antiword") {
        if let Some(stdout) =
            run_tool("antiword", &[input.as_str()], Duration::from_secs(30)).await
        {
            let text = String::from_utf8_lossy(&stdout);
            let text = text.trim();
            if !text.is_empty() {
                return Some((truncate_chars(text, MAX_CHARS), "antiword"));
            }
        }
    }

    if tool_available("soffice") {
        let (_guard, outdir) = scratch_dir("shoebox-doc").ok()?;
        let outdir_s = outdir.to_string_lossy().to_string();
        run_tool(
            "soffice",
            &[
                "--headless",
                "--convert-to",
                "txt:Text",
                "--outdir",
                outdir_s.as_str(),
                input.as_str(),
            ],
            Duration::from_secs(60),
        )
        .await?;
        let converted = std::fs::read_dir(&outdir)
            .ok()?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .find(|p| p.extension().is_some_and(|e| e == "txt"))?;
        let text = super::read_text_lossy(&converted, MAX_CHARS)?;
        return Some((text, "libreoffice"));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(member: &str, content: &str) -> tempfile::NamedTempFile {
        let file = tempfile::Builder::new().suffix(".docx").tempfile().unwrap();
        let mut zw = zip::ZipWriter::new(std::fs::File::create(file.path()).unwrap());
        zw.start_file(member, zip::write::SimpleFileOptions::default())
            .unwrap();
        zw.write_all(content.as_bytes()).unwrap();
        zw.finish().unwrap();
        file
    }

    #[tokio::test]
    async fn test_docx_text() {
        let xml = r#"<?xml version="1.0"?><w:document xmlns:w="ns">
            <w:body><w:p><w:r><w:t>Contratto di lavoro</w:t></w:r></w:p>
            <w:p><w:r><w:t>Roma, 5 marzo 2019</w:t></w:r></w:p></w:body></w:document>"#;
        let file = zip_with("word/document.xml", xml);
        let result = extract_office(file.path(), FileKind::Docx).await;
        let text = result.text.unwrap();
        assert!(text.contains("Contratto di lavoro"));
        assert!(text.contains("Roma, 5 marzo 2019"));
        assert_eq!(result.method.as_deref(), Some("docx"));
    }

    #[tokio::test]
    async fn test_missing_member_fails_with_reason() {
        let file = zip_with("wrong.xml", "<a>x</a>");
        let result = extract_office(file.path(), FileKind::Docx).await;
        assert!(result.text.is_none());
        assert_eq!(result.reason.as_deref(), Some("No extractable DOCX text"));
    }

    #[test]
    fn test_xml_to_text_breaks_paragraphs() {
        let text = xml_to_text("<d><p>one</p><p>two</p></d>");
        assert_eq!(text, "one\ntwo");
    }
}
