//! Office Open XML extraction (docx, pptx, xlsx).
//!
//! The archives are read with `zip` and the XML parts streamed through
//! `quick-xml`. Every entry read is bounded to protect against zip bombs.

use std::io::{Cursor, Read};

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::chain::ContentExtractor;
use crate::content::ExtractedContent;
use crate::error::ExtractError;

pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Maximum decompressed bytes read from a single archive entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Maximum worksheets read from a workbook.
const XLSX_MAX_SHEETS: usize = 100;

type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OfficeKind {
    Word,
    Presentation,
    Spreadsheet,
}

pub struct OoxmlExtractor;

impl OoxmlExtractor {
    pub fn is_zip(header: &[u8]) -> bool {
        header.starts_with(b"PK\x03\x04")
    }

    fn kind_for_type(content_type: &str) -> Option<OfficeKind> {
        match content_type {
            MIME_DOCX => Some(OfficeKind::Word),
            MIME_PPTX => Some(OfficeKind::Presentation),
            MIME_XLSX => Some(OfficeKind::Spreadsheet),
            _ => None,
        }
    }

    fn kind_from_entries(archive: &Archive<'_>) -> Option<OfficeKind> {
        let mut names = archive.file_names();
        names.find_map(|name| match name {
            "word/document.xml" => Some(OfficeKind::Word),
            "ppt/presentation.xml" => Some(OfficeKind::Presentation),
            "xl/workbook.xml" => Some(OfficeKind::Spreadsheet),
            _ => None,
        })
    }
}

impl ContentExtractor for OoxmlExtractor {
    fn name(&self) -> &'static str {
        "ooxml"
    }

    fn handles(&self, content_type: &str, header: &[u8]) -> bool {
        Self::kind_for_type(content_type).is_some() && Self::is_zip(header)
    }

    fn extract(&self, bytes: &[u8], content_type: &str) -> Result<ExtractedContent, ExtractError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
        let kind = Self::kind_for_type(content_type)
            .or_else(|| Self::kind_from_entries(&archive))
            .ok_or_else(|| ExtractError::Unsupported(format!("zip archive ({content_type})")))?;

        let text = match kind {
            OfficeKind::Word => {
                let xml = read_entry_bounded(&mut archive, "word/document.xml")?;
                collect_text_elements(&xml, b"t")?
            }
            OfficeKind::Presentation => extract_slides(&mut archive)?,
            OfficeKind::Spreadsheet => extract_workbook(&mut archive)?,
        };

        let (title, metadata) = read_core_properties(&mut archive);
        let mut content = ExtractedContent::from_text(text).with_title(title);
        content.metadata = metadata;
        Ok(content)
    }
}

fn read_entry_bounded(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, ExtractError> {
    let entry = archive.by_name(name)?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::malformed("zip", e))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::TooLarge {
            size: out.len() as u64,
            limit: MAX_XML_ENTRY_BYTES,
        });
    }
    Ok(out)
}

/// Concatenate the text of every element with local name `tag`
/// (`w:t` in Word, `a:t` in slides, `t` in shared strings).
fn collect_text_elements(xml: &[u8], tag: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut inside = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == tag => inside = true,
            Ok(Event::End(e)) if e.local_name().as_ref() == tag => inside = false,
            // Paragraphs and shared-string items separate words
            Ok(Event::End(e)) if matches!(e.local_name().as_ref(), b"p" | b"si") => out.push(' '),
            Ok(Event::Text(te)) if inside => {
                let text = te.unescape().map_err(|e| ExtractError::malformed("ooxml", e))?;
                out.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::malformed("ooxml", e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn extract_slides(archive: &mut Archive<'_>) -> Result<String, ExtractError> {
    let mut slide_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .map(str::to_string)
        .collect();
    slide_names.sort_by_key(|name| {
        name.trim_start_matches("ppt/slides/slide")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let mut out = String::new();
    for name in slide_names {
        let xml = read_entry_bounded(archive, &name)?;
        out.push_str(&collect_text_elements(&xml, b"t")?);
        out.push(' ');
    }
    Ok(out)
}

fn extract_workbook(archive: &mut Archive<'_>) -> Result<String, ExtractError> {
    // Cell text lives in the shared string table; numbers are not worth
    // indexing.
    let mut out = if archive.index_for_name("xl/sharedStrings.xml").is_some() {
        let xml = read_entry_bounded(archive, "xl/sharedStrings.xml")?;
        collect_text_elements(&xml, b"t")?
    } else {
        String::new()
    };

    let sheets: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .take(XLSX_MAX_SHEETS)
        .map(str::to_string)
        .collect();
    for name in sheets {
        // Inline strings are stored in the sheet itself
        let xml = read_entry_bounded(archive, &name)?;
        let inline = collect_text_elements(&xml, b"t")?;
        if !inline.trim().is_empty() {
            out.push(' ');
            out.push_str(&inline);
        }
    }
    Ok(out)
}

/// Title and selected Dublin Core properties from `docProps/core.xml`.
/// Missing or unreadable properties are not an error.
fn read_core_properties(
    archive: &mut Archive<'_>,
) -> (Option<String>, std::collections::BTreeMap<String, String>) {
    let mut metadata = std::collections::BTreeMap::new();
    let Ok(xml) = read_entry_bounded(archive, "docProps/core.xml") else {
        return (None, metadata);
    };

    let mut reader = Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                current = matches!(name.as_str(), "title" | "creator" | "keywords" | "subject" | "description")
                    .then_some(name);
            }
            Ok(Event::Text(te)) => {
                if let (Some(key), Ok(value)) = (current.as_ref(), te.unescape()) {
                    if !value.trim().is_empty() {
                        metadata.insert(key.clone(), value.trim().to_string());
                    }
                }
            }
            Ok(Event::End(_)) => current = None,
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    (metadata.remove("title"), metadata)
}
