//! Raw bytes plus an extension in, plain text out.
//!
//! Nothing in here touches the network or the filesystem. Every failure is
//! reported through [`ExtractError`]; malformed input never panics out of
//! [`extract`].

use std::{
    io::{Cursor, Read},
    panic,
    path::Path,
};

use anyhow::{Context, anyhow};
use quick_xml::{Reader as XmlReader, events::Event};
use thiserror::Error;
use tracing::warn;
use zip::ZipArchive;

/// Source and markup files decoded as UTF-8, both standalone and inside archives.
pub const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "py", "js", "jsx", "ts", "tsx", "java", "c", "h", "cpp", "cs", "go", "rs", "rb",
    "php", "html", "css", "json", "xml", "yml", "yaml", "sql", "sh", "csv",
];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("unsupported file type: .{0}")]
    Unsupported(String),
    #[error("{0}")]
    Failed(String),
}

pub fn extract(bytes: &[u8], extension: &str) -> Result<String, ExtractError> {
    let extension = normalize_extension(extension);

    match extension.as_str() {
        "pdf" => extract_pdf(bytes),
        "docx" => extract_docx(bytes),
        "zip" => extract_archive(bytes),
        ext if is_text_extension(ext) => Ok(decode_plain(bytes)),
        other => Err(ExtractError::Unsupported(other.to_string())),
    }
}

pub fn normalize_extension(extension: &str) -> String {
    extension.trim().trim_start_matches('.').to_ascii_lowercase()
}

pub fn is_text_extension(extension: &str) -> bool {
    TEXT_EXTENSIONS.contains(&extension)
}

/// Invalid sequences become U+FFFD instead of failing the document.
fn decode_plain(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    // The PDF decoder panics on some malformed inputs.
    let pages = panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes))
        .map_err(|_| ExtractError::Failed("PDF decoder aborted on malformed input".to_string()))?
        .map_err(|err| ExtractError::Failed(format!("failed to extract PDF text: {err}")))?;

    Ok(pages.join("\n"))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    docx_paragraphs(bytes)
        .map(|paragraphs| paragraphs.join("\n"))
        .map_err(|err| ExtractError::Failed(format!("{err:#}")))
}

fn docx_paragraphs(bytes: &[u8]) -> anyhow::Result<Vec<String>> {
    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).context("failed to open DOCX archive")?;

    let mut document = archive
        .by_name("word/document.xml")
        .context("missing word/document.xml")?;

    let mut xml = String::new();
    document
        .read_to_string(&mut xml)
        .context("failed to read DOCX XML")?;

    let mut reader = XmlReader::from_str(&xml);
    let mut buf = Vec::new();
    let mut paragraphs = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text_node = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"w:p" => current = Some(String::new()),
                b"w:t" => in_text_node = true,
                b"w:tab" => push_into(&mut current, "\t"),
                b"w:br" => push_into(&mut current, "\n"),
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"w:p" => paragraphs.push(String::new()),
                b"w:tab" => push_into(&mut current, "\t"),
                b"w:br" => push_into(&mut current, "\n"),
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_text_node {
                    let value = e.unescape().map_err(|err| anyhow!(err))?;
                    push_into(&mut current, &value);
                }
            }
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"w:t" => in_text_node = false,
                b"w:p" => {
                    if let Some(paragraph) = current.take() {
                        paragraphs.push(paragraph);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(err) => return Err(anyhow!("failed to parse DOCX XML: {}", err)),
            _ => {}
        }
        buf.clear();
    }

    Ok(paragraphs)
}

fn push_into(current: &mut Option<String>, value: &str) {
    if let Some(paragraph) = current.as_mut() {
        paragraph.push_str(value);
    }
}

fn extract_archive(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|err| ExtractError::Failed(format!("failed to open archive: {err}")))?;

    let mut sections = Vec::new();

    for idx in 0..archive.len() {
        let mut entry = match archive.by_index(idx) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(?err, idx, "skipping unreadable archive entry");
                continue;
            }
        };

        if entry.is_dir() {
            continue;
        }

        let name = entry.name().to_string();
        let extension = Path::new(&name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(normalize_extension)
            .unwrap_or_default();
        if !is_text_extension(&extension) {
            continue;
        }

        let mut raw = Vec::new();
        if let Err(err) = entry.read_to_end(&mut raw) {
            warn!(?err, entry = %name, "skipping archive entry that failed to decompress");
            continue;
        }

        sections.push(format!("\n--- {} ---\n{}", name, decode_plain(&raw)));
    }

    Ok(sections.join("\n"))
}
