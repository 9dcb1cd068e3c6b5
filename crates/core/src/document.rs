use crate::error::RagError;
use crate::models::{DocumentFingerprint, PageText};
use chrono::Utc;
use lopdf::Document;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::Path;
use tracing::warn;

const FORM_FEED: char = '\u{000C}';

/// Turns a file into ordered page texts.
pub trait PageSource {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, RagError>;
}

#[derive(Debug, Default)]
pub struct LopdfSource;

impl PageSource for LopdfSource {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, RagError> {
        let parse_error = |error: lopdf::Error| RagError::PdfParse(format!("{}: {error}", path.display()));
        let document = Document::load(path).map_err(parse_error)?;

        let page_numbers: Vec<u32> = document.get_pages().into_keys().collect();
        let mut pages = Vec::with_capacity(page_numbers.len());
        let mut unreadable = 0usize;
        for number in page_numbers {
            // Unreadable pages are skipped; the rest of the document still loads.
            match document.extract_text(&[number]) {
                Ok(text) if !text.trim().is_empty() => {
                    pages.push(PageText::new(number, text.trim_end()));
                }
                Ok(_) => {}
                Err(error) => {
                    unreadable += 1;
                    warn!(page = number, error = %error, "skipping unreadable pdf page");
                }
            }
        }

        if pages.is_empty() {
            return Err(RagError::PdfParse(format!(
                "{} has no extractable text ({unreadable} unreadable page(s)); scanned pages need OCR first",
                path.display()
            )));
        }
        Ok(pages)
    }
}

/// UTF-8 text where a form feed separates pages.
#[derive(Debug, Default)]
pub struct PlainTextSource;

impl PageSource for PlainTextSource {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, RagError> {
        let raw = fs::read_to_string(path)?;
        Ok(split_pages(&raw))
    }
}

/// Splits on form feeds, numbering from 1 and skipping blank pages without renumbering.
pub fn split_pages(raw: &str) -> Vec<PageText> {
    raw.split(FORM_FEED)
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(index, text)| PageText::new((index + 1) as u32, text.trim_end()))
        .collect()
}

/// Loads page texts, choosing the reader from the file extension.
pub fn load_pages(path: &Path) -> Result<Vec<PageText>, RagError> {
    let is_pdf = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

    if is_pdf {
        LopdfSource.extract_pages(path)
    } else {
        PlainTextSource.extract_pages(path)
    }
}

/// SHA-256 of the file contents as lowercase hex, streamed so large PDFs are not held in memory.
pub fn digest_file(path: &Path) -> Result<String, RagError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Identity of a loaded file. The document id is derived from the content checksum, so the same
/// bytes always produce the same chunk ids.
pub fn fingerprint(path: &Path) -> Result<DocumentFingerprint, RagError> {
    let checksum = digest_file(path)?;
    let title = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| RagError::InvalidArgument(format!("path missing filename: {}", path.display())))?;

    Ok(DocumentFingerprint {
        document_id: checksum.chars().take(16).collect(),
        title: title.to_string(),
        source_path: path.to_string_lossy().to_string(),
        checksum,
        loaded_at: Utc::now(),
    })
}
