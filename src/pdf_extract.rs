// src/pdf_extract.rs

use crate::error::PipelineError;
use lopdf::Document;
use tracing::{info, warn};

/// Result of attempting to extract text from a PDF.
#[derive(Debug)]
pub enum PdfContent {
    /// The PDF contains extractable text.
    Text(String),
    /// Image-only pages; the text has to come from an OCR pass upstream.
    ScannedImage,
    /// The bytes are not a readable PDF.
    Error(String),
}

/// Fewer non-whitespace characters than this and the PDF counts as scanned.
const MIN_TEXT_CHARS: usize = 30;

/// Takes raw PDF bytes and returns `PdfContent`.
pub fn extract_text_from_pdf(pdf_bytes: &[u8]) -> PdfContent {
    // --- Phase 1: structural check with lopdf ---
    let doc = match Document::load_mem(pdf_bytes) {
        Ok(d) => d,
        Err(e) => return PdfContent::Error(format!("Failed to parse PDF: {e}")),
    };

    if looks_like_scanned(&doc) {
        info!("PDF structural check: likely scanned");
        return PdfContent::ScannedImage;
    }

    // --- Phase 2: text extraction ---
    match pdf_extract::extract_text_from_mem(pdf_bytes) {
        Ok(text) => {
            let meaningful = text.chars().filter(|c| !c.is_whitespace()).count();
            if meaningful < MIN_TEXT_CHARS {
                info!(chars = meaningful, "Extracted text too short, treating as scanned");
                PdfContent::ScannedImage
            } else {
                info!(chars = meaningful, "Text extracted");
                PdfContent::Text(text)
            }
        }
        Err(e) => {
            warn!(error = %e, "pdf-extract failed");
            PdfContent::ScannedImage
        }
    }
}

/// Text of a PDF source document, or `MalformedDocument` when there is none.
pub fn document_text(document: &str, pdf_bytes: &[u8]) -> Result<String, PipelineError> {
    match extract_text_from_pdf(pdf_bytes) {
        PdfContent::Text(text) => Ok(text),
        PdfContent::ScannedImage => Err(PipelineError::malformed(
            document,
            "PDF has no text layer (scanned); supply OCR text instead",
        )),
        PdfContent::Error(e) => Err(PipelineError::malformed(document, e)),
    }
}

/// A page with XObject images but no Font resources is a scanned page.
fn looks_like_scanned(doc: &Document) -> bool {
    let pages = doc.get_pages();
    if pages.is_empty() {
        return false;
    }

    let resource = |object_id, key: &[u8]| {
        doc.get_object(object_id)
            .ok()
            .and_then(|page| page.as_dict().ok())
            .and_then(|page| page.get(b"Resources").ok())
            .and_then(|r| doc.dereference(r).ok())
            .and_then(|(_, resolved)| resolved.as_dict().ok())
            .and_then(|res| res.get(key).ok())
            .and_then(|entry| doc.dereference(entry).ok())
            .and_then(|(_, resolved)| resolved.as_dict().ok())
            .is_some_and(|dict| !dict.is_empty())
    };

    let image_only_pages = pages
        .values()
        .filter(|&&object_id| resource(object_id, b"XObject") && !resource(object_id, b"Font"))
        .count();

    let ratio = image_only_pages as f64 / pages.len() as f64;
    info!(
        total_pages = pages.len(),
        image_only = image_only_pages,
        ratio = format!("{ratio:.2}"),
        "Scanned-page analysis"
    );

    ratio >= 0.8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_bytes() {
        let result = extract_text_from_pdf(b"this is not a pdf");
        assert!(matches!(result, PdfContent::Error(_)));
    }

    #[test]
    fn test_garbage_bytes_are_malformed() {
        let err = document_text("po.pdf", b"%PDF-garbage").unwrap_err();
        assert!(matches!(err, PipelineError::MalformedDocument { ref document, .. } if document == "po.pdf"));
        assert!(err.is_document_scoped());
    }
}
