// src/dialect/mod.rs

mod breadfast;
mod goodsmart;
mod halan;
mod rabbit;
mod talabat;

pub use halan::increment_po;

use crate::catalog::BranchId;
use crate::error::PipelineError;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::{Cursor, Read};
use std::{fmt, str::FromStr};
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// Source documents
// ---------------------------------------------------------------------------

/// Stable identity of one document within a batch: its position plus a content hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn derive(index: usize, name: &str, bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        hasher.update(bytes);
        let digest = format!("{:x}", hasher.finalize());
        Self(format!("{index:03}-{}", &digest[..12]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DocumentContent {
    Pdf(Vec<u8>),
    /// Text already extracted upstream, e.g. by OCR of a scanned PDF.
    Text(String),
    Workbook(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    pub name: String,
    pub content: DocumentContent,
}

impl SourceDocument {
    /// Classifies by file extension; `None` for anything the parsers cannot read.
    pub fn from_file(name: impl Into<String>, bytes: Vec<u8>) -> Option<Self> {
        let name = name.into();
        let lower = name.to_lowercase();
        let content = if lower.ends_with(".pdf") {
            DocumentContent::Pdf(bytes)
        } else if lower.ends_with(".xlsx") || lower.ends_with(".xlsm") {
            DocumentContent::Workbook(bytes)
        } else if lower.ends_with(".txt") {
            DocumentContent::Text(String::from_utf8_lossy(&bytes).into_owned())
        } else {
            return None;
        };
        Some(Self { name, content })
    }

    pub fn bytes(&self) -> &[u8] {
        match &self.content {
            DocumentContent::Pdf(b) | DocumentContent::Workbook(b) => b,
            DocumentContent::Text(t) => t.as_bytes(),
        }
    }

    /// File name without directories or extension.
    pub fn stem(&self) -> &str {
        let base = self.name.rsplit('/').next().unwrap_or(&self.name);
        base.rsplit_once('.').map_or(base, |(stem, _)| stem)
    }

    fn text(&self) -> Result<String, PipelineError> {
        match &self.content {
            DocumentContent::Text(t) => Ok(t.clone()),
            DocumentContent::Pdf(bytes) => crate::pdf_extract::document_text(&self.name, bytes),
            DocumentContent::Workbook(_) => Err(PipelineError::malformed(
                &self.name,
                "expected a PDF or text document, got a workbook",
            )),
        }
    }

    fn workbook(&self) -> Result<Vec<crate::sheet::Sheet>, PipelineError> {
        match &self.content {
            DocumentContent::Workbook(bytes) => crate::sheet::read_workbook(bytes),
            _ => Err(PipelineError::malformed(
                &self.name,
                "expected an .xlsx workbook",
            )),
        }
    }
}

/// Expands a ZIP upload into source documents, in archive order.
pub fn documents_from_archive(bytes: &[u8]) -> Result<Vec<SourceDocument>, PipelineError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut documents = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let name = entry.name().to_string();
        if entry.is_dir() || name.starts_with("__MACOSX/") {
            continue;
        }
        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        match SourceDocument::from_file(name.clone(), data) {
            Some(doc) => documents.push(doc),
            None => debug!(entry = %name, "Skipping unsupported archive entry"),
        }
    }

    info!(documents = documents.len(), "Archive expanded");
    Ok(documents)
}

// ---------------------------------------------------------------------------
// Parsed form
// ---------------------------------------------------------------------------

/// How a section names its branch.
#[derive(Debug, Clone, PartialEq)]
pub enum BranchToken {
    /// Fixed by section order; no text matching.
    Positional(BranchId),
    /// Raw tokens to try in order against the catalog; the first that resolves wins.
    Candidates(Vec<String>),
}

impl BranchToken {
    pub fn label(&self) -> String {
        match self {
            Self::Positional(id) => id.to_string(),
            Self::Candidates(tokens) => tokens.first().cloned().unwrap_or_default(),
        }
    }
}

/// Four parallel token streams that still need aligning.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenColumns {
    pub identifiers: Vec<String>,
    pub barcodes: Vec<String>,
    pub quantities: Vec<String>,
    pub prices: Vec<String>,
}

/// One product row already aligned by the source layout.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow {
    pub identifier: String,
    pub barcode: String,
    pub name: String,
    pub quantity: String,
    pub price: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SectionBody {
    Columns(TokenColumns),
    Rows(Vec<RawRow>),
}

/// The part of a document that belongs to one branch.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub branch: BranchToken,
    pub po_reference: Option<String>,
    /// Overrides branch/dialect region routing for this section.
    pub region: Option<String>,
    pub body: SectionBody,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDocument {
    pub id: DocumentId,
    pub name: String,
    pub sections: Vec<Section>,
}

/// Slices `text` at every match of `marker`: each slice runs from one marker's
/// start to the next marker's start, the last one to the end of the text.
pub fn split_sections<'t>(text: &'t str, marker: &Regex) -> Vec<(&'t str, &'t str)> {
    let starts: Vec<_> = marker.find_iter(text).collect();
    starts
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let end = starts.get(i + 1).map_or(text.len(), |next| next.start());
            (m.as_str(), &text[m.start()..end])
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Dialects
// ---------------------------------------------------------------------------

/// How section branch tokens become catalog branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchMode {
    Positional,
    /// Exact alias first, then approximate matching.
    Approximate,
    /// Literal alias tokens; approximate matching is only a fallback for typos.
    Literal,
}

/// Where purchase-order references come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoScheme {
    /// Printed inside the document or its name.
    InDocument,
    /// Supplied by the caller, same for every section.
    Caller,
    /// Caller's base reference, incremented per present branch in priority order.
    CallerSequence,
}

/// Per-client parsing and numbering rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dialect {
    BreadfastAlexandria,
    BreadfastMansoura,
    Talabat,
    Halan,
    GoodsMart,
    Rabbit,
}

impl Dialect {
    pub const ALL: [Dialect; 6] = [
        Self::BreadfastAlexandria,
        Self::BreadfastMansoura,
        Self::Talabat,
        Self::Halan,
        Self::GoodsMart,
        Self::Rabbit,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BreadfastAlexandria => "breadfast-alexandria",
            Self::BreadfastMansoura => "breadfast-mansoura",
            Self::Talabat => "talabat",
            Self::Halan => "halan",
            Self::GoodsMart => "goodsmart",
            Self::Rabbit => "rabbit",
        }
    }

    /// Key of the branch catalog in the tables file.
    pub fn client(self) -> &'static str {
        match self {
            Self::BreadfastAlexandria | Self::BreadfastMansoura => "breadfast",
            Self::Talabat => "talabat",
            Self::Halan => "halan",
            Self::GoodsMart => "goodsmart",
            Self::Rabbit => "rabbit",
        }
    }

    pub fn customer(self) -> &'static str {
        match self {
            Self::BreadfastAlexandria | Self::BreadfastMansoura => "Breadfast",
            Self::Talabat => "Talabat",
            Self::Halan => "Halan",
            Self::GoodsMart => "GoodsMart",
            Self::Rabbit => "Rabbit",
        }
    }

    pub fn branch_mode(self) -> BranchMode {
        match self {
            Self::BreadfastAlexandria | Self::BreadfastMansoura | Self::GoodsMart => {
                BranchMode::Positional
            }
            Self::Talabat => BranchMode::Approximate,
            Self::Halan | Self::Rabbit => BranchMode::Literal,
        }
    }

    pub fn po_scheme(self) -> PoScheme {
        match self {
            Self::BreadfastAlexandria | Self::BreadfastMansoura | Self::Talabat | Self::Rabbit => {
                PoScheme::InDocument
            }
            Self::GoodsMart => PoScheme::Caller,
            Self::Halan => PoScheme::CallerSequence,
        }
    }

    /// Region for branches the catalog does not route anywhere.
    pub fn default_region(self) -> &'static str {
        match self {
            Self::BreadfastAlexandria => "alexandria",
            Self::BreadfastMansoura => "mansoura",
            Self::Talabat => "cairo",
            Self::Halan => "halan",
            Self::GoodsMart => "goodsmart",
            Self::Rabbit => "rabbit",
        }
    }

    /// Workbook orders print product names that can stand in for a missing
    /// table entry. PDF orders are named through the tables only.
    pub fn prints_product_names(self) -> bool {
        matches!(self, Self::Halan | Self::GoodsMart | Self::Rabbit)
    }

    /// Identifier printed on rows that carry no barcode token.
    pub fn no_barcode_sentinel(self) -> Option<&'static str> {
        match self {
            Self::BreadfastAlexandria => Some(breadfast::NO_BARCODE_ID),
            _ => None,
        }
    }

    /// Splits one document into branch sections of raw tokens or rows.
    pub fn parse(
        self,
        id: DocumentId,
        document: &SourceDocument,
        po_reference: Option<&str>,
    ) -> Result<ParsedDocument, PipelineError> {
        let sections = match self {
            Self::BreadfastAlexandria => breadfast::parse_alexandria(&document.name, &document.text()?)?,
            Self::BreadfastMansoura => breadfast::parse_mansoura(&document.text()?)?,
            Self::Talabat => talabat::parse(&document.name, &document.text()?)?,
            Self::Halan => halan::parse(&document.workbook()?)?,
            Self::GoodsMart => goodsmart::parse(&document.name, &document.workbook()?, po_reference)?,
            Self::Rabbit => rabbit::parse(&document.name, &document.workbook()?)?,
        };

        info!(
            dialect = self.as_str(),
            sections = sections.len(),
            "Document parsed"
        );
        Ok(ParsedDocument {
            id,
            name: document.name.clone(),
            sections,
        })
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                let known: Vec<_> = Self::ALL.iter().map(|d| d.as_str()).collect();
                format!("unknown dialect {s:?}, expected one of {}", known.join(", "))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    #[test]
    fn test_document_id_is_deterministic() {
        let a = DocumentId::derive(1, "po.pdf", b"abc");
        let b = DocumentId::derive(1, "po.pdf", b"abc");
        let c = DocumentId::derive(1, "po.pdf", b"abd");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.as_str().starts_with("001-"));
        assert_eq!(a.as_str().len(), 16);
    }

    #[test]
    fn test_split_sections() {
        let re = Regex::new(r"A FP #\d+").unwrap();
        let text = "header A FP #1 one A FP #2 two";
        let sections = split_sections(text, &re);
        assert_eq!(
            sections,
            vec![("A FP #1", "A FP #1 one "), ("A FP #2", "A FP #2 two")]
        );
        assert!(split_sections("nothing here", &re).is_empty());
    }

    #[test]
    fn test_dialect_from_str() {
        assert_eq!("Talabat".parse::<Dialect>(), Ok(Dialect::Talabat));
        assert_eq!(
            "breadfast-alexandria".parse::<Dialect>(),
            Ok(Dialect::BreadfastAlexandria)
        );
        assert!("carrefour".parse::<Dialect>().is_err());
    }

    #[test]
    fn test_documents_from_archive() {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        writer.add_directory("orders/", options).unwrap();
        writer.start_file("orders/PO123.txt", options).unwrap();
        writer.write_all(b"EG_Maadi_DS").unwrap();
        writer.start_file("__MACOSX/orders/._PO123.txt", options).unwrap();
        writer.write_all(b"junk").unwrap();
        writer.start_file("notes.docx", options).unwrap();
        writer.write_all(b"junk").unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let documents = documents_from_archive(&bytes).unwrap();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].name, "orders/PO123.txt");
        assert_eq!(documents[0].stem(), "PO123");
        assert_eq!(
            documents[0].content,
            DocumentContent::Text("EG_Maadi_DS".to_string())
        );
    }

    #[test]
    fn test_workbook_dialect_rejects_text() {
        let doc = SourceDocument::from_file("order.txt", b"hello".to_vec()).unwrap();
        let err = Dialect::Halan
            .parse(DocumentId::derive(0, &doc.name, doc.bytes()), &doc, None)
            .unwrap_err();
        assert!(matches!(err, PipelineError::MalformedDocument { .. }));
    }
}
