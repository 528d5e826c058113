// src/error.rs

use crate::catalog::BranchId;
use crate::dialect::DocumentId;
use thiserror::Error;

/// Failures surfaced by the pipeline.
///
/// `MalformedDocument` and the spreadsheet/PDF variants are fatal to one
/// document only; the batch runner records them and moves on.
/// `AllocationConflict` and `InvalidDeliveryDate` halt the whole batch.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("malformed document {document}: {reason}")]
    MalformedDocument { document: String, reason: String },

    #[error("invoice number allocated twice for branch {branch} in document {document}")]
    AllocationConflict { branch: BranchId, document: DocumentId },

    #[error("invalid delivery date {0:?}, expected YYYY-MM-DD")]
    InvalidDeliveryDate(String),

    #[error("spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("workbook rendering failed: {0}")]
    Workbook(#[from] rust_xlsxwriter::XlsxError),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn malformed(document: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedDocument {
            document: document.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error is confined to a single document.
    pub fn is_document_scoped(&self) -> bool {
        matches!(
            self,
            Self::MalformedDocument { .. } | Self::Spreadsheet(_) | Self::Workbook(_)
        )
    }
}

impl From<calamine::XlsxError> for PipelineError {
    fn from(err: calamine::XlsxError) -> Self {
        Self::Spreadsheet(err.to_string())
    }
}

/// Non-fatal findings recorded during a batch for later audit.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub enum Diagnostic {
    /// A branch token scored below the similarity threshold; its records were dropped.
    UnresolvedBranch {
        document: String,
        token: String,
        best_score: u8,
        dropped_records: usize,
    },
    /// Parallel token sequences disagreed in length after repair.
    AlignmentDefect {
        document: String,
        branch: String,
        identifiers: usize,
        barcodes: usize,
        quantities: usize,
        prices: usize,
    },
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnresolvedBranch {
                document,
                token,
                best_score,
                dropped_records,
            } => write!(
                f,
                "{document}: branch token {token:?} unresolved (best score {best_score}), {dropped_records} record(s) dropped"
            ),
            Self::AlignmentDefect {
                document,
                branch,
                identifiers,
                barcodes,
                quantities,
                prices,
            } => write!(
                f,
                "{document} [{branch}]: misaligned columns ids={identifiers} barcodes={barcodes} quantities={quantities} prices={prices}"
            ),
        }
    }
}
