// src/invoice.rs

use crate::catalog::BranchId;
use crate::dialect::DocumentId;
use crate::normalize::{LineItem, NormalizedDocument, NormalizedSection, RawRecord};
use rust_decimal::Decimal;
use serde::Serialize;
use time::Date;

/// A branch invoice whose line items are final but which has no number yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingInvoice {
    pub branch: BranchId,
    pub branch_display: String,
    pub region: String,
    pub customer: String,
    pub document: DocumentId,
    pub document_index: usize,
    pub document_name: String,
    pub po_reference: Option<String>,
    pub delivery_date: Date,
    pub records: Vec<RawRecord>,
    pub items: Vec<LineItem>,
}

impl PendingInvoice {
    pub fn from_section(
        document: &NormalizedDocument,
        document_index: usize,
        section: &NormalizedSection,
        customer: &str,
        delivery_date: Date,
    ) -> Self {
        Self {
            branch: section.branch.clone(),
            branch_display: section.branch_display.clone(),
            region: section.region.clone(),
            customer: format!("{customer} - {}", section.branch_display),
            document: document.id.clone(),
            document_index,
            document_name: document.name.clone(),
            po_reference: section.po_reference.clone(),
            delivery_date,
            records: section.records.clone(),
            items: section.items.clone(),
        }
    }

    /// Consumes the pending invoice; a number can only be given once.
    pub fn assign(self, number: u64) -> InvoiceDraft {
        let subtotal: Decimal = self.items.iter().map(LineItem::total).sum();
        InvoiceDraft {
            number,
            subtotal,
            grand_total: subtotal,
            branch: self.branch,
            branch_display: self.branch_display,
            region: self.region,
            customer: self.customer,
            document: self.document,
            document_name: self.document_name,
            po_reference: self.po_reference,
            delivery_date: self.delivery_date,
            records: self.records,
            items: self.items,
        }
    }
}

/// A numbered branch invoice ready for packaging.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceDraft {
    pub number: u64,
    pub branch: BranchId,
    pub branch_display: String,
    pub region: String,
    pub customer: String,
    pub document: DocumentId,
    pub document_name: String,
    pub po_reference: Option<String>,
    #[serde(serialize_with = "serialize_date")]
    pub delivery_date: Date,
    #[serde(skip)]
    pub records: Vec<RawRecord>,
    pub items: Vec<LineItem>,
    pub subtotal: Decimal,
    pub grand_total: Decimal,
}

impl InvoiceDraft {
    /// `<number>_<branch>[_<po>]`, the stem of this invoice's workbook.
    pub fn file_stem(&self) -> String {
        let mut stem = format!("{}_{}", self.number, self.branch_display);
        if let Some(po) = self.po_reference.as_deref().filter(|p| !p.is_empty()) {
            stem.push('_');
            stem.push_str(po);
        }
        stem.replace(['/', '\\'], "-")
    }
}

fn serialize_date<S: serde::Serializer>(date: &Date, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(date)
}
