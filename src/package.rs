// src/package.rs

use crate::aggregate::PivotSummary;
use crate::config::Issuer;
use crate::error::PipelineError;
use crate::invoice::InvoiceDraft;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_xlsxwriter::{Format, FormatAlign, FormatBorder, Workbook, Worksheet, XlsxError};
use serde::Serialize;
use std::io::{Cursor, Write};
use time::Date;
use tracing::{debug, info};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

/// Excel's limit on worksheet name length.
pub const MAX_SHEET_NAME: usize = 31;

/// One named blob of the output archive.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifestEntry {
    pub name: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

impl ManifestEntry {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

/// Everything one run hands to the uploader.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchiveManifest {
    /// Per-branch workbooks, grouped into `inner_archive`.
    pub branch_workbooks: Vec<ManifestEntry>,
    pub inner_archive: String,
    /// Summaries, consolidated invoices, totals and error reports.
    pub entries: Vec<ManifestEntry>,
}

impl ArchiveManifest {
    /// Outer ZIP: the inner branch archive followed by every other entry.
    pub fn to_zip(&self) -> Result<Vec<u8>, PipelineError> {
        let inner = zip_entries(&self.branch_workbooks)?;
        let mut all = Vec::with_capacity(self.entries.len() + 1);
        all.push(ManifestEntry::new(self.inner_archive.clone(), inner));
        all.extend(self.entries.iter().cloned());
        zip_entries(&all)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.branch_workbooks
            .iter()
            .chain(&self.entries)
            .map(|e| e.name.as_str())
    }
}

fn zip_entries(entries: &[ManifestEntry]) -> Result<Vec<u8>, PipelineError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for entry in entries {
        writer.start_file(entry.name.as_str(), options)?;
        writer.write_all(&entry.bytes)?;
    }
    Ok(writer.finish()?.into_inner())
}

// ---------------------------------------------------------------------------
// Workbook rendering
// ---------------------------------------------------------------------------

struct Formats {
    meta: Format,
    heading: Format,
    cell: Format,
    money: Format,
    total_label: Format,
    total_money: Format,
    bold: Format,
}

impl Formats {
    fn new() -> Self {
        let cell = Format::new().set_border(FormatBorder::Thin);
        Self {
            meta: Format::new().set_bold().set_border(FormatBorder::Medium),
            heading: Format::new()
                .set_bold()
                .set_border(FormatBorder::Thin)
                .set_align(FormatAlign::Center),
            money: cell.clone().set_num_format("0.00"),
            cell,
            total_label: Format::new()
                .set_bold()
                .set_border(FormatBorder::Medium)
                .set_align(FormatAlign::Center),
            total_money: Format::new()
                .set_bold()
                .set_border(FormatBorder::Medium)
                .set_num_format("0.00"),
            bold: Format::new().set_bold(),
        }
    }
}

fn money(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

fn safe_sheet_name(stem: &str) -> String {
    stem.chars()
        .map(|c| if "[]:*?/\\".contains(c) { '-' } else { c })
        .take(MAX_SHEET_NAME)
        .collect::<String>()
        .trim_matches('\'')
        .to_string()
}

/// Renders the output workbooks for one batch and delivery date.
pub struct Packager<'a> {
    issuer: &'a Issuer,
    delivery_date: Date,
    formats: Formats,
}

impl<'a> Packager<'a> {
    pub fn new(issuer: &'a Issuer, delivery_date: Date) -> Self {
        Self {
            issuer,
            delivery_date,
            formats: Formats::new(),
        }
    }

    /// `Orders` (extracted rows) plus `Invoice` (formatted view) for one branch.
    pub fn branch_workbook(&self, draft: &InvoiceDraft) -> Result<ManifestEntry, PipelineError> {
        let mut workbook = Workbook::new();

        let mut orders = Worksheet::new();
        orders.set_name("Orders")?;
        self.write_orders(&mut orders, draft)?;
        workbook.push_worksheet(orders);

        let mut view = Worksheet::new();
        view.set_name("Invoice")?;
        self.write_invoice_view(&mut view, draft)?;
        workbook.push_worksheet(view);

        let name = format!("{}.xlsx", draft.file_stem());
        debug!(workbook = %name, items = draft.items.len(), "Branch workbook rendered");
        Ok(ManifestEntry::new(name, workbook.save_to_buffer()?))
    }

    /// Every invoice view in one workbook, one sheet per invoice. Sheets whose
    /// truncated names collide keep the last invoice written.
    pub fn consolidated_workbook(&self, drafts: &[InvoiceDraft]) -> Result<ManifestEntry, PipelineError> {
        let mut sheets: Vec<(String, &InvoiceDraft)> = Vec::new();
        for draft in drafts {
            let name = safe_sheet_name(&draft.file_stem());
            match sheets.iter_mut().find(|(n, _)| *n == name) {
                Some(slot) => slot.1 = draft,
                None => sheets.push((name, draft)),
            }
        }

        let mut workbook = Workbook::new();
        for (name, draft) in &sheets {
            let mut sheet = Worksheet::new();
            sheet.set_name(name.as_str())?;
            self.write_invoice_view(&mut sheet, draft)?;
            workbook.push_worksheet(sheet);
        }
        if sheets.is_empty() {
            workbook.add_worksheet().set_name("Invoices")?;
        }

        Ok(ManifestEntry::new(
            format!("invoices_{}.xlsx", self.delivery_date),
            workbook.save_to_buffer()?,
        ))
    }

    pub fn summary_workbook(&self, summary: &PivotSummary) -> Result<ManifestEntry, PipelineError> {
        let f = &self.formats;
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.set_name("Summary")?;

        let branches = summary.columns.len() as u16;
        let mut headers = vec!["Product ID".to_string(), "Product".to_string(), "Unit Price".to_string()];
        headers.extend(summary.columns.iter().map(|c| c.display.clone()));
        headers.extend(["Total Qty", "Grand Total", "Category"].map(str::to_string));
        for (col, header) in headers.iter().enumerate() {
            sheet.write_string_with_format(0, col as u16, header, &f.heading)?;
        }
        let total_col = 3 + branches;

        let mut row = 1u32;
        for data in &summary.rows {
            sheet.write_string_with_format(row, 0, data.product_id.to_string(), &f.cell)?;
            sheet.write_string_with_format(row, 1, &data.name, &f.cell)?;
            sheet.write_number_with_format(row, 2, money(data.unit_price), &f.money)?;
            for (i, q) in data.quantities.iter().enumerate() {
                sheet.write_number_with_format(row, 3 + i as u16, *q as f64, &f.cell)?;
            }
            sheet.write_number_with_format(row, total_col, data.total_quantity as f64, &f.cell)?;
            sheet.write_number_with_format(row, total_col + 1, money(data.grand_total), &f.money)?;
            sheet.write_string_with_format(row, total_col + 2, &data.category, &f.cell)?;
            row += 1;
        }

        sheet.write_string_with_format(row, 1, "Grand Total", &f.total_label)?;
        for (i, q) in summary.totals.quantities.iter().enumerate() {
            sheet.write_number_with_format(row, 3 + i as u16, *q as f64, &f.total_label)?;
        }
        sheet.write_number_with_format(row, total_col, summary.totals.total_quantity as f64, &f.total_label)?;
        sheet.write_number_with_format(row, total_col + 1, money(summary.totals.grand_total), &f.total_money)?;

        row += 1;
        sheet.write_string_with_format(row, 1, "Branch Count", &f.bold)?;
        sheet.write_number_with_format(row, total_col, summary.branch_count as f64, &f.bold)?;

        sheet.set_column_width(1, 32)?;

        Ok(ManifestEntry::new(
            format!("summary_{}_{}.xlsx", summary.region, self.delivery_date),
            workbook.save_to_buffer()?,
        ))
    }

    /// PO reference, total and invoice number of every invoice.
    pub fn totals_workbook(&self, drafts: &[InvoiceDraft]) -> Result<ManifestEntry, PipelineError> {
        let f = &self.formats;
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.set_name("PO Totals")?;

        for (col, header) in ["Branch", "Branch ID", "Document", "PO Number", "Invoice Total", "Invoice Number"]
            .iter()
            .enumerate()
        {
            sheet.write_string_with_format(0, col as u16, *header, &f.heading)?;
        }
        for (i, draft) in drafts.iter().enumerate() {
            let row = i as u32 + 1;
            sheet.write_string_with_format(row, 0, &draft.branch_display, &f.cell)?;
            sheet.write_string_with_format(row, 1, draft.branch.as_str(), &f.cell)?;
            sheet.write_string_with_format(row, 2, &draft.document_name, &f.cell)?;
            sheet.write_string_with_format(row, 3, draft.po_reference.as_deref().unwrap_or(""), &f.cell)?;
            sheet.write_number_with_format(row, 4, money(draft.grand_total), &f.money)?;
            sheet.write_number_with_format(row, 5, draft.number as f64, &f.cell)?;
        }
        sheet.set_column_width(2, 28)?;

        Ok(ManifestEntry::new(
            format!("po_totals_{}.xlsx", self.delivery_date),
            workbook.save_to_buffer()?,
        ))
    }

    /// Human-readable failure report for one document.
    pub fn error_entry(document: &str, reason: &str) -> ManifestEntry {
        let base = document.rsplit('/').next().unwrap_or(document);
        ManifestEntry::new(
            format!("errors/{base}.txt"),
            format!("{document}\n{reason}\n").into_bytes(),
        )
    }

    pub fn manifest(&self, branch_workbooks: Vec<ManifestEntry>, entries: Vec<ManifestEntry>) -> ArchiveManifest {
        let manifest = ArchiveManifest {
            branch_workbooks,
            inner_archive: format!("branches_{}.zip", self.delivery_date),
            entries,
        };
        info!(
            branch_workbooks = manifest.branch_workbooks.len(),
            entries = manifest.entries.len(),
            "Archive manifest assembled"
        );
        manifest
    }

    fn write_orders(&self, sheet: &mut Worksheet, draft: &InvoiceDraft) -> Result<(), XlsxError> {
        let f = &self.formats;
        let headers = ["ID", "Barcode", "Source Name", "Product", "Qty", "Price", "Unit Price", "Quantity", "Total"];
        for (col, header) in headers.iter().enumerate() {
            sheet.write_string_with_format(0, col as u16, *header, &f.heading)?;
        }

        let mut row = 1u32;
        for (record, item) in draft.records.iter().zip(&draft.items) {
            sheet.write_string(row, 0, &record.identifier)?;
            sheet.write_string(row, 1, &record.barcode)?;
            sheet.write_string(row, 2, &record.name)?;
            sheet.write_string(row, 3, &item.name)?;
            sheet.write_string(row, 4, &record.quantity)?;
            sheet.write_string(row, 5, &record.price)?;
            sheet.write_number_with_format(row, 6, money(item.unit_price), &f.money)?;
            sheet.write_number(row, 7, item.quantity as f64)?;
            sheet.write_number_with_format(row, 8, money(item.total()), &f.money)?;
            row += 1;
        }

        let quantity: u64 = draft.items.iter().map(|i| u64::from(i.quantity)).sum();
        sheet.write_string_with_format(row, 3, "Grand Total", &f.total_label)?;
        sheet.write_number_with_format(row, 7, quantity as f64, &f.total_label)?;
        sheet.write_number_with_format(row, 8, money(draft.grand_total), &f.total_money)?;
        sheet.set_column_width(3, 32)?;
        Ok(())
    }

    fn write_invoice_view(&self, sheet: &mut Worksheet, draft: &InvoiceDraft) -> Result<(), XlsxError> {
        let f = &self.formats;

        for (i, line) in self.issuer.header.iter().enumerate() {
            sheet.merge_range(i as u32, 1, i as u32, 2, line, &f.meta)?;
        }
        sheet.write_string_with_format(0, 5, "Sales Invoice", &f.meta)?;

        let po = draft.po_reference.clone().unwrap_or_default();
        let fields = [
            (1, "Invoice #", draft.number.to_string()),
            (2, "Delivery Date", self.delivery_date.to_string()),
            (3, "PO Number", po),
            (5, "Customer", draft.customer.clone()),
            (6, "Branch", draft.branch_display.clone()),
        ];
        for (row, label, value) in &fields {
            sheet.write_string_with_format(*row, 5, *label, &f.meta)?;
            sheet.write_string_with_format(*row, 4, value, &f.meta)?;
        }

        let header_row = 10u32;
        for (col, header) in ["Barcode", "Product", "Unit Price", "Quantity", "Total"].iter().enumerate() {
            sheet.write_string_with_format(header_row, col as u16, *header, &f.heading)?;
        }

        let mut row = header_row + 1;
        for item in &draft.items {
            sheet.write_string_with_format(row, 0, &item.barcode, &f.cell)?;
            sheet.write_string_with_format(row, 1, &item.name, &f.cell)?;
            sheet.write_number_with_format(row, 2, money(item.unit_price), &f.money)?;
            sheet.write_number_with_format(row, 3, item.quantity as f64, &f.cell)?;
            sheet.write_number_with_format(row, 4, money(item.total()), &f.money)?;
            row += 1;
        }

        sheet.merge_range(row, 0, row, 3, "Subtotal", &f.total_label)?;
        sheet.write_number_with_format(row, 4, money(draft.subtotal), &f.total_money)?;
        row += 1;
        sheet.merge_range(row, 0, row, 3, "Total", &f.total_label)?;
        sheet.write_number_with_format(row, 4, money(draft.grand_total), &f.total_money)?;
        row += 2;

        for line in &self.issuer.footer {
            sheet.merge_range(row, 0, row, 3, line, &f.total_label)?;
            row += 1;
        }

        sheet.set_column_width(0, 18)?;
        sheet.set_column_width(1, 36)?;
        sheet.set_column_width(4, 22)?;
        sheet.set_column_width(5, 16)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::summarize;
    use crate::catalog::{BranchCatalog, BranchId, CategoryTable};
    use crate::dialect::DocumentId;
    use crate::invoice::PendingInvoice;
    use crate::normalize::{LineItem, ProductId, RawRecord};
    use crate::sheet::{Cell, read_workbook};
    use std::io::Read;
    use time::macros::date;

    fn draft(number: u64, branch: &str, display: &str, po: &str) -> InvoiceDraft {
        let doc = DocumentId::derive(0, "po.pdf", b"");
        let record = RawRecord {
            identifier: "1001".to_string(),
            barcode: "2200000000017".to_string(),
            name: String::new(),
            quantity: "3".to_string(),
            price: "2.500000".to_string(),
            document: doc.clone(),
            branch_token: branch.to_string(),
        };
        let item = LineItem::new(
            ProductId::Code(1001),
            "2200000000017".to_string(),
            "Tomato".to_string(),
            Decimal::new(250, 2),
            3,
            BranchId::new(branch),
            doc.clone(),
            "alexandria".to_string(),
        );
        PendingInvoice {
            branch: BranchId::new(branch),
            branch_display: display.to_string(),
            region: "alexandria".to_string(),
            customer: format!("Breadfast - {display}"),
            document: doc,
            document_index: 0,
            document_name: "po.pdf".to_string(),
            po_reference: Some(po.to_string()),
            delivery_date: date!(2025 - 03 - 14),
            records: vec![record],
            items: vec![item],
        }
        .assign(number)
    }

    #[test]
    fn test_branch_workbook_sheets() {
        let issuer = Issuer::default();
        let packager = Packager::new(&issuer, date!(2025 - 03 - 14));
        let entry = packager.branch_workbook(&draft(501, "loran", "Loran", "P9")).unwrap();
        assert_eq!(entry.name, "501_Loran_P9.xlsx");

        let sheets = read_workbook(&entry.bytes).unwrap();
        let names: Vec<&str> = sheets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Orders", "Invoice"]);

        let orders = &sheets[0].grid;
        assert_eq!(orders.cell(1, 1).text(), "2200000000017");
        assert_eq!(orders.cell(2, 3).text(), "Grand Total");
        assert_eq!(orders.cell(2, 8), &Cell::Number(7.5));

        let view = &sheets[1].grid;
        assert_eq!(view.cell(1, 4).text(), "501");
        assert_eq!(view.cell(2, 4).text(), "2025-03-14");
        assert_eq!(view.cell(11, 1).text(), "Tomato");
        assert_eq!(view.cell(12, 0).text(), "Subtotal");
        assert_eq!(view.cell(13, 4), &Cell::Number(7.5));
    }

    #[test]
    fn test_consolidated_last_writer_wins() {
        let issuer = Issuer::default();
        let packager = Packager::new(&issuer, date!(2025 - 03 - 14));
        let long = "x".repeat(40);
        let drafts = vec![
            draft(1, "a", &long, "P1"),
            draft(2, "b", "Smouha", "P2"),
            // same 31-char prefix as the first one
            draft(1, "c", &long, "P3"),
        ];
        let entry = packager.consolidated_workbook(&drafts).unwrap();
        assert_eq!(entry.name, "invoices_2025-03-14.xlsx");

        let sheets = read_workbook(&entry.bytes).unwrap();
        assert_eq!(sheets.len(), 2);
        assert_eq!(sheets[0].name.chars().count(), MAX_SHEET_NAME);
        assert_eq!(sheets[0].grid.cell(3, 4).text(), "P3");
    }

    #[test]
    fn test_summary_and_totals_workbooks() {
        let issuer = Issuer::default();
        let packager = Packager::new(&issuer, date!(2025 - 03 - 14));
        let drafts = vec![draft(10, "loran", "Loran", "P1"), draft(11, "smouha", "Smouha", "P2")];
        let items: Vec<LineItem> = drafts.iter().flat_map(|d| d.items.clone()).collect();
        let summary = &summarize(&items, &BranchCatalog::builtin("breadfast"), &CategoryTable::default())[0];

        let entry = packager.summary_workbook(summary).unwrap();
        assert_eq!(entry.name, "summary_alexandria_2025-03-14.xlsx");
        let grid = &read_workbook(&entry.bytes).unwrap()[0].grid;
        assert_eq!(grid.cell(0, 3).text(), "لوران");
        assert_eq!(grid.cell(2, 1).text(), "Grand Total");
        assert_eq!(grid.cell(2, 5), &Cell::Number(6.0));
        assert_eq!(grid.cell(3, 1).text(), "Branch Count");
        assert_eq!(grid.cell(3, 5), &Cell::Number(2.0));

        let totals = packager.totals_workbook(&drafts).unwrap();
        let grid = &read_workbook(&totals.bytes).unwrap()[0].grid;
        assert_eq!(grid.cell(2, 3).text(), "P2");
        assert_eq!(grid.cell(2, 5).text(), "11");
    }

    #[test]
    fn test_manifest_zip_layout() {
        let issuer = Issuer::default();
        let packager = Packager::new(&issuer, date!(2025 - 03 - 14));
        let branch = packager.branch_workbook(&draft(1, "loran", "Loran", "P1")).unwrap();
        let reason = PipelineError::malformed("in/bad.pdf", "missing section marker(s)").to_string();
        let error = Packager::error_entry("in/bad.pdf", &reason);
        let manifest = packager.manifest(vec![branch], vec![error]);
        assert_eq!(
            manifest.names().collect::<Vec<_>>(),
            vec!["1_Loran_P1.xlsx", "errors/bad.pdf.txt"]
        );

        let bytes = manifest.to_zip().unwrap();
        let mut outer = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let names: Vec<String> = outer.file_names().map(str::to_string).collect();
        assert!(names.contains(&"branches_2025-03-14.zip".to_string()));
        assert!(names.contains(&"errors/bad.pdf.txt".to_string()));

        let mut inner_bytes = Vec::new();
        outer
            .by_name("branches_2025-03-14.zip")
            .unwrap()
            .read_to_end(&mut inner_bytes)
            .unwrap();
        let inner = zip::ZipArchive::new(Cursor::new(inner_bytes)).unwrap();
        assert_eq!(inner.file_names().collect::<Vec<_>>(), vec!["1_Loran_P1.xlsx"]);
    }
}
