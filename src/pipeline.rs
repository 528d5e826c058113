// src/pipeline.rs

use crate::aggregate::{PivotSummary, summarize};
use crate::allocate::{Allocation, Claim, allocate};
use crate::catalog::{BranchCatalog, Tables};
use crate::config::Issuer;
use crate::dialect::{Dialect, DocumentId, PoScheme, SourceDocument, increment_po};
use crate::error::{Diagnostic, PipelineError};
use crate::invoice::{InvoiceDraft, PendingInvoice};
use crate::normalize::{LineItem, NormalizedDocument, NormalizedSection, Normalizer};
use crate::package::{ArchiveManifest, ManifestEntry, Packager};
use serde::Serialize;
use time::Date;
use time::macros::format_description;
use tracing::{error, info, info_span, warn};

/// One run over all pending documents of one client.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub dialect: Dialect,
    /// `YYYY-MM-DD`.
    pub delivery_date: String,
    /// First invoice number available to this batch.
    pub seed: u64,
    /// Caller-supplied PO for dialects that do not print one.
    pub po_reference: Option<String>,
    pub documents: Vec<SourceDocument>,
}

/// A document that produced no invoices, and why.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentFailure {
    pub document: String,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct BatchOutcome {
    pub dialect: Dialect,
    pub delivery_date: String,
    pub manifest: ArchiveManifest,
    /// Outer archive built from `manifest`.
    #[serde(skip)]
    pub archive: Vec<u8>,
    /// Amount the caller adds to its persisted counter.
    pub numbers_consumed: u64,
    pub next_invoice_number: u64,
    #[serde(skip)]
    pub line_items: Vec<LineItem>,
    pub drafts: Vec<InvoiceDraft>,
    pub summaries: Vec<PivotSummary>,
    pub failures: Vec<DocumentFailure>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Successfully normalized document waiting for invoice numbers.
struct Accepted {
    index: usize,
    name: String,
    invoices: Vec<PendingInvoice>,
}

pub fn parse_delivery_date(raw: &str) -> Result<Date, PipelineError> {
    let format = format_description!("[year]-[month]-[day]");
    Date::parse(raw.trim(), &format).map_err(|_| PipelineError::InvalidDeliveryDate(raw.to_string()))
}

/// Runs extraction through packaging for one batch.
///
/// Document-scoped errors are recorded as failures and the batch carries on;
/// an invalid date or an allocation conflict aborts it. Numbers are only
/// consumed by invoices that were actually rendered.
pub fn run_batch(
    request: &BatchRequest,
    tables: &Tables,
    issuer: &Issuer,
) -> Result<BatchOutcome, PipelineError> {
    let delivery_date = parse_delivery_date(&request.delivery_date)?;
    let dialect = request.dialect;
    let catalog = tables.catalog_for(dialect.client());
    let normalizer = Normalizer::new(dialect, &catalog, &tables.products);

    info!(
        dialect = %dialect,
        documents = request.documents.len(),
        seed = request.seed,
        date = %delivery_date,
        "Batch started"
    );

    let mut failures: Vec<DocumentFailure> = Vec::new();
    let mut diagnostics: Vec<Diagnostic> = Vec::new();
    let mut accepted: Vec<Accepted> = Vec::new();
    let mut po_step = 0;

    for (index, document) in request.documents.iter().enumerate() {
        let span = info_span!("document", name = %document.name, index);
        let _enter = span.enter();

        let id = DocumentId::derive(index, &document.name, document.bytes());
        let parsed = match dialect.parse(id, document, request.po_reference.as_deref()) {
            Ok(parsed) => parsed,
            Err(err) if err.is_document_scoped() => {
                error!(error = %err, "Document failed");
                failures.push(DocumentFailure {
                    document: document.name.clone(),
                    reason: err.to_string(),
                });
                continue;
            }
            Err(err) => return Err(err),
        };

        let mut normalized = normalizer.normalize(parsed);
        diagnostics.extend(normalized.diagnostics.iter().cloned());
        if dialect.po_scheme() == PoScheme::CallerSequence {
            po_step = assign_po_sequence(&mut normalized, &catalog, request.po_reference.as_deref(), po_step);
        }
        if normalized.sections.is_empty() {
            warn!("No branch sections survived normalization");
        }

        let invoices = normalized
            .sections
            .iter()
            .map(|section| {
                PendingInvoice::from_section(&normalized, index, section, dialect.customer(), delivery_date)
            })
            .collect();
        accepted.push(Accepted {
            index,
            name: normalized.name,
            invoices,
        });
    }

    let packager = Packager::new(issuer, delivery_date);

    // A rendering failure drops its document and numbering starts over from
    // the same seed, so the failed invoices leave no gaps.
    let (rendered, allocation) = loop {
        let allocation = allocate(request.seed, &claims(&accepted), &catalog.priority)?;
        match render_branches(&packager, &accepted, &allocation)? {
            Ok(rendered) => break (rendered, allocation),
            Err((index, err)) => {
                let Some(pos) = accepted.iter().position(|a| a.index == index) else {
                    return Err(err);
                };
                let dropped = accepted.remove(pos);
                error!(document = %dropped.name, error = %err, "Document artifacts failed to render");
                failures.push(DocumentFailure {
                    document: dropped.name,
                    reason: err.to_string(),
                });
            }
        }
    };

    let line_items: Vec<LineItem> = accepted
        .iter()
        .flat_map(|a| a.invoices.iter().flat_map(|i| i.items.iter().cloned()))
        .collect();
    let summaries = summarize(&line_items, &catalog, &tables.categories);

    let (drafts, branch_workbooks): (Vec<InvoiceDraft>, Vec<ManifestEntry>) = rendered.into_iter().unzip();

    let mut entries = Vec::new();
    for summary in &summaries {
        entries.push(packager.summary_workbook(summary)?);
    }
    entries.push(packager.consolidated_workbook(&drafts)?);
    entries.push(packager.totals_workbook(&drafts)?);
    for failure in &failures {
        entries.push(Packager::error_entry(&failure.document, &failure.reason));
    }

    let manifest = packager.manifest(branch_workbooks, entries);
    let archive = manifest.to_zip()?;

    info!(
        invoices = drafts.len(),
        failures = failures.len(),
        diagnostics = diagnostics.len(),
        numbers_consumed = allocation.consumed,
        next_invoice_number = allocation.next,
        "Batch finished"
    );

    Ok(BatchOutcome {
        dialect,
        delivery_date: delivery_date.to_string(),
        manifest,
        archive,
        numbers_consumed: allocation.consumed,
        next_invoice_number: allocation.next,
        line_items,
        drafts,
        summaries,
        failures,
        diagnostics,
    })
}

/// Gives each present branch the caller's PO advanced by one step, in
/// priority order. Returns the step for the next document.
fn assign_po_sequence(
    document: &mut NormalizedDocument,
    catalog: &BranchCatalog,
    base: Option<&str>,
    mut step: usize,
) -> usize {
    let Some(base) = base else {
        return step;
    };
    let rank = |s: &NormalizedSection| {
        let pos = catalog.priority.iter().position(|p| *p == s.branch);
        (pos.unwrap_or(catalog.priority.len()), s.branch.clone())
    };
    document.sections.sort_by_key(rank);
    for section in &mut document.sections {
        section.po_reference = Some(increment_po(base, step));
        step += 1;
    }
    step
}

fn claims(accepted: &[Accepted]) -> Vec<Claim> {
    accepted
        .iter()
        .flat_map(|a| {
            a.invoices.iter().map(move |invoice| Claim {
                branch: invoice.branch.clone(),
                document: invoice.document.clone(),
                document_index: a.index,
                size: 1,
            })
        })
        .collect()
}

type Rendered = Vec<(InvoiceDraft, ManifestEntry)>;

/// Outer error aborts the batch; inner error names the document to drop.
fn render_branches(
    packager: &Packager,
    accepted: &[Accepted],
    allocation: &Allocation,
) -> Result<Result<Rendered, (usize, PipelineError)>, PipelineError> {
    let mut rendered = Vec::new();
    for document in accepted {
        for invoice in &document.invoices {
            let number = allocation
                .number_for(&invoice.branch, &invoice.document)
                .ok_or_else(|| PipelineError::AllocationConflict {
                    branch: invoice.branch.clone(),
                    document: invoice.document.clone(),
                })?;
            let draft = invoice.clone().assign(number);
            match packager.branch_workbook(&draft) {
                Ok(entry) => rendered.push((draft, entry)),
                Err(err) if err.is_document_scoped() => return Ok(Err((document.index, err))),
                Err(err) => return Err(err),
            }
        }
    }
    rendered.sort_by_key(|(draft, _)| draft.number);
    Ok(Ok(rendered))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::BranchId;
    use crate::dialect::DocumentContent;
    use rust_decimal::Decimal;
    use std::io::Cursor;

    fn alexandria(first: &str, second: &str) -> String {
        format!(
            "Breadfast Purchase Order
Alexandria FP #1 Order #P1001
[{first}] Tomato 2200000000017 3.0000000 2.500000 7.50
Alexandria FP #2 Order #P1002
[{second}] Cucumber 2200000000024 5.0000000 10.000000 50.00
"
        )
    }

    fn text_doc(name: &str, text: String) -> SourceDocument {
        SourceDocument {
            name: name.to_string(),
            content: DocumentContent::Text(text),
        }
    }

    fn request(seed: u64, documents: Vec<SourceDocument>) -> BatchRequest {
        BatchRequest {
            dialect: Dialect::BreadfastAlexandria,
            delivery_date: "2025-03-14".to_string(),
            seed,
            po_reference: None,
            documents,
        }
    }

    #[test]
    fn test_alexandria_batch_numbers_loran_first() {
        let req = request(4100, vec![text_doc("po.txt", alexandria("1001", "1002"))]);
        let outcome = run_batch(&req, &Tables::default(), &Issuer::default()).unwrap();

        assert_eq!(outcome.numbers_consumed, 2);
        assert_eq!(outcome.next_invoice_number, 4102);
        let numbered: Vec<(&str, u64)> = outcome
            .drafts
            .iter()
            .map(|d| (d.branch.as_str(), d.number))
            .collect();
        assert_eq!(numbered, vec![("loran", 4100), ("smouha", 4101)]);
        // First reference in the text goes to loran.
        assert_eq!(outcome.drafts[0].po_reference.as_deref(), Some("P1001"));
        assert_eq!(outcome.drafts[1].po_reference.as_deref(), Some("P1002"));
        assert_eq!(outcome.drafts[0].grand_total, Decimal::new(5000, 2));

        assert_eq!(outcome.summaries.len(), 1);
        assert_eq!(outcome.summaries[0].totals.total_quantity, 8);
        assert_eq!(outcome.summaries[0].totals.grand_total, Decimal::new(5750, 2));

        let mut archive = zip::ZipArchive::new(Cursor::new(outcome.archive.clone())).unwrap();
        let names: Vec<String> = archive.file_names().map(str::to_string).collect();
        for expected in [
            "branches_2025-03-14.zip",
            "summary_alexandria_2025-03-14.xlsx",
            "invoices_2025-03-14.xlsx",
            "po_totals_2025-03-14.xlsx",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {expected}");
        }
        assert!(archive.by_name("branches_2025-03-14.zip").is_ok());
    }

    #[test]
    fn test_talabat_warehouse_code_resolves_with_shipped_tables() {
        let tables = Tables::load(concat!(env!("CARGO_MANIFEST_DIR"), "/config/tables.toml")).unwrap();
        let text = "Talabat Purchase Order
Deliver to: EG_Alex East_DS_ Sidi Bishr warehouse
No. SKU Supplier SKU Barcode Product Qty Unit Cost Disc. Amt.
1 90011 A-77 6221234567890 Tomato Local 1kg 12 8.50 0.00 102.00
Total 102.00
";
        let mut req = request(700, vec![text_doc("talabat_PO12345.txt", text.to_string())]);
        req.dialect = Dialect::Talabat;
        let outcome = run_batch(&req, &tables, &Issuer::default()).unwrap();

        assert!(outcome.failures.is_empty());
        assert!(
            !outcome
                .diagnostics
                .iter()
                .any(|d| matches!(d, Diagnostic::UnresolvedBranch { .. }))
        );
        assert_eq!(outcome.drafts.len(), 1);
        let draft = &outcome.drafts[0];
        assert_eq!(draft.branch, BranchId::new("sidi-bishr"));
        assert_eq!(draft.region, "alexandria");
        assert_eq!(draft.po_reference.as_deref(), Some("PO12345"));
        assert_eq!(draft.number, 700);
        assert_eq!(draft.grand_total, Decimal::new(10200, 2));
        assert_eq!(outcome.numbers_consumed, 1);
    }

    #[test]
    fn test_malformed_document_consumes_no_numbers() {
        let req = request(
            10,
            vec![
                text_doc("bad.txt", "Alexandria FP #1 [1] 2200000000017 1.0000000 1.000000".to_string()),
                text_doc("good.txt", alexandria("1001", "1002")),
            ],
        );
        let outcome = run_batch(&req, &Tables::default(), &Issuer::default()).unwrap();

        assert_eq!(outcome.numbers_consumed, 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].document, "bad.txt");
        assert!(outcome.failures[0].reason.contains("Alexandria FP #2"));
        assert!(outcome.manifest.names().any(|n| n == "errors/bad.txt.txt"));
        assert!(outcome.line_items.iter().all(|i| i.document.as_str().starts_with("001-")));
    }

    #[test]
    fn test_render_failure_reallocates_from_seed() {
        let mut tables = Tables::default();
        // Longer than a worksheet cell can hold.
        tables.products.by_identifier.insert("2002".to_string(), "x".repeat(40_000));

        let req = request(
            500,
            vec![
                text_doc("a.txt", alexandria("2001", "2002")),
                text_doc("b.txt", alexandria("1001", "1002")),
            ],
        );
        let outcome = run_batch(&req, &tables, &Issuer::default()).unwrap();

        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].document, "a.txt");
        assert_eq!(outcome.numbers_consumed, 2);
        let numbers: Vec<u64> = outcome.drafts.iter().map(|d| d.number).collect();
        assert_eq!(numbers, vec![500, 501]);
        assert!(outcome.line_items.iter().all(|i| i.document.as_str().starts_with("001-")));
    }

    #[test]
    fn test_rerun_is_deterministic() {
        let docs = vec![
            text_doc("a.txt", alexandria("1001", "1002")),
            text_doc("b.txt", alexandria("1003", "1004")),
        ];
        let first = run_batch(&request(100, docs.clone()), &Tables::default(), &Issuer::default()).unwrap();
        let second = run_batch(&request(900, docs), &Tables::default(), &Issuer::default()).unwrap();

        assert_eq!(first.line_items, second.line_items);
        let offsets = |o: &BatchOutcome, seed: u64| -> Vec<(BranchId, u64)> {
            o.drafts.iter().map(|d| (d.branch.clone(), d.number - seed)).collect()
        };
        assert_eq!(offsets(&first, 100), offsets(&second, 900));
        // Both loran invoices come before either smouha one.
        assert_eq!(first.drafts[1].branch, BranchId::new("loran"));
    }

    #[test]
    fn test_invalid_delivery_date_rejects_batch() {
        let mut req = request(1, vec![text_doc("po.txt", alexandria("1", "2"))]);
        req.delivery_date = "2025-02-30".to_string();
        let err = run_batch(&req, &Tables::default(), &Issuer::default()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidDeliveryDate(_)));
        assert!(parse_delivery_date("14/03/2025").is_err());
    }

    #[test]
    fn test_halan_po_sequence_follows_priority() {
        let catalog = BranchCatalog::builtin("halan");
        let section = |branch: &str| NormalizedSection {
            branch: BranchId::new(branch),
            branch_display: branch.to_string(),
            region: "halan".to_string(),
            po_reference: None,
            records: Vec::new(),
            items: Vec::new(),
        };
        let mut doc = NormalizedDocument {
            id: DocumentId::derive(0, "halan.xlsx", b""),
            name: "halan.xlsx".to_string(),
            sections: vec![section("october"), section("nasr-city")],
            diagnostics: Vec::new(),
        };
        let next = assign_po_sequence(&mut doc, &catalog, Some("4500"), 0);
        assert_eq!(next, 2);
        let pos: Vec<(&str, Option<&str>)> = doc
            .sections
            .iter()
            .map(|s| (s.branch.as_str(), s.po_reference.as_deref()))
            .collect();
        assert_eq!(pos, vec![("nasr-city", Some("4500")), ("october", Some("4501"))]);
    }
}
