// src/normalize.rs

use crate::catalog::{BranchCatalog, BranchId, ProductTables};
use crate::dialect::{
    BranchMode, BranchToken, Dialect, DocumentId, ParsedDocument, RawRow, SectionBody, TokenColumns,
};
use crate::error::Diagnostic;
use crate::resolver::{BranchResolver, Resolution};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use std::{fmt, str::FromStr};
use tracing::{debug, warn};

/// Product key: numeric SKU/id where the source has one, otherwise its text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum ProductId {
    Code(i64),
    Text(String),
}

impl ProductId {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        raw.parse::<i64>()
            .map(Self::Code)
            .unwrap_or_else(|_| Self::Text(raw.to_string()))
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "{code}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

/// One extracted tuple before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub identifier: String,
    pub barcode: String,
    pub name: String,
    pub quantity: String,
    pub price: String,
    pub document: DocumentId,
    pub branch_token: String,
}

/// A validated unit of sale. The total is always derived from price and quantity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineItem {
    pub product_id: ProductId,
    pub barcode: String,
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: u32,
    total: Decimal,
    pub branch: BranchId,
    pub document: DocumentId,
    pub region: String,
}

impl LineItem {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        product_id: ProductId,
        barcode: String,
        name: String,
        unit_price: Decimal,
        quantity: u32,
        branch: BranchId,
        document: DocumentId,
        region: String,
    ) -> Self {
        Self {
            total: unit_price * Decimal::from(quantity),
            product_id,
            barcode,
            name,
            unit_price,
            quantity,
            branch,
            document,
            region,
        }
    }

    pub fn total(&self) -> Decimal {
        self.total
    }
}

/// Quantity text → non-negative whole units; anything unreadable is 0.
pub fn parse_quantity(raw: &str) -> u32 {
    Decimal::from_str(raw.trim().replace(',', "").as_str())
        .ok()
        .filter(|q| q.is_sign_positive())
        .and_then(|q| q.trunc().to_u32())
        .unwrap_or(0)
}

/// Price text → currency value rounded to 2 places; anything unreadable is 0.
pub fn parse_price(raw: &str) -> Decimal {
    let cleaned = raw.trim().replace(',', "");
    Decimal::from_str(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .map(round_price)
        .unwrap_or(Decimal::ZERO)
}

pub fn round_price(price: Decimal) -> Decimal {
    price.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Sequence lengths before padding, when they disagreed with the identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Misalignment {
    pub identifiers: usize,
    pub barcodes: usize,
    pub quantities: usize,
    pub prices: usize,
}

/// Aligns parallel token streams to the identifier stream.
///
/// Rows whose identifier is `sentinel` print no barcode, so an empty barcode is
/// inserted at that index first. Short streams are then padded with empty
/// values and long ones truncated.
pub fn align(columns: &TokenColumns, sentinel: Option<&str>) -> (Vec<RawRow>, Option<Misalignment>) {
    let n = columns.identifiers.len();
    let mut barcodes = columns.barcodes.clone();
    if let Some(sentinel) = sentinel {
        for (i, id) in columns.identifiers.iter().enumerate() {
            if id == sentinel {
                barcodes.insert(i.min(barcodes.len()), String::new());
            }
        }
    }

    let defect = (barcodes.len() != n || columns.quantities.len() != n || columns.prices.len() != n)
        .then_some(Misalignment {
            identifiers: n,
            barcodes: barcodes.len(),
            quantities: columns.quantities.len(),
            prices: columns.prices.len(),
        });

    let at = |seq: &[String], i: usize| seq.get(i).cloned().unwrap_or_default();
    let rows = columns
        .identifiers
        .iter()
        .enumerate()
        .map(|(i, id)| RawRow {
            identifier: id.clone(),
            barcode: at(&barcodes, i),
            name: String::new(),
            quantity: at(&columns.quantities, i),
            price: at(&columns.prices, i),
        })
        .collect();

    (rows, defect)
}

/// All line items of one branch within one document.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSection {
    pub branch: BranchId,
    pub branch_display: String,
    pub region: String,
    pub po_reference: Option<String>,
    pub records: Vec<RawRecord>,
    pub items: Vec<LineItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedDocument {
    pub id: DocumentId,
    pub name: String,
    pub sections: Vec<NormalizedSection>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Turns parsed sections into line items for one dialect and catalog.
pub struct Normalizer<'a> {
    dialect: Dialect,
    catalog: &'a BranchCatalog,
    products: &'a ProductTables,
}

impl<'a> Normalizer<'a> {
    pub fn new(dialect: Dialect, catalog: &'a BranchCatalog, products: &'a ProductTables) -> Self {
        Self {
            dialect,
            catalog,
            products,
        }
    }

    pub fn normalize(&self, parsed: ParsedDocument) -> NormalizedDocument {
        let resolver = BranchResolver::new(self.catalog);
        let mut sections: Vec<NormalizedSection> = Vec::new();
        let mut diagnostics = Vec::new();

        for section in parsed.sections {
            let token = section.branch.label();
            let (rows, defect) = match &section.body {
                SectionBody::Columns(columns) => align(columns, self.dialect.no_barcode_sentinel()),
                SectionBody::Rows(rows) => (rows.clone(), None),
            };

            let branch_id = match &section.branch {
                BranchToken::Positional(id) => Some(id.clone()),
                BranchToken::Candidates(tokens) => {
                    let mut best = 0;
                    let literal = self.dialect.branch_mode() == BranchMode::Literal;
                    let resolved = tokens.iter().find_map(|t| match resolver.resolve(t) {
                        Resolution::Matched { branch, score, exact } => {
                            if literal && !exact {
                                warn!(token = %t, branch = %branch.id, score, "Literal branch token matched approximately");
                            }
                            Some(branch.id.clone())
                        }
                        Resolution::Rejected { best_score } => {
                            best = best.max(best_score);
                            None
                        }
                    });
                    if resolved.is_none() {
                        let diagnostic = Diagnostic::UnresolvedBranch {
                            document: parsed.name.clone(),
                            token: token.clone(),
                            best_score: best,
                            dropped_records: rows.len(),
                        };
                        warn!(%diagnostic, "Dropping records of unresolved branch");
                        diagnostics.push(diagnostic);
                    }
                    resolved
                }
            };
            let Some(branch_id) = branch_id else {
                continue;
            };

            if let Some(defect) = defect {
                let diagnostic = Diagnostic::AlignmentDefect {
                    document: parsed.name.clone(),
                    branch: branch_id.to_string(),
                    identifiers: defect.identifiers,
                    barcodes: defect.barcodes,
                    quantities: defect.quantities,
                    prices: defect.prices,
                };
                warn!(%diagnostic, "Token streams padded to identifier count");
                diagnostics.push(diagnostic);
            }

            let branch = self.catalog.get(&branch_id);
            let region = section
                .region
                .clone()
                .or_else(|| branch.and_then(|b| b.region.clone()))
                .unwrap_or_else(|| self.dialect.default_region().to_string());
            let branch_display = branch.map_or_else(|| branch_id.to_string(), |b| b.display.clone());

            let records: Vec<RawRecord> = rows
                .into_iter()
                .map(|row| RawRecord {
                    identifier: row.identifier,
                    barcode: row.barcode,
                    name: row.name,
                    quantity: row.quantity,
                    price: row.price,
                    document: parsed.id.clone(),
                    branch_token: token.clone(),
                })
                .collect();
            let items: Vec<LineItem> = records
                .iter()
                .map(|record| self.line_item(record, &branch_id, &region))
                .collect();
            debug!(branch = %branch_id, items = items.len(), region = %region, "Section normalized");

            // Two sections naming the same branch belong to one invoice.
            match sections.iter_mut().find(|s| s.branch == branch_id) {
                Some(existing) => {
                    existing.records.extend(records);
                    existing.items.extend(items);
                    if existing.po_reference.is_none() {
                        existing.po_reference = section.po_reference;
                    }
                }
                None => sections.push(NormalizedSection {
                    branch: branch_id,
                    branch_display,
                    region,
                    po_reference: section.po_reference,
                    records,
                    items,
                }),
            }
        }

        NormalizedDocument {
            id: parsed.id,
            name: parsed.name,
            sections,
            diagnostics,
        }
    }

    fn line_item(&self, record: &RawRecord, branch: &BranchId, region: &str) -> LineItem {
        let barcode = record.barcode.trim().to_string();
        let key = if record.identifier.trim().is_empty() {
            barcode.as_str()
        } else {
            record.identifier.trim()
        };
        LineItem::new(
            ProductId::parse(key),
            barcode.clone(),
            self.products.resolve_name(
                &barcode,
                &record.identifier,
                self.dialect.prints_product_names().then_some(record.name.as_str()),
            ),
            parse_price(&record.price),
            parse_quantity(&record.quantity),
            branch.clone(),
            record.document.clone(),
            region.to_string(),
        )
    }
}
