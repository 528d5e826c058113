// src/dialect/halan.rs

use super::{BranchToken, RawRow, Section, SectionBody};
use crate::error::PipelineError;
use crate::sheet::Sheet;
use tracing::{debug, warn};

/// One worksheet per branch, named after it. Column layout counted from the
/// right edge: name, quantity, price are the 4th/3rd/2nd last columns.
pub(super) fn parse(sheets: &[Sheet]) -> Result<Vec<Section>, PipelineError> {
    let mut sections = Vec::new();

    for sheet in sheets {
        let grid = &sheet.grid;
        if grid.height() < 2 {
            debug!(sheet = %sheet.name, "Skipping empty worksheet");
            continue;
        }
        let width = grid.width();
        if width < 4 {
            warn!(sheet = %sheet.name, width, "Worksheet too narrow for an order, skipping");
            continue;
        }

        // Row 0 is the header.
        let rows: Vec<RawRow> = (1..grid.height())
            .filter_map(|r| {
                let barcode = grid.cell(r, 0).text();
                if barcode.is_empty() || barcode == "0" {
                    return None;
                }
                Some(RawRow {
                    identifier: barcode.clone(),
                    barcode,
                    name: grid.cell(r, width - 4).text(),
                    quantity: grid.cell(r, width - 3).text(),
                    price: grid.cell(r, width - 2).text(),
                })
            })
            .collect();

        debug!(sheet = %sheet.name, rows = rows.len(), "Branch worksheet read");
        sections.push(Section {
            branch: BranchToken::Candidates(vec![sheet.name.trim().to_string()]),
            po_reference: None,
            region: None,
            body: SectionBody::Rows(rows),
        });
    }

    Ok(sections)
}

/// `base` advanced by `step`: trailing digits are incremented keeping their
/// width, a reference without digits gets a `-<step>` suffix.
pub fn increment_po(base: &str, step: usize) -> String {
    if step == 0 {
        return base.to_string();
    }
    let digits_at = base
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i);

    match digits_at.and_then(|i| base[i..].parse::<u64>().ok().map(|n| (i, n))) {
        Some((i, n)) => {
            let width = base.len() - i;
            format!("{}{:0width$}", &base[..i], n + step as u64)
        }
        None => format!("{base}-{step}"),
    }
}
