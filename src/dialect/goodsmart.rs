// src/dialect/goodsmart.rs

use super::{BranchToken, RawRow, Section, SectionBody};
use crate::catalog::BranchId;
use crate::error::PipelineError;
use crate::sheet::{Grid, Sheet};
use tracing::debug;

const REQUIRED: [&str; 5] = ["Barcode", "Arabic Name", "Cost", "Qty", "Total Cost"];

/// Single-branch order sheet with a named header row.
pub(super) fn parse(
    name: &str,
    sheets: &[Sheet],
    po_reference: Option<&str>,
) -> Result<Vec<Section>, PipelineError> {
    let grid = sheets
        .first()
        .map(|s| &s.grid)
        .ok_or_else(|| PipelineError::malformed(name, "workbook has no worksheets"))?;

    let Some((header, columns)) = grid.find_header(&REQUIRED) else {
        return Err(PipelineError::malformed(
            name,
            format!("missing column(s): {}", missing_columns(grid).join(", ")),
        ));
    };
    let [barcode, arabic_name, cost, qty, _total] = columns[..] else {
        return Err(PipelineError::malformed(name, "unreadable header row"));
    };

    let rows: Vec<RawRow> = (header + 1..grid.height())
        .filter(|&r| !grid.cell(r, barcode).is_empty())
        .map(|r| RawRow {
            identifier: grid.cell(r, barcode).text(),
            barcode: grid.cell(r, barcode).text(),
            name: grid.cell(r, arabic_name).text(),
            quantity: grid.cell(r, qty).text(),
            price: grid.cell(r, cost).text(),
        })
        .collect();
    debug!(rows = rows.len(), "GoodsMart order");

    Ok(vec![Section {
        branch: BranchToken::Positional(BranchId::new("zaied")),
        po_reference: po_reference.map(str::to_string),
        region: None,
        body: SectionBody::Rows(rows),
    }])
}

/// Required labels absent from the row that has the most of them.
fn missing_columns(grid: &Grid) -> Vec<&'static str> {
    let present_in = |row: usize| -> Vec<bool> {
        REQUIRED
            .iter()
            .map(|label| {
                grid.row(row)
                    .iter()
                    .any(|c| c.text().trim().eq_ignore_ascii_case(label))
            })
            .collect()
    };

    let best = (0..grid.height())
        .map(present_in)
        .max_by_key(|present| present.iter().filter(|&&p| p).count())
        .unwrap_or_else(|| vec![false; REQUIRED.len()]);

    REQUIRED
        .iter()
        .zip(best)
        .filter(|(_, present)| !present)
        .map(|(label, _)| *label)
        .collect()
}
