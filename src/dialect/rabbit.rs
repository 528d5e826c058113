// src/dialect/rabbit.rs

use super::{BranchToken, RawRow, Section, SectionBody};
use crate::error::PipelineError;
use crate::sheet::Sheet;
use tracing::debug;

const BRANCH_CELL: (usize, usize) = (2, 1);
const ORDER_CELL: (usize, usize) = (3, 6);
const HEADER_ROW: usize = 8;
const FOOTER_ROWS: usize = 9;
const COLUMNS: [&str; 5] = ["SKU", "Barcode", "Arabic Product Name", "Unit Cost", "Total PC"];

/// Supplier order form: one branch per workbook, header block above the items.
pub(super) fn parse(name: &str, sheets: &[Sheet]) -> Result<Vec<Section>, PipelineError> {
    let grid = sheets
        .first()
        .map(|s| &s.grid)
        .ok_or_else(|| PipelineError::malformed(name, "workbook has no worksheets"))?;

    let branch = grid.cell(BRANCH_CELL.0, BRANCH_CELL.1).text();
    if branch.is_empty() {
        return Err(PipelineError::malformed(name, "branch cell B3 is empty"));
    }

    let header = grid.row(HEADER_ROW);
    let positions: Vec<Option<usize>> = COLUMNS
        .iter()
        .map(|label| {
            header
                .iter()
                .position(|c| c.text().trim().eq_ignore_ascii_case(label))
        })
        .collect();
    let missing: Vec<&str> = COLUMNS
        .iter()
        .zip(&positions)
        .filter(|(_, position)| position.is_none())
        .map(|(label, _)| *label)
        .collect();
    if !missing.is_empty() {
        return Err(PipelineError::malformed(
            name,
            format!("missing column(s) in row 9: {}", missing.join(", ")),
        ));
    }
    let [Some(sku), Some(barcode), Some(product), Some(cost), Some(pieces)] = positions[..] else {
        return Err(PipelineError::malformed(name, "unreadable header row"));
    };

    let last = grid.height().saturating_sub(FOOTER_ROWS);
    let rows: Vec<RawRow> = (HEADER_ROW + 1..last)
        .filter(|&r| !(grid.cell(r, sku).is_empty() && grid.cell(r, barcode).is_empty()))
        .map(|r| RawRow {
            identifier: grid.cell(r, sku).text(),
            barcode: grid.cell(r, barcode).text(),
            name: grid.cell(r, product).text(),
            quantity: grid.cell(r, pieces).text(),
            price: grid.cell(r, cost).text(),
        })
        .collect();

    let khateer = rows
        .first()
        .is_some_and(|row| row.name.to_lowercase().contains("khateer"));
    let order = grid.cell(ORDER_CELL.0, ORDER_CELL.1).text();
    debug!(branch = %branch, order = %order, rows = rows.len(), khateer, "Rabbit order form");

    Ok(vec![Section {
        branch: BranchToken::Candidates(vec![branch]),
        po_reference: (!order.is_empty()).then_some(order),
        region: khateer.then(|| "khateer".to_string()),
        body: SectionBody::Rows(rows),
    }])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::{Cell, Grid};

    fn text(s: &str) -> Cell {
        Cell::Text(s.to_string())
    }

    fn form(first_product: &str, header: Vec<Cell>) -> Vec<Sheet> {
        let mut rows = vec![Vec::new(); 2];
        rows.push(vec![Cell::Empty, text("MAADI")]);
        rows.push(vec![Cell::Empty; 6].into_iter().chain([Cell::Number(88123.0)]).collect());
        rows.extend(vec![Vec::new(); 4]);
        rows.push(header);
        rows.push(vec![text("R-1"), Cell::Number(6221000000011.0), Cell::Empty, text(first_product), Cell::Number(9.75), Cell::Number(6.0)]);
        rows.push(vec![text("R-2"), Cell::Number(6221000000028.0), Cell::Empty, text("Lemon"), Cell::Number(4.0), Cell::Number(2.0)]);
        rows.push(Vec::new());
        for _ in 0..FOOTER_ROWS {
            rows.push(vec![text("footer")]);
        }
        vec![Sheet {
            name: "Order".to_string(),
            grid: Grid::from_rows(rows),
        }]
    }

    fn header() -> Vec<Cell> {
        vec![text("SKU"), text("Barcode"), text("Brand"), text("Arabic Product Name"), text("Unit Cost"), text("Total PC")]
    }

    #[test]
    fn test_parse_form() {
        let sections = parse("r.xlsx", &form("Tomato", header())).unwrap();
        let section = &sections[0];
        assert_eq!(section.branch, BranchToken::Candidates(vec!["MAADI".to_string()]));
        assert_eq!(section.po_reference.as_deref(), Some("88123"));
        assert_eq!(section.region, None);
        let SectionBody::Rows(rows) = &section.body else {
            panic!("expected rows");
        };
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].identifier, "R-1");
        assert_eq!(rows[0].price, "9.75");
        assert_eq!(rows[0].quantity, "6");
        assert_eq!(rows[1].name, "Lemon");
    }

    #[test]
    fn test_khateer_routing() {
        let sections = parse("r.xlsx", &form("Khateer Mango", header())).unwrap();
        assert_eq!(sections[0].region.as_deref(), Some("khateer"));
    }

    #[test]
    fn test_missing_header_column() {
        let mut header = header();
        header.pop();
        let err = parse("r.xlsx", &form("Tomato", header)).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedDocument { ref reason, .. } if reason.contains("Total PC")));
    }
}
