// src/aggregate.rs

use crate::catalog::{BranchCatalog, BranchId, CategoryTable};
use crate::normalize::{LineItem, ProductId};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

/// One branch column of a pivot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PivotColumn {
    pub branch: BranchId,
    pub display: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PivotRow {
    pub product_id: ProductId,
    pub name: String,
    pub unit_price: Decimal,
    /// Summed quantity per column, in column order.
    pub quantities: Vec<u64>,
    pub total_quantity: u64,
    pub grand_total: Decimal,
    pub category: String,
}

/// Column sums over the data rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TotalsRow {
    pub quantities: Vec<u64>,
    pub total_quantity: u64,
    pub grand_total: Decimal,
}

/// Per-region product × branch quantity table with its two trailer rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PivotSummary {
    pub region: String,
    pub columns: Vec<PivotColumn>,
    pub rows: Vec<PivotRow>,
    pub totals: TotalsRow,
    /// Branch columns holding at least one non-zero quantity.
    pub branch_count: usize,
}

/// Builds one summary per region, regions in name order.
///
/// Rows group by (product, name, unit price) and sort by category rank, then
/// name. Rows whose grand total is zero are dropped before the trailers.
pub fn summarize(
    items: &[LineItem],
    catalog: &BranchCatalog,
    categories: &CategoryTable,
) -> Vec<PivotSummary> {
    let mut by_region: BTreeMap<&str, Vec<&LineItem>> = BTreeMap::new();
    for item in items {
        by_region.entry(item.region.as_str()).or_default().push(item);
    }

    by_region
        .into_iter()
        .map(|(region, items)| summarize_region(region, &items, catalog, categories))
        .collect()
}

fn summarize_region(
    region: &str,
    items: &[&LineItem],
    catalog: &BranchCatalog,
    categories: &CategoryTable,
) -> PivotSummary {
    let mut branches: Vec<&BranchId> = items
        .iter()
        .map(|i| &i.branch)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    branches.sort_by_key(|id| (catalog.position(id), (*id).clone()));

    let columns: Vec<PivotColumn> = branches
        .iter()
        .map(|id| PivotColumn {
            branch: (*id).clone(),
            display: catalog
                .get(id)
                .map_or_else(|| id.to_string(), |b| b.display.clone()),
        })
        .collect();

    let mut groups: BTreeMap<(ProductId, String, Decimal), Vec<u64>> = BTreeMap::new();
    for item in items {
        let col = branches
            .iter()
            .position(|b| **b == item.branch)
            .unwrap_or_default();
        let quantities = groups
            .entry((item.product_id.clone(), item.name.clone(), item.unit_price))
            .or_insert_with(|| vec![0; branches.len()]);
        quantities[col] += u64::from(item.quantity);
    }

    let mut rows: Vec<PivotRow> = groups
        .into_iter()
        .map(|((product_id, name, unit_price), quantities)| {
            let total_quantity: u64 = quantities.iter().sum();
            PivotRow {
                category: categories.category_of(&name).to_string(),
                grand_total: unit_price * Decimal::from(total_quantity),
                product_id,
                name,
                unit_price,
                quantities,
                total_quantity,
            }
        })
        .filter(|row| !row.grand_total.is_zero())
        .collect();
    rows.sort_by(|a, b| {
        categories
            .rank(&a.category)
            .cmp(&categories.rank(&b.category))
            .then_with(|| a.name.cmp(&b.name))
    });

    let mut totals = TotalsRow {
        quantities: vec![0; columns.len()],
        total_quantity: 0,
        grand_total: Decimal::ZERO,
    };
    for row in &rows {
        for (sum, q) in totals.quantities.iter_mut().zip(&row.quantities) {
            *sum += q;
        }
        totals.total_quantity += row.total_quantity;
        totals.grand_total += row.grand_total;
    }

    let branch_count = (0..columns.len())
        .filter(|&col| rows.iter().any(|row| row.quantities[col] > 0))
        .count();

    info!(
        region,
        columns = columns.len(),
        rows = rows.len(),
        total_quantity = totals.total_quantity,
        branch_count,
        "Pivot summary built"
    );

    PivotSummary {
        region: region.to_string(),
        columns,
        rows,
        totals,
        branch_count,
    }
}
