// src/dialect/breadfast.rs

use super::{BranchToken, Section, SectionBody, TokenColumns, split_sections};
use crate::catalog::BranchId;
use crate::error::PipelineError;
use regex::Regex;
use std::collections::BTreeMap;
use tracing::debug;

/// Product id printed without a barcode on Alexandria orders.
pub(super) const NO_BARCODE_ID: &str = "6484003";

/// Alexandria section number → branch it delivers to, and which `#P`
/// reference of the whole text (in reading order) belongs to that branch.
const ALEXANDRIA_SECTIONS: [(u32, &str, usize); 2] = [(1, "smouha", 1), (2, "loran", 0)];

/// Two purchase orders in one PDF, one per `Alexandria FP #n` marker.
pub(super) fn parse_alexandria(name: &str, text: &str) -> Result<Vec<Section>, PipelineError> {
    let marker = Regex::new(r"Alexandria FP #(\d+)")?;
    let po_references: Vec<String> = po_pattern()?
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect();

    // Markers repeat on page headers; gather every slice under its number.
    let mut slices: BTreeMap<u32, String> = BTreeMap::new();
    for (label, slice) in split_sections(text, &marker) {
        let number = marker
            .captures(label)
            .and_then(|c| c[1].parse::<u32>().ok())
            .unwrap_or_default();
        let merged = slices.entry(number).or_default();
        merged.push(' ');
        merged.push_str(slice);
    }

    let missing: Vec<String> = ALEXANDRIA_SECTIONS
        .iter()
        .filter(|(n, _, _)| !slices.contains_key(n))
        .map(|(n, _, _)| format!("Alexandria FP #{n}"))
        .collect();
    if !missing.is_empty() {
        return Err(PipelineError::malformed(
            name,
            format!("missing section marker(s): {}", missing.join(", ")),
        ));
    }

    ALEXANDRIA_SECTIONS
        .iter()
        .filter_map(|(n, branch, po_index)| slices.get(n).map(|slice| (branch, slice, po_index)))
        .map(|(branch, slice, po_index)| {
            section(BranchId::new(*branch), slice, po_references.get(*po_index).cloned())
        })
        .collect()
}

/// Single purchase order; the whole text belongs to the Mansoura branch.
pub(super) fn parse_mansoura(text: &str) -> Result<Vec<Section>, PipelineError> {
    let po_reference = po_pattern()?.captures(text).map(|c| c[1].to_string());
    Ok(vec![section(BranchId::new("mansoura"), text, po_reference)?])
}

fn po_pattern() -> Result<Regex, PipelineError> {
    Ok(Regex::new(r"#(P\d+)")?)
}

fn section(branch: BranchId, text: &str, po_reference: Option<String>) -> Result<Section, PipelineError> {
    let columns = token_columns(text)?;
    debug!(
        branch = %branch,
        ids = columns.identifiers.len(),
        barcodes = columns.barcodes.len(),
        quantities = columns.quantities.len(),
        prices = columns.prices.len(),
        "Section tokens"
    );

    Ok(Section {
        branch: BranchToken::Positional(branch),
        po_reference,
        region: None,
        body: SectionBody::Columns(columns),
    })
}

/// Collects the four token streams of a section in reading order.
fn token_columns(text: &str) -> Result<TokenColumns, PipelineError> {
    let id = Regex::new(r"\[(\d+)\]")?;
    let mut columns = TokenColumns {
        identifiers: id.captures_iter(text).map(|c| c[1].to_string()).collect(),
        ..TokenColumns::default()
    };

    for token in text.split_whitespace() {
        if is_barcode(token) {
            columns.barcodes.push(token.to_string());
        } else if let Some(quantity) = quantity(token) {
            columns.quantities.push(quantity.to_string());
        } else if is_price(token) {
            columns.prices.push(token.to_string());
        }
    }
    Ok(columns)
}

fn is_barcode(token: &str) -> bool {
    token.len() == 13 && token.starts_with("22") && token.bytes().all(|b| b.is_ascii_digit())
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// `12.0000000` → `12`.
fn quantity(token: &str) -> Option<&str> {
    let (whole, fraction) = token.split_once('.')?;
    (all_digits(whole) && fraction == "0000000").then_some(whole)
}

/// Prices carry exactly six fractional digits.
fn is_price(token: &str) -> bool {
    token
        .split_once('.')
        .is_some_and(|(whole, fraction)| all_digits(whole) && fraction.len() == 6 && all_digits(fraction))
}
