// src/dialect/talabat.rs

use super::{BranchToken, RawRow, Section, SectionBody};
use crate::error::PipelineError;
use regex::Regex;
use tracing::debug;

/// Warehouse codes whose branch name continues into the next word.
const MULTI_WORD_CODES: [&str; 14] = [
    "EG_Alex East_DS_",
    "EG_Alex",
    "EG_Zahraa Maadi",
    "EG_Nasrcity",
    "EG_Mansoura",
    "EG_Tagamoa Golden",
    "EG_Tagamoa",
    "EG_Madinaty",
    "EG_Hadayek",
    "EG_October",
    "EG_Shrouk_",
    "EG_Mokatam",
    "EG_Sheikh",
    "EG_Faisal",
];

/// One purchase order per PDF, delivered to the warehouse named by its `EG_` code.
pub(super) fn parse(name: &str, text: &str) -> Result<Vec<Section>, PipelineError> {
    let candidates = branch_candidates(text);
    if candidates.is_empty() {
        return Err(PipelineError::malformed(name, "no EG_ warehouse code found"));
    }

    let po = Regex::new(r"PO\d+")?;
    let rows = rows(text)?;
    debug!(candidates = ?candidates, rows = rows.len(), "Talabat order");

    Ok(vec![Section {
        branch: BranchToken::Candidates(candidates),
        po_reference: po.find(name).map(|m| m.as_str().to_string()),
        region: None,
        body: SectionBody::Rows(rows),
    }])
}

/// Every `EG_` token in reading order, joined with the following word for
/// multi-word codes. Duplicates keep their first position.
fn branch_candidates(text: &str) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut candidates: Vec<String> = Vec::new();
    let mut i = 0;

    while i < words.len() {
        let word = words[i];
        if word.starts_with("EG_") {
            let token = if MULTI_WORD_CODES
                .iter()
                .any(|code| word == *code || word.starts_with(code))
            {
                i += 1;
                format!("{word} {}", words.get(i).copied().unwrap_or_default())
                    .trim_end()
                    .to_string()
            } else {
                word.to_string()
            };
            if !candidates.contains(&token) {
                candidates.push(token);
            }
        }
        i += 1;
    }
    candidates
}

/// Item lines: `No. SKU [supplier SKU] barcode name… qty unit-cost …`.
fn rows(text: &str) -> Result<Vec<RawRow>, PipelineError> {
    let line = Regex::new(
        r"^\s*\d+\s+(\d+)\s+(?:\S+\s+)??(\d{8,14})\s+(.+?)\s+(\d+)\s+(\d+\.\d{2})(?:\s|$)",
    )?;

    Ok(text
        .lines()
        .filter_map(|l| line.captures(l))
        .map(|c| RawRow {
            identifier: c[1].to_string(),
            barcode: c[2].to_string(),
            name: c[3].trim().to_string(),
            quantity: c[4].to_string(),
            price: c[5].to_string(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDER: &str = "Talabat Purchase Order
Deliver to: EG_Alex East_DS_ Sidi Bishr warehouse
No. SKU Supplier SKU Barcode Product Qty Unit Cost Disc. Amt.
1 90011 A-77 6221234567890 Tomato Local 1kg 12 8.50 0.00 102.00
2 90012 6229876543210 Cucumber 4 3.25 0.00 13.00
Total 115.00
";

    #[test]
    fn test_parse_order() {
        let sections = parse("EG_order_PO12345.pdf", ORDER).unwrap();
        assert_eq!(sections.len(), 1);
        let section = &sections[0];
        assert_eq!(section.po_reference.as_deref(), Some("PO12345"));
        assert_eq!(
            section.branch,
            BranchToken::Candidates(vec!["EG_Alex East_DS_".to_string()])
        );

        let SectionBody::Rows(rows) = &section.body else {
            panic!("expected rows");
        };
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].identifier, "90011");
        assert_eq!(rows[0].barcode, "6221234567890");
        assert_eq!(rows[0].name, "Tomato Local 1kg");
        assert_eq!(rows[0].quantity, "12");
        assert_eq!(rows[0].price, "8.50");
        assert_eq!(rows[1].barcode, "6229876543210");
        assert_eq!(rows[1].name, "Cucumber");
    }

    #[test]
    fn test_branch_candidates() {
        let text = "EG_Maadi_DS and EG_Tagamoa Golden then EG_Maadi_DS again EG_Faisal";
        assert_eq!(
            branch_candidates(text),
            vec!["EG_Maadi_DS", "EG_Tagamoa Golden", "EG_Faisal"]
        );
    }

    #[test]
    fn test_no_code_is_malformed() {
        let err = parse("PO1.pdf", "no warehouse here").unwrap_err();
        assert!(matches!(err, PipelineError::MalformedDocument { .. }));
    }
}
