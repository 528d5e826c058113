// src/sheet.rs

use crate::error::PipelineError;
use calamine::{Data, Reader, Xlsx, open_workbook_from_rs};
use std::io::Cursor;
use tracing::debug;

/// One spreadsheet cell reduced to what the parsers care about.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Cell {
    #[default]
    Empty,
    Text(String),
    Number(f64),
}

impl Cell {
    fn from_data(data: &Data) -> Self {
        match data {
            Data::Empty => Self::Empty,
            Data::Int(i) => Self::Number(*i as f64),
            Data::Float(f) => Self::Number(*f),
            Data::String(s) if s.trim().is_empty() => Self::Empty,
            Data::String(s) => Self::Text(s.trim().to_string()),
            other => Self::Text(other.to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Display text; whole numbers print without a fractional part.
    pub fn text(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Text(s) => s.clone(),
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            Self::Number(n) => n.to_string(),
        }
    }
}

/// Dense cell grid anchored at A1, so coordinates match what a user sees.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Grid {
    rows: Vec<Vec<Cell>>,
}

static EMPTY: Cell = Cell::Empty;

impl Grid {
    pub fn from_rows(rows: Vec<Vec<Cell>>) -> Self {
        Self { rows }
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    /// Widest row, in columns.
    pub fn width(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Zero-based row/column; out-of-range positions read as empty.
    pub fn cell(&self, row: usize, col: usize) -> &Cell {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&EMPTY)
    }

    pub fn row(&self, row: usize) -> &[Cell] {
        self.rows.get(row).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First row containing every `required` label (case-insensitive), with
    /// the column of each label in `required` order.
    pub fn find_header(&self, required: &[&str]) -> Option<(usize, Vec<usize>)> {
        self.rows.iter().enumerate().find_map(|(idx, row)| {
            let columns = required
                .iter()
                .map(|label| {
                    row.iter()
                        .position(|c| c.text().trim().eq_ignore_ascii_case(label))
                })
                .collect::<Option<Vec<_>>>()?;
            Some((idx, columns))
        })
    }
}

/// A named worksheet.
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub name: String,
    pub grid: Grid,
}

/// Reads every worksheet of an `.xlsx` workbook held in memory.
pub fn read_workbook(bytes: &[u8]) -> Result<Vec<Sheet>, PipelineError> {
    let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(bytes))?;
    let mut sheets = Vec::new();

    for name in workbook.sheet_names() {
        let range = workbook.worksheet_range(&name)?;
        let (row_offset, col_offset) = range
            .start()
            .map(|(r, c)| (r as usize, c as usize))
            .unwrap_or((0, 0));

        let mut rows = vec![Vec::new(); row_offset];
        for source in range.rows() {
            let mut row = vec![Cell::Empty; col_offset];
            row.extend(source.iter().map(Cell::from_data));
            rows.push(row);
        }

        debug!(sheet = %name, rows = rows.len(), "Worksheet loaded");
        sheets.push(Sheet {
            name,
            grid: Grid::from_rows(rows),
        });
    }

    Ok(sheets)
}
