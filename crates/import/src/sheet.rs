//! Workbook reading: the first worksheet rendered as trimmed strings.

use std::io::Cursor;

use calamine::{Data, DataType, Reader, Xlsx, XlsxError, open_workbook_from_rs};
use tracing::debug;

use crate::error::ImportError;

const SUPPORTED_EXTENSIONS: [&str; 2] = ["xlsx", "xlsm"];

/// One data row with its spreadsheet row number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetRow {
    pub number: usize,
    pub cells: Vec<String>,
}

impl SheetRow {
    pub fn cell(&self, index: usize) -> &str {
        self.cells.get(index).map(String::as_str).unwrap_or("")
    }

    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|c| c.is_empty())
    }
}

/// A worksheet: the header row plus every non-blank data row.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Sheet {
    header: Vec<String>,
    rows: Vec<SheetRow>,
}

impl Sheet {
    /// Build a sheet from rendered rows. The first row is the header and
    /// sits on spreadsheet row `first_row`; blank data rows are dropped
    /// without renumbering the others.
    pub fn new(first_row: usize, mut rows: Vec<Vec<String>>) -> Result<Self, ImportError> {
        if rows.is_empty() {
            return Err(ImportError::EmptyWorkbook);
        }
        let data = rows.split_off(1);
        let mut header = rows.swap_remove(0);
        while header.last().is_some_and(String::is_empty) {
            header.pop();
        }
        if header.is_empty() {
            return Err(ImportError::EmptyWorkbook);
        }
        let rows = data
            .into_iter()
            .enumerate()
            .map(|(i, cells)| SheetRow {
                number: first_row + i + 1,
                cells,
            })
            .filter(|r| !r.is_blank())
            .collect();
        Ok(Self { header, rows })
    }

    /// Sheet whose header sits on row 1; handy for building uploads in code.
    pub fn from_rows<const N: usize>(header: [&str; N], rows: &[Vec<&str>]) -> Self {
        let header = header.iter().map(|h| h.to_string()).collect();
        let rows = rows
            .iter()
            .enumerate()
            .map(|(i, cells)| SheetRow {
                number: i + 2,
                cells: cells.iter().map(|c| c.trim().to_string()).collect(),
            })
            .filter(|r| !r.is_blank())
            .collect();
        Self { header, rows }
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn rows(&self) -> &[SheetRow] {
        &self.rows
    }
}

/// Fail unless `filename` names an `.xlsx` or `.xlsm` workbook.
pub fn ensure_supported(filename: &str) -> Result<(), ImportError> {
    let supported = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()));
    if supported {
        Ok(())
    } else {
        Err(ImportError::UnsupportedFormat(filename.to_string()))
    }
}

/// Read the first worksheet of an uploaded workbook.
pub fn read_workbook(filename: &str, bytes: &[u8]) -> Result<Sheet, ImportError> {
    ensure_supported(filename)?;
    let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(bytes))
        .map_err(|e: XlsxError| ImportError::Workbook(e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or(ImportError::EmptyWorkbook)?
        .map_err(|e| ImportError::Workbook(e.to_string()))?;

    let Some((first_row, first_col)) = range.start() else {
        return Err(ImportError::EmptyWorkbook);
    };
    let pad = first_col as usize;
    let rows: Vec<Vec<String>> = range
        .rows()
        .map(|cells| {
            std::iter::repeat_n(String::new(), pad)
                .chain(cells.iter().map(render_cell))
                .collect()
        })
        .collect();
    debug!(filename, rows = rows.len(), "worksheet read");
    Sheet::new(first_row as usize + 1, rows)
}

/// Cell text: trimmed strings, integral floats without a fraction, dates as `YYYY-MM-DD`.
pub fn render_cell(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(_) => cell
            .as_date()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.trim().to_string(),
        Data::Error(e) => e.to_string(),
    }
}
