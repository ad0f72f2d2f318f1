//! Sheet layouts and per-row field parsing.

use core::fmt::Display;
use core::str::FromStr;

use chrono::NaiveDate;

use crate::error::{ImportError, RowError};
use crate::sheet::{Sheet, SheetRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub required: bool,
}

pub(crate) const fn required(name: &'static str) -> Column {
    Column { name, required: true }
}

pub(crate) const fn optional(name: &'static str) -> Column {
    Column {
        name,
        required: false,
    }
}

/// Exact, ordered column list of one sheet kind.
#[derive(Debug, Clone, Copy)]
pub struct Schema {
    pub columns: &'static [Column],
}

impl Schema {
    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name).collect()
    }

    /// The header must list exactly these columns, in order.
    pub fn check_header(&self, sheet: &Sheet) -> Result<(), ImportError> {
        let found: Vec<&str> = sheet.header().iter().map(|h| h.trim()).collect();
        if found == self.column_names() {
            return Ok(());
        }
        Err(ImportError::HeaderMismatch {
            expected: self.column_names().join(", "),
            found: found.join(", "),
        })
    }

    /// Check the header, then build one value per row with `build`.
    ///
    /// Every row is visited; all field errors are reported together.
    pub fn parse_rows<T, F>(&self, sheet: &Sheet, mut build: F) -> Result<Vec<T>, ImportError>
    where
        F: FnMut(&mut RowReader<'_>) -> Option<T>,
    {
        self.check_header(sheet)?;
        let mut values = Vec::with_capacity(sheet.rows().len());
        let mut invalid = Vec::new();
        for row in sheet.rows() {
            let mut reader = RowReader {
                schema: *self,
                row,
                errors: Vec::new(),
            };
            reader.check_required();
            let value = build(&mut reader);
            match value {
                Some(v) if reader.errors.is_empty() => values.push(v),
                _ => invalid.push(RowError {
                    row: row.number,
                    errors: reader.errors,
                }),
            }
        }
        if invalid.is_empty() {
            Ok(values)
        } else {
            Err(ImportError::InvalidRows(invalid))
        }
    }
}

/// Field access for one row; parse failures accumulate instead of returning early.
#[derive(Debug)]
pub struct RowReader<'a> {
    schema: Schema,
    row: &'a SheetRow,
    errors: Vec<String>,
}

impl RowReader<'_> {
    pub fn number(&self) -> usize {
        self.row.number
    }

    fn check_required(&mut self) {
        for (index, column) in self.schema.columns.iter().enumerate() {
            if column.required && self.row.cell(index).is_empty() {
                self.errors.push(format!("{} is required", column.name));
            }
        }
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Non-blank text of `column`.
    pub fn text(&self, column: &str) -> Option<String> {
        let index = self.schema.columns.iter().position(|c| c.name == column)?;
        let value = self.row.cell(index);
        (!value.is_empty()).then(|| value.to_string())
    }

    /// Text of a required column; the missing-value error was already recorded.
    pub fn required_text(&self, column: &str) -> String {
        self.text(column).unwrap_or_default()
    }

    pub fn parse<T>(&mut self, column: &str) -> Option<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        let raw = self.text(column)?;
        match raw.parse::<T>() {
            Ok(v) => Some(v),
            Err(e) => {
                self.errors.push(format!("{column}: {e}"));
                None
            }
        }
    }

    pub fn number_of<T>(&mut self, column: &str) -> Option<T>
    where
        T: FromStr,
    {
        let raw = self.text(column)?;
        match raw.parse::<T>() {
            Ok(v) => Some(v),
            Err(_) => {
                self.errors.push(format!("{column}: '{raw}' is not a valid number"));
                None
            }
        }
    }

    pub fn date(&mut self, column: &str) -> Option<NaiveDate> {
        let raw = self.text(column)?;
        match parse_date(&raw) {
            Some(d) => Some(d),
            None => {
                self.errors
                    .push(format!("{column}: '{raw}' is not a date (expected YYYY-MM-DD)"));
                None
            }
        }
    }

    pub fn yes_no(&mut self, column: &str) -> Option<bool> {
        let raw = self.text(column)?;
        match raw.to_ascii_lowercase().as_str() {
            "yes" | "y" | "true" | "1" => Some(true),
            "no" | "n" | "false" | "0" => Some(false),
            _ => {
                self.errors
                    .push(format!("{column}: '{raw}' is not yes or no"));
                None
            }
        }
    }
}

/// `YYYY-MM-DD`, optionally followed by a time part.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| raw.get(..10).and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()))
        .or_else(|| NaiveDate::parse_from_str(raw, "%d/%m/%Y").ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: Schema = Schema {
        columns: &[required("name"), required("quantity"), optional("expires")],
    };

    #[derive(Debug, PartialEq)]
    struct Item {
        name: String,
        quantity: i64,
        expires: Option<NaiveDate>,
    }

    fn build(row: &mut RowReader<'_>) -> Option<Item> {
        let name = row.required_text("name");
        let quantity = row.number_of("quantity");
        let expires = row.date("expires");
        Some(Item {
            name,
            quantity: quantity?,
            expires,
        })
    }

    #[test]
    fn header_must_match_exactly() {
        let sheet = Sheet::from_rows(["name", "expires", "quantity"], &[]);
        let err = SCHEMA.parse_rows(&sheet, build).unwrap_err();
        match err {
            ImportError::HeaderMismatch { expected, found } => {
                assert_eq!(expected, "name, quantity, expires");
                assert_eq!(found, "name, expires, quantity");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_valid_rows() {
        let sheet = Sheet::from_rows(
            ["name", "quantity", "expires"],
            &[vec!["Rice", "4", "2027-01-31"], vec!["Beans", "2", ""]],
        );
        let items = SCHEMA.parse_rows(&sheet, build).unwrap();
        assert_eq!(
            items,
            vec![
                Item {
                    name: "Rice".into(),
                    quantity: 4,
                    expires: NaiveDate::from_ymd_opt(2027, 1, 31),
                },
                Item {
                    name: "Beans".into(),
                    quantity: 2,
                    expires: None,
                },
            ]
        );
    }

    #[test]
    fn collects_every_field_error_of_every_row() {
        let sheet = Sheet::from_rows(
            ["name", "quantity", "expires"],
            &[
                vec!["", "x", "soon"],
                vec!["Rice", "3", ""],
                vec!["Oil", "", ""],
            ],
        );
        let Err(ImportError::InvalidRows(rows)) = SCHEMA.parse_rows(&sheet, build) else {
            panic!("expected invalid rows");
        };
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].row, 2);
        assert_eq!(rows[0].errors.len(), 3);
        assert!(rows[0].errors[0].contains("name is required"));
        assert_eq!(rows[1].row, 4);
        assert_eq!(rows[1].errors, vec!["quantity is required".to_string()]);
    }

    #[test]
    fn dates_accept_iso_with_time_and_day_first() {
        let d = NaiveDate::from_ymd_opt(2026, 3, 9);
        assert_eq!(parse_date("2026-03-09"), d);
        assert_eq!(parse_date("2026-03-09T00:00:00"), d);
        assert_eq!(parse_date("09/03/2026"), d);
        assert_eq!(parse_date("March 9"), None);
    }
}
