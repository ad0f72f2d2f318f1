use std::fmt;

use thiserror::Error;

use almoner_core::DomainError;
use almoner_infra::reconciler::ReconcileError;
use almoner_infra::store::StoreError;
use almoner_inventory::StockError;

/// Every field problem found on one spreadsheet row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    /// 1-based spreadsheet row; the header is row 1.
    pub row: usize,
    pub errors: Vec<String>,
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}: {}", self.row, self.errors.join("; "))
    }
}

fn join_rows(rows: &[RowError]) -> String {
    rows.iter()
        .map(RowError::to_string)
        .collect::<Vec<_>>()
        .join(" | ")
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("unsupported file '{0}': only .xlsx and .xlsm workbooks are accepted")]
    UnsupportedFormat(String),

    #[error("cannot read workbook: {0}")]
    Workbook(String),

    #[error("workbook has no worksheet with a header row")]
    EmptyWorkbook,

    #[error("unexpected header: expected [{expected}], found [{found}]")]
    HeaderMismatch { expected: String, found: String },

    #[error("{} invalid row(s): {}", .0.len(), join_rows(.0))]
    InvalidRows(Vec<RowError>),

    #[error("duplicate {what} '{key}' in rows {first} and {second}")]
    DuplicateKey {
        what: &'static str,
        key: String,
        first: usize,
        second: usize,
    },

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Prefix a domain rejection with the spreadsheet row that caused it.
pub(crate) fn at_row(row: usize, error: DomainError) -> ImportError {
    let error = match error {
        DomainError::BadRequest(m) => DomainError::BadRequest(format!("row {row}: {m}")),
        DomainError::NotFound(m) => DomainError::NotFound(format!("row {row}: {m}")),
        DomainError::Conflict(m) => DomainError::Conflict(format!("row {row}: {m}")),
        other => other,
    };
    ImportError::Domain(error)
}

impl From<StoreError> for ImportError {
    fn from(value: StoreError) -> Self {
        Self::Domain(value.into())
    }
}

impl From<StockError> for ImportError {
    fn from(value: StockError) -> Self {
        Self::Domain(value.into())
    }
}

impl From<ReconcileError> for ImportError {
    fn from(value: ReconcileError) -> Self {
        Self::Domain(value.into())
    }
}

impl From<ImportError> for DomainError {
    fn from(value: ImportError) -> Self {
        match value {
            ImportError::Domain(e) => e,
            ImportError::NotFound(_) => DomainError::NotFound(value.to_string()),
            ImportError::Conflict(_) => DomainError::Conflict(value.to_string()),
            _ => DomainError::BadRequest(value.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_errors_are_listed_together() {
        let err = ImportError::InvalidRows(vec![
            RowError {
                row: 2,
                errors: vec!["name is required".into(), "gender: invalid".into()],
            },
            RowError {
                row: 5,
                errors: vec!["quantity is required".into()],
            },
        ]);
        assert_eq!(
            err.to_string(),
            "2 invalid row(s): row 2: name is required; gender: invalid | row 5: quantity is required"
        );
    }

    #[test]
    fn maps_onto_domain_errors() {
        assert!(matches!(
            DomainError::from(ImportError::EmptyWorkbook),
            DomainError::BadRequest(_)
        ));
        assert!(matches!(
            DomainError::from(ImportError::NotFound("warehouse 'North'".into())),
            DomainError::NotFound(_)
        ));
        assert!(matches!(
            DomainError::from(ImportError::Conflict("delivered".into())),
            DomainError::Conflict(_)
        ));
        assert!(matches!(
            DomainError::from(ImportError::from(StoreError::Backend("down".into()))),
            DomainError::Internal(_)
        ));
    }
}
