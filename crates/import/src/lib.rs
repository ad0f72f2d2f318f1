//! Bulk spreadsheet import.
//!
//! Every sheet kind follows the same path: read the first worksheet, check
//! the header, validate every row (any bad row aborts before the first
//! write), build candidates keyed by their natural key, partition them
//! against existing records with one bulk lookup, then submit unordered
//! insert and update batches.

pub mod deliveries;
pub mod error;
pub mod families;
pub mod patients;
pub mod plan;
pub mod products;
pub mod schema;
pub mod sheet;

pub use error::{ImportError, RowError};
pub use plan::{ImportKind, ImportReport};
pub use sheet::{Sheet, read_workbook};

use tracing::{info, instrument};

use almoner_infra::reconciler::StockReconciler;
use almoner_infra::{Reconciler, Stores, today};

/// Entry point used by the HTTP upload routes.
#[derive(Clone)]
pub struct Importer {
    stores: Stores,
    reconciler: Reconciler,
}

impl Importer {
    pub fn new(stores: Stores) -> Self {
        let reconciler = StockReconciler::new(stores.warehouses.clone());
        Self { stores, reconciler }
    }

    /// Read an uploaded workbook and import it as `kind`.
    #[instrument(skip(self, bytes), fields(bytes = bytes.len()), err)]
    pub async fn import(
        &self,
        kind: ImportKind,
        filename: &str,
        bytes: &[u8],
    ) -> Result<ImportReport, ImportError> {
        let sheet = read_workbook(filename, bytes)?;
        self.import_sheet(kind, &sheet).await
    }

    pub async fn import_sheet(&self, kind: ImportKind, sheet: &Sheet) -> Result<ImportReport, ImportError> {
        let report = match kind {
            ImportKind::Patients => patients::import(self.stores.patients.as_ref(), sheet).await?,
            ImportKind::Families => {
                families::import(
                    self.stores.families.as_ref(),
                    self.stores.deliveries.as_ref(),
                    sheet,
                )
                .await?
            }
            ImportKind::Deliveries => {
                deliveries::import(
                    self.stores.deliveries.as_ref(),
                    self.stores.families.as_ref(),
                    &self.reconciler,
                    sheet,
                )
                .await?
            }
            ImportKind::Products => products::import(&self.stores.warehouses, sheet, today()).await?,
        };
        info!(
            kind = %report.kind,
            inserted = report.inserted,
            updated = report.updated,
            failed = report.failed,
            propagated = report.propagated.modified,
            "import finished"
        );
        Ok(report)
    }
}
