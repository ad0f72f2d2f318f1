use almoner_import::Importer;
use almoner_infra::{
    AppConfig, DeliveryLedger, FamilyRegistry, PatientRegistry, Stores, WarehouseService,
    WiringError,
};

/// Every service the handlers reach through `Extension<Arc<AppServices>>`.
#[derive(Clone)]
pub struct AppServices {
    pub warehouses: WarehouseService,
    pub ledger: DeliveryLedger,
    pub families: FamilyRegistry,
    pub patients: PatientRegistry,
    pub importer: Importer,
}

impl AppServices {
    pub fn from_stores(stores: Stores) -> Self {
        Self {
            warehouses: WarehouseService::new(stores.warehouses.clone()),
            ledger: DeliveryLedger::new(
                stores.deliveries.clone(),
                stores.families.clone(),
                stores.warehouses.clone(),
            ),
            families: FamilyRegistry::new(stores.families.clone(), stores.deliveries.clone()),
            patients: PatientRegistry::new(stores.patients.clone()),
            importer: Importer::new(stores),
        }
    }

    /// In-memory wiring (dev/test).
    pub fn in_memory() -> Self {
        Self::from_stores(Stores::in_memory())
    }

    pub async fn from_config(config: &AppConfig) -> Result<Self, WiringError> {
        Ok(Self::from_stores(Stores::from_config(config).await?))
    }
}
