//! Store wiring: one type-erased store per record kind.

use std::sync::Arc;

use sqlx::PgPool;
use tracing::info;

use almoner_beneficiaries::{Family, Patient};
use almoner_deliveries::Delivery;
use almoner_inventory::Warehouse;

use crate::config::{AppConfig, ConfigError, DATABASE_URL_VAR};
use crate::store::postgres::migrate;
use crate::store::{InMemoryRecordStore, PostgresRecordStore, RecordStore, StoreError};
use crate::warehouses::{WarehouseRepository, Warehouses};

/// Every record store the services need.
#[derive(Clone)]
pub struct Stores {
    pub warehouses: Arc<Warehouses>,
    pub deliveries: Arc<dyn RecordStore<Delivery>>,
    pub families: Arc<dyn RecordStore<Family>>,
    pub patients: Arc<dyn RecordStore<Patient>>,
}

#[derive(Debug, thiserror::Error)]
pub enum WiringError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to connect to Postgres: {0}")]
    Connect(#[from] sqlx::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Stores {
    /// In-memory stores (dev/test).
    pub fn in_memory() -> Self {
        let warehouses: Arc<dyn RecordStore<Warehouse>> =
            Arc::new(InMemoryRecordStore::<Warehouse>::new());
        Self {
            warehouses: Arc::new(WarehouseRepository::new(warehouses)),
            deliveries: Arc::new(InMemoryRecordStore::<Delivery>::new()),
            families: Arc::new(InMemoryRecordStore::<Family>::new()),
            patients: Arc::new(InMemoryRecordStore::<Patient>::new()),
        }
    }

    /// Postgres-backed stores sharing one pool. Creates the schema when
    /// missing and warms the product index.
    pub async fn postgres(database_url: &str) -> Result<Self, WiringError> {
        let pool = Arc::new(PgPool::connect(database_url).await?);
        migrate(&pool).await?;

        let warehouses: Arc<dyn RecordStore<Warehouse>> =
            Arc::new(PostgresRecordStore::<Warehouse>::from_shared(pool.clone()));
        let warehouses = Arc::new(WarehouseRepository::new(warehouses));
        warehouses.rebuild_index().await?;

        Ok(Self {
            warehouses,
            deliveries: Arc::new(PostgresRecordStore::<Delivery>::from_shared(pool.clone())),
            families: Arc::new(PostgresRecordStore::<Family>::from_shared(pool.clone())),
            patients: Arc::new(PostgresRecordStore::<Patient>::from_shared(pool)),
        })
    }

    pub async fn from_config(config: &AppConfig) -> Result<Self, WiringError> {
        if !config.persistent {
            info!("using in-memory stores");
            return Ok(Self::in_memory());
        }
        let url = config
            .database_url
            .as_deref()
            .ok_or(ConfigError::Missing(DATABASE_URL_VAR))?;
        info!("using Postgres stores");
        Self::postgres(url).await
    }
}
