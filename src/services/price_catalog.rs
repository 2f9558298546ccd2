use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;
use validator::Validate;

use crate::{
    best_effort::BestEffort,
    db::{DbError, DbPool, DbResult},
    events::{EventBus, ServerEvent},
    models::{CreatePriceRecord, PriceRecord, UpdatePriceRecord},
    observability::metrics,
    pricing::{DefaultPricingTable, ResolvedPrice, UnitPrices, resolve},
};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Invalid price record: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Price record not found: {0}")]
    NotFound(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// The price catalog: operator-owned records plus the fallback table.
///
/// Resolution reads an in-memory snapshot that is swapped after every
/// edit, so charges never wait on catalog writes.
pub struct PriceCatalogService {
    db: Arc<DbPool>,
    defaults: DefaultPricingTable,
    auto_derive: bool,
    events: Arc<EventBus>,
    snapshot: RwLock<Arc<Vec<PriceRecord>>>,
}

impl PriceCatalogService {
    pub fn new(
        db: Arc<DbPool>,
        defaults: DefaultPricingTable,
        auto_derive: bool,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            db,
            defaults,
            auto_derive,
            events,
            snapshot: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Create the service and load the current catalog.
    pub async fn load(
        db: Arc<DbPool>,
        defaults: DefaultPricingTable,
        auto_derive: bool,
        events: Arc<EventBus>,
    ) -> DbResult<Self> {
        let service = Self::new(db, defaults, auto_derive, events);
        service.refresh().await?;
        Ok(service)
    }

    /// Reload active records from storage. Returns the number loaded.
    pub async fn refresh(&self) -> DbResult<usize> {
        let records = self.db.price_records().list(false).await?;
        let count = records.len();
        *self.snapshot.write() = Arc::new(records);
        tracing::debug!(records = count, "Price catalog snapshot refreshed");
        Ok(count)
    }

    /// Active records as of the last refresh
    pub fn snapshot(&self) -> Arc<Vec<PriceRecord>> {
        self.snapshot.read().clone()
    }

    /// Effective price for a model: catalog first, then the fallback table.
    pub fn resolve_price(&self, model_name: &str) -> ResolvedPrice {
        let catalog = self.snapshot();
        match resolve(model_name, &catalog) {
            Some(record) => ResolvedPrice::Record(record.clone()),
            None => ResolvedPrice::Default(self.defaults.lookup(model_name)),
        }
    }

    pub async fn create(&self, input: CreatePriceRecord) -> CatalogResult<PriceRecord> {
        input.validate()?;
        let record = self.db.price_records().create(input).await?;
        self.refresh().await?;
        tracing::info!(
            record_id = %record.id,
            model = %record.model_name,
            origin = record.origin.as_str(),
            "Price record created"
        );
        Ok(record)
    }

    pub async fn update(&self, id: Uuid, input: UpdatePriceRecord) -> CatalogResult<PriceRecord> {
        input.validate()?;
        let record = self
            .db
            .price_records()
            .update(id, input)
            .await
            .map_err(|e| not_found_as(e, id))?;
        self.refresh().await?;
        tracing::info!(record_id = %id, model = %record.model_name, "Price record updated");
        Ok(record)
    }

    /// Activate or deactivate a record. Inactive records are never resolved.
    pub async fn set_active(&self, id: Uuid, is_active: bool) -> CatalogResult<PriceRecord> {
        let record = self
            .db
            .price_records()
            .set_active(id, is_active)
            .await
            .map_err(|e| not_found_as(e, id))?;
        self.refresh().await?;
        tracing::info!(record_id = %id, is_active, "Price record toggled");
        Ok(record)
    }

    pub async fn get(&self, id: Uuid) -> CatalogResult<PriceRecord> {
        self.db
            .price_records()
            .get_by_id(id)
            .await?
            .ok_or(CatalogError::NotFound(id))
    }

    pub async fn list(&self, include_inactive: bool) -> CatalogResult<Vec<PriceRecord>> {
        Ok(self.db.price_records().list(include_inactive).await?)
    }

    /// Record an auto-derived price for a model priced from the fallback
    /// table, so later charges resolve it from the catalog.
    ///
    /// Idempotent: concurrent calls for the same model create one record.
    pub async fn ensure_auto_derived(
        &self,
        model_name: &str,
        prices: UnitPrices,
    ) -> BestEffort<PriceRecord> {
        if !self.auto_derive {
            return BestEffort::Skipped;
        }

        let input = CreatePriceRecord::auto_derived(model_name, prices.input, prices.output);
        if let Err(e) = input.validate() {
            tracing::warn!(model = %model_name, error = %e, "Skipping auto-derived price");
            metrics::record_auto_derived_price("error");
            return BestEffort::Failed(e.to_string());
        }

        let (record, created) = match self.db.price_records().ensure(input).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(model = %model_name, error = %e, "Failed to record auto-derived price");
                metrics::record_auto_derived_price("error");
                return BestEffort::Failed(e.to_string());
            }
        };

        if !created {
            metrics::record_auto_derived_price("existing");
            return BestEffort::Done(record);
        }

        metrics::record_auto_derived_price("created");
        tracing::info!(
            record_id = %record.id,
            model = %record.model_name,
            input_unit_price = %record.input_unit_price,
            output_unit_price = %record.output_unit_price,
            "Auto-derived price record created"
        );
        self.events.publish(ServerEvent::PriceRecordAutoCreated {
            record_id: record.id,
            timestamp: Utc::now(),
            model: record.model_name.clone(),
            input_unit_price: record.input_unit_price,
            output_unit_price: record.output_unit_price,
        });

        if let Err(e) = self.refresh().await {
            tracing::warn!(error = %e, "Failed to refresh price catalog after auto-derive");
        }
        BestEffort::Done(record)
    }
}

fn not_found_as(error: DbError, id: Uuid) -> CatalogError {
    match error {
        DbError::NotFound => CatalogError::NotFound(id),
        other => CatalogError::Database(other),
    }
}
