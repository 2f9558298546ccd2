use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    db::error::DbResult,
    models::{CreatePriceRecord, PriceOrigin, PriceRecord, UpdatePriceRecord},
};

#[async_trait]
pub trait PriceRecordRepo: Send + Sync {
    /// Create a price record. Fails with `Conflict` if the model already has
    /// a record of the same origin.
    async fn create(&self, input: CreatePriceRecord) -> DbResult<PriceRecord>;

    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<PriceRecord>>;

    /// Case-insensitive lookup of the record for a model and origin
    async fn get_by_model(
        &self,
        model_name: &str,
        origin: PriceOrigin,
    ) -> DbResult<Option<PriceRecord>>;

    /// List records ordered by creation time
    async fn list(&self, include_inactive: bool) -> DbResult<Vec<PriceRecord>>;

    /// Apply an operator edit. Returns `NotFound` for unknown ids.
    async fn update(&self, id: Uuid, input: UpdatePriceRecord) -> DbResult<PriceRecord>;

    /// Activate or deactivate a record. Records are never deleted.
    async fn set_active(&self, id: Uuid, is_active: bool) -> DbResult<PriceRecord>;

    /// Insert the record unless the model already has one of the same origin.
    ///
    /// Returns the stored record and whether this call created it. Concurrent
    /// callers for the same model all observe the same record.
    async fn ensure(&self, input: CreatePriceRecord) -> DbResult<(PriceRecord, bool)>;
}
