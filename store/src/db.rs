use std::sync::Arc;

use common::{NewRecord, ProcessedAgentDataInDB};

use crate::error::StoreResult;

pub mod memory;
pub mod redis_backend;

/// Persistence for processed agent data rows.
///
/// Implementations are synchronous; async callers go through [`run_blocking`]
/// so a slow backend never stalls the executor.
pub trait DataStore: Send + Sync {
    /// Stores every record of the batch or none of them, returning the
    /// assigned ids in batch order.
    fn insert_batch(&self, records: &[NewRecord]) -> StoreResult<Vec<i64>>;

    fn get(&self, id: i64) -> StoreResult<Option<ProcessedAgentDataInDB>>;

    /// All rows in ascending id order.
    fn list(&self) -> StoreResult<Vec<ProcessedAgentDataInDB>>;

    /// Replaces the row, returning false when it does not exist.
    fn update(&self, id: i64, record: &NewRecord) -> StoreResult<bool>;

    /// Removes the row, returning false when it does not exist.
    fn delete(&self, id: i64) -> StoreResult<bool>;
}

pub async fn run_blocking<T, F>(db: &Arc<dyn DataStore>, op: F) -> StoreResult<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn DataStore) -> StoreResult<T> + Send + 'static,
{
    let db = Arc::clone(db);
    tokio::task::spawn_blocking(move || op(db.as_ref())).await?
}
