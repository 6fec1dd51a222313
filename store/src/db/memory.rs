use parking_lot::Mutex;
use std::collections::BTreeMap;

use common::{NewRecord, ProcessedAgentDataInDB};

use super::DataStore;
use crate::error::StoreResult;

#[derive(Default)]
struct Table {
    last_id: i64,
    rows: BTreeMap<i64, ProcessedAgentDataInDB>,
}

/// Process-local backend. Used when no Redis is configured and in tests.
#[derive(Default)]
pub struct MemoryStore {
    table: Mutex<Table>,
}

impl DataStore for MemoryStore {
    fn insert_batch(&self, records: &[NewRecord]) -> StoreResult<Vec<i64>> {
        let mut table = self.table.lock();
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            table.last_id += 1;
            let id = table.last_id;
            table
                .rows
                .insert(id, ProcessedAgentDataInDB::from_record(id, record.clone()));
            ids.push(id);
        }
        Ok(ids)
    }

    fn get(&self, id: i64) -> StoreResult<Option<ProcessedAgentDataInDB>> {
        Ok(self.table.lock().rows.get(&id).cloned())
    }

    fn list(&self) -> StoreResult<Vec<ProcessedAgentDataInDB>> {
        Ok(self.table.lock().rows.values().cloned().collect())
    }

    fn update(&self, id: i64, record: &NewRecord) -> StoreResult<bool> {
        let mut table = self.table.lock();
        match table.rows.get_mut(&id) {
            Some(row) => {
                *row = ProcessedAgentDataInDB::from_record(id, record.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete(&self, id: i64) -> StoreResult<bool> {
        Ok(self.table.lock().rows.remove(&id).is_some())
    }
}
