use log::{debug, info, warn};
use redis::Commands;

use common::{NewRecord, ProcessedAgentDataInDB};

use super::DataStore;
use crate::error::StoreResult;

const KEY_PREFIX: &str = "processed_agent_data";

fn next_id_key() -> String {
    format!("{}:next_id", KEY_PREFIX)
}

fn index_key() -> String {
    format!("{}:ids", KEY_PREFIX)
}

fn row_key(id: i64) -> String {
    format!("{}:{}", KEY_PREFIX, id)
}

// INCRBY returns the counter after the increment, so a batch of `count`
// owns the ids ending at `last`.
fn reserved_ids(last: i64, count: usize) -> Vec<i64> {
    let count = count as i64;
    (last - count + 1..=last).collect()
}

/// Durable backend. Each row is a JSON string under `processed_agent_data:{id}`,
/// ordered by the sorted set `processed_agent_data:ids`.
pub struct RedisStore {
    client: redis::Client,
}

impl RedisStore {
    pub fn connect(url: &str) -> redis::RedisResult<Self> {
        let client = redis::Client::open(url)?;
        let mut conn = client.get_connection()?;
        let pong: String = redis::cmd("PING").query(&mut conn)?;
        info!("Redis answered {}", pong);
        Ok(RedisStore { client })
    }

    fn connection(&self) -> redis::RedisResult<redis::Connection> {
        self.client.get_connection()
    }
}

impl DataStore for RedisStore {
    fn insert_batch(&self, records: &[NewRecord]) -> StoreResult<Vec<i64>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection()?;

        let last: i64 = conn.incr(next_id_key(), records.len())?;
        let ids = reserved_ids(last, records.len());

        let mut pipe = redis::pipe();
        pipe.atomic();
        for (id, record) in ids.iter().zip(records) {
            let row = ProcessedAgentDataInDB::from_record(*id, record.clone());
            pipe.set(row_key(*id), serde_json::to_string(&row)?).ignore();
            pipe.zadd(index_key(), *id, *id).ignore();
        }
        pipe.query::<()>(&mut conn)?;

        debug!("Stored {} rows in Redis, ids {:?}", ids.len(), ids);
        Ok(ids)
    }

    fn get(&self, id: i64) -> StoreResult<Option<ProcessedAgentDataInDB>> {
        let mut conn = self.connection()?;
        let value: Option<String> = conn.get(row_key(id))?;
        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn list(&self) -> StoreResult<Vec<ProcessedAgentDataInDB>> {
        let mut conn = self.connection()?;
        let ids: Vec<i64> = conn.zrange(index_key(), 0, -1)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| row_key(*id)).collect();
        let values: Vec<Option<String>> = redis::cmd("MGET").arg(&keys).query(&mut conn)?;

        let mut rows = Vec::with_capacity(values.len());
        for (id, value) in ids.iter().zip(values) {
            match value {
                Some(json) => rows.push(serde_json::from_str(&json)?),
                None => warn!("Index references missing row {}", id),
            }
        }
        Ok(rows)
    }

    fn update(&self, id: i64, record: &NewRecord) -> StoreResult<bool> {
        let mut conn = self.connection()?;
        let row = ProcessedAgentDataInDB::from_record(id, record.clone());
        // XX only writes when the key already exists.
        let reply: Option<String> = redis::cmd("SET")
            .arg(row_key(id))
            .arg(serde_json::to_string(&row)?)
            .arg("XX")
            .query(&mut conn)?;
        Ok(reply.is_some())
    }

    fn delete(&self, id: i64) -> StoreResult<bool> {
        let mut conn = self.connection()?;
        let (removed, _): (i64, i64) = redis::pipe()
            .atomic()
            .del(row_key(id))
            .zrem(index_key(), id)
            .query(&mut conn)?;
        Ok(removed > 0)
    }
}
