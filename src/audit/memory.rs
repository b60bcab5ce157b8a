use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::audit::{AuditRecord, AuditStatus, AuditStore, AuditStoreError};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Coordinates {
    topic: String,
    partition: i32,
    offset: i64,
}

impl Coordinates {
    fn of(topic: &str, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.to_string(),
            partition,
            offset,
        }
    }
}

/// Mutex-guarded in-memory audit store.
///
/// Enforces the one-record-per-triple constraint and owns the timestamp and
/// version columns the same way a backing database would.
#[derive(Debug, Default)]
pub struct InMemoryAuditStore {
    records: Mutex<HashMap<Coordinates, AuditRecord>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditStore for InMemoryAuditStore {
    fn save(&self, mut record: AuditRecord) -> Result<String, AuditStoreError> {
        let key = Coordinates::of(&record.topic, record.partition, record.offset);
        let mut records = self.records.lock().unwrap();
        if records.contains_key(&key) {
            return Err(AuditStoreError::Duplicate {
                topic: record.topic,
                partition: record.partition,
                offset: record.offset,
            });
        }
        let now = now_ms();
        record.created_at_ms = now;
        record.updated_at_ms = now;
        record.version = 1;
        let id = record.id.clone();
        records.insert(key, record);
        Ok(id)
    }

    fn find(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> Result<Option<AuditRecord>, AuditStoreError> {
        let records = self.records.lock().unwrap();
        Ok(records
            .get(&Coordinates::of(topic, partition, offset))
            .cloned())
    }

    fn update(&self, record: &AuditRecord) -> Result<AuditRecord, AuditStoreError> {
        let key = Coordinates::of(&record.topic, record.partition, record.offset);
        let mut records = self.records.lock().unwrap();
        let stored = records
            .get_mut(&key)
            .ok_or_else(|| AuditStoreError::NotFound {
                topic: record.topic.clone(),
                partition: record.partition,
                offset: record.offset,
            })?;
        if stored.version != record.version {
            return Err(AuditStoreError::VersionConflict {
                caller: record.version,
                stored: stored.version,
            });
        }
        stored.status = record.status;
        stored.error_message = record.error_message.clone();
        stored.key = record.key.clone();
        stored.value = record.value.clone();
        stored.updated_at_ms = now_ms();
        stored.version += 1;
        Ok(stored.clone())
    }

    fn list_by_status(&self, status: AuditStatus) -> Result<Vec<AuditRecord>, AuditStoreError> {
        let records = self.records.lock().unwrap();
        let mut matching: Vec<AuditRecord> = records
            .values()
            .filter(|record| record.status == status)
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            (&a.topic, a.partition, a.offset).cmp(&(&b.topic, b.partition, b.offset))
        });
        Ok(matching)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis().min(u128::from(u64::MAX)) as u64)
        .unwrap_or(0)
}
