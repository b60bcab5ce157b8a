pub mod memory;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::record::StreamRecord;

/// Lifecycle states recorded for every consumed message.
///
/// A record enters at `Received` and advances strictly forward within one
/// processing cycle; the two `Consumed*` states are terminal. Transport-level
/// redelivery is the only path that re-enters `Received`, and it reuses the
/// existing row (see [`AuditRecord::reset_for_redelivery`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    Received,
    Processing,
    ConsumedSuccessfully,
    ConsumedFailure,
}

impl AuditStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AuditStatus::ConsumedSuccessfully | AuditStatus::ConsumedFailure
        )
    }

    /// Whether `next` is a legal forward step from this state.
    pub fn can_advance_to(self, next: AuditStatus) -> bool {
        matches!(
            (self, next),
            (AuditStatus::Received, AuditStatus::Processing)
                | (AuditStatus::Processing, AuditStatus::ConsumedSuccessfully)
                | (AuditStatus::Processing, AuditStatus::ConsumedFailure)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AuditStatus::Received => "RECEIVED",
            AuditStatus::Processing => "PROCESSING",
            AuditStatus::ConsumedSuccessfully => "CONSUMED_SUCCESSFULLY",
            AuditStatus::ConsumedFailure => "CONSUMED_FAILURE",
        }
    }
}

/// Persisted lifecycle entry for one (topic, partition, offset) triple.
///
/// At most one record exists per triple; the store enforces the uniqueness
/// constraint and owns `created_at_ms`, `updated_at_ms`, and `version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub value: Option<String>,
    pub status: AuditStatus,
    pub error_message: Option<String>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    pub version: u64,
}

impl AuditRecord {
    /// Builds the initial `Received` entry for a freshly delivered record.
    pub fn received(record: &StreamRecord) -> Self {
        Self {
            id: audit_record_id(&record.topic, record.partition, record.offset),
            topic: record.topic.clone(),
            partition: record.partition,
            offset: record.offset,
            key: record
                .key
                .as_deref()
                .map(|k| String::from_utf8_lossy(k).into_owned()),
            value: Some(String::from_utf8_lossy(&record.value).into_owned()),
            status: AuditStatus::Received,
            error_message: None,
            created_at_ms: 0,
            updated_at_ms: 0,
            version: 0,
        }
    }

    /// Advances the status, rejecting any step the state machine forbids.
    pub fn advance(&mut self, next: AuditStatus) -> Result<(), AuditStoreError> {
        if !self.status.can_advance_to(next) {
            return Err(AuditStoreError::IllegalTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Resets a previously terminal record for a redelivered message.
    ///
    /// The row identity and `created_at_ms` survive; status returns to
    /// `Received` and any prior error clears. This is the only sanctioned
    /// re-entry into `Received`.
    pub fn reset_for_redelivery(&mut self) {
        self.status = AuditStatus::Received;
        self.error_message = None;
    }
}

/// Stable synthetic identity for the audit row covering one triple.
pub fn audit_record_id(topic: &str, partition: i32, offset: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(topic.as_bytes());
    hasher.update(b"/");
    hasher.update(partition.to_be_bytes());
    hasher.update(b"/");
    hasher.update(offset.to_be_bytes());
    let digest = hasher.finalize();
    let mut id = String::with_capacity(32);
    for byte in &digest[..16] {
        id.push_str(&format!("{byte:02x}"));
    }
    id
}

/// Key-value persistence boundary for audit records.
///
/// Implementations must be safe for concurrent callers; the pipeline
/// guarantees a given offset is handled by exactly one worker, so logical
/// races on a single triple do not occur.
pub trait AuditStore: Send + Sync {
    /// Inserts a new record, returning its identity.
    fn save(&self, record: AuditRecord) -> Result<String, AuditStoreError>;

    /// Looks a record up by its uniqueness triple.
    fn find(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> Result<Option<AuditRecord>, AuditStoreError>;

    /// Updates an existing record in place, returning the stored row with
    /// its bumped version and refreshed `updated_at_ms`.
    fn update(&self, record: &AuditRecord) -> Result<AuditRecord, AuditStoreError>;

    /// Records currently in the given status, for operator queries.
    fn list_by_status(&self, status: AuditStatus) -> Result<Vec<AuditRecord>, AuditStoreError>;
}

/// Errors surfaced by audit persistence.
#[derive(Debug, Error)]
pub enum AuditStoreError {
    #[error("audit record already exists for {topic}/{partition}@{offset}")]
    Duplicate {
        topic: String,
        partition: i32,
        offset: i64,
    },
    #[error("no audit record for {topic}/{partition}@{offset}")]
    NotFound {
        topic: String,
        partition: i32,
        offset: i64,
    },
    #[error("stale audit record version: caller has {caller}, store has {stored}")]
    VersionConflict { caller: u64, stored: u64 },
    #[error("illegal audit transition {from:?} -> {to:?}")]
    IllegalTransition { from: AuditStatus, to: AuditStatus },
    #[error("audit store unavailable: {0}")]
    Unavailable(String),
}
