use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use crate::audit::{AuditRecord, AuditStatus, AuditStore, AuditStoreError};
use crate::record::StreamRecord;
use crate::resilience::{ResilienceError, ResilienceStrategy, RetryPolicy};

/// User handler invoked once per admitted message.
pub type Handler = Arc<dyn Fn(&StreamRecord) -> anyhow::Result<()> + Send + Sync>;

/// Acknowledgment policy applied after a message reaches a terminal state.
///
/// `AckAlways` keeps the partition moving: failures are recorded in the
/// audit trail for operator replay rather than blocking delivery.
/// `AckOnSuccess` withholds acknowledgment on failure to force
/// transport-level reprocessing, trading forward progress for redelivery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
    #[default]
    AckAlways,
    AckOnSuccess,
}

/// Terminal classification of one message's processing cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Succeeded,
    Failed { error: String },
    Rejected { breaker: String },
}

impl MessageOutcome {
    /// Whether the offset becomes commit-eligible under the given policy.
    pub fn should_acknowledge(&self, mode: AckMode) -> bool {
        match mode {
            AckMode::AckAlways => true,
            AckMode::AckOnSuccess => matches!(self, MessageOutcome::Succeeded),
        }
    }
}

/// Fatal audit condition: persistence attempts for one message were
/// exhausted. Surfaced, never swallowed — losing the audit trail would
/// defeat the subsystem.
#[derive(Debug, Error)]
pub enum AuditFailure {
    #[error("audit {operation} exhausted retries for {topic}/{partition}@{offset}: {source}")]
    Exhausted {
        operation: &'static str,
        topic: String,
        partition: i32,
        offset: i64,
        #[source]
        source: AuditStoreError,
    },
}

/// Audit boundary the lifecycle tracker writes through.
pub trait AuditSink: Send + Sync {
    fn mark_received(&self, record: &StreamRecord) -> Result<(), AuditFailure>;
    fn mark_processing(&self, record: &StreamRecord) -> Result<(), AuditFailure>;
    fn mark_success(&self, record: &StreamRecord) -> Result<(), AuditFailure>;
    fn mark_failure(&self, record: &StreamRecord, error: &str) -> Result<(), AuditFailure>;

    fn is_noop(&self) -> bool {
        false
    }
}

/// Sink writing through an [`AuditStore`], retrying each store operation
/// under a bounded policy so audit hiccups stay distinguishable from
/// handler failures.
pub struct StoreAuditSink {
    store: Arc<dyn AuditStore>,
    write_retry: RetryPolicy,
}

impl StoreAuditSink {
    pub fn new(store: Arc<dyn AuditStore>, write_retry: RetryPolicy) -> Self {
        Self { store, write_retry }
    }

    fn exhausted(
        operation: &'static str,
        record: &StreamRecord,
        source: AuditStoreError,
    ) -> AuditFailure {
        AuditFailure::Exhausted {
            operation,
            topic: record.topic.clone(),
            partition: record.partition,
            offset: record.offset,
            source,
        }
    }

    fn advance(
        &self,
        operation: &'static str,
        record: &StreamRecord,
        status: AuditStatus,
        error_message: Option<&str>,
    ) -> Result<(), AuditFailure> {
        self.write_retry
            .run(|| {
                let mut stored = self
                    .store
                    .find(&record.topic, record.partition, record.offset)?
                    .ok_or_else(|| AuditStoreError::NotFound {
                        topic: record.topic.clone(),
                        partition: record.partition,
                        offset: record.offset,
                    })?;
                stored.advance(status)?;
                stored.error_message = error_message.map(str::to_string);
                self.store.update(&stored)?;
                Ok(())
            })
            .map_err(|source| Self::exhausted(operation, record, source))
    }
}

impl AuditSink for StoreAuditSink {
    /// Creates the `Received` entry, or resets the existing row in place
    /// when the transport redelivers an already-audited offset.
    fn mark_received(&self, record: &StreamRecord) -> Result<(), AuditFailure> {
        self.write_retry
            .run(|| {
                match self
                    .store
                    .find(&record.topic, record.partition, record.offset)?
                {
                    Some(mut existing) => {
                        existing.reset_for_redelivery();
                        self.store.update(&existing)?;
                    }
                    None => {
                        self.store.save(AuditRecord::received(record))?;
                    }
                }
                Ok(())
            })
            .map_err(|source| Self::exhausted("save", record, source))
    }

    fn mark_processing(&self, record: &StreamRecord) -> Result<(), AuditFailure> {
        self.advance("update", record, AuditStatus::Processing, None)
    }

    fn mark_success(&self, record: &StreamRecord) -> Result<(), AuditFailure> {
        self.advance("update", record, AuditStatus::ConsumedSuccessfully, None)
    }

    fn mark_failure(&self, record: &StreamRecord, error: &str) -> Result<(), AuditFailure> {
        self.advance("update", record, AuditStatus::ConsumedFailure, Some(error))
    }
}

/// Sink for deployments that opt out of audit persistence: every step runs,
/// no storage I/O happens.
#[derive(Debug, Default)]
pub struct NoOpAuditSink;

impl AuditSink for NoOpAuditSink {
    fn mark_received(&self, _record: &StreamRecord) -> Result<(), AuditFailure> {
        Ok(())
    }

    fn mark_processing(&self, _record: &StreamRecord) -> Result<(), AuditFailure> {
        Ok(())
    }

    fn mark_success(&self, _record: &StreamRecord) -> Result<(), AuditFailure> {
        Ok(())
    }

    fn mark_failure(&self, _record: &StreamRecord, _error: &str) -> Result<(), AuditFailure> {
        Ok(())
    }

    fn is_noop(&self) -> bool {
        true
    }
}

/// Wraps one handler invocation with audit bookkeeping and the resilience
/// strategy.
pub struct LifecycleTracker {
    sink: Arc<dyn AuditSink>,
    strategy: ResilienceStrategy,
    handler: Handler,
}

impl LifecycleTracker {
    pub fn new(sink: Arc<dyn AuditSink>, strategy: ResilienceStrategy, handler: Handler) -> Self {
        Self {
            sink,
            strategy,
            handler,
        }
    }

    /// Runs the full per-message cycle:
    ///
    /// 1. persist `Received` (create or redelivery reset)
    /// 2. persist `Processing`
    /// 3. execute the handler under the resilience strategy
    /// 4. normal completion → `ConsumedSuccessfully`
    /// 5. call-not-permitted → `ConsumedFailure` with the rejection
    ///    description; the handler never ran
    /// 6. any other failure → `ConsumedFailure` with the failure message
    ///
    /// Only audit-write exhaustion escapes as an error.
    pub fn process(&self, record: &StreamRecord) -> Result<MessageOutcome, AuditFailure> {
        self.sink.mark_received(record)?;
        self.sink.mark_processing(record)?;
        let handler = &self.handler;
        let mut action = || handler(record);
        match self.strategy.execute(&mut action) {
            Ok(()) => {
                self.sink.mark_success(record)?;
                Ok(MessageOutcome::Succeeded)
            }
            Err(rejection @ ResilienceError::CallNotPermitted { .. }) => {
                let description = rejection.to_string();
                self.sink.mark_failure(record, &description)?;
                match rejection {
                    ResilienceError::CallNotPermitted { breaker } => {
                        Ok(MessageOutcome::Rejected { breaker })
                    }
                    ResilienceError::Failed(_) => unreachable!(),
                }
            }
            Err(ResilienceError::Failed(error)) => {
                let message = error.to_string();
                self.sink.mark_failure(record, &message)?;
                Ok(MessageOutcome::Failed { error: message })
            }
        }
    }

    /// Whether the underlying sink persists anything.
    pub fn is_noop(&self) -> bool {
        self.sink.is_noop()
    }
}
