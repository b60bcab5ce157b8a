//! Resilient consumption layer for partitioned, ordered message streams.
//!
//! The pipeline decouples stream polling from processing through a bounded
//! worker queue, composes retry and circuit-breaker policies around the user
//! handler, pauses intake while any tracked breaker is open, and records an
//! auditable lifecycle for every message so partial failures stay
//! diagnosable and recoverable. Delivery is at-least-once; downstream
//! handlers are expected to be idempotent.

pub mod app;
pub mod audit;
pub mod breaker;
pub mod config;
pub mod consumer;
pub mod coordinator;
pub mod engine;
pub mod lifecycle;
pub mod observability;
pub mod record;
pub mod resilience;
pub mod source;

pub use audit::memory::InMemoryAuditStore;
pub use audit::{audit_record_id, AuditRecord, AuditStatus, AuditStore, AuditStoreError};
pub use breaker::{
    BreakerPolicy, BreakerState, BreakerSubscription, BreakerTransition, CircuitBreaker,
};
pub use config::{
    AuditMode, AuditWriteConfig, BreakerEntry, ConfigError, ConsumerConfig, RetryConfig,
};
pub use consumer::ConsumerOrchestrator;
pub use coordinator::{ControlError, IntakeControl, IntakeCoordinator};
pub use engine::{
    BackpressureEngine, EngineConfig, FatalHook, ProcessFault, ProcessFn, SubmitError,
    DEFAULT_DEQUEUE_INTERVAL, DEFAULT_SHUTDOWN_GRACE,
};
pub use lifecycle::{
    AckMode, AuditFailure, AuditSink, Handler, LifecycleTracker, MessageOutcome, NoOpAuditSink,
    StoreAuditSink,
};
pub use observability::logging::{
    JsonLineLogger, LogFile, LogLevel, LogRotationPolicy, LoggingError,
};
pub use observability::{
    ConsumerTelemetry, Observability, PipelineActivity, PipelineActivityLog,
};
pub use record::{RecordHeaders, StreamRecord, TraceContext};
pub use resilience::{strategy_for, Backoff, ResilienceError, ResilienceStrategy, RetryPolicy};
pub use source::{CommittedOffset, MemoryStreamSource, StreamSource};
