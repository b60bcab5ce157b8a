pub mod logging;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::breaker::BreakerState;
use crate::observability::logging::{JsonLineLogger, LogLevel, LogRotationPolicy};

/// Structured instrumentation events emitted along the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineActivity {
    WorkerStarted {
        worker: String,
    },
    WorkerStopped {
        worker: String,
    },
    ForcedShutdown {
        stranded_workers: usize,
    },
    MessageProcessed {
        topic: String,
        partition: i32,
        offset: i64,
    },
    MessageFailed {
        topic: String,
        partition: i32,
        offset: i64,
        error: String,
    },
    CallRejected {
        topic: String,
        partition: i32,
        offset: i64,
        breaker: String,
    },
    BreakerTransition {
        breaker: String,
        from: BreakerState,
        to: BreakerState,
    },
    IntakePaused {
        open_breakers: usize,
    },
    IntakeResumed,
    ControlFailed {
        operation: &'static str,
        error: String,
    },
    AuditWriteExhausted {
        topic: String,
        partition: i32,
        offset: i64,
        operation: String,
    },
    OffsetCommitted {
        topic: String,
        partition: i32,
        offset: i64,
    },
}

impl PipelineActivity {
    fn level(&self) -> LogLevel {
        match self {
            PipelineActivity::MessageProcessed { .. }
            | PipelineActivity::OffsetCommitted { .. } => LogLevel::Debug,
            PipelineActivity::WorkerStarted { .. }
            | PipelineActivity::WorkerStopped { .. }
            | PipelineActivity::IntakeResumed
            | PipelineActivity::BreakerTransition { .. } => LogLevel::Info,
            PipelineActivity::MessageFailed { .. }
            | PipelineActivity::CallRejected { .. }
            | PipelineActivity::IntakePaused { .. }
            | PipelineActivity::ForcedShutdown { .. } => LogLevel::Warn,
            PipelineActivity::ControlFailed { .. }
            | PipelineActivity::AuditWriteExhausted { .. } => LogLevel::Error,
        }
    }

    fn component(&self) -> &'static str {
        match self {
            PipelineActivity::WorkerStarted { .. }
            | PipelineActivity::WorkerStopped { .. }
            | PipelineActivity::ForcedShutdown { .. } => "engine",
            PipelineActivity::MessageProcessed { .. }
            | PipelineActivity::MessageFailed { .. }
            | PipelineActivity::CallRejected { .. }
            | PipelineActivity::AuditWriteExhausted { .. } => "lifecycle",
            PipelineActivity::BreakerTransition { .. }
            | PipelineActivity::IntakePaused { .. }
            | PipelineActivity::IntakeResumed
            | PipelineActivity::ControlFailed { .. } => "coordinator",
            PipelineActivity::OffsetCommitted { .. } => "poll_loop",
        }
    }

    fn message(&self) -> String {
        match self {
            PipelineActivity::WorkerStarted { worker } => format!("worker {worker} started"),
            PipelineActivity::WorkerStopped { worker } => format!("worker {worker} stopped"),
            PipelineActivity::ForcedShutdown { stranded_workers } => {
                format!("shutdown grace elapsed with {stranded_workers} worker(s) still running")
            }
            PipelineActivity::MessageProcessed {
                topic,
                partition,
                offset,
            } => format!("processed {topic}/{partition}@{offset}"),
            PipelineActivity::MessageFailed {
                topic,
                partition,
                offset,
                error,
            } => format!("failed {topic}/{partition}@{offset}: {error}"),
            PipelineActivity::CallRejected {
                topic,
                partition,
                offset,
                breaker,
            } => format!("rejected {topic}/{partition}@{offset}: breaker {breaker} open"),
            PipelineActivity::BreakerTransition { breaker, from, to } => {
                format!("breaker {breaker} transitioned {from} -> {to}")
            }
            PipelineActivity::IntakePaused { open_breakers } => {
                format!("intake paused: {open_breakers} breaker(s) open")
            }
            PipelineActivity::IntakeResumed => "intake resumed: all breakers closed".to_string(),
            PipelineActivity::ControlFailed { operation, error } => {
                format!("intake control {operation} failed: {error}")
            }
            PipelineActivity::AuditWriteExhausted {
                topic,
                partition,
                offset,
                operation,
            } => format!("audit {operation} exhausted retries for {topic}/{partition}@{offset}"),
            PipelineActivity::OffsetCommitted {
                topic,
                partition,
                offset,
            } => format!("committed {topic}/{partition}@{offset}"),
        }
    }
}

/// Thread-safe event log used for testing and diagnostics.
#[derive(Clone, Default)]
pub struct PipelineActivityLog {
    entries: Arc<Mutex<Vec<PipelineActivity>>>,
}

impl PipelineActivityLog {
    pub fn record(&self, activity: PipelineActivity) {
        self.entries.lock().unwrap().push(activity);
    }

    pub fn snapshot(&self) -> Vec<PipelineActivity> {
        self.entries.lock().unwrap().clone()
    }
}

#[derive(Default)]
struct TelemetryCounters {
    processed_total: AtomicU64,
    failed_total: AtomicU64,
    rejected_total: AtomicU64,
    commits_total: AtomicU64,
    pauses_total: AtomicU64,
    resumes_total: AtomicU64,
    breaker_transitions_total: AtomicU64,
    audit_write_failures_total: AtomicU64,
    forced_shutdowns_total: AtomicU64,
    queue_depth: AtomicUsize,
}

/// Shared counters exported as Prometheus exposition text.
#[derive(Clone, Default)]
pub struct ConsumerTelemetry {
    counters: Arc<TelemetryCounters>,
}

impl ConsumerTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_queue_depth(&self, depth: usize) {
        self.counters.queue_depth.store(depth, Ordering::Relaxed);
    }

    pub fn processed(&self) -> u64 {
        self.counters.processed_total.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.counters.failed_total.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.counters.rejected_total.load(Ordering::Relaxed)
    }

    pub fn commits(&self) -> u64 {
        self.counters.commits_total.load(Ordering::Relaxed)
    }

    pub fn pauses(&self) -> u64 {
        self.counters.pauses_total.load(Ordering::Relaxed)
    }

    pub fn resumes(&self) -> u64 {
        self.counters.resumes_total.load(Ordering::Relaxed)
    }

    pub fn breaker_transitions(&self) -> u64 {
        self.counters.breaker_transitions_total.load(Ordering::Relaxed)
    }

    pub fn audit_write_failures(&self) -> u64 {
        self.counters.audit_write_failures_total.load(Ordering::Relaxed)
    }

    pub fn queue_depth(&self) -> usize {
        self.counters.queue_depth.load(Ordering::Relaxed)
    }

    fn absorb(&self, activity: &PipelineActivity) {
        let counter = match activity {
            PipelineActivity::MessageProcessed { .. } => &self.counters.processed_total,
            PipelineActivity::MessageFailed { .. } => &self.counters.failed_total,
            PipelineActivity::CallRejected { .. } => &self.counters.rejected_total,
            PipelineActivity::OffsetCommitted { .. } => &self.counters.commits_total,
            PipelineActivity::IntakePaused { .. } => &self.counters.pauses_total,
            PipelineActivity::IntakeResumed => &self.counters.resumes_total,
            PipelineActivity::BreakerTransition { .. } => {
                &self.counters.breaker_transitions_total
            }
            PipelineActivity::AuditWriteExhausted { .. } => {
                &self.counters.audit_write_failures_total
            }
            PipelineActivity::ForcedShutdown { .. } => &self.counters.forced_shutdowns_total,
            PipelineActivity::WorkerStarted { .. }
            | PipelineActivity::WorkerStopped { .. }
            | PipelineActivity::ControlFailed { .. } => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Renders the counter set as Prometheus exposition lines.
    pub fn render_metrics(&self, group: &str, topic: &str) -> String {
        let labels = format!("{{group=\"{group}\",topic=\"{topic}\"}}");
        format!(
            "messages_processed_total{labels} {}\n\
             messages_failed_total{labels} {}\n\
             messages_rejected_total{labels} {}\n\
             offsets_committed_total{labels} {}\n\
             intake_pauses_total{labels} {}\n\
             intake_resumes_total{labels} {}\n\
             breaker_transitions_total{labels} {}\n\
             audit_write_failures_total{labels} {}\n\
             forced_shutdowns_total{labels} {}\n\
             queue_depth{labels} {}\n",
            self.counters.processed_total.load(Ordering::Relaxed),
            self.counters.failed_total.load(Ordering::Relaxed),
            self.counters.rejected_total.load(Ordering::Relaxed),
            self.counters.commits_total.load(Ordering::Relaxed),
            self.counters.pauses_total.load(Ordering::Relaxed),
            self.counters.resumes_total.load(Ordering::Relaxed),
            self.counters.breaker_transitions_total.load(Ordering::Relaxed),
            self.counters.audit_write_failures_total.load(Ordering::Relaxed),
            self.counters.forced_shutdowns_total.load(Ordering::Relaxed),
            self.counters.queue_depth.load(Ordering::Relaxed),
        )
    }
}

/// Instrumentation bundle shared across pipeline components.
///
/// One `emit` fans an event into the activity log, the counter set, and the
/// JSON-line logger.
#[derive(Clone)]
pub struct Observability {
    group: String,
    topic: String,
    activity: PipelineActivityLog,
    telemetry: ConsumerTelemetry,
    logger: Arc<Mutex<JsonLineLogger>>,
}

impl Observability {
    pub fn new(group: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            topic: topic.into(),
            activity: PipelineActivityLog::default(),
            telemetry: ConsumerTelemetry::new(),
            logger: Arc::new(Mutex::new(JsonLineLogger::new(LogRotationPolicy::default()))),
        }
    }

    pub fn emit(&self, activity: PipelineActivity) {
        self.telemetry.absorb(&activity);
        {
            let mut logger = self.logger.lock().unwrap();
            // Serialization of these fixed-shape records cannot fail; a
            // logging hiccup must never disturb the pipeline regardless.
            let _ = logger.log(
                now_ms(),
                activity.level(),
                activity.component(),
                &self.group,
                &self.topic,
                &activity.message(),
            );
        }
        self.activity.record(activity);
    }

    pub fn activity(&self) -> &PipelineActivityLog {
        &self.activity
    }

    pub fn telemetry(&self) -> &ConsumerTelemetry {
        &self.telemetry
    }

    pub fn set_log_level(&self, level: LogLevel) {
        self.logger.lock().unwrap().set_level(level);
    }

    /// Retained log lines in emission order.
    pub fn log_lines(&self) -> Vec<String> {
        self.logger.lock().unwrap().lines()
    }

    /// Prometheus exposition for this consumer's counters.
    pub fn render_metrics(&self) -> String {
        self.telemetry.render_metrics(&self.group, &self.topic)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis().min(u128::from(u64::MAX)) as u64)
        .unwrap_or(0)
}
