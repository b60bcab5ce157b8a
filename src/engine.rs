use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::observability::{Observability, PipelineActivity};
use crate::record::StreamRecord;

/// Bounded wait used by workers between dequeue attempts, so shutdown is
/// observed promptly even on an idle queue.
pub const DEFAULT_DEQUEUE_INTERVAL: Duration = Duration::from_millis(100);
/// Grace period workers get to finish in-flight messages during `stop`.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Queue and worker-pool sizing for one engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker count. More than one worker gives up cross-worker ordering;
    /// callers that need per-key ordering run exactly one.
    pub max_concurrency: usize,
    pub queue_capacity: usize,
    pub dequeue_interval: Duration,
    pub shutdown_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 1,
            queue_capacity: 512,
            dequeue_interval: DEFAULT_DEQUEUE_INTERVAL,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

/// Failure classification returned by the processing function.
#[derive(Debug)]
pub enum ProcessFault {
    /// Per-message failure; the worker records it and keeps draining.
    Recoverable(String),
    /// Unrecoverable condition; reported through the fatal hook so the
    /// owning consumer instance can halt. The worker itself keeps running
    /// until shutdown, preserving per-message isolation.
    Fatal(String),
}

/// Error handed back when submitting to a stopped engine.
///
/// Ownership of the record returns to the caller; this is a shutdown
/// control signal, not a processing failure.
#[derive(Debug)]
pub enum SubmitError {
    Closed(StreamRecord),
}

/// Processing function each worker runs per dequeued record.
pub type ProcessFn = Arc<dyn Fn(StreamRecord) -> Result<(), ProcessFault> + Send + Sync>;
/// Hook receiving fatal fault descriptions from workers.
pub type FatalHook = Arc<dyn Fn(String) + Send + Sync>;

struct QueueState {
    buffer: VecDeque<StreamRecord>,
    closed: bool,
}

struct QueueShared {
    capacity: usize,
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl QueueShared {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(QueueState {
                buffer: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Blocks the producer while the queue is at capacity. This is the
    /// backpressure mechanism: a slow downstream throttles upstream fetch
    /// directly, with no timeout.
    fn push_blocking(&self, record: StreamRecord) -> Result<(), SubmitError> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.closed {
                return Err(SubmitError::Closed(record));
            }
            if state.buffer.len() < self.capacity {
                state.buffer.push_back(record);
                self.not_empty.notify_one();
                return Ok(());
            }
            state = self.not_full.wait(state).unwrap();
        }
    }

    fn pop_timeout(&self, timeout: Duration) -> Option<StreamRecord> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(record) = state.buffer.pop_front() {
                self.not_full.notify_one();
                return Some(record);
            }
            if state.closed {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (next_state, wait) = self
                .not_empty
                .wait_timeout(state, deadline - now)
                .unwrap();
            state = next_state;
            if wait.timed_out() {
                let popped = state.buffer.pop_front();
                if popped.is_some() {
                    self.not_full.notify_one();
                }
                return popped;
            }
        }
    }

    fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    fn depth(&self) -> usize {
        self.state.lock().unwrap().buffer.len()
    }
}

/// Bounded-queue worker pool decoupling stream polling from processing.
///
/// `submit` blocks when the queue is full; exactly `max_concurrency` workers
/// compete for records, so per-partition order is preserved downstream only
/// when `max_concurrency == 1`.
pub struct BackpressureEngine {
    name: String,
    config: EngineConfig,
    queue: Arc<QueueShared>,
    process: ProcessFn,
    fatal_hook: Option<FatalHook>,
    shutdown: Arc<AtomicBool>,
    started: AtomicBool,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    observability: Observability,
}

impl BackpressureEngine {
    pub fn new(
        name: impl Into<String>,
        config: EngineConfig,
        process: ProcessFn,
        observability: Observability,
    ) -> Self {
        assert!(config.max_concurrency > 0, "worker count must be > 0");
        assert!(config.queue_capacity > 0, "queue capacity must be > 0");
        Self {
            name: name.into(),
            queue: Arc::new(QueueShared::new(config.queue_capacity)),
            config,
            process,
            fatal_hook: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            started: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
            observability,
        }
    }

    /// Installs the hook invoked when processing reports a fatal fault.
    pub fn with_fatal_hook(mut self, hook: impl Fn(String) + Send + Sync + 'static) -> Self {
        self.fatal_hook = Some(Arc::new(hook));
        self
    }

    /// Launches the worker pool. Idempotent.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut workers = self.workers.lock().unwrap();
        for index in 0..self.config.max_concurrency {
            let worker_name = format!("{}_worker_{index}", self.name);
            let queue = Arc::clone(&self.queue);
            let shutdown = Arc::clone(&self.shutdown);
            let process = Arc::clone(&self.process);
            let fatal_hook = self.fatal_hook.clone();
            let observability = self.observability.clone();
            let interval = self.config.dequeue_interval;
            let handle = thread::Builder::new()
                .name(worker_name.clone())
                .spawn(move || {
                    observability.emit(PipelineActivity::WorkerStarted {
                        worker: worker_name.clone(),
                    });
                    while !shutdown.load(Ordering::Relaxed) {
                        let Some(record) = queue.pop_timeout(interval) else {
                            continue;
                        };
                        let topic = record.topic.clone();
                        let partition = record.partition;
                        let offset = record.offset;
                        match process(record) {
                            Ok(()) => {}
                            Err(ProcessFault::Recoverable(error)) => {
                                observability.emit(PipelineActivity::MessageFailed {
                                    topic,
                                    partition,
                                    offset,
                                    error,
                                });
                            }
                            Err(ProcessFault::Fatal(error)) => {
                                if let Some(hook) = &fatal_hook {
                                    hook(error);
                                }
                            }
                        }
                    }
                    observability.emit(PipelineActivity::WorkerStopped {
                        worker: worker_name,
                    });
                })
                .expect("failed to spawn engine worker");
            workers.push(handle);
        }
    }

    /// Hands a record to the worker pool, blocking while the queue is full.
    pub fn submit(&self, record: StreamRecord) -> Result<(), SubmitError> {
        self.queue.push_blocking(record)
    }

    /// Current queue depth.
    pub fn depth(&self) -> usize {
        self.queue.depth()
    }

    /// Signals workers to stop dequeuing, lets in-flight work finish within
    /// the grace period, then abandons any worker still running. Queued but
    /// unstarted records are dropped un-acknowledged; the transport
    /// redelivers them on restart.
    pub fn stop(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        self.queue.close();
        let handles: Vec<_> = self.workers.lock().unwrap().drain(..).collect();
        let deadline = Instant::now() + self.config.shutdown_grace;
        let mut stranded = 0usize;
        for handle in handles {
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                stranded += 1;
            }
        }
        if stranded > 0 {
            self.observability.emit(PipelineActivity::ForcedShutdown {
                stranded_workers: stranded,
            });
        }
    }
}

impl Drop for BackpressureEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
