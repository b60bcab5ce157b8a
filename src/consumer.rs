use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_queue::SegQueue;

use crate::audit::AuditStore;
use crate::breaker::CircuitBreaker;
use crate::config::{AuditMode, ConfigError, ConsumerConfig};
use crate::coordinator::{ControlError, IntakeControl, IntakeCoordinator};
use crate::engine::{BackpressureEngine, ProcessFault, SubmitError};
use crate::lifecycle::{
    AuditFailure, AuditSink, Handler, LifecycleTracker, MessageOutcome, NoOpAuditSink,
    StoreAuditSink,
};
use crate::observability::{Observability, PipelineActivity};
use crate::resilience::strategy_for;
use crate::source::StreamSource;

/// Sleep applied by the poll loop when paused or idle, keeping shutdown and
/// recovery probes responsive without spinning.
const POLL_IDLE_INTERVAL: Duration = Duration::from_millis(10);

/// Offset acknowledgment signaled from a worker back to the poll loop.
#[derive(Debug)]
struct CommitRequest {
    topic: String,
    partition: i32,
    offset: i64,
}

/// Pause flag shared between breaker callbacks and the poll loop.
///
/// The coordinator flips the flag from arbitrary threads; the poll thread
/// applies the edge to the underlying source between polls.
#[derive(Debug, Default)]
struct IntakeGate {
    paused: AtomicBool,
}

impl IntakeGate {
    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

impl IntakeControl for IntakeGate {
    fn pause(&self) -> Result<(), ControlError> {
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn resume(&self) -> Result<(), ControlError> {
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Composition root: wires poll loop, backpressure engine, resilience
/// strategy, lifecycle tracking, and breaker coordination; exposes
/// start/stop.
pub struct ConsumerOrchestrator {
    config: ConsumerConfig,
    engine: Arc<BackpressureEngine>,
    coordinator: Arc<IntakeCoordinator>,
    breakers: Vec<Arc<CircuitBreaker>>,
    gate: Arc<IntakeGate>,
    acks: Arc<SegQueue<CommitRequest>>,
    running: Arc<AtomicBool>,
    fatal_flag: Arc<AtomicBool>,
    fatal_message: Arc<Mutex<Option<String>>>,
    poll_thread: Mutex<Option<thread::JoinHandle<Box<dyn StreamSource>>>>,
    source: Mutex<Option<Box<dyn StreamSource>>>,
    observability: Observability,
}

impl ConsumerOrchestrator {
    /// Validates the configuration and assembles the pipeline.
    ///
    /// The first configured breaker guards handler execution; every
    /// configured breaker feeds the intake coordinator.
    pub fn new(
        config: ConsumerConfig,
        source: Box<dyn StreamSource>,
        handler: Handler,
        audit_store: Option<Arc<dyn AuditStore>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let observability = Observability::new(&config.group, &config.topic);

        let breakers: Vec<Arc<CircuitBreaker>> = config
            .breakers
            .iter()
            .map(|entry| CircuitBreaker::new(&entry.name, entry.policy()))
            .collect();
        let strategy = strategy_for(breakers.first().cloned(), config.retry_policy());

        let sink: Arc<dyn AuditSink> = match config.audit {
            AuditMode::Persisted => {
                let store = audit_store.ok_or(ConfigError::MissingAuditStore)?;
                Arc::new(StoreAuditSink::new(store, config.audit_write.policy()))
            }
            AuditMode::Disabled => Arc::new(NoOpAuditSink),
        };
        let tracker = Arc::new(LifecycleTracker::new(sink, strategy, handler));

        let acks: Arc<SegQueue<CommitRequest>> = Arc::new(SegQueue::new());
        let ack_mode = config.ack_mode;
        let process_acks = Arc::clone(&acks);
        let process_observability = observability.clone();
        let process = Arc::new(move |record: crate::record::StreamRecord| {
            match tracker.process(&record) {
                Ok(outcome) => {
                    match &outcome {
                        MessageOutcome::Succeeded => {
                            process_observability.emit(PipelineActivity::MessageProcessed {
                                topic: record.topic.clone(),
                                partition: record.partition,
                                offset: record.offset,
                            });
                        }
                        MessageOutcome::Failed { error } => {
                            process_observability.emit(PipelineActivity::MessageFailed {
                                topic: record.topic.clone(),
                                partition: record.partition,
                                offset: record.offset,
                                error: error.clone(),
                            });
                        }
                        MessageOutcome::Rejected { breaker } => {
                            process_observability.emit(PipelineActivity::CallRejected {
                                topic: record.topic.clone(),
                                partition: record.partition,
                                offset: record.offset,
                                breaker: breaker.clone(),
                            });
                        }
                    }
                    if outcome.should_acknowledge(ack_mode) {
                        process_acks.push(CommitRequest {
                            topic: record.topic,
                            partition: record.partition,
                            offset: record.offset,
                        });
                    }
                    Ok(())
                }
                Err(failure) => {
                    let AuditFailure::Exhausted { operation, .. } = &failure;
                    process_observability.emit(PipelineActivity::AuditWriteExhausted {
                        topic: record.topic.clone(),
                        partition: record.partition,
                        offset: record.offset,
                        operation: (*operation).to_string(),
                    });
                    Err(ProcessFault::Fatal(failure.to_string()))
                }
            }
        });

        let fatal_flag = Arc::new(AtomicBool::new(false));
        let fatal_message = Arc::new(Mutex::new(None));
        let hook_flag = Arc::clone(&fatal_flag);
        let hook_message = Arc::clone(&fatal_message);
        let engine = Arc::new(
            BackpressureEngine::new(
                &config.group,
                config.engine_config(),
                process,
                observability.clone(),
            )
            .with_fatal_hook(move |error| {
                let mut slot = hook_message.lock().unwrap();
                if slot.is_none() {
                    *slot = Some(error);
                }
                hook_flag.store(true, Ordering::SeqCst);
            }),
        );

        let gate = Arc::new(IntakeGate::default());
        let coordinator = Arc::new(IntakeCoordinator::attach(
            Arc::clone(&gate) as Arc<dyn IntakeControl>,
            breakers.clone(),
            observability.clone(),
        ));

        Ok(Self {
            config,
            engine,
            coordinator,
            breakers,
            gate,
            acks,
            running: Arc::new(AtomicBool::new(false)),
            fatal_flag,
            fatal_message,
            poll_thread: Mutex::new(None),
            source: Mutex::new(Some(source)),
            observability,
        })
    }

    /// Starts the worker pool and the poll loop. Idempotent.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(mut source) = self.source.lock().unwrap().take() else {
            return;
        };
        self.engine.start();

        let engine = Arc::clone(&self.engine);
        let coordinator = Arc::clone(&self.coordinator);
        let gate = Arc::clone(&self.gate);
        let acks = Arc::clone(&self.acks);
        let running = Arc::clone(&self.running);
        let fatal_flag = Arc::clone(&self.fatal_flag);
        let observability = self.observability.clone();
        let poll_batch = self.config.poll_batch;

        let handle = thread::Builder::new()
            .name(format!("{}_poll", self.config.group))
            .spawn(move || {
                let mut source_paused = false;
                'poll: while running.load(Ordering::SeqCst) {
                    if fatal_flag.load(Ordering::SeqCst) {
                        // Audit exhaustion halts the instance: stop intake
                        // and shut the worker pool down from here.
                        engine.stop();
                        break;
                    }
                    coordinator.probe_recovery();

                    let paused = gate.is_paused();
                    if paused != source_paused {
                        if paused {
                            source.pause();
                        } else {
                            source.resume();
                        }
                        source_paused = paused;
                    }

                    drain_acks(&acks, source.as_mut(), &observability);
                    observability.telemetry().record_queue_depth(engine.depth());

                    if paused {
                        thread::sleep(POLL_IDLE_INTERVAL);
                        continue;
                    }
                    let batch = source.poll(poll_batch);
                    if batch.is_empty() {
                        thread::sleep(POLL_IDLE_INTERVAL);
                        continue;
                    }
                    for record in batch {
                        match engine.submit(record) {
                            Ok(()) => {}
                            // Closed engine is a shutdown signal, not an
                            // error; the record stays unacknowledged.
                            Err(SubmitError::Closed(_)) => break 'poll,
                        }
                    }
                }
                source
            })
            .expect("failed to spawn poll loop");
        *self.poll_thread.lock().unwrap() = Some(handle);
    }

    /// Cooperative shutdown: stops polling, drains in-flight work within the
    /// engine grace period, commits acknowledgments produced by finishing
    /// workers, and detaches breaker subscriptions. A stopped orchestrator
    /// is not restartable; build a new one to resume consumption.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        // Closing the engine queue first unblocks a poll thread stuck in a
        // backpressure wait; only then is the join safe.
        self.engine.stop();
        let handle = self.poll_thread.lock().unwrap().take();
        let mut source = match handle {
            Some(handle) => match handle.join() {
                Ok(source) => Some(source),
                Err(_) => None,
            },
            None => self.source.lock().unwrap().take(),
        };
        if let Some(source) = source.as_mut() {
            drain_acks(&self.acks, source.as_mut(), &self.observability);
        }
        if let Some(source) = source {
            *self.source.lock().unwrap() = Some(source);
        }
        self.coordinator.detach();
    }

    /// Reason the instance halted, when a fatal audit condition occurred.
    pub fn fatal_error(&self) -> Option<String> {
        self.fatal_message.lock().unwrap().clone()
    }

    /// Breakers built from configuration, in configured order.
    pub fn breakers(&self) -> &[Arc<CircuitBreaker>] {
        &self.breakers
    }

    /// Whether the coordinator currently holds intake paused.
    pub fn is_intake_paused(&self) -> bool {
        self.gate.is_paused()
    }

    pub fn observability(&self) -> &Observability {
        &self.observability
    }
}

impl std::fmt::Debug for ConsumerOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerOrchestrator")
            .field("running", &self.running.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Drop for ConsumerOrchestrator {
    fn drop(&mut self) {
        self.stop();
    }
}

fn drain_acks(
    acks: &SegQueue<CommitRequest>,
    source: &mut dyn StreamSource,
    observability: &Observability,
) {
    while let Some(request) = acks.pop() {
        source.commit(&request.topic, request.partition, request.offset);
        observability.emit(PipelineActivity::OffsetCommitted {
            topic: request.topic,
            partition: request.partition,
            offset: request.offset,
        });
    }
}
