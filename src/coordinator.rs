use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::breaker::{BreakerState, BreakerSubscription, BreakerTransition, CircuitBreaker};
use crate::observability::{Observability, PipelineActivity};

/// Error surfaced by the poll-loop control surface.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("intake control unavailable: {0}")]
    Unavailable(String),
}

/// Control surface over the upstream poll loop.
///
/// Calls are best-effort: the coordinator logs a failure and relies on the
/// next breaker transition to retry naturally.
pub trait IntakeControl: Send + Sync {
    fn pause(&self) -> Result<(), ControlError>;
    fn resume(&self) -> Result<(), ControlError>;
}

struct CoordState {
    open: BTreeSet<String>,
    paused: bool,
}

struct CoordinatorShared {
    control: Arc<dyn IntakeControl>,
    state: Mutex<CoordState>,
    observability: Observability,
}

impl CoordinatorShared {
    /// Applies one breaker event. The open-set mutation and the
    /// pause/resume decision happen under a single lock so near-simultaneous
    /// transitions from unrelated threads cannot strand the poll loop.
    fn on_transition(&self, event: &BreakerTransition) {
        let mut state = self.state.lock().unwrap();
        self.observability.emit(PipelineActivity::BreakerTransition {
            breaker: event.breaker.clone(),
            from: event.from,
            to: event.to,
        });
        match event.to {
            BreakerState::Open => {
                state.open.insert(event.breaker.clone());
                self.pause_if_needed(&mut state);
            }
            BreakerState::HalfOpen | BreakerState::Closed => {
                state.open.remove(&event.breaker);
                self.resume_if_needed(&mut state);
            }
        }
    }

    /// Registration-time sweep: a breaker already open before its listener
    /// attached must pause intake without waiting for a transition event.
    fn observe_initial(&self, breaker: &str, current: BreakerState) {
        if current != BreakerState::Open {
            return;
        }
        let mut state = self.state.lock().unwrap();
        state.open.insert(breaker.to_string());
        self.pause_if_needed(&mut state);
    }

    fn pause_if_needed(&self, state: &mut CoordState) {
        if state.paused || state.open.is_empty() {
            return;
        }
        match self.control.pause() {
            Ok(()) => {
                state.paused = true;
                self.observability.emit(PipelineActivity::IntakePaused {
                    open_breakers: state.open.len(),
                });
            }
            Err(error) => self.observability.emit(PipelineActivity::ControlFailed {
                operation: "pause",
                error: error.to_string(),
            }),
        }
    }

    fn resume_if_needed(&self, state: &mut CoordState) {
        if !state.paused || !state.open.is_empty() {
            return;
        }
        match self.control.resume() {
            Ok(()) => {
                state.paused = false;
                self.observability.emit(PipelineActivity::IntakeResumed);
            }
            Err(error) => self.observability.emit(PipelineActivity::ControlFailed {
                operation: "resume",
                error: error.to_string(),
            }),
        }
    }
}

/// Keeps the poll loop paused while any tracked breaker is open.
///
/// A single-breaker deployment is the degenerate case of the same rule with
/// one tracked breaker. Breakers are keyed by name; the set-based count
/// cannot double-pause on duplicate events.
pub struct IntakeCoordinator {
    shared: Arc<CoordinatorShared>,
    breakers: Vec<Arc<CircuitBreaker>>,
    subscriptions: Mutex<Vec<BreakerSubscription>>,
}

impl IntakeCoordinator {
    /// Subscribes to every breaker and applies the pause rule to their
    /// current states, closing the open-before-registration race.
    pub fn attach(
        control: Arc<dyn IntakeControl>,
        breakers: Vec<Arc<CircuitBreaker>>,
        observability: Observability,
    ) -> Self {
        let shared = Arc::new(CoordinatorShared {
            control,
            state: Mutex::new(CoordState {
                open: BTreeSet::new(),
                paused: false,
            }),
            observability,
        });
        let mut subscriptions = Vec::with_capacity(breakers.len());
        for breaker in &breakers {
            let listener_shared = Arc::clone(&shared);
            subscriptions.push(breaker.subscribe(move |event| {
                listener_shared.on_transition(event);
            }));
            shared.observe_initial(breaker.name(), breaker.current_state());
        }
        Self {
            shared,
            breakers,
            subscriptions: Mutex::new(subscriptions),
        }
    }

    /// Whether the coordinator currently holds the poll loop paused.
    pub fn is_paused(&self) -> bool {
        self.shared.state.lock().unwrap().paused
    }

    /// Names of the breakers currently open.
    pub fn open_breakers(&self) -> Vec<String> {
        self.shared
            .state
            .lock()
            .unwrap()
            .open
            .iter()
            .cloned()
            .collect()
    }

    /// Drives time-based open -> half-open transitions on every tracked
    /// breaker; called from the poll loop so a paused consumer can recover.
    pub fn probe_recovery(&self) {
        for breaker in &self.breakers {
            breaker.probe_recovery();
        }
    }

    /// Drops every breaker subscription; no further events are delivered.
    pub fn detach(&self) {
        self.subscriptions.lock().unwrap().clear();
    }
}

impl Drop for IntakeCoordinator {
    fn drop(&mut self) {
        self.detach();
    }
}
