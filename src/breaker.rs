use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

/// Externally visible state of one circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls pass through; consecutive failures open the circuit.
    Closed,
    /// Calls are refused until the open duration elapses.
    Open,
    /// Recovery probes are admitted; successes close, a failure reopens.
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds driving the breaker state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerPolicy {
    /// Consecutive failures required to open the circuit.
    pub failure_threshold: u32,
    /// Consecutive half-open successes required to close it again.
    pub success_threshold: u32,
    /// Time the circuit stays open before a recovery probe is admitted.
    pub open_duration: Duration,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_duration: Duration::from_secs(30),
        }
    }
}

impl BreakerPolicy {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    pub fn with_open_duration(mut self, duration: Duration) -> Self {
        self.open_duration = duration;
        self
    }
}

/// State-transition event delivered to subscribers.
///
/// Listeners run after the transition has committed and may be invoked from
/// any thread that drove the breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerTransition {
    pub breaker: String,
    pub from: BreakerState,
    pub to: BreakerState,
}

type Listener = Arc<dyn Fn(&BreakerTransition) + Send + Sync>;

#[derive(Debug)]
struct BreakerCore {
    state: BreakerState,
    consecutive_failures: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,
}

/// Consecutive-failure circuit breaker with subscription-based transition
/// events.
pub struct CircuitBreaker {
    name: String,
    policy: BreakerPolicy,
    core: Mutex<BreakerCore>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_subscription: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, policy: BreakerPolicy) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            policy,
            core: Mutex::new(BreakerCore {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                opened_at: None,
            }),
            listeners: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &BreakerPolicy {
        &self.policy
    }

    pub fn current_state(&self) -> BreakerState {
        self.core.lock().unwrap().state
    }

    /// Admission check. Refused calls must not reach the protected action.
    ///
    /// In the open state this also performs the lazy open -> half-open
    /// transition once the open duration has elapsed, admitting the caller
    /// as the first recovery probe.
    pub fn try_acquire(&self) -> bool {
        let event = {
            let mut core = self.core.lock().unwrap();
            match core.state {
                BreakerState::Closed | BreakerState::HalfOpen => return true,
                BreakerState::Open => {
                    if !self.open_elapsed(&core) {
                        return false;
                    }
                    Self::transition(&mut core, BreakerState::HalfOpen, &self.name)
                }
            }
        };
        self.emit(event);
        true
    }

    /// Records a successful protected call.
    pub fn record_success(&self) {
        let event = {
            let mut core = self.core.lock().unwrap();
            match core.state {
                BreakerState::Closed => {
                    core.consecutive_failures = 0;
                    return;
                }
                BreakerState::HalfOpen => {
                    core.half_open_successes += 1;
                    if core.half_open_successes < self.policy.success_threshold {
                        return;
                    }
                    Self::transition(&mut core, BreakerState::Closed, &self.name)
                }
                BreakerState::Open => return,
            }
        };
        self.emit(event);
    }

    /// Records a failed protected call.
    pub fn record_failure(&self) {
        let event = {
            let mut core = self.core.lock().unwrap();
            match core.state {
                BreakerState::Closed => {
                    core.consecutive_failures += 1;
                    if core.consecutive_failures < self.policy.failure_threshold {
                        return;
                    }
                    Self::transition(&mut core, BreakerState::Open, &self.name)
                }
                BreakerState::HalfOpen => {
                    Self::transition(&mut core, BreakerState::Open, &self.name)
                }
                BreakerState::Open => return,
            }
        };
        self.emit(event);
    }

    /// Time-based open -> half-open transition without a call attempt.
    ///
    /// A paused intake loop makes no calls, so recovery is probed from the
    /// polling side; the resulting transition event resumes intake.
    pub fn probe_recovery(&self) {
        let event = {
            let mut core = self.core.lock().unwrap();
            if core.state != BreakerState::Open || !self.open_elapsed(&core) {
                return;
            }
            Self::transition(&mut core, BreakerState::HalfOpen, &self.name)
        };
        self.emit(event);
    }

    /// Operator override that forces a state and emits the transition.
    pub fn force_state(&self, to: BreakerState) {
        let event = {
            let mut core = self.core.lock().unwrap();
            if core.state == to {
                return;
            }
            Self::transition(&mut core, to, &self.name)
        };
        self.emit(event);
    }

    /// Registers a transition listener; the returned handle owns the
    /// registration and removes it when detached or dropped.
    pub fn subscribe(
        self: &Arc<Self>,
        listener: impl Fn(&BreakerTransition) + Send + Sync + 'static,
    ) -> BreakerSubscription {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().unwrap().push((id, Arc::new(listener)));
        BreakerSubscription {
            id,
            breaker: Arc::downgrade(self),
        }
    }

    fn open_elapsed(&self, core: &BreakerCore) -> bool {
        core.opened_at
            .map(|at| at.elapsed() >= self.policy.open_duration)
            .unwrap_or(true)
    }

    fn transition(core: &mut BreakerCore, to: BreakerState, name: &str) -> BreakerTransition {
        let from = core.state;
        core.state = to;
        core.consecutive_failures = 0;
        core.half_open_successes = 0;
        core.opened_at = match to {
            BreakerState::Open => Some(Instant::now()),
            _ => None,
        };
        BreakerTransition {
            breaker: name.to_string(),
            from,
            to,
        }
    }

    fn emit(&self, event: BreakerTransition) {
        let listeners: Vec<Listener> = {
            let guard = self.listeners.lock().unwrap();
            guard.iter().map(|(_, listener)| listener.clone()).collect()
        };
        for listener in listeners {
            listener(&event);
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.listeners
            .lock()
            .unwrap()
            .retain(|(existing, _)| *existing != id);
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.current_state())
            .finish()
    }
}

/// Handle owning one listener registration on a breaker.
#[derive(Debug)]
pub struct BreakerSubscription {
    id: u64,
    breaker: Weak<CircuitBreaker>,
}

impl BreakerSubscription {
    /// Removes the listener; subsequent transitions are not delivered.
    pub fn detach(&self) {
        if let Some(breaker) = self.breaker.upgrade() {
            breaker.unsubscribe(self.id);
        }
    }
}

impl Drop for BreakerSubscription {
    fn drop(&mut self) {
        self.detach();
    }
}
