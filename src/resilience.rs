use std::sync::Arc;
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::breaker::CircuitBreaker;

/// Pause schedule between retry attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    None,
    Fixed(Duration),
    Exponential {
        initial: Duration,
        multiplier: f64,
        max: Duration,
    },
}

impl Backoff {
    /// Delay before retry number `attempt` (1-based: the pause after the
    /// first failed attempt is `delay_for(1)`).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential {
                initial,
                multiplier,
                max,
            } => {
                let factor = multiplier.powi(attempt.saturating_sub(1) as i32);
                let scaled = initial.as_secs_f64() * factor;
                Duration::from_secs_f64(scaled.min(max.as_secs_f64()))
            }
        }
    }
}

/// Bounded retry policy: `max_attempts` counts every invocation, so 1 means
/// no retries at all.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self::new(1, Backoff::None)
    }

    /// Runs `op` under this policy, sleeping the backoff between attempts
    /// and surfacing the final error once attempts are exhausted.
    pub fn run<T, E>(&self, mut op: impl FnMut() -> Result<T, E>) -> Result<T, E> {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(error) if attempt >= attempts => return Err(error),
                Err(_) => {
                    let delay = self.backoff.delay_for(attempt);
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                    attempt += 1;
                }
            }
        }
    }
}

/// Outcome classification for a resilience-wrapped execution.
#[derive(Debug, Error)]
pub enum ResilienceError {
    /// The circuit breaker refused admission; the action never ran.
    #[error("call not permitted: circuit breaker {breaker} is open")]
    CallNotPermitted { breaker: String },
    /// The action ran (possibly several times) and ultimately failed.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl ResilienceError {
    pub fn is_rejection(&self) -> bool {
        matches!(self, ResilienceError::CallNotPermitted { .. })
    }
}

/// Composable execution policy around one unit of work.
///
/// The variants form an explicit tagged union; [`strategy_for`] builds the
/// production composition from policy presence, fixing the breaker outside
/// the retry so the breaker sees one aggregate outcome per message.
#[derive(Debug)]
pub enum ResilienceStrategy {
    NoOp,
    Retry(RetryPolicy),
    CircuitBreaker(Arc<CircuitBreaker>),
    Chain(Box<ResilienceStrategy>, Box<ResilienceStrategy>),
}

/// Builds the strategy from policy presence: both policies chain with the
/// breaker outside the retry, one policy stands alone, none is a no-op.
pub fn strategy_for(
    breaker: Option<Arc<CircuitBreaker>>,
    retry: Option<RetryPolicy>,
) -> ResilienceStrategy {
    match (breaker, retry) {
        (Some(breaker), Some(retry)) => ResilienceStrategy::Chain(
            Box::new(ResilienceStrategy::CircuitBreaker(breaker)),
            Box::new(ResilienceStrategy::Retry(retry)),
        ),
        (Some(breaker), None) => ResilienceStrategy::CircuitBreaker(breaker),
        (None, Some(retry)) => ResilienceStrategy::Retry(retry),
        (None, None) => ResilienceStrategy::NoOp,
    }
}

impl ResilienceStrategy {
    /// Runs `action` under this strategy.
    pub fn execute(
        &self,
        action: &mut dyn FnMut() -> anyhow::Result<()>,
    ) -> Result<(), ResilienceError> {
        match self {
            ResilienceStrategy::NoOp => action().map_err(ResilienceError::Failed),
            ResilienceStrategy::Retry(policy) => {
                policy.run(action).map_err(ResilienceError::Failed)
            }
            ResilienceStrategy::CircuitBreaker(breaker) => {
                if !breaker.try_acquire() {
                    return Err(ResilienceError::CallNotPermitted {
                        breaker: breaker.name().to_string(),
                    });
                }
                match action() {
                    Ok(()) => {
                        breaker.record_success();
                        Ok(())
                    }
                    Err(error) => {
                        breaker.record_failure();
                        Err(ResilienceError::Failed(error))
                    }
                }
            }
            ResilienceStrategy::Chain(outer, inner) => {
                // The outer strategy wraps the inner execution as its action.
                // A distinguished inner outcome (call-not-permitted) must pass
                // through structurally rather than collapse into a plain
                // failure.
                let mut inner_rejection: Option<ResilienceError> = None;
                let mut wrapped = || {
                    inner.execute(&mut *action).map_err(|error| match error {
                        ResilienceError::Failed(cause) => cause,
                        rejection => {
                            let message = rejection.to_string();
                            inner_rejection = Some(rejection);
                            anyhow::anyhow!(message)
                        }
                    })
                };
                let result = outer.execute(&mut wrapped);
                match inner_rejection {
                    Some(rejection) => Err(rejection),
                    None => result,
                }
            }
        }
    }
}
