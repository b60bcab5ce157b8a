use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use streamgate::{
    strategy_for, Backoff, BreakerPolicy, BreakerState, CircuitBreaker, ResilienceError,
    ResilienceStrategy, RetryPolicy,
};

fn counting_action(
    counter: &Arc<AtomicU32>,
    fail_first: u32,
) -> impl FnMut() -> anyhow::Result<()> + '_ {
    move || {
        let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= fail_first {
            anyhow::bail!("attempt {attempt} failed")
        }
        Ok(())
    }
}

fn slow_breaker(name: &str, failure_threshold: u32) -> Arc<CircuitBreaker> {
    CircuitBreaker::new(
        name,
        BreakerPolicy::default()
            .with_failure_threshold(failure_threshold)
            .with_success_threshold(1)
            .with_open_duration(Duration::from_secs(60)),
    )
}

#[test]
fn noop_runs_the_action_once() {
    let counter = Arc::new(AtomicU32::new(0));
    let mut action = counting_action(&counter, 0);
    ResilienceStrategy::NoOp.execute(&mut action).unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn retry_reinvokes_until_success() {
    let counter = Arc::new(AtomicU32::new(0));
    let mut action = counting_action(&counter, 2);
    let strategy = ResilienceStrategy::Retry(RetryPolicy::new(3, Backoff::None));
    strategy.execute(&mut action).unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[test]
fn retry_exhaustion_surfaces_the_final_error() {
    let counter = Arc::new(AtomicU32::new(0));
    let mut action = counting_action(&counter, u32::MAX);
    let strategy = ResilienceStrategy::Retry(RetryPolicy::new(2, Backoff::None));
    let err = strategy.execute(&mut action).expect_err("must exhaust");
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    match err {
        ResilienceError::Failed(cause) => {
            assert!(cause.to_string().contains("attempt 2 failed"));
        }
        other => panic!("expected Failed, got {other:?}"),
    }
}

#[test]
fn open_breaker_rejects_without_invoking_the_action() {
    let breaker = slow_breaker("inventory", 5);
    breaker.force_state(BreakerState::Open);
    let counter = Arc::new(AtomicU32::new(0));
    let mut action = counting_action(&counter, 0);
    let strategy = ResilienceStrategy::CircuitBreaker(Arc::clone(&breaker));
    let err = strategy.execute(&mut action).expect_err("open must reject");
    assert!(err.is_rejection());
    match err {
        ResilienceError::CallNotPermitted { breaker } => assert_eq!(breaker, "inventory"),
        other => panic!("expected CallNotPermitted, got {other:?}"),
    }
    assert_eq!(
        counter.load(Ordering::SeqCst),
        0,
        "rejected calls must never reach the action"
    );
}

#[test]
fn breaker_strategy_reports_outcomes_to_the_breaker() {
    let breaker = slow_breaker("inventory", 2);
    let strategy = ResilienceStrategy::CircuitBreaker(Arc::clone(&breaker));
    let counter = Arc::new(AtomicU32::new(0));

    let mut failing = counting_action(&counter, u32::MAX);
    strategy.execute(&mut failing).expect_err("first failure");
    assert_eq!(breaker.current_state(), BreakerState::Closed);
    strategy.execute(&mut failing).expect_err("second failure");
    assert_eq!(
        breaker.current_state(),
        BreakerState::Open,
        "threshold consecutive failures open the circuit"
    );

    let rejected = strategy.execute(&mut failing).expect_err("now rejected");
    assert!(rejected.is_rejection());
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[test]
fn chained_breaker_sees_one_aggregate_outcome_per_message() {
    let breaker = slow_breaker("inventory", 2);
    let strategy = strategy_for(
        Some(Arc::clone(&breaker)),
        Some(RetryPolicy::new(3, Backoff::None)),
    );
    let counter = Arc::new(AtomicU32::new(0));
    let mut action = counting_action(&counter, u32::MAX);

    strategy.execute(&mut action).expect_err("exhausts retries");
    assert_eq!(counter.load(Ordering::SeqCst), 3, "inner retry ran 3 times");
    assert_eq!(
        breaker.current_state(),
        BreakerState::Closed,
        "breaker records one aggregate failure, not one per attempt"
    );

    strategy.execute(&mut action).expect_err("second aggregate");
    assert_eq!(breaker.current_state(), BreakerState::Open);
}

#[test]
fn chained_rejection_passes_through_structurally() {
    let breaker = slow_breaker("inventory", 5);
    breaker.force_state(BreakerState::Open);
    let strategy = strategy_for(
        Some(Arc::clone(&breaker)),
        Some(RetryPolicy::new(3, Backoff::None)),
    );
    let counter = Arc::new(AtomicU32::new(0));
    let mut action = counting_action(&counter, 0);
    let err = strategy.execute(&mut action).expect_err("must reject");
    assert!(matches!(err, ResilienceError::CallNotPermitted { .. }));
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

#[test]
fn chained_retry_succeeds_under_closed_breaker() {
    let breaker = slow_breaker("inventory", 5);
    let strategy = strategy_for(
        Some(Arc::clone(&breaker)),
        Some(RetryPolicy::new(3, Backoff::None)),
    );
    let counter = Arc::new(AtomicU32::new(0));
    let mut action = counting_action(&counter, 2);
    strategy.execute(&mut action).unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 3);
    assert_eq!(breaker.current_state(), BreakerState::Closed);
}

#[test]
fn factory_builds_from_policy_presence() {
    assert!(matches!(strategy_for(None, None), ResilienceStrategy::NoOp));
    assert!(matches!(
        strategy_for(None, Some(RetryPolicy::none())),
        ResilienceStrategy::Retry(_)
    ));
    let breaker = slow_breaker("inventory", 5);
    assert!(matches!(
        strategy_for(Some(Arc::clone(&breaker)), None),
        ResilienceStrategy::CircuitBreaker(_)
    ));
    match strategy_for(Some(breaker), Some(RetryPolicy::none())) {
        ResilienceStrategy::Chain(outer, inner) => {
            assert!(matches!(*outer, ResilienceStrategy::CircuitBreaker(_)));
            assert!(matches!(*inner, ResilienceStrategy::Retry(_)));
        }
        other => panic!("expected Chain, got {other:?}"),
    }
}

#[test]
fn backoff_schedules() {
    assert_eq!(Backoff::None.delay_for(3), Duration::ZERO);
    assert_eq!(
        Backoff::Fixed(Duration::from_millis(250)).delay_for(4),
        Duration::from_millis(250)
    );
    let exponential = Backoff::Exponential {
        initial: Duration::from_millis(100),
        multiplier: 2.0,
        max: Duration::from_millis(350),
    };
    assert_eq!(exponential.delay_for(1), Duration::from_millis(100));
    assert_eq!(exponential.delay_for(2), Duration::from_millis(200));
    assert_eq!(
        exponential.delay_for(3),
        Duration::from_millis(350),
        "delay is capped at the configured max"
    );
}

#[test]
fn retry_policy_run_is_generic_over_errors() {
    let policy = RetryPolicy::new(3, Backoff::None);
    let mut remaining_failures = 2;
    let value: Result<u32, &str> = policy.run(|| {
        if remaining_failures > 0 {
            remaining_failures -= 1;
            Err("not yet")
        } else {
            Ok(42)
        }
    });
    assert_eq!(value.unwrap(), 42);
}
