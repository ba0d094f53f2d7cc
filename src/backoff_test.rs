use super::*;

fn backoff() -> Backoff {
    Backoff::new(Duration::from_secs(1), Duration::from_secs(30), 0.0)
}

#[test]
fn delay_doubles_from_base() {
    let b = backoff();
    assert_eq!(b.delay(0), Duration::from_secs(1));
    assert_eq!(b.delay(1), Duration::from_secs(2));
    assert_eq!(b.delay(2), Duration::from_secs(4));
    assert_eq!(b.delay(3), Duration::from_secs(8));
}

#[test]
fn delay_is_capped_at_ceiling() {
    let b = backoff();
    assert_eq!(b.delay(5), Duration::from_secs(30));
    assert_eq!(b.delay(u32::MAX), Duration::from_secs(30));
}

#[test]
fn jitter_stays_within_fraction() {
    let b = Backoff::new(Duration::from_secs(1), Duration::from_secs(30), 0.1);
    for attempt in 0..8 {
        let base = b.base_delay(attempt);
        let delay = b.delay(attempt);
        assert!(delay >= base, "attempt {attempt}: {delay:?} < {base:?}");
        assert!(delay <= base + base / 10, "attempt {attempt}: {delay:?} too large");
    }
}

#[test]
fn jitter_fraction_is_clamped() {
    let b = Backoff::new(Duration::from_secs(1), Duration::from_secs(30), 5.0);
    assert!(b.delay(0) <= Duration::from_secs(2));
}

#[test]
fn breaker_trips_at_threshold() {
    let mut breaker = CircuitBreaker::new(5, Duration::from_secs(60));
    let start = Instant::now();
    for i in 0..4u64 {
        assert!(!breaker.record(start + Duration::from_secs(i)), "closure {i} should not trip");
    }
    assert!(breaker.record(start + Duration::from_secs(4)));
    assert_eq!(breaker.count(), 5);
}

#[test]
fn breaker_window_expiry_forgets_old_closures() {
    let mut breaker = CircuitBreaker::new(5, Duration::from_secs(60));
    let start = Instant::now();
    for i in 0..4u64 {
        breaker.record(start + Duration::from_secs(i));
    }

    // Fifth closure lands after the first four have aged out.
    let later = start + Duration::from_secs(120);
    assert!(!breaker.record(later));
    assert_eq!(breaker.count(), 1);
}

#[test]
fn breaker_reset_clears_history() {
    let mut breaker = CircuitBreaker::new(2, Duration::from_secs(60));
    let now = Instant::now();
    breaker.record(now);
    breaker.reset();
    assert_eq!(breaker.count(), 0);
    assert!(!breaker.record(now));
}
