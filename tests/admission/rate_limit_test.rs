//! Sliding-window limiter behaviour.

use std::time::Duration;

use netveil::admission::{RateDecision, RateLimiter};
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(60);

#[test]
fn fourth_request_within_window_is_rejected() {
    let limiter = RateLimiter::new(3, WINDOW);
    let start = Instant::now();

    let admitted: Vec<bool> = (0..4u64)
        .map(|i| limiter.admit("10.0.0.1", start + Duration::from_secs(i * 3)))
        .collect();
    assert_eq!(admitted, vec![true, true, true, false]);
}

#[test]
fn rejections_are_not_counted() {
    let limiter = RateLimiter::new(1, WINDOW);
    let start = Instant::now();
    assert!(limiter.admit("a", start));
    for s in 1..30u64 {
        assert!(!limiter.admit("a", start + Duration::from_secs(s)));
    }
    // Only the first admitted request occupies the window.
    assert!(limiter.admit("a", start + WINDOW));
}

#[test]
fn identities_are_limited_independently() {
    let limiter = RateLimiter::new(1, WINDOW);
    let now = Instant::now();
    assert!(limiter.admit("a", now));
    assert!(limiter.admit("b", now));
    assert!(!limiter.admit("a", now));
    assert_eq!(limiter.tracked_identities(), 2);
}

#[test]
fn limited_reports_time_until_oldest_leaves() {
    let limiter = RateLimiter::new(2, WINDOW);
    let start = Instant::now();
    assert!(limiter.admit("a", start));
    assert!(limiter.admit("a", start + Duration::from_secs(20)));

    let decision = limiter.check("a", start + Duration::from_secs(45));
    assert_eq!(
        decision,
        RateDecision::Limited {
            retry_after: Duration::from_secs(15)
        }
    );
}

#[test]
fn idle_identities_are_purged() {
    let limiter = RateLimiter::new(5, WINDOW);
    let start = Instant::now();
    assert!(limiter.admit("old", start));
    assert!(limiter.admit("fresh", start + Duration::from_secs(50)));

    let purged = limiter.purge_idle(start + WINDOW);
    assert_eq!(purged, 1);
    assert_eq!(limiter.tracked_identities(), 1);
}

#[test]
fn concurrent_callers_never_exceed_the_limit() {
    let limiter = std::sync::Arc::new(RateLimiter::new(10, WINDOW));
    let now = Instant::now();
    let threads: Vec<_> = (0..8)
        .map(|_| {
            let limiter = std::sync::Arc::clone(&limiter);
            std::thread::spawn(move || (0..10).filter(|_| limiter.admit("shared", now)).count())
        })
        .collect();
    let admitted: usize = threads
        .into_iter()
        .map(|t| t.join().expect("thread should finish"))
        .sum();
    assert_eq!(admitted, 10);
}
