//! Utility functions for hank

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Default deadline for [`wait_until`]
const DEFAULT_WAIT_DEADLINE: Duration = Duration::from_secs(15);

/// Poll interval for [`wait_until`]
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Get current Unix timestamp (milliseconds)
pub fn timestamp_now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// Poll a predicate until it holds, with the default deadline.
///
/// Effects propagate through the coordination namespace asynchronously, so
/// callers observe them by polling rather than asserting immediately.
/// Panics if the deadline elapses first.
pub fn wait_until(predicate: impl Fn() -> bool) {
    wait_until_deadline(predicate, DEFAULT_WAIT_DEADLINE)
}

/// Poll a predicate until it holds or the deadline elapses.
///
/// Panics on timeout: a predicate that never becomes true indicates a lost
/// notification, not a slow one.
pub fn wait_until_deadline(predicate: impl Fn() -> bool, deadline: Duration) {
    let start = Instant::now();
    loop {
        if predicate() {
            return;
        }
        if start.elapsed() > deadline {
            panic!("condition not reached within {deadline:?}");
        }
        std::thread::sleep(WAIT_POLL_INTERVAL);
    }
}

/// Check that a predicate stays false for the whole settle window.
///
/// The inverse of [`wait_until`]: used to assert that an event does NOT fire.
pub fn settle_and_check_not(predicate: impl Fn() -> bool, window: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < window {
        if predicate() {
            return false;
        }
        std::thread::sleep(WAIT_POLL_INTERVAL);
    }
    !predicate()
}
