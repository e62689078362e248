//! Bounded collaborator calls.
//!
//! Hooks and dispatchers are third-party code that may block forever. Each
//! call runs on its own thread and the caller waits on a channel with a
//! deadline. A call that outlives its deadline is abandoned: the thread is
//! detached and its eventual result dropped.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

/// Outcome of a bounded call.
#[derive(Debug)]
pub enum Bounded<T, E> {
    Done(T),
    Failed(E),
    /// No answer within the deadline.
    Timeout,
    /// The worker thread panicked or could not be spawned.
    Lost,
}

/// Whole milliseconds in `d`, saturating. Deadlines are often sub-second.
pub fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Run `f` on a worker thread and wait at most `timeout` for it.
pub fn call_bounded<T, E, F>(name: &str, timeout: Duration, f: F) -> Bounded<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
    F: FnOnce() -> Result<T, E> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name(format!("rl-{}", name))
        .spawn(move || {
            // The receiver is gone after a timeout; nothing to report to.
            let _ = tx.send(f());
        });
    if spawned.is_err() {
        return Bounded::Lost;
    }

    match rx.recv_timeout(timeout) {
        Ok(Ok(value)) => Bounded::Done(value),
        Ok(Err(err)) => Bounded::Failed(err),
        Err(RecvTimeoutError::Timeout) => Bounded::Timeout,
        Err(RecvTimeoutError::Disconnected) => Bounded::Lost,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_call_completes() {
        let out: Bounded<u32, String> = call_bounded("t", Duration::from_secs(5), || Ok(7));
        assert!(matches!(out, Bounded::Done(7)));
    }

    #[test]
    fn test_error_is_passed_through() {
        let out: Bounded<(), String> =
            call_bounded("t", Duration::from_secs(5), || Err("nope".to_string()));
        assert!(matches!(out, Bounded::Failed(ref e) if e == "nope"));
    }

    #[test]
    fn test_slow_call_times_out() {
        let out: Bounded<(), String> = call_bounded("t", Duration::from_millis(20), || {
            thread::sleep(Duration::from_millis(500));
            Ok(())
        });
        assert!(matches!(out, Bounded::Timeout));
    }

    #[test]
    fn test_millis_keeps_sub_second_deadlines() {
        assert_eq!(millis(Duration::from_millis(150)), 150);
        assert_eq!(millis(Duration::from_secs(30)), 30_000);
    }

    #[test]
    fn test_panic_is_lost() {
        let out: Bounded<(), String> =
            call_bounded("t", Duration::from_secs(5), || panic!("hook crashed"));
        assert!(matches!(out, Bounded::Lost));
    }
}
