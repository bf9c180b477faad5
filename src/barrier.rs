//! InitBarrier - a one-shot gate released when the book becomes queryable.
//!
//! Construction blocks on this barrier until the applier has fully
//! applied the first snapshot. Waiters park on a condvar rather than
//! spin; once satisfied, every wait returns immediately forever.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A one-shot completion gate.
///
/// `satisfy` may be called exactly once per barrier lifetime; a second
/// call is a programmer error and panics. The barrier cannot be re-armed;
/// a resynchronizing feed gets a fresh barrier only by recreating the
/// book.
#[derive(Debug, Default)]
pub struct InitBarrier {
    satisfied: Mutex<bool>,
    cvar: Condvar,
}

impl InitBarrier {
    /// Create an unsatisfied barrier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Release all current and future waiters.
    ///
    /// # Panics
    /// Panics if the barrier was already satisfied.
    pub fn satisfy(&self) {
        let mut satisfied = self.satisfied.lock().unwrap();
        assert!(!*satisfied, "InitBarrier satisfied twice");
        *satisfied = true;
        self.cvar.notify_all();
    }

    /// Returns true once [`satisfy`](Self::satisfy) has run.
    pub fn is_satisfied(&self) -> bool {
        *self.satisfied.lock().unwrap()
    }

    /// Block the calling thread until the barrier is satisfied.
    pub fn wait(&self) {
        let mut satisfied = self.satisfied.lock().unwrap();
        while !*satisfied {
            satisfied = self.cvar.wait(satisfied).unwrap();
        }
    }

    /// Block up to `timeout`; returns false if the barrier is still
    /// unsatisfied when the window closes.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let satisfied = self.satisfied.lock().unwrap();
        let (satisfied, _) = self
            .cvar
            .wait_timeout_while(satisfied, timeout, |done| !*done)
            .unwrap();
        *satisfied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_wait_after_satisfy_returns_immediately() {
        let barrier = InitBarrier::new();
        assert!(!barrier.is_satisfied());
        barrier.satisfy();
        assert!(barrier.is_satisfied());
        barrier.wait();
        barrier.wait(); // still immediate
    }

    #[test]
    #[should_panic(expected = "satisfied twice")]
    fn test_double_satisfy_panics() {
        let barrier = InitBarrier::new();
        barrier.satisfy();
        barrier.satisfy();
    }

    #[test]
    fn test_wait_timeout_expires() {
        let barrier = InitBarrier::new();
        assert!(!barrier.wait_timeout(Duration::from_millis(20)));
        barrier.satisfy();
        assert!(barrier.wait_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn test_releases_parked_waiters() {
        let barrier = Arc::new(InitBarrier::new());
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || barrier.wait())
            })
            .collect();

        std::thread::sleep(Duration::from_millis(20));
        barrier.satisfy();
        for waiter in waiters {
            waiter.join().unwrap();
        }
    }
}
