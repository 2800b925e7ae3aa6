//! Callback gate.
//!
//! Every call into application code goes through [`CallbackGate::invoke`],
//! which holds a re-entrant lock for the duration of the callback. A callback
//! may therefore call back into its own session from the same thread, while
//! [`CallbackGate::disable`] from another thread waits for in-flight callbacks
//! to return. Once disabled, the gate never opens again.
//!
//! Because `disable` waits, a callback that blocks on another thread (for
//! instance on a task that is itself closing the session) stalls teardown
//! and [`Session::disable_callback`](crate::Session::disable_callback)
//! until it returns.

use std::cell::Cell;

use parking_lot::ReentrantMutex;

/// Re-entrant switch in front of user callbacks.
pub struct CallbackGate {
    enabled: ReentrantMutex<Cell<bool>>,
}

impl CallbackGate {
    /// An enabled gate.
    pub fn new() -> Self {
        Self {
            enabled: ReentrantMutex::new(Cell::new(true)),
        }
    }

    /// Run `f` if the gate is enabled, holding the gate lock meanwhile.
    ///
    /// Returns `None` without running `f` when disabled.
    pub fn invoke<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let guard = self.enabled.lock();
        if !guard.get() {
            return None;
        }
        Some(f())
    }

    /// Like [`invoke`](Self::invoke), discarding the outcome.
    pub fn run(&self, f: impl FnOnce()) {
        let _ = self.invoke(f);
    }

    /// Stop all future callbacks.
    pub fn disable(&self) {
        self.enabled.lock().set(false);
    }

    /// Whether callbacks may still run.
    pub fn is_enabled(&self) -> bool {
        self.enabled.lock().get()
    }
}

impl Default for CallbackGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn invokes_while_enabled() {
        let gate = CallbackGate::new();
        assert_eq!(gate.invoke(|| 7), Some(7));
        assert!(gate.is_enabled());
    }

    #[test]
    fn disabled_gate_skips_callback() {
        let gate = CallbackGate::new();
        gate.disable();
        let mut ran = false;
        gate.run(|| ran = true);
        assert!(!ran);
        assert_eq!(gate.invoke(|| 1), None);
    }

    #[test]
    fn reentrant_invocation_succeeds() {
        let gate = CallbackGate::new();
        let depth = gate.invoke(|| gate.invoke(|| gate.invoke(|| 3)));
        assert_eq!(depth, Some(Some(Some(3))));
    }

    #[test]
    fn disable_from_inside_callback() {
        let gate = CallbackGate::new();
        gate.run(|| {
            gate.disable();
            assert_eq!(gate.invoke(|| ()), None);
        });
        assert!(!gate.is_enabled());
    }

    #[test]
    fn disable_waits_for_inflight_callback() {
        let gate = Arc::new(CallbackGate::new());
        let finished = Arc::new(AtomicUsize::new(0));
        let (started_tx, started_rx) = std::sync::mpsc::channel();

        let worker = {
            let gate = Arc::clone(&gate);
            let finished = Arc::clone(&finished);
            std::thread::spawn(move || {
                gate.run(|| {
                    started_tx.send(()).unwrap();
                    std::thread::sleep(std::time::Duration::from_millis(50));
                    let _ = finished.fetch_add(1, Ordering::SeqCst);
                });
            })
        };

        started_rx.recv().unwrap();
        gate.disable();
        // disable() could only take the lock after the callback returned
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        worker.join().unwrap();
    }
}
