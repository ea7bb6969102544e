//! Deferred filter results and cooperative cancellation.
//!
//! A filter may return a not-yet-completed result (pending I/O finished by a
//! host thread). The evaluator settles such values with a resumption loop
//! that re-polls the slot and checks the cancellation token at each
//! suspension point, so ordering stays left-to-right within one chain.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::value::Value;

/// A one-shot slot a host thread completes with the final value of a
/// pending filter result. First writer wins; later completions are ignored.
#[derive(Clone)]
pub struct Deferred {
    inner: Arc<Inner>,
}

struct Inner {
    slot: Mutex<Option<Value>>,
    ready: Condvar,
}

impl Deferred {
    pub fn new() -> Self {
        Deferred {
            inner: Arc::new(Inner {
                slot: Mutex::new(None),
                ready: Condvar::new(),
            }),
        }
    }

    pub fn complete(&self, value: Value) {
        let mut slot = self.inner.slot.lock();
        if slot.is_none() {
            *slot = Some(value);
            self.inner.ready.notify_all();
        }
    }

    pub fn is_complete(&self) -> bool {
        self.inner.slot.lock().is_some()
    }

    pub fn poll(&self) -> Option<Value> {
        self.inner.slot.lock().clone()
    }

    /// Block up to `timeout` for the slot to fill.
    pub fn wait_for(&self, timeout: Duration) -> Option<Value> {
        let mut slot = self.inner.slot.lock();
        if slot.is_none() {
            self.inner.ready.wait_for(&mut slot, timeout);
        }
        slot.clone()
    }
}

impl Default for Deferred {
    fn default() -> Self {
        Deferred::new()
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("complete", &self.is_complete())
            .finish()
    }
}

impl PartialEq for Deferred {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Shared flag checked at each suspension point of an evaluation.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn completes_once() {
        let deferred = Deferred::new();
        assert_eq!(deferred.poll(), None);
        deferred.complete(Value::Int(1));
        deferred.complete(Value::Int(2));
        assert_eq!(deferred.poll(), Some(Value::Int(1)));
    }

    #[test]
    fn wait_for_observes_completion_from_another_thread() {
        let deferred = Deferred::new();
        let handle = {
            let deferred = deferred.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(10));
                deferred.complete(Value::text("done"));
            })
        };
        let value = deferred.wait_for(Duration::from_secs(5));
        handle.join().unwrap();
        assert_eq!(value, Some(Value::text("done")));
    }

    #[test]
    fn wait_for_times_out_when_incomplete() {
        let deferred = Deferred::new();
        assert_eq!(deferred.wait_for(Duration::from_millis(1)), None);
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
