//! The Promise primitive (§4.4): PENDING → FULFILLED/REJECTED, one-way, with listener
//! fan-out strictly through a microtask — even when settlement itself happens on a
//! worker thread, which is why the enqueue always goes through `run_on_loop` first.

use std::sync::Mutex;

use crate::core::bridge::{self, CallbackPayload};
use crate::evaluator::{CallbackHandle, Value};

enum State {
    Pending,
    Fulfilled(Value),
    Rejected(Value),
}

/// A settle-once value container. `then`/`catch` listeners are script callbacks,
/// invoked with the settled value as their sole argument.
pub struct Promise {
    state: Mutex<State>,
    on_fulfill: Mutex<Vec<CallbackHandle>>,
    on_reject: Mutex<Vec<CallbackHandle>>,
}

impl Promise {
    #[must_use]
    pub fn new() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            state: Mutex::new(State::Pending),
            on_fulfill: Mutex::new(Vec::new()),
            on_reject: Mutex::new(Vec::new()),
        })
    }

    #[must_use]
    pub fn is_settled(&self) -> bool { !matches!(*self.state.lock().unwrap(), State::Pending) }

    /// Transitions PENDING → FULFILLED. No-op if already settled.
    pub fn fulfill(&self, value: Value) {
        let listeners = {
            let mut state = self.state.lock().unwrap();
            if !matches!(*state, State::Pending) {
                return;
            }
            *state = State::Fulfilled(value.clone());
            std::mem::take(&mut *self.on_fulfill.lock().unwrap())
        };
        for listener in listeners {
            deliver_settled(listener, value.clone());
        }
    }

    /// Transitions PENDING → REJECTED. No-op if already settled.
    pub fn reject(&self, reason: Value) {
        let listeners = {
            let mut state = self.state.lock().unwrap();
            if !matches!(*state, State::Pending) {
                return;
            }
            *state = State::Rejected(reason.clone());
            std::mem::take(&mut *self.on_reject.lock().unwrap())
        };
        for listener in listeners {
            deliver_settled(listener, reason.clone());
        }
    }

    /// Registers a fulfillment listener. If already fulfilled, the listener is
    /// delivered immediately as a microtask with the stored value; if already
    /// rejected, the listener is dropped without running (it only ever fires on
    /// fulfillment).
    pub fn then(&self, cb: CallbackHandle) {
        let already = match &*self.state.lock().unwrap() {
            State::Fulfilled(value) => Some(value.clone()),
            State::Pending => {
                self.on_fulfill.lock().unwrap().push(cb.clone());
                None
            }
            State::Rejected(_) => None,
        };
        if let Some(value) = already {
            deliver_settled(cb, value);
        }
    }

    /// Registers a rejection listener, mirroring [`Promise::then`].
    pub fn catch(&self, cb: CallbackHandle) {
        let already = match &*self.state.lock().unwrap() {
            State::Rejected(reason) => Some(reason.clone()),
            State::Pending => {
                self.on_reject.lock().unwrap().push(cb.clone());
                None
            }
            State::Fulfilled(_) => None,
        };
        if let Some(reason) = already {
            deliver_settled(cb, reason);
        }
    }
}

/// Submits the listener delivery to run on the loop thread, then enqueues it as a
/// microtask from there — safe to call from any thread, including during settlement
/// from a worker (§4.4).
fn deliver_settled(cb: CallbackHandle, value: Value) {
    bridge::run_on_loop(move || {
        bridge::enqueue_microtask_global(CallbackPayload::new(cb, vec![value]));
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scheduler::Scheduler;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn setup() -> (Arc<Scheduler>, Arc<AtomicUsize>) {
        bridge::unregister();
        let scheduler = Arc::new(Scheduler::new());
        let delivered = Arc::new(AtomicUsize::new(0));
        let delivered2 = Arc::clone(&delivered);
        bridge::register(Arc::clone(&scheduler), Arc::new(|thunk| thunk()), Arc::new(move |_payload| {
            delivered2.fetch_add(1, Ordering::SeqCst);
        }));
        (scheduler, delivered)
    }

    #[test]
    fn then_registered_before_fulfill_runs_once_settled() {
        let (scheduler, delivered) = setup();
        let promise = Promise::new();
        promise.then(CallbackHandle::new(()));
        assert_eq!(delivered.load(Ordering::SeqCst), 0);
        promise.fulfill(Value::Number(1.0));
        scheduler.run_until_idle(None);
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        bridge::unregister();
    }

    #[test]
    fn then_registered_after_fulfill_still_delivers() {
        let (scheduler, delivered) = setup();
        let promise = Promise::new();
        promise.fulfill(Value::Number(2.0));
        promise.then(CallbackHandle::new(()));
        scheduler.run_until_idle(None);
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        bridge::unregister();
    }

    #[test]
    fn second_settlement_attempt_is_a_no_op() {
        let (scheduler, delivered) = setup();
        let promise = Promise::new();
        promise.then(CallbackHandle::new(()));
        promise.fulfill(Value::Number(1.0));
        promise.reject(Value::Error("late".into()));
        scheduler.run_until_idle(None);
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        bridge::unregister();
    }

    #[test]
    fn catch_listener_is_skipped_on_fulfillment() {
        let (scheduler, delivered) = setup();
        let promise = Promise::new();
        promise.catch(CallbackHandle::new(()));
        promise.fulfill(Value::Undefined);
        scheduler.run_until_idle(None);
        assert_eq!(delivered.load(Ordering::SeqCst), 0);
        bridge::unregister();
    }

    #[test]
    fn settlement_from_a_worker_thread_still_delivers_on_the_loop() {
        let (scheduler, delivered) = setup();
        let promise = Promise::new();
        promise.then(CallbackHandle::new(()));
        let promise2 = Arc::clone(&promise);
        let handle = std::thread::spawn(move || promise2.fulfill(Value::Bool(true)));
        handle.join().unwrap();
        scheduler.run_until_idle(None);
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        bridge::unregister();
    }
}
