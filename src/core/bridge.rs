//! The cross-thread callback bridge (§3 CallbackPayload, §4.2).
//!
//! A process-wide singleton with two slots: the current scheduler and a runner closure
//! supplied by the evaluator. Registration happens once at runtime bootstrap. Grounded
//! on the teacher's `ThreadSafeGlobalState`/RRT singleton pattern: an `OnceLock` around
//! a `Mutex<Option<...>>`, lazily populated, with a well-defined "nothing registered
//! yet" fallback instead of a panic on every call site.

use std::sync::{Arc, Mutex, OnceLock};

use crate::core::common::Continuation;
use crate::core::scheduler::Scheduler;
use crate::evaluator::{CallbackHandle, Value};

/// Owns `{callback, arg_list}`. The callback may be absent, in which case the payload
/// is a pure wake-up signal and the receiver drops it without invoking anything (§3).
pub struct CallbackPayload {
    pub callback: Option<CallbackHandle>,
    pub args: Vec<Value>,
}

impl CallbackPayload {
    #[must_use]
    pub fn new(callback: CallbackHandle, args: Vec<Value>) -> Self {
        Self { callback: Some(callback), args }
    }

    /// A payload that carries no callback — a pure wake-up signal.
    #[must_use]
    pub fn wakeup() -> Self { Self { callback: None, args: Vec::new() } }
}

/// A closure that submits work to run on the loop thread. The reactor adapter supplies
/// this; see [`crate::core::reactor::ReactorHandleOwner::run_on_loop`].
pub type LoopThunkSubmitter = Arc<dyn Fn(Box<dyn FnOnce() + Send>) + Send + Sync>;

/// A closure that extracts the callback and arguments from a payload and invokes them
/// through the evaluator. Supplied once by the embedder at startup.
pub type PayloadRunner = Arc<dyn Fn(CallbackPayload) + Send + Sync>;

struct BridgeState {
    scheduler: Option<Arc<Scheduler>>,
    submit_to_loop: Option<LoopThunkSubmitter>,
    runner: Option<PayloadRunner>,
}

fn global_state() -> &'static Mutex<BridgeState> {
    static STATE: OnceLock<Mutex<BridgeState>> = OnceLock::new();
    STATE.get_or_init(|| {
        Mutex::new(BridgeState { scheduler: None, submit_to_loop: None, runner: None })
    })
}

/// Registers the current scheduler, the reactor's loop-thunk submitter, and the
/// evaluator's runner closure. Called once at runtime startup; re-registering replaces
/// the previous registration (used by tests that spin up multiple runtimes in
/// sequence).
pub fn register(scheduler: Arc<Scheduler>, submit_to_loop: LoopThunkSubmitter, runner: PayloadRunner) {
    let mut state = global_state().lock().unwrap();
    state.scheduler = Some(scheduler);
    state.submit_to_loop = Some(submit_to_loop);
    state.runner = Some(runner);
}

/// Clears the registration. Used by tests and by orderly runtime shutdown.
pub fn unregister() {
    let mut state = global_state().lock().unwrap();
    state.scheduler = None;
    state.submit_to_loop = None;
    state.runner = None;
}

/// Wraps `payload` in a [`Continuation`] that invokes the registered runner, and hands
/// it to the scheduler's macrotask queue. No-op (with a logged warning) if nothing is
/// registered.
pub fn enqueue_callback_global(payload: CallbackPayload) {
    let state = global_state().lock().unwrap();
    match (&state.scheduler, &state.runner) {
        (Some(scheduler), Some(runner)) => {
            scheduler.enqueue_macrotask(make_delivery_continuation(payload, Arc::clone(runner)));
        }
        _ => tracing::warn!("enqueue_callback_global called with no scheduler/runner registered"),
    }
}

/// Identical to [`enqueue_callback_global`], but the resulting continuation is placed
/// on the microtask queue instead.
pub fn enqueue_microtask_global(payload: CallbackPayload) {
    let state = global_state().lock().unwrap();
    match (&state.scheduler, &state.runner) {
        (Some(scheduler), Some(runner)) => {
            let runner = Arc::clone(runner);
            scheduler.enqueue_microtask(make_delivery_continuation(payload, runner));
        }
        _ => tracing::warn!("enqueue_microtask_global called with no scheduler/runner registered"),
    }
}

/// If a scheduler and reactor are registered, submits `closure` to run on the loop
/// thread. Otherwise runs `closure` inline on the caller (§4.2's explicit tolerance for
/// the "neither exists" case).
pub fn run_on_loop<F>(closure: F)
where
    F: FnOnce() + Send + 'static,
{
    let submitter = { global_state().lock().unwrap().submit_to_loop.clone() };
    match submitter {
        Some(submit) => submit(Box::new(closure)),
        None => closure(),
    }
}

#[must_use]
pub fn is_registered() -> bool {
    let state = global_state().lock().unwrap();
    state.scheduler.is_some() && state.runner.is_some()
}

// --- delivery plumbing -------------------------------------------------------------
//
// A `Continuation` is `Fn() + Send + Sync` and may in principle be invoked more than
// once by the scheduler's type (it is not), so payload delivery moves the payload into
// a `Mutex<Option<CallbackPayload>>` and takes it on first (and only) invocation. This
// mirrors the "payload ownership transferred by pointer, destroyed after a single
// invocation" contract in §3.

fn make_delivery_continuation(payload: CallbackPayload, runner: PayloadRunner) -> Continuation {
    let slot = Mutex::new(Some(payload));
    Arc::new(move || {
        let taken = slot.lock().unwrap().take();
        if let Some(payload) = taken {
            match &payload.callback {
                Some(_) => runner(payload),
                None => tracing::trace!("delivered wake-up payload with no callback"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scheduler::Scheduler;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn reset() { unregister(); }

    #[test]
    fn run_on_loop_runs_inline_when_nothing_registered() {
        reset();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = Arc::clone(&ran);
        run_on_loop(move || { ran2.fetch_add(1, Ordering::SeqCst); });
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn run_on_loop_submits_through_registered_submitter() {
        reset();
        let scheduler = Arc::new(Scheduler::new());
        let captured: Arc<Mutex<Vec<Box<dyn FnOnce() + Send>>>> = Arc::new(Mutex::new(Vec::new()));
        let captured_clone = Arc::clone(&captured);
        let submitter: LoopThunkSubmitter = Arc::new(move |thunk| {
            captured_clone.lock().unwrap().push(thunk);
        });
        register(Arc::clone(&scheduler), submitter, Arc::new(|_payload| {}));

        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = Arc::clone(&ran);
        run_on_loop(move || { ran2.fetch_add(1, Ordering::SeqCst); });

        assert_eq!(ran.load(Ordering::SeqCst), 0, "closure must not run inline once a submitter exists");
        let mut thunks = captured.lock().unwrap();
        assert_eq!(thunks.len(), 1);
        (thunks.pop().unwrap())();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        reset();
    }

    #[test]
    fn enqueue_callback_global_delivers_exactly_once() {
        reset();
        let scheduler = Arc::new(Scheduler::new());
        let submitter: LoopThunkSubmitter = Arc::new(|thunk| thunk());
        let deliveries = Arc::new(AtomicUsize::new(0));
        let deliveries_clone = Arc::clone(&deliveries);
        let runner: PayloadRunner = Arc::new(move |_payload| {
            deliveries_clone.fetch_add(1, Ordering::SeqCst);
        });
        register(Arc::clone(&scheduler), submitter, runner);

        enqueue_callback_global(CallbackPayload::new(CallbackHandle::new(()), vec![]));
        scheduler.run_until_idle(None);
        assert_eq!(deliveries.load(Ordering::SeqCst), 1);
        reset();
    }

    #[test]
    fn wakeup_payload_with_no_callback_is_dropped_without_invoking_runner() {
        reset();
        let scheduler = Arc::new(Scheduler::new());
        let submitter: LoopThunkSubmitter = Arc::new(|thunk| thunk());
        let deliveries = Arc::new(AtomicUsize::new(0));
        let deliveries_clone = Arc::clone(&deliveries);
        let runner: PayloadRunner = Arc::new(move |_payload| {
            deliveries_clone.fetch_add(1, Ordering::SeqCst);
        });
        register(Arc::clone(&scheduler), submitter, runner);

        enqueue_callback_global(CallbackPayload::wakeup());
        scheduler.run_until_idle(None);
        assert_eq!(deliveries.load(Ordering::SeqCst), 0);
        reset();
    }
}
