//! Small shared types used throughout the core. Grounded on the teacher's
//! `core/common` module: one focused file per concept rather than a grab-bag.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// A reference-counted, side-effectful zero-argument closure queued by the scheduler.
///
/// Invariants (§3 Continuation): invoked exactly once, invoked on the loop thread, any
/// panic it raises is swallowed and logged rather than propagated.
pub type Continuation = Arc<dyn Fn() + Send + Sync>;

/// Runs `task`, catching and logging any panic instead of letting it unwind into the
/// scheduler. Used for every macrotask/microtask dequeue.
pub fn run_task_catching_panics(task: &Continuation) {
    let result = catch_unwind(AssertUnwindSafe(|| task()));
    if let Err(payload) = result {
        let message = panic_message(&payload);
        tracing::error!(panic = %message, "task panicked; discarding");
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Outcome of one iteration of a dedicated worker thread's poll loop. Grounded on the
/// resilient-reactor-thread pattern's `Continuation` enum (distinct from the
/// [`Continuation`] closure type above, which shares nothing but the name with the
/// original source's "keep going" signal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerContinuation {
    Continue,
    Stop,
}
