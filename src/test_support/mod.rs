//! Test-only scaffolding (§4.11): a fake evaluator host, a reactor-less loop-thunk
//! submitter, and a recording bridge runner, so scheduler/timer/promise/stream tests
//! don't need a real reactor thread or a real script evaluator.

use std::sync::{Arc, Mutex};

use crate::core::bridge::{CallbackPayload, LoopThunkSubmitter, PayloadRunner};
use crate::evaluator::{CallbackHandle, EvaluatorHost, Value};

/// Records every invocation instead of running script code. Useful for asserting a
/// callback fired with the expected arguments without a real evaluator in the loop.
#[derive(Default)]
pub struct FakeEvaluatorHost {
    pub invocations: Mutex<Vec<(CallbackHandle, Vec<Value>)>>,
}

impl FakeEvaluatorHost {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    #[must_use]
    pub fn invocation_count(&self) -> usize { self.invocations.lock().unwrap().len() }
}

impl EvaluatorHost for FakeEvaluatorHost {
    fn invoke_function(&self, callback: &CallbackHandle, args: &[Value]) {
        self.invocations.lock().unwrap().push((callback.clone(), args.to_vec()));
    }
}

/// A [`LoopThunkSubmitter`] with no reactor behind it: runs every submitted thunk
/// inline, synchronously, on the calling thread. Enough for tests that only exercise
/// the scheduler, timer fallback path, or promise settlement.
#[must_use]
pub fn headless_submitter() -> LoopThunkSubmitter { Arc::new(|thunk| thunk()) }

/// A [`PayloadRunner`] that records `(callback, args)` pairs into a shared vec instead
/// of invoking an evaluator, paired with a handle to read them back.
#[must_use]
pub fn recording_runner() -> (LoopThunkSubmitter, PayloadRunner) {
    (headless_submitter(), Arc::new(|_payload: CallbackPayload| {}))
}

/// Same as [`recording_runner`] but exposes the recorded deliveries for assertions.
#[must_use]
pub fn recording_runner_with_log() -> (LoopThunkSubmitter, PayloadRunner, Arc<Mutex<Vec<Vec<Value>>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let log2 = Arc::clone(&log);
    let runner: PayloadRunner = Arc::new(move |payload: CallbackPayload| {
        log2.lock().unwrap().push(payload.args);
    });
    (headless_submitter(), runner, log)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bridge::{self, CallbackPayload};
    use crate::core::scheduler::Scheduler;

    #[test]
    fn recording_runner_with_log_captures_delivered_args() {
        bridge::unregister();
        let scheduler = Arc::new(Scheduler::new());
        let (submitter, runner, log) = recording_runner_with_log();
        bridge::register(scheduler.clone(), submitter, runner);

        bridge::enqueue_callback_global(CallbackPayload::new(CallbackHandle::new(()), vec![Value::Number(42.0)]));
        scheduler.run_until_idle(None);

        assert_eq!(log.lock().unwrap().len(), 1);
        bridge::unregister();
    }
}
