//! The microtask/macrotask scheduler (§3 Scheduler, §4.1).
//!
//! Two deques, two mutexes, one condition variable. `run_one` never blocks; only
//! `run_until_idle` blocks, and only on the condvar — never on I/O directly. Grounded on
//! the teacher's resilient-reactor-thread pattern for the "global state behind a lock,
//! wake via a shared primitive" shape, adapted from a broadcast channel (1:N event fan
//! out) to a plain FIFO deque (task queue) since the scheduler's consumer is always
//! exactly the loop thread.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::core::common::{run_task_catching_panics, Continuation};

/// How long `run_until_idle` will wait on the condvar between predicate rechecks. Every
/// state change that can flip the idle predicate is supposed to call [`Scheduler::notify`]
/// directly, but this bounds the blast radius of a missed notification to one tick of
/// this duration.
const IDLE_RECHECK_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Default)]
struct Queues {
    microtasks: Mutex<VecDeque<Continuation>>,
    macrotasks: Mutex<VecDeque<Continuation>>,
}

/// The cooperative scheduler described in §4.1.
pub struct Scheduler {
    queues: Queues,
    wait_lock: Mutex<()>,
    cv: Condvar,
    stop: AtomicBool,
}

impl Default for Scheduler {
    fn default() -> Self { Self::new() }
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            queues: Queues::default(),
            wait_lock: Mutex::new(()),
            cv: Condvar::new(),
            stop: AtomicBool::new(false),
        }
    }

    /// Safe to call from any thread. Signals the condition variable.
    pub fn enqueue_microtask(&self, task: Continuation) {
        self.queues.microtasks.lock().unwrap().push_back(task);
        self.wake();
    }

    /// Safe to call from any thread. Signals the condition variable.
    pub fn enqueue_macrotask(&self, task: Continuation) {
        self.queues.macrotasks.lock().unwrap().push_back(task);
        self.wake();
    }

    /// Wakes any thread blocked in [`Scheduler::run_until_idle`] so it can re-evaluate
    /// external state (§4.1 "notify()").
    pub fn notify(&self) {
        self.wake();
    }

    /// Sets the terminal stop flag and wakes waiters. Every subsequent
    /// `run_until_idle` call returns immediately.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.wake();
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool { self.stop.load(Ordering::SeqCst) }

    fn wake(&self) {
        // The condvar's paired mutex is only ever held for the instant of the notify;
        // it guards nothing but the wake signal itself.
        let _guard = self.wait_lock.lock().unwrap();
        self.cv.notify_all();
    }

    fn drain_microtasks(&self) {
        loop {
            let next = self.queues.microtasks.lock().unwrap().pop_front();
            match next {
                Some(task) => {
                    tracing::trace!("running microtask");
                    run_task_catching_panics(&task);
                }
                None => break,
            }
        }
    }

    /// Drains all microtasks currently queued (re-sampling after each one so a
    /// microtask that enqueues another microtask is observed in the same drain), then
    /// pops and runs at most one macrotask. Never blocks. Returns whether a macrotask
    /// ran.
    pub fn run_one(&self) -> bool {
        self.drain_microtasks();
        let next = self.queues.macrotasks.lock().unwrap().pop_front();
        match next {
            Some(task) => {
                tracing::trace!("running macrotask");
                run_task_catching_panics(&task);
                true
            }
            None => false,
        }
    }

    fn queues_empty(&self) -> bool {
        self.queues.microtasks.lock().unwrap().is_empty()
            && self.queues.macrotasks.lock().unwrap().is_empty()
    }

    /// Repeats [`Scheduler::run_one`] until both queues are empty, then blocks on the
    /// condvar until a task is enqueued, [`Scheduler::stop`] is called, or `has_pending`
    /// (if given) transitions to false. Exits when both queues are empty and
    /// `has_pending` is absent or returns false (§4.1, §4.8).
    pub fn run_until_idle(&self, has_pending: Option<&(dyn Fn() -> bool + Send + Sync)>) {
        let span = tracing::debug_span!("run_until_idle");
        let _enter = span.enter();
        loop {
            if self.is_stopped() {
                return;
            }

            if self.run_one() {
                continue;
            }

            // Queues are empty. Decide whether to exit or wait.
            if self.queues_empty() {
                let pending = has_pending.is_some_and(|f| f());
                if !pending {
                    return;
                }
            }

            if self.is_stopped() {
                return;
            }

            let guard = self.wait_lock.lock().unwrap();
            let _ = self.cv.wait_timeout(guard, IDLE_RECHECK_INTERVAL).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn record(log: &Arc<Mutex<Vec<&'static str>>>, label: &'static str) -> Continuation {
        let log = Arc::clone(log);
        Arc::new(move || log.lock().unwrap().push(label))
    }

    #[test]
    fn microtasks_drain_before_macrotasks_run_one() {
        let scheduler = Scheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        scheduler.enqueue_microtask(record(&log, "micro-a"));
        scheduler.enqueue_macrotask(record(&log, "macro-b"));
        scheduler.enqueue_microtask(record(&log, "micro-c"));

        let ran = scheduler.run_one();
        assert!(ran);
        assert_eq!(*log.lock().unwrap(), vec!["micro-a", "micro-c", "macro-b"]);
    }

    #[test]
    fn microtask_enqueued_during_drain_runs_in_same_drain() {
        let scheduler = Arc::new(Scheduler::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let inner_log = Arc::clone(&log);
        let inner_scheduler = Arc::clone(&scheduler);
        let first: Continuation = Arc::new(move || {
            inner_log.lock().unwrap().push("first");
            let inner_log2 = Arc::clone(&inner_log);
            inner_scheduler.enqueue_microtask(Arc::new(move || {
                inner_log2.lock().unwrap().push("nested");
            }));
        });
        scheduler.enqueue_microtask(first);
        scheduler.enqueue_macrotask(record(&log, "macro"));

        scheduler.run_one();
        assert_eq!(*log.lock().unwrap(), vec!["first", "nested", "macro"]);
    }

    #[test]
    fn macrotasks_run_fifo_one_per_run_one_call() {
        let scheduler = Scheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        scheduler.enqueue_macrotask(record(&log, "m1"));
        scheduler.enqueue_macrotask(record(&log, "m2"));
        scheduler.enqueue_macrotask(record(&log, "m3"));

        assert!(scheduler.run_one());
        assert!(scheduler.run_one());
        assert!(scheduler.run_one());
        assert!(!scheduler.run_one());
        assert_eq!(*log.lock().unwrap(), vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn run_until_idle_returns_promptly_with_no_pending_work() {
        let scheduler = Scheduler::new();
        let started = std::time::Instant::now();
        scheduler.run_until_idle(None);
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[test]
    fn run_until_idle_drains_all_queued_work_before_returning() {
        let scheduler = Scheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let count = Arc::clone(&count);
            scheduler.enqueue_macrotask(Arc::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }
        scheduler.run_until_idle(None);
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn stop_causes_run_until_idle_to_return_even_with_pending_predicate() {
        let scheduler = Arc::new(Scheduler::new());
        let scheduler_clone = Arc::clone(&scheduler);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            scheduler_clone.stop();
        });
        scheduler.run_until_idle(Some(&|| true));
        handle.join().unwrap();
        assert!(scheduler.is_stopped());
    }

    #[test]
    fn a_panicking_task_does_not_abort_the_drain() {
        let scheduler = Scheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        scheduler.enqueue_microtask(Arc::new(|| panic!("boom")));
        scheduler.enqueue_microtask(record(&log, "after-panic"));
        scheduler.run_one();
        assert_eq!(*log.lock().unwrap(), vec!["after-panic"]);
    }
}
