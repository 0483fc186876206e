//! The timer subsystem (§4.3): `set_timeout`, `set_interval`, `clear_timer`, and the
//! promise-returning `nap`.
//!
//! Two scheduling paths converge on the same fire mechanics: if a reactor loop exists,
//! deadlines are tracked there (§4.3 step 2); otherwise a detached worker thread sleeps
//! in bounded slices so cancellation stays responsive even without a reactor (§4.3 step
//! 3). `set_timeout`/`set_interval` build a fire closure that delivers a script callback
//! through the bridge; `nap` builds one that settles a Promise directly, natively,
//! without going through the evaluator at all.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::core::bridge::{self, CallbackPayload};
use crate::core::reactor::{Reactor, TimerId};
use crate::evaluator::{CallbackHandle, Value};
use crate::promise::Promise;

type FireFn = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone, Copy)]
enum TimerKind {
    Timeout,
    Interval(Duration),
}

struct LiveTimer {
    kind: TimerKind,
    cancelled: Arc<AtomicBool>,
}

/// The live-timer map. Its non-emptiness contributes to the scheduler's idle predicate
/// (§4.8): a script with an outstanding `setInterval` keeps the loop alive.
#[derive(Default)]
pub struct TimerTable {
    next_id: AtomicU64,
    live: Mutex<HashMap<TimerId, LiveTimer>>,
}

impl TimerTable {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.live.lock().unwrap().is_empty() }

    fn alloc_id(&self) -> TimerId { self.next_id.fetch_add(1, Ordering::SeqCst) }
}

/// Registers a one-shot timer that delivers a script callback via the bridge when it
/// fires.
pub fn set_timeout(
    table: &Arc<TimerTable>,
    reactor: Option<&Arc<Reactor>>,
    fallback_slice: Duration,
    delay: Duration,
    callback: CallbackHandle,
    args: Vec<Value>,
) -> TimerId {
    let fire: FireFn = Arc::new(move || deliver(callback.clone(), args.clone()));
    schedule_native(table, reactor, fallback_slice, TimerKind::Timeout, delay, fire)
}

/// Registers a repeating timer; the first fire happens after one `period` elapses.
pub fn set_interval(
    table: &Arc<TimerTable>,
    reactor: Option<&Arc<Reactor>>,
    fallback_slice: Duration,
    period: Duration,
    callback: CallbackHandle,
    args: Vec<Value>,
) -> TimerId {
    let fire: FireFn = Arc::new(move || deliver(callback.clone(), args.clone()));
    schedule_native(table, reactor, fallback_slice, TimerKind::Interval(period), period, fire)
}

/// `nap(delay)`: a Promise that resolves with `Value::Undefined` once `delay` elapses.
/// Rejection is undefined for this helper (§4.3). Settlement happens natively — no
/// evaluator round-trip is needed to fulfill an internal promise.
#[must_use]
pub fn nap(
    table: &Arc<TimerTable>,
    reactor: Option<&Arc<Reactor>>,
    fallback_slice: Duration,
    delay: Duration,
) -> Arc<Promise> {
    let promise = Promise::new();
    let settle = Arc::clone(&promise);
    let fire: FireFn = Arc::new(move || settle.fulfill(Value::Undefined));
    schedule_native(table, reactor, fallback_slice, TimerKind::Timeout, delay, fire);
    promise
}

/// Where fired script-facing timer payloads go: straight to the bridge's macrotask
/// path, same as any other cross-thread callback delivery (§4.3 step 4, §4.2).
fn deliver(callback: CallbackHandle, args: Vec<Value>) {
    bridge::enqueue_callback_global(CallbackPayload::new(callback, args));
}

fn schedule_native(
    table: &Arc<TimerTable>,
    reactor: Option<&Arc<Reactor>>,
    fallback_slice: Duration,
    kind: TimerKind,
    delay: Duration,
    fire: FireFn,
) -> TimerId {
    let id = table.alloc_id();
    let cancelled = Arc::new(AtomicBool::new(false));
    table.live.lock().unwrap().insert(id, LiveTimer { kind, cancelled: Arc::clone(&cancelled) });

    match reactor {
        Some(reactor) => arm_reactor_tick(Arc::clone(reactor), Arc::clone(table), id, kind, Instant::now() + delay, cancelled, fire),
        None => run_fallback_thread(Arc::clone(table), fallback_slice, id, kind, delay, cancelled, fire),
    }
    id
}

fn arm_reactor_tick(
    reactor: Arc<Reactor>,
    table: Arc<TimerTable>,
    id: TimerId,
    kind: TimerKind,
    deadline: Instant,
    cancelled: Arc<AtomicBool>,
    fire: FireFn,
) {
    let reactor_for_rearm = Arc::clone(&reactor);
    reactor.schedule_timer(id, deadline, Arc::new(move || {
        on_reactor_fire(&reactor_for_rearm, &table, id, kind, &cancelled, &fire);
    }));
}

fn on_reactor_fire(
    reactor: &Arc<Reactor>,
    table: &Arc<TimerTable>,
    id: TimerId,
    kind: TimerKind,
    cancelled: &Arc<AtomicBool>,
    fire: &FireFn,
) {
    if cancelled.load(Ordering::SeqCst) {
        table.live.lock().unwrap().remove(&id);
        return;
    }
    fire();
    match kind {
        TimerKind::Timeout => {
            table.live.lock().unwrap().remove(&id);
        }
        TimerKind::Interval(period) => {
            // Still registered unless `clear_timer` ran concurrently with this fire —
            // the spec tolerates at most one spurious delivery in that race, not an
            // extra re-arm, so check the table before scheduling the next tick.
            if table.live.lock().unwrap().contains_key(&id) {
                arm_reactor_tick(Arc::clone(reactor), Arc::clone(table), id, kind, Instant::now() + period, Arc::clone(cancelled), Arc::clone(fire));
            }
        }
    }
}

fn run_fallback_thread(
    table: Arc<TimerTable>,
    fallback_slice: Duration,
    id: TimerId,
    kind: TimerKind,
    mut delay: Duration,
    cancelled: Arc<AtomicBool>,
    fire: FireFn,
) {
    std::thread::spawn(move || loop {
        let mut remaining = delay;
        while remaining > Duration::ZERO {
            let slice = remaining.min(fallback_slice);
            std::thread::sleep(slice);
            remaining = remaining.saturating_sub(slice);
            if cancelled.load(Ordering::SeqCst) {
                table.live.lock().unwrap().remove(&id);
                return;
            }
        }
        if cancelled.load(Ordering::SeqCst) {
            table.live.lock().unwrap().remove(&id);
            return;
        }
        fire();
        match kind {
            TimerKind::Timeout => {
                table.live.lock().unwrap().remove(&id);
                return;
            }
            TimerKind::Interval(period) => {
                delay = period;
            }
        }
    });
}

/// Cancels a live timer. Idempotent: clearing an id that already fired or was never
/// registered is a no-op (§4.3 step 5).
pub fn clear_timer(table: &Arc<TimerTable>, reactor: Option<&Arc<Reactor>>, id: TimerId) {
    let cancelled = table.live.lock().unwrap().get(&id).map(|t| Arc::clone(&t.cancelled));
    let Some(cancelled) = cancelled else { return };
    cancelled.store(true, Ordering::SeqCst);

    match reactor {
        Some(reactor) => {
            let table = Arc::clone(table);
            let reactor = Arc::clone(reactor);
            bridge::run_on_loop(move || {
                reactor.cancel_timer(id);
                table.live.lock().unwrap().remove(&id);
            });
        }
        None => {
            table.live.lock().unwrap().remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::reactor::Reactor;
    use crate::core::scheduler::Scheduler;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn fallback_timeout_fires_once_and_then_clears_the_table() {
        let table = Arc::new(TimerTable::new());
        let deliveries = Arc::new(AtomicUsize::new(0));
        let deliveries2 = Arc::clone(&deliveries);
        bridge::unregister();
        bridge::register(
            Arc::new(Scheduler::new()),
            Arc::new(|thunk| thunk()),
            Arc::new(move |_payload| { deliveries2.fetch_add(1, Ordering::SeqCst); }),
        );

        set_timeout(&table, None, Duration::from_millis(5), Duration::from_millis(20), CallbackHandle::new(()), vec![]);
        let deadline = Instant::now() + Duration::from_secs(1);
        while table.live.lock().unwrap().len() == 1 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(table.is_empty());
        assert_eq!(deliveries.load(Ordering::SeqCst), 1);
        bridge::unregister();
    }

    #[test]
    fn cancelling_before_fire_prevents_delivery_on_reactor_path() {
        let reactor = Reactor::start("timer-test-reactor").unwrap();
        let table = Arc::new(TimerTable::new());
        let scheduler = Arc::new(Scheduler::new());
        let deliveries = Arc::new(AtomicUsize::new(0));
        let deliveries2 = Arc::clone(&deliveries);
        bridge::unregister();
        bridge::register(Arc::clone(&scheduler), reactor.submitter(), Arc::new(move |_payload| {
            deliveries2.fetch_add(1, Ordering::SeqCst);
        }));

        let id = set_timeout(&table, Some(&reactor), Duration::from_millis(10), Duration::from_millis(40), CallbackHandle::new(()), vec![]);
        clear_timer(&table, Some(&reactor), id);
        std::thread::sleep(Duration::from_millis(100));
        scheduler.run_until_idle(None);
        assert_eq!(deliveries.load(Ordering::SeqCst), 0);
        bridge::unregister();
        reactor.shutdown();
    }

    #[test]
    fn timer_table_is_empty_once_the_only_timeout_is_cleared() {
        let table = Arc::new(TimerTable::new());
        let id = set_timeout(&table, None, Duration::from_millis(10), Duration::from_secs(10), CallbackHandle::new(()), vec![]);
        assert!(!table.is_empty());
        clear_timer(&table, None, id);
        assert!(table.is_empty());
    }

    #[test]
    fn nap_fulfills_its_promise_after_the_delay() {
        let table = Arc::new(TimerTable::new());
        let promise = nap(&table, None, Duration::from_millis(5), Duration::from_millis(20));
        let deadline = Instant::now() + Duration::from_secs(1);
        while !promise.is_settled() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(promise.is_settled());
    }
}
