//! The reactor adapter: a single-threaded event loop with timers, readable/writable
//! stream registration, and a thread-safe wake primitive (§2 Reactor adapter, §4.3,
//! §4.5, §6 `reactor.*`).
//!
//! Grounded on the resilient-reactor-thread pattern's "dedicated thread blocks in
//! `mio::Poll::poll`, a `mio::Waker` interrupts it" shape, generalized from a single
//! input-event source to an arbitrary set of registered stream sources plus a timer
//! deadline heap. This is the "loop thread" named throughout the specification: every
//! reactor handle and every timer fire happens here.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use mio::{Events, Interest, Poll, Token, Waker};

use crate::core::bridge::LoopThunkSubmitter;

/// Reserved token for the cross-thread wake primitive; never handed out by
/// [`Reactor::register_source`].
const WAKE_TOKEN: Token = Token(0);

/// A monotonically increasing timer id, used to break ties when two timers share a
/// deadline and to let cancellation find the right entry (§4.3 "Two timers with the
/// same deadline fire in reactor-defined order").
pub type TimerId = u64;

type TimerFireFn = Arc<dyn Fn() + Send + Sync>;
type StreamEventHandler = Arc<dyn Fn(&mio::event::Event) + Send + Sync>;

struct TimerSlot {
    deadline: Instant,
    fire: TimerFireFn,
}

/// Shared, lock-guarded reactor state touched from both the loop thread and
/// subscriber/worker threads.
struct Shared {
    thunks: Mutex<VecDeque<Box<dyn FnOnce() + Send>>>,
    timers: Mutex<HashMap<TimerId, TimerSlot>>,
    /// Kept in sync with `timers`; gives O(log n) "what's the next deadline" without
    /// scanning the whole map.
    timer_order: Mutex<BTreeSet<(Instant, TimerId)>>,
    handlers: Mutex<HashMap<Token, StreamEventHandler>>,
    next_token: AtomicUsize,
    alive: AtomicBool,
    waker: Waker,
    poll_registry: mio::Registry,
    /// Run once per loop iteration, before `poll` — the libuv-style "prepare" phase
    /// named in the external interface (§6 `reactor.Prepare`).
    prepare_hooks: Mutex<Vec<TimerFireFn>>,
    /// Run once per loop iteration, after dispatching events — the "check" phase
    /// (§6 `reactor.Check`).
    check_hooks: Mutex<Vec<TimerFireFn>>,
}

/// The reactor adapter. Owns the dedicated loop thread for its lifetime.
pub struct Reactor {
    shared: Arc<Shared>,
    join_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Reactor {
    /// Spawns the dedicated loop thread and returns a handle to the running reactor.
    pub fn start(thread_name: impl Into<String>) -> io::Result<Arc<Self>> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        let waker = Waker::new(&registry, WAKE_TOKEN)?;

        let shared = Arc::new(Shared {
            thunks: Mutex::new(VecDeque::new()),
            timers: Mutex::new(HashMap::new()),
            timer_order: Mutex::new(BTreeSet::new()),
            handlers: Mutex::new(HashMap::new()),
            next_token: AtomicUsize::new(1), // 0 is WAKE_TOKEN
            alive: AtomicBool::new(true),
            waker,
            poll_registry: registry,
            prepare_hooks: Mutex::new(Vec::new()),
            check_hooks: Mutex::new(Vec::new()),
        });

        let loop_shared = Arc::clone(&shared);
        let join_handle = std::thread::Builder::new()
            .name(thread_name.into())
            .spawn(move || run_loop(poll, loop_shared))?;

        Ok(Arc::new(Self { shared, join_handle: Mutex::new(Some(join_handle)) }))
    }

    /// A [`LoopThunkSubmitter`] bound to this reactor, for registration with the bridge
    /// (§4.2 `run_on_loop`).
    #[must_use]
    pub fn submitter(self: &Arc<Self>) -> LoopThunkSubmitter {
        let shared = Arc::clone(&self.shared);
        Arc::new(move |thunk| {
            shared.thunks.lock().unwrap().push_back(thunk);
            let _ = shared.waker.wake();
        })
    }

    #[must_use]
    pub fn is_alive(&self) -> bool { self.shared.alive.load(Ordering::SeqCst) }

    /// Registers a timer deadline. `fire` runs on the loop thread when the deadline
    /// elapses (§4.3 step 2, reactor-native path).
    pub fn schedule_timer(&self, id: TimerId, deadline: Instant, fire: TimerFireFn) {
        self.shared.timers.lock().unwrap().insert(id, TimerSlot { deadline, fire });
        self.shared.timer_order.lock().unwrap().insert((deadline, id));
        let _ = self.shared.waker.wake();
    }

    /// Removes a previously scheduled timer. A no-op if it already fired or was never
    /// registered (idempotent, matching §4.3's `clear_timer`).
    pub fn cancel_timer(&self, id: TimerId) {
        let deadline = self.shared.timers.lock().unwrap().remove(&id).map(|slot| slot.deadline);
        if let Some(deadline) = deadline {
            self.shared.timer_order.lock().unwrap().remove(&(deadline, id));
        }
    }

    #[must_use]
    pub fn has_live_timers(&self) -> bool { !self.shared.timers.lock().unwrap().is_empty() }

    /// Registers a callback run once at the start of every loop iteration, before
    /// blocking in `poll` (§6 `reactor.Prepare`). There's no way to unregister a single
    /// hook; callers that need that model a cancellation flag inside their own closure.
    pub fn add_prepare_hook(&self, hook: TimerFireFn) {
        self.shared.prepare_hooks.lock().unwrap().push(hook);
    }

    /// Registers a callback run once at the end of every loop iteration, after event
    /// dispatch (§6 `reactor.Check`).
    pub fn add_check_hook(&self, hook: TimerFireFn) {
        self.shared.check_hooks.lock().unwrap().push(hook);
    }

    /// Registers a mio event source and an event handler, invoked on the loop thread
    /// whenever the source becomes ready. Used by the TCP/UDP/Unix/IPC stream
    /// lifecycles (§4.5).
    pub fn register_source(
        &self,
        source: &mut dyn mio::event::Source,
        interest: Interest,
        handler: StreamEventHandler,
    ) -> io::Result<Token> {
        let token = Token(self.shared.next_token.fetch_add(1, Ordering::SeqCst));
        self.shared.poll_registry.register(source, token, interest)?;
        self.shared.handlers.lock().unwrap().insert(token, handler);
        Ok(token)
    }

    pub fn reregister_source(
        &self,
        source: &mut dyn mio::event::Source,
        token: Token,
        interest: Interest,
    ) -> io::Result<()> {
        self.shared.poll_registry.reregister(source, token, interest)
    }

    pub fn deregister_source(&self, source: &mut dyn mio::event::Source, token: Token) -> io::Result<()> {
        self.shared.handlers.lock().unwrap().remove(&token);
        self.shared.poll_registry.deregister(source)
    }

    /// Stops the loop thread. Blocking; waits for the thread to observe `alive ==
    /// false` and exit. Used only at process/runtime shutdown, not part of the
    /// per-request hot path.
    pub fn shutdown(&self) {
        self.shared.alive.store(false, Ordering::SeqCst);
        let _ = self.shared.waker.wake();
        if let Some(handle) = self.join_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

fn next_timeout(shared: &Shared) -> Option<Duration> {
    let order = shared.timer_order.lock().unwrap();
    let (deadline, _) = *order.iter().next()?;
    let now = Instant::now();
    Some(if deadline > now { deadline - now } else { Duration::ZERO })
}

fn fire_expired_timers(shared: &Shared) {
    let now = Instant::now();
    let expired: Vec<TimerId> = {
        let order = shared.timer_order.lock().unwrap();
        order.iter().take_while(|(deadline, _)| *deadline <= now).map(|(_, id)| *id).collect()
    };
    for id in expired {
        let slot = {
            let mut timers = shared.timers.lock().unwrap();
            let slot = timers.remove(&id);
            if let Some(ref s) = slot {
                shared.timer_order.lock().unwrap().remove(&(s.deadline, id));
            }
            slot
        };
        if let Some(slot) = slot {
            tracing::trace!(timer_id = id, "reactor timer fired");
            (slot.fire)();
        }
    }
}

fn drain_thunks(shared: &Shared) {
    loop {
        let thunk = shared.thunks.lock().unwrap().pop_front();
        match thunk {
            Some(thunk) => thunk(),
            None => break,
        }
    }
}

fn run_hooks(hooks: &Mutex<Vec<TimerFireFn>>) {
    let snapshot: Vec<TimerFireFn> = hooks.lock().unwrap().clone();
    for hook in snapshot {
        hook();
    }
}

fn run_loop(mut poll: Poll, shared: Arc<Shared>) {
    let mut events = Events::with_capacity(256);
    while shared.alive.load(Ordering::SeqCst) {
        run_hooks(&shared.prepare_hooks);

        let timeout = next_timeout(&shared);
        match poll.poll(&mut events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::error!(error = %e, "reactor poll failed; stopping loop thread");
                break;
            }
        }

        drain_thunks(&shared);
        fire_expired_timers(&shared);

        for event in &events {
            if event.token() == WAKE_TOKEN {
                continue;
            }
            let handler = shared.handlers.lock().unwrap().get(&event.token()).cloned();
            if let Some(handler) = handler {
                handler(event);
            }
        }

        run_hooks(&shared.check_hooks);
    }
    shared.alive.store(false, Ordering::SeqCst);
    tracing::debug!("reactor loop thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[test]
    fn reactor_runs_submitted_thunks() {
        let reactor = Reactor::start("test-reactor-thunks").unwrap();
        let submitter = reactor.submitter();
        let flag = Arc::new(AtomicBool::new(false));
        let flag2 = Arc::clone(&flag);
        submitter(Box::new(move || flag2.store(true, Ordering::SeqCst)));

        let deadline = Instant::now() + Duration::from_secs(1);
        while !flag.load(Ordering::SeqCst) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(flag.load(Ordering::SeqCst));
        reactor.shutdown();
    }

    #[test]
    fn reactor_fires_timers_at_their_deadline() {
        let reactor = Reactor::start("test-reactor-timer").unwrap();
        let fired_at = Arc::new(Mutex::new(None));
        let fired_at2 = Arc::clone(&fired_at);
        let start = Instant::now();
        reactor.schedule_timer(1, start + Duration::from_millis(30), Arc::new(move || {
            *fired_at2.lock().unwrap() = Some(Instant::now());
        }));

        let deadline = Instant::now() + Duration::from_secs(1);
        while fired_at.lock().unwrap().is_none() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        let fired = fired_at.lock().unwrap().expect("timer should have fired");
        assert!(fired.duration_since(start) >= Duration::from_millis(25));
        reactor.shutdown();
    }

    #[test]
    fn cancelling_a_timer_before_its_deadline_prevents_the_fire() {
        let reactor = Reactor::start("test-reactor-cancel").unwrap();
        let fire_count = Arc::new(AtomicU32::new(0));
        let fire_count2 = Arc::clone(&fire_count);
        reactor.schedule_timer(
            7,
            Instant::now() + Duration::from_millis(40),
            Arc::new(move || { fire_count2.fetch_add(1, Ordering::SeqCst); }),
        );
        reactor.cancel_timer(7);
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(fire_count.load(Ordering::SeqCst), 0);
        reactor.shutdown();
    }

    #[test]
    fn prepare_and_check_hooks_run_every_iteration() {
        let reactor = Reactor::start("test-reactor-hooks").unwrap();
        let prepare_count = Arc::new(AtomicU32::new(0));
        let check_count = Arc::new(AtomicU32::new(0));
        let p2 = Arc::clone(&prepare_count);
        let c2 = Arc::clone(&check_count);
        reactor.add_prepare_hook(Arc::new(move || { p2.fetch_add(1, Ordering::SeqCst); }));
        reactor.add_check_hook(Arc::new(move || { c2.fetch_add(1, Ordering::SeqCst); }));

        let submitter = reactor.submitter();
        let deadline = Instant::now() + Duration::from_secs(1);
        while prepare_count.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            submitter(Box::new(|| {}));
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(prepare_count.load(Ordering::SeqCst) > 0);
        assert!(check_count.load(Ordering::SeqCst) > 0);
        reactor.shutdown();
    }
}
