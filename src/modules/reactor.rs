//! `reactor.*` (§6): the handle types a script-level reactor binding is built from —
//! `Timer`, `Idle`, `Prepare`, `Check`, `Async`, `Poll`, `Signal` — plus the loop
//! control surface (`isAlive`, `run`/`stop` live on [`crate::runtime::Runtime`], which
//! owns the scheduler these delegate to).
//!
//! `Idle`/`Prepare`/`Check` are libuv-style per-iteration hooks; this reactor doesn't
//! distinguish an "idle-only" phase from "prepare" (both run once per iteration before
//! `poll`), so `IdleHandle` and `PrepareHandle` share the same registration path as a
//! deliberate simplification — see `DESIGN.md`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::core::reactor::Reactor;

use super::Modules;

#[must_use]
pub fn is_alive(modules: &Modules) -> bool { modules.reactor.is_alive() }

/// Whether any timer is currently scheduled; the closest analogue to libuv's
/// `backend_timeout` without exposing the reactor's internal deadline heap.
#[must_use]
pub fn has_pending_timers(modules: &Modules) -> bool { modules.reactor.has_live_timers() }

fn guarded_hook(active: &Arc<AtomicBool>, callback: Arc<dyn Fn() + Send + Sync>) -> Arc<dyn Fn() + Send + Sync> {
    let active = Arc::clone(active);
    Arc::new(move || {
        if active.load(Ordering::SeqCst) {
            callback();
        }
    })
}

/// A registered per-iteration hook. There's no reactor API to unregister a single
/// closure once installed (see [`Reactor::add_prepare_hook`]), so handles gate
/// themselves behind an `active` flag instead; `stop()` just flips it off.
pub struct IterationHandle {
    active: Arc<AtomicBool>,
}

impl IterationHandle {
    fn new(reactor: &Arc<Reactor>, callback: Arc<dyn Fn() + Send + Sync>, register: impl FnOnce(&Reactor, Arc<dyn Fn() + Send + Sync>)) -> Self {
        let active = Arc::new(AtomicBool::new(true));
        register(reactor, guarded_hook(&active, callback));
        Self { active }
    }

    pub fn stop(&self) { self.active.store(false, Ordering::SeqCst); }

    #[must_use]
    pub fn is_active(&self) -> bool { self.active.load(Ordering::SeqCst) }
}

/// `reactor.Idle`: a hook that runs every loop iteration while active.
#[must_use]
pub fn idle(modules: &Modules, callback: Arc<dyn Fn() + Send + Sync>) -> IterationHandle {
    IterationHandle::new(&modules.reactor, callback, |r, hook| r.add_prepare_hook(hook))
}

/// `reactor.Prepare`: a hook run once per iteration, immediately before blocking in
/// `poll`.
#[must_use]
pub fn prepare(modules: &Modules, callback: Arc<dyn Fn() + Send + Sync>) -> IterationHandle {
    IterationHandle::new(&modules.reactor, callback, |r, hook| r.add_prepare_hook(hook))
}

/// `reactor.Check`: a hook run once per iteration, right after I/O and timer dispatch.
#[must_use]
pub fn check(modules: &Modules, callback: Arc<dyn Fn() + Send + Sync>) -> IterationHandle {
    IterationHandle::new(&modules.reactor, callback, |r, hook| r.add_check_hook(hook))
}

/// `reactor.Async`: a handle any thread can use to wake the loop and run a closure on
/// it, built directly on [`Reactor::submitter`]/`run_on_loop` (§4.2).
pub struct AsyncHandle {
    reactor: Arc<Reactor>,
}

impl AsyncHandle {
    #[must_use]
    pub fn new(modules: &Modules) -> Self { Self { reactor: Arc::clone(&modules.reactor) } }

    /// Wakes the loop thread and runs `callback` there. Safe to call from any thread,
    /// any number of times.
    pub fn send(&self, callback: impl FnOnce() + Send + 'static) {
        let submitter = self.reactor.submitter();
        submitter(Box::new(callback));
    }
}

#[cfg(unix)]
pub use unix_only::{PollHandle, SignalHandle};

#[cfg(unix)]
mod unix_only {
    use std::os::fd::RawFd;
    use std::sync::Arc;

    use mio::unix::SourceFd;
    use mio::{Interest, Token};
    use signal_hook::consts::signal::{SIGINT, SIGWINCH};
    use signal_hook_mio::v1_0::Signals;

    use crate::core::reactor::Reactor;

    use super::Modules;

    /// `reactor.Poll`: raw-fd readiness notification for descriptors the built-in
    /// stream modules don't already cover (e.g. an addon-owned fd).
    pub struct PollHandle {
        reactor: Arc<Reactor>,
        token: Token,
    }

    impl PollHandle {
        /// Registers `fd` for the given interest; `on_ready` runs on the loop thread
        /// whenever the fd becomes readable/writable.
        pub fn new(modules: &Modules, fd: RawFd, interest: Interest, on_ready: Arc<dyn Fn(&mio::event::Event) + Send + Sync>) -> std::io::Result<Self> {
            let mut source = SourceFd(&fd);
            let token = modules.reactor.register_source(&mut source, interest, on_ready)?;
            Ok(Self { reactor: Arc::clone(&modules.reactor), token })
        }

        pub fn close(&self, fd: RawFd) {
            let mut source = SourceFd(&fd);
            let _ = self.reactor.deregister_source(&mut source, self.token);
        }
    }

    /// `reactor.Signal`: delivers SIGINT/SIGWINCH through the reactor instead of a
    /// separate signal-handling thread, grounded on `signal-hook-mio`'s `Source`
    /// implementation for `Signals`.
    pub struct SignalHandle {
        reactor: Arc<Reactor>,
        token: Token,
        signals: Arc<std::sync::Mutex<Signals>>,
    }

    impl SignalHandle {
        pub fn new(modules: &Modules, on_signal: Arc<dyn Fn(i32) + Send + Sync>) -> std::io::Result<Self> {
            let signals = Arc::new(std::sync::Mutex::new(Signals::new([SIGINT, SIGWINCH])?));
            let signals_for_handler = Arc::clone(&signals);
            let handler: Arc<dyn Fn(&mio::event::Event) + Send + Sync> = Arc::new(move |_event| {
                for raw_signal in signals_for_handler.lock().unwrap().pending() {
                    on_signal(raw_signal);
                }
            });
            let token = modules
                .reactor
                .register_source(&mut *signals.lock().unwrap(), Interest::READABLE, handler)?;
            Ok(Self { reactor: Arc::clone(&modules.reactor), token, signals })
        }

        pub fn close(&self) {
            let _ = self.reactor.deregister_source(&mut *self.signals.lock().unwrap(), self.token);
        }
    }
}
