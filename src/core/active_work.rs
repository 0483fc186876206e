//! Active-work registry: one atomic counter per I/O subsystem, ORed together (plus the
//! timer table's non-emptiness) to form the scheduler's idle predicate (§3
//! ActiveWorkCounter, §4.8).

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Which subsystem a unit of work belongs to. Matches §4.8's enumerated predicate
/// sources, minus timers (the timer map has its own non-emptiness check, see
/// [`crate::timers::TimerTable::is_empty`]) and user addon threads (out of scope).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subsystem {
    Tcp,
    Udp,
    Unix,
    Ipc,
    WebSocket,
    Fs,
    /// The stdin reader, held for as long as it's listening or paused (mirroring a
    /// libuv TTY handle's implicit ref-count while started, plus the original
    /// implementation's explicit pause-time keepalive) — released only once the reader
    /// hits EOF or is explicitly closed (§4.6).
    Stdin,
}

const SUBSYSTEM_COUNT: usize = 7;

fn index_of(subsystem: Subsystem) -> usize {
    match subsystem {
        Subsystem::Tcp => 0,
        Subsystem::Udp => 1,
        Subsystem::Unix => 2,
        Subsystem::Ipc => 3,
        Subsystem::WebSocket => 4,
        Subsystem::Fs => 5,
        Subsystem::Stdin => 6,
    }
}

/// A guard returned by [`ActiveWorkRegistry::begin`]. Decrements its subsystem's
/// counter on drop, so every failure path (including early `return`/`?`) decrements
/// exactly once, per §3's invariant.
#[must_use = "dropping this guard immediately ends the active-work period"]
pub struct ActiveWorkGuard<'a> {
    registry: &'a ActiveWorkRegistry,
    subsystem: Subsystem,
    released: bool,
}

impl ActiveWorkGuard<'_> {
    /// Explicitly end the work period. Equivalent to dropping the guard, but useful
    /// when the caller wants the decrement to happen at a specific point rather than at
    /// scope exit.
    pub fn release(mut self) { self.do_release(); }

    fn do_release(&mut self) {
        if !self.released {
            self.registry.decrement(self.subsystem);
            self.released = true;
        }
    }
}

impl Drop for ActiveWorkGuard<'_> {
    fn drop(&mut self) { self.do_release(); }
}

/// Per-subsystem atomic counters plus the OR predicate the scheduler polls.
#[derive(Debug, Default)]
pub struct ActiveWorkRegistry {
    counters: [AtomicI64; SUBSYSTEM_COUNT],
}

impl ActiveWorkRegistry {
    #[must_use]
    pub fn new() -> Self { Self { counters: Default::default() } }

    /// Begin a unit of work on `subsystem`. Returns a guard that decrements on drop.
    pub fn begin(&self, subsystem: Subsystem) -> ActiveWorkGuard<'_> {
        self.counters[index_of(subsystem)].fetch_add(1, Ordering::SeqCst);
        ActiveWorkGuard { registry: self, subsystem, released: false }
    }

    fn decrement(&self, subsystem: Subsystem) {
        let prev = self.counters[index_of(subsystem)].fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "active work counter underflow for {subsystem:?}");
    }

    #[must_use]
    pub fn count(&self, subsystem: Subsystem) -> i64 {
        self.counters[index_of(subsystem)].load(Ordering::SeqCst)
    }

    /// Logical OR of every subsystem counter being non-zero. Does not include timers;
    /// callers compose this with [`crate::timers::TimerTable::is_empty`] (§4.8).
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.counters.iter().any(|c| c.load(Ordering::SeqCst) > 0)
    }

    /// Like [`ActiveWorkRegistry::begin`], but returns a guard that owns an `Arc`
    /// handle to the registry instead of borrowing it. Needed wherever the guard must
    /// outlive the call that created it — e.g. held inside an event-handler closure
    /// registered with the reactor until a connection attempt resolves.
    pub fn begin_owned(self: &Arc<Self>, subsystem: Subsystem) -> ActiveWorkGuardOwned {
        self.counters[index_of(subsystem)].fetch_add(1, Ordering::SeqCst);
        ActiveWorkGuardOwned { registry: Arc::clone(self), subsystem, released: false }
    }
}

/// Owned counterpart to [`ActiveWorkGuard`]; see [`ActiveWorkRegistry::begin_owned`].
#[must_use = "dropping this guard immediately ends the active-work period"]
pub struct ActiveWorkGuardOwned {
    registry: Arc<ActiveWorkRegistry>,
    subsystem: Subsystem,
    released: bool,
}

impl ActiveWorkGuardOwned {
    pub fn release(mut self) { self.do_release(); }

    fn do_release(&mut self) {
        if !self.released {
            self.registry.decrement(self.subsystem);
            self.released = true;
        }
    }
}

impl Drop for ActiveWorkGuardOwned {
    fn drop(&mut self) { self.do_release(); }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_and_drop_balances_the_counter() {
        let registry = ActiveWorkRegistry::new();
        assert!(!registry.has_pending());
        {
            let _guard = registry.begin(Subsystem::Tcp);
            assert_eq!(registry.count(Subsystem::Tcp), 1);
            assert!(registry.has_pending());
        }
        assert_eq!(registry.count(Subsystem::Tcp), 0);
        assert!(!registry.has_pending());
    }

    #[test]
    fn explicit_release_decrements_once() {
        let registry = ActiveWorkRegistry::new();
        let guard = registry.begin(Subsystem::Udp);
        guard.release();
        assert_eq!(registry.count(Subsystem::Udp), 0);
    }

    #[test]
    fn independent_subsystems_do_not_interfere() {
        let registry = ActiveWorkRegistry::new();
        let _a = registry.begin(Subsystem::Tcp);
        let _b = registry.begin(Subsystem::Ipc);
        assert_eq!(registry.count(Subsystem::Tcp), 1);
        assert_eq!(registry.count(Subsystem::Udp), 0);
        assert!(registry.has_pending());
    }
}
