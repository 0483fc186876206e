//! Builtin-module facades exposing the §6 external interface as plain Rust functions
//! and handle types.
//!
//! The value representation in [`crate::evaluator`] has no function or object variant,
//! so these modules cannot hand script code a literal `timers` or `tcp` dictionary the
//! way a Node-style host would. Instead each submodule exposes the operation set the
//! spec names under one script-visible namespace, grounded directly on the
//! corresponding core/stream/fs module; an embedder's FFI/builtin-installer binds these
//! Rust functions to the script names it registers at startup.
//!
//! [`Modules`] is the shared context every facade closes over — the reactor, the timer
//! table, the active-work registry, and the lazily-started stdin reader, constructed
//! once per [`crate::runtime::Runtime`].

use std::sync::Arc;
use std::time::Duration;

use crate::core::active_work::ActiveWorkRegistry;
use crate::core::reactor::Reactor;
use crate::stdin::StdinReader;
use crate::timers::TimerTable;

pub mod fs;
pub mod ipc;
pub mod net;
pub mod reactor;
pub mod stdin;
pub mod tcp;
pub mod timers;
pub mod udp;
pub mod unix;

/// How long the fallback (reactor-less) timer thread sleeps between cancellation
/// checks. Matches §4.3's tolerance for bounded-slice responsiveness.
const DEFAULT_FALLBACK_TIMER_SLICE: Duration = Duration::from_millis(50);

/// Shared state for every builtin facade. One instance per running interpreter.
pub struct Modules {
    pub reactor: Arc<Reactor>,
    pub timers: Arc<TimerTable>,
    pub active_work: Arc<ActiveWorkRegistry>,
    pub stdin: Arc<StdinReader>,
    fallback_timer_slice: Duration,
}

impl Modules {
    #[must_use]
    pub fn new(reactor: Arc<Reactor>) -> Self {
        let active_work = Arc::new(ActiveWorkRegistry::new());
        Self {
            reactor,
            timers: Arc::new(TimerTable::new()),
            stdin: Arc::new(StdinReader::new(Arc::clone(&active_work))),
            active_work,
            fallback_timer_slice: DEFAULT_FALLBACK_TIMER_SLICE,
        }
    }

    #[must_use]
    pub fn fallback_timer_slice(&self) -> Duration { self.fallback_timer_slice }
}
