//! The top-level `Runtime`: wires the scheduler, the cross-thread bridge, the reactor,
//! and the builtin-module context together, and exposes the §4.8 event-loop entry
//! point an embedder calls after evaluating top-level script code.

use std::sync::Arc;

use crate::core::bridge;
use crate::core::reactor::Reactor;
use crate::core::scheduler::Scheduler;
use crate::evaluator::EvaluatorHost;
use crate::modules::Modules;

/// Owns every long-lived piece of the async substrate. One instance per running
/// interpreter process.
pub struct Runtime {
    pub scheduler: Arc<Scheduler>,
    pub reactor: Arc<Reactor>,
    pub modules: Modules,
}

impl Runtime {
    /// Starts the reactor's loop thread, registers the bridge singleton with the given
    /// evaluator host, and returns the assembled runtime. There is exactly one of these
    /// per process; a second call replaces the previous bridge registration (matching
    /// [`bridge::register`]'s documented re-registration semantics, used by tests that
    /// spin up more than one runtime in a process).
    pub fn start(host: Arc<dyn EvaluatorHost>) -> std::io::Result<Self> {
        let reactor = Reactor::start("swazi-reactor")?;
        let scheduler = Arc::new(Scheduler::new());
        bridge::register(Arc::clone(&scheduler), reactor.submitter(), Arc::new(move |payload| {
            if let Some(callback) = &payload.callback {
                host.invoke_function(callback, &payload.args);
            }
        }));
        let modules = Modules::new(Arc::clone(&reactor));
        Ok(Self { scheduler, reactor, modules })
    }

    /// The idle predicate (§4.8): the loop keeps running as long as any timer is live,
    /// any stream subsystem has an outstanding connection/operation, or the stdin
    /// reader hasn't reached EOF/close. Runs until both task queues are empty and this
    /// predicate is false, or until [`Scheduler::stop`] is called.
    pub fn run_event_loop(&self) {
        let modules = &self.modules;
        let predicate: &(dyn Fn() -> bool + Send + Sync) = &|| {
            !modules.timers.is_empty() || modules.active_work.has_pending()
        };
        self.scheduler.run_until_idle(Some(predicate));
    }

    /// Stops the scheduler and shuts down the reactor's loop thread. Blocking; intended
    /// for orderly process exit.
    pub fn shutdown(&self) {
        self.scheduler.stop();
        self.reactor.shutdown();
        bridge::unregister();
    }
}
