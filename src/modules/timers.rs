//! `timers.*` (§6): `setTimeout`, `clearTimeout`, `setInterval`, `clearInterval`,
//! `nap`, `queueMicrotask`, `queueMacrotask`.
//!
//! Thin unit-converting wrappers over [`crate::timers`] (millisecond `f64` delays, the
//! shape script arithmetic naturally produces, in place of the core's `Duration`) and
//! over the bridge's microtask/macrotask enqueue for the two `queue*` helpers, which
//! have no per-timer identity to track.

use std::sync::Arc;
use std::time::Duration;

use crate::core::bridge::{self, CallbackPayload};
use crate::core::reactor::TimerId;
use crate::evaluator::{CallbackHandle, Value};
use crate::promise::Promise;
use crate::timers;

use super::Modules;

fn millis_to_duration(delay_ms: f64) -> Duration {
    Duration::from_secs_f64(delay_ms.max(0.0) / 1000.0)
}

#[must_use]
pub fn set_timeout(modules: &Modules, delay_ms: f64, callback: CallbackHandle, args: Vec<Value>) -> TimerId {
    timers::set_timeout(&modules.timers, Some(&modules.reactor), modules.fallback_timer_slice(), millis_to_duration(delay_ms), callback, args)
}

pub fn clear_timeout(modules: &Modules, id: TimerId) {
    timers::clear_timer(&modules.timers, Some(&modules.reactor), id);
}

#[must_use]
pub fn set_interval(modules: &Modules, period_ms: f64, callback: CallbackHandle, args: Vec<Value>) -> TimerId {
    timers::set_interval(&modules.timers, Some(&modules.reactor), modules.fallback_timer_slice(), millis_to_duration(period_ms), callback, args)
}

pub fn clear_interval(modules: &Modules, id: TimerId) {
    timers::clear_timer(&modules.timers, Some(&modules.reactor), id);
}

/// `nap(ms)`: a Promise that resolves after `ms` milliseconds (§4.3).
#[must_use]
pub fn nap(modules: &Modules, delay_ms: f64) -> Arc<Promise> {
    timers::nap(&modules.timers, Some(&modules.reactor), modules.fallback_timer_slice(), millis_to_duration(delay_ms))
}

/// Schedules `callback` on the microtask queue, ahead of any pending macrotask (§4.1).
pub fn queue_microtask(callback: CallbackHandle) {
    bridge::enqueue_microtask_global(CallbackPayload::new(callback, vec![]));
}

/// Schedules `callback` on the macrotask queue.
pub fn queue_macrotask(callback: CallbackHandle) {
    bridge::enqueue_callback_global(CallbackPayload::new(callback, vec![]));
}
