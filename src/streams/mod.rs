//! The stream/socket lifecycle shared by TCP, UDP, Unix-domain, IPC, and WebSocket
//! (§4.5). This module holds the state machine and bookkeeping every protocol module
//! wraps around its own socket type; the protocol modules own the actual I/O.

pub mod ipc;
pub mod tcp;
pub mod udp;
pub mod unix;
pub mod websocket;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::core::bridge::{self, CallbackPayload};
use crate::evaluator::{CallbackHandle, Value};

/// High-water mark for `writableNeedsDrain()` (§4.5).
pub const HIGH_WATER_MARK_BYTES: usize = 16 * 1024;

/// UDP's hard payload ceiling and the threshold above which a warning is emitted
/// (§4.5, per-protocol specifics).
pub const UDP_MAX_PAYLOAD_BYTES: usize = 65_507;
pub const UDP_WARN_PAYLOAD_BYTES: usize = 1472;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Initial,
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Pending write bytes, the drain callback list, and per-write completion callbacks,
/// common to every protocol that can back-pressure (§4.5 "Writing", "Back-pressure").
///
/// Per-write completion is tracked separately from the drain list: `on_drain` fires
/// once the whole queue empties (back-pressure relief), while a `write()` call's own
/// `on_complete` must fire as soon as *that write's* bytes have gone out, which can
/// happen well before a later overlapping write finishes (§8 properties 9-10).
#[derive(Default)]
pub struct WriteQueue {
    pending_bytes: AtomicUsize,
    bytes_submitted_total: AtomicUsize,
    bytes_written_total: AtomicUsize,
    drain_callbacks: Mutex<VecDeque<CallbackHandle>>,
    write_completions: Mutex<VecDeque<(usize, CallbackHandle)>>,
}

impl WriteQueue {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Registers `len` bytes as submitted and returns the cumulative byte count (since
    /// this queue's creation) that must be written for this specific write to count as
    /// complete.
    pub fn begin_write(&self, len: usize) -> usize {
        self.pending_bytes.fetch_add(len, Ordering::SeqCst);
        self.bytes_submitted_total.fetch_add(len, Ordering::SeqCst) + len
    }

    /// Registers `cb` to fire once cumulative written bytes reach `threshold` (the
    /// value `begin_write` returned for this write), independent of later writes.
    pub fn on_write_complete(&self, threshold: usize, cb: CallbackHandle) {
        if self.bytes_written_total.load(Ordering::SeqCst) >= threshold {
            bridge::run_on_loop(move || {
                bridge::enqueue_callback_global(CallbackPayload::new(cb, vec![]));
            });
        } else {
            self.write_completions.lock().unwrap().push_back((threshold, cb));
        }
    }

    /// Called after flushing `len` bytes to the socket. Fires any write-completion
    /// callbacks whose threshold has now been reached, and drains and delivers queued
    /// drain callbacks once pending bytes reaches zero.
    pub fn complete_write(&self, len: usize) {
        let prev = self.pending_bytes.fetch_sub(len, Ordering::SeqCst);
        self.bytes_written_total.fetch_add(len, Ordering::SeqCst);
        self.fire_ready_write_completions();
        if prev == len {
            self.drain();
        }
    }

    fn fire_ready_write_completions(&self) {
        let written = self.bytes_written_total.load(Ordering::SeqCst);
        let ready: Vec<CallbackHandle> = {
            let mut queue = self.write_completions.lock().unwrap();
            let mut ready = Vec::new();
            while let Some((threshold, _)) = queue.front() {
                if *threshold > written {
                    break;
                }
                ready.push(queue.pop_front().unwrap().1);
            }
            ready
        };
        for cb in ready {
            bridge::run_on_loop(move || {
                bridge::enqueue_callback_global(CallbackPayload::new(cb, vec![]));
            });
        }
    }

    fn drain(&self) {
        let callbacks: Vec<CallbackHandle> = {
            let mut queue = self.drain_callbacks.lock().unwrap();
            queue.drain(..).collect()
        };
        for cb in callbacks {
            bridge::run_on_loop(move || {
                bridge::enqueue_callback_global(CallbackPayload::new(cb, vec![]));
            });
        }
    }

    #[must_use]
    pub fn pending_bytes(&self) -> usize { self.pending_bytes.load(Ordering::SeqCst) }

    #[must_use]
    pub fn needs_drain(&self) -> bool { self.pending_bytes() > HIGH_WATER_MARK_BYTES }

    pub fn on_drain(&self, cb: CallbackHandle) {
        if self.pending_bytes() == 0 {
            bridge::run_on_loop(move || {
                bridge::enqueue_callback_global(CallbackPayload::new(cb, vec![]));
            });
        } else {
            self.drain_callbacks.lock().unwrap().push_back(cb);
        }
    }

    /// Fails every still-pending write-completion and drain callback, in FIFO order, so
    /// none are silently dropped when the socket closes mid-write (§8 property 9).
    pub fn fail_pending(&self, reason: impl Into<String> + Clone) {
        let completions: Vec<CallbackHandle> =
            self.write_completions.lock().unwrap().drain(..).map(|(_, cb)| cb).collect();
        let drains: Vec<CallbackHandle> = self.drain_callbacks.lock().unwrap().drain(..).collect();
        for cb in completions.into_iter().chain(drains) {
            deliver_error(cb, reason.clone());
        }
    }
}

/// Idempotent close flag shared by every protocol's handle (§4.5 "Close idempotence").
#[derive(Default)]
pub struct CloseFlag(AtomicBool);

impl CloseFlag {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Returns `true` exactly once — the first caller wins and is responsible for
    /// driving the reactor-close sequence; every later caller gets `false` and must
    /// not repeat that work.
    #[must_use]
    pub fn close_once(&self) -> bool { !self.0.swap(true, Ordering::SeqCst) }

    #[must_use]
    pub fn is_closed(&self) -> bool { self.0.load(Ordering::SeqCst) }
}

/// Delivers a `data` event: a `Buffer` value to the registered handler.
pub fn deliver_data(handler: CallbackHandle, chunk: Vec<u8>) {
    bridge::run_on_loop(move || {
        bridge::enqueue_callback_global(CallbackPayload::new(handler, vec![Value::Buffer(chunk)]));
    });
}

/// Delivers a zero-argument event (`close`, `connect`, `end`, ...).
pub fn deliver_event(handler: CallbackHandle) {
    bridge::run_on_loop(move || {
        bridge::enqueue_callback_global(CallbackPayload::new(handler, vec![]));
    });
}

/// Delivers an `error` event carrying a descriptive reason.
pub fn deliver_error(handler: CallbackHandle, message: impl Into<String>) {
    let message = message.into();
    bridge::run_on_loop(move || {
        bridge::enqueue_callback_global(CallbackPayload::new(handler, vec![Value::Error(message.clone())]));
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_flag_yields_true_only_on_first_call() {
        let flag = CloseFlag::new();
        assert!(flag.close_once());
        assert!(!flag.close_once());
        assert!(flag.is_closed());
    }

    #[test]
    fn write_queue_reports_drain_threshold() {
        let queue = WriteQueue::new();
        queue.begin_write(HIGH_WATER_MARK_BYTES + 1);
        assert!(queue.needs_drain());
        queue.complete_write(HIGH_WATER_MARK_BYTES + 1);
        assert!(!queue.needs_drain());
        assert_eq!(queue.pending_bytes(), 0);
    }
}
