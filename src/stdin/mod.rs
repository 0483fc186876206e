//! The standard-input reader (§4.6). Reads stdin on a dedicated worker thread (stdin
//! has no portable non-blocking mode across platforms worth chasing here), dispatching
//! through the bridge like any other cross-thread producer. TTY mode switches use
//! `rustix`'s termios bindings, the same crate the teacher reaches for over hand-rolled
//! `libc` ioctl calls.

use std::io::Read;
use std::os::fd::{AsFd, BorrowedFd};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use rustix::termios::{self, LocalModes, Termios};

use crate::core::active_work::{ActiveWorkGuardOwned, ActiveWorkRegistry, Subsystem};
use crate::core::bridge::{self, CallbackPayload};
use crate::evaluator::{CallbackHandle, Value};

const STATE_UNINITIALIZED: u8 = 0;
const STATE_LISTENING: u8 = 1;
const STATE_PAUSED: u8 = 2;
const STATE_CLOSED: u8 = 3;

#[derive(Default)]
struct Handlers {
    on_data: Mutex<Option<CallbackHandle>>,
    on_eof: Mutex<Option<CallbackHandle>>,
    on_sigint: Mutex<Option<CallbackHandle>>,
}

/// The process's single stdin reader. Lazily initialized on first `on()` registration
/// (§4.6).
pub struct StdinReader {
    state: AtomicU8,
    raw_mode: AtomicBool,
    prompt: Mutex<Option<String>>,
    handlers: Handlers,
    saved_termios: Mutex<Option<Termios>>,
    active_work: Arc<ActiveWorkRegistry>,
    /// Held for the entire listening/paused lifetime, released at EOF or `close()`, so
    /// the event loop doesn't exit while a registered listener could still receive
    /// input (§4.6 "pause() ... installs a no-op keep-alive").
    keepalive: Mutex<Option<ActiveWorkGuardOwned>>,
}

impl StdinReader {
    #[must_use]
    pub fn new(active_work: Arc<ActiveWorkRegistry>) -> Self {
        Self {
            state: AtomicU8::new(STATE_UNINITIALIZED),
            raw_mode: AtomicBool::new(false),
            prompt: Mutex::new(None),
            handlers: Handlers::default(),
            saved_termios: Mutex::new(None),
            active_work,
            keepalive: Mutex::new(None),
        }
    }

    /// Registers a handler. Lazily starts the reader thread on the first call, per
    /// §4.6's "Initialization lazily happens when the first `on(...)` is registered".
    pub fn on(self: &Arc<Self>, event: &str, cb: CallbackHandle) {
        match event {
            "data" => *self.handlers.on_data.lock().unwrap() = Some(cb),
            "eof" => *self.handlers.on_eof.lock().unwrap() = Some(cb),
            "sigint" => *self.handlers.on_sigint.lock().unwrap() = Some(cb),
            _ => {
                tracing::warn!(event, "stdin reader: unrecognized event name");
                return;
            }
        }
        if self.state.compare_exchange(STATE_UNINITIALIZED, STATE_LISTENING, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
            *self.keepalive.lock().unwrap() = Some(self.active_work.begin_owned(Subsystem::Stdin));
            self.spawn_reader_thread();
        }
    }

    fn spawn_reader_thread(self: &Arc<Self>) {
        let reader = Arc::clone(self);
        std::thread::Builder::new()
            .name("swazi-stdin-reader".into())
            .spawn(move || reader.run())
            .expect("spawn stdin reader thread");
    }

    fn run(self: &Arc<Self>) {
        let stdin = std::io::stdin();
        let mut line_buffer = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            if self.state.load(Ordering::SeqCst) == STATE_CLOSED {
                return;
            }
            let n = match stdin.lock().read(&mut byte) {
                Ok(n) => n,
                Err(_) => return,
            };
            if n == 0 {
                self.deliver_eof();
                return;
            }
            if self.state.load(Ordering::SeqCst) == STATE_PAUSED {
                // Pausing installs a keep-alive, not a stopped subscription (§4.6); the
                // read loop keeps consuming bytes but drops them while paused, so a
                // resume doesn't replay what arrived in the meantime.
                continue;
            }

            let b = byte[0];
            self.deliver_data_byte(b);
            if self.raw_mode.load(Ordering::SeqCst) {
                match b {
                    0x03 => self.deliver_sigint(),
                    0x04 => self.deliver_eof(),
                    _ => {}
                }
            } else if b == b'\n' {
                let line = std::mem::take(&mut line_buffer);
                self.deliver_line(line);
            } else {
                line_buffer.push(b);
            }
        }
    }

    fn deliver_data_byte(&self, byte: u8) {
        if !self.raw_mode.load(Ordering::SeqCst) {
            return; // cooked mode dispatches whole lines, not individual bytes
        }
        // Raw mode always delivers the untouched byte, even when it happens to fall in
        // valid-UTF-8 range (e.g. Ctrl-C is 0x03) — it's raw terminal input, not text.
        let Some(cb) = self.handlers.on_data.lock().unwrap().clone() else { return };
        bridge::enqueue_callback_global(CallbackPayload::new(cb, vec![Value::Buffer(vec![byte])]));
    }

    fn deliver_line(&self, line: Vec<u8>) {
        let Some(cb) = self.handlers.on_data.lock().unwrap().clone() else { return };
        let value = match String::from_utf8(line) {
            Ok(text) => Value::Str(text),
            Err(e) => Value::Buffer(e.into_bytes()),
        };
        bridge::enqueue_callback_global(CallbackPayload::new(cb, vec![value]));
    }

    fn deliver_eof(&self) {
        self.state.store(STATE_CLOSED, Ordering::SeqCst);
        self.keepalive.lock().unwrap().take();
        if let Some(cb) = self.handlers.on_eof.lock().unwrap().clone() {
            bridge::enqueue_callback_global(CallbackPayload::new(cb, vec![]));
        }
    }

    fn deliver_sigint(&self) {
        if let Some(cb) = self.handlers.on_sigint.lock().unwrap().clone() {
            bridge::enqueue_callback_global(CallbackPayload::new(cb, vec![]));
        }
    }

    /// Stops dispatching bytes while keeping the loop alive (§4.6 "pause() ... installs
    /// a no-op keep-alive").
    pub fn pause(&self) {
        self.state.store(STATE_PAUSED, Ordering::SeqCst);
    }

    /// Re-enables dispatch. Bytes consumed while paused are not replayed; the prompt,
    /// if configured, is re-written once (not per line — see the design notes for why
    /// this implementation doesn't re-display per-line).
    pub fn resume(&self) {
        self.state.store(STATE_LISTENING, Ordering::SeqCst);
        if let Some(prompt) = self.prompt.lock().unwrap().as_ref() {
            print!("{prompt}");
            let _ = std::io::Write::flush(&mut std::io::stdout());
        }
    }

    pub fn set_prompt(&self, prompt: Option<String>) {
        *self.prompt.lock().unwrap() = prompt;
    }

    /// Toggles raw vs. cooked TTY mode via `rustix::termios`.
    pub fn set_raw_mode(&self, enable: bool) -> std::io::Result<()> {
        let stdin = std::io::stdin();
        let fd: BorrowedFd = stdin.as_fd();
        if enable {
            let original = termios::tcgetattr(fd)?;
            *self.saved_termios.lock().unwrap() = Some(original.clone());
            let mut raw = original;
            raw.local_modes.remove(LocalModes::ICANON | LocalModes::ECHO | LocalModes::ISIG);
            termios::tcsetattr(fd, termios::OptionalActions::Now, &raw)?;
        } else if let Some(original) = self.saved_termios.lock().unwrap().take() {
            termios::tcsetattr(fd, termios::OptionalActions::Now, &original)?;
        }
        self.raw_mode.store(enable, Ordering::SeqCst);
        Ok(())
    }

    /// Restores normal TTY mode, stops reads, and closes the handle (§4.6).
    pub fn close(&self) {
        let _ = self.set_raw_mode(false);
        self.state.store(STATE_CLOSED, Ordering::SeqCst);
        self.keepalive.lock().unwrap().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_then_resume_transitions_state_without_closing() {
        let reader = Arc::new(StdinReader::new(Arc::new(ActiveWorkRegistry::new())));
        reader.state.store(STATE_LISTENING, Ordering::SeqCst);
        reader.pause();
        assert_eq!(reader.state.load(Ordering::SeqCst), STATE_PAUSED);
        reader.resume();
        assert_eq!(reader.state.load(Ordering::SeqCst), STATE_LISTENING);
    }

    #[test]
    fn set_prompt_stores_and_clears() {
        let reader = StdinReader::new(Arc::new(ActiveWorkRegistry::new()));
        reader.set_prompt(Some("> ".to_string()));
        assert_eq!(reader.prompt.lock().unwrap().as_deref(), Some("> "));
        reader.set_prompt(None);
        assert!(reader.prompt.lock().unwrap().is_none());
    }
}
