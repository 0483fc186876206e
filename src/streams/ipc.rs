//! IPC named pipes (FIFOs) (§4.5, per-protocol specifics: IPC named pipe).
//!
//! The pipe's filesystem node is created with `mkfifo` if it doesn't already exist
//! (grounded on `nix`'s POSIX bindings, the same crate family mayastor uses for raw
//! syscalls the standard library doesn't expose). Opening and registering the file
//! descriptor with the reactor happens asynchronously on the loop thread; writes
//! issued before that completes are buffered and flushed in FIFO order once the pipe
//! is ready.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use mio::unix::SourceFd;
use mio::{Interest, Token};
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;

use crate::core::reactor::Reactor;
use crate::evaluator::CallbackHandle;

use super::{deliver_data, deliver_error, deliver_event, CloseFlag};

const READ_CHUNK_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeMode {
    Read,
    Write,
}

#[derive(Default)]
struct Handlers {
    on_data: Mutex<Option<CallbackHandle>>,
    on_error: Mutex<Option<CallbackHandle>>,
    on_close: Mutex<Option<CallbackHandle>>,
}

pub struct IpcPipe {
    reactor: Arc<Reactor>,
    mode: PipeMode,
    file: Mutex<Option<std::fs::File>>,
    token: Mutex<Option<Token>>,
    ready: AtomicBool,
    pending_writes: Mutex<VecDeque<Vec<u8>>>,
    close_flag: CloseFlag,
    handlers: Handlers,
}

impl IpcPipe {
    /// Opens `path` in `mode`, creating the FIFO node if absent. Returns immediately;
    /// the actual open/registration happens on the loop thread.
    pub fn open(
        reactor: &Arc<Reactor>,
        path: impl AsRef<Path>,
        mode: PipeMode,
        on_ready: Option<CallbackHandle>,
        on_error: Option<CallbackHandle>,
    ) -> Arc<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let pipe = Arc::new(Self {
            reactor: Arc::clone(reactor),
            mode,
            file: Mutex::new(None),
            token: Mutex::new(None),
            ready: AtomicBool::new(false),
            pending_writes: Mutex::new(VecDeque::new()),
            close_flag: CloseFlag::new(),
            handlers: Handlers { on_error: Mutex::new(on_error), ..Default::default() },
        });

        let pipe_for_loop = Arc::clone(&pipe);
        crate::core::bridge::run_on_loop(move || {
            if !path.exists() {
                if let Err(e) = mkfifo(&path, Mode::from_bits_truncate(0o600)) {
                    if let Some(cb) = pipe_for_loop.handlers.on_error.lock().unwrap().clone() {
                        deliver_error(cb, format!("mkfifo failed: {e}"));
                    }
                    return;
                }
            }

            let mut options = std::fs::OpenOptions::new();
            options.custom_flags(nix::libc::O_NONBLOCK);
            match mode {
                PipeMode::Read => { options.read(true); }
                PipeMode::Write => { options.write(true); }
            }

            match options.open(&path) {
                Ok(file) => {
                    pipe_for_loop.register(file);
                    pipe_for_loop.ready.store(true, Ordering::SeqCst);
                    if let Some(cb) = on_ready {
                        deliver_event(cb);
                    }
                    pipe_for_loop.flush_pending();
                }
                Err(e) => {
                    if let Some(cb) = pipe_for_loop.handlers.on_error.lock().unwrap().clone() {
                        deliver_error(cb, format!("ipc pipe open failed: {e}"));
                    }
                }
            }
        });
        pipe
    }

    fn register(self: &Arc<Self>, file: std::fs::File) {
        let interest = match self.mode {
            PipeMode::Read => Interest::READABLE,
            PipeMode::Write => Interest::WRITABLE,
        };
        let pipe = Arc::clone(self);
        let handler: Arc<dyn Fn(&mio::event::Event) + Send + Sync> = Arc::new(move |event| {
            if event.is_readable() {
                pipe.on_readable();
            }
            if event.is_writable() {
                pipe.flush_pending();
            }
        });
        let fd = file.as_raw_fd();
        let mut source = SourceFd(&fd);
        let token = self.reactor.register_source(&mut source, interest, handler).expect("register ipc pipe fd");
        *self.token.lock().unwrap() = Some(token);
        *self.file.lock().unwrap() = Some(file);
    }

    fn on_readable(&self) {
        let mut buf = [0u8; READ_CHUNK_BYTES];
        loop {
            let mut guard = self.file.lock().unwrap();
            let Some(file) = guard.as_mut() else { return };
            match file.read(&mut buf) {
                Ok(0) => {
                    drop(guard);
                    if let Some(cb) = self.handlers.on_close.lock().unwrap().clone() {
                        deliver_event(cb);
                    }
                    return;
                }
                Ok(n) => {
                    let chunk = buf[..n].to_vec();
                    drop(guard);
                    if let Some(cb) = self.handlers.on_data.lock().unwrap().clone() {
                        deliver_data(cb, chunk);
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) => {
                    drop(guard);
                    if let Some(cb) = self.handlers.on_error.lock().unwrap().clone() {
                        deliver_error(cb, format!("ipc pipe read error: {e}"));
                    }
                    return;
                }
            }
        }
    }

    fn flush_pending(&self) {
        loop {
            let next = self.pending_writes.lock().unwrap().pop_front();
            let Some(chunk) = next else { return };
            let mut guard = self.file.lock().unwrap();
            let Some(file) = guard.as_mut() else {
                drop(guard);
                self.pending_writes.lock().unwrap().push_front(chunk);
                return;
            };
            match file.write(&chunk) {
                Ok(n) if n == chunk.len() => {}
                Ok(n) => {
                    drop(guard);
                    self.pending_writes.lock().unwrap().push_front(chunk[n..].to_vec());
                    return;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    drop(guard);
                    self.pending_writes.lock().unwrap().push_front(chunk);
                    return;
                }
                Err(e) => {
                    drop(guard);
                    if let Some(cb) = self.handlers.on_error.lock().unwrap().clone() {
                        deliver_error(cb, format!("ipc pipe write error: {e}"));
                    }
                    return;
                }
            }
        }
    }

    pub fn on(&self, event: &str, cb: CallbackHandle) {
        match event {
            "data" => *self.handlers.on_data.lock().unwrap() = Some(cb),
            "error" => *self.handlers.on_error.lock().unwrap() = Some(cb),
            "close" => *self.handlers.on_close.lock().unwrap() = Some(cb),
            _ => tracing::warn!(event, "ipc pipe: unrecognized event name"),
        }
    }

    /// Queues `data`. Buffered and flushed in FIFO order once the pipe's fd is ready
    /// (§4.5 "IPC named pipe").
    pub fn write(self: &Arc<Self>, data: Vec<u8>) {
        debug_assert_eq!(self.mode, PipeMode::Write, "write() called on a read-mode ipc pipe");
        self.pending_writes.lock().unwrap().push_back(data);
        if self.ready.load(Ordering::SeqCst) {
            let pipe = Arc::clone(self);
            crate::core::bridge::run_on_loop(move || pipe.flush_pending());
        }
    }

    pub fn close(self: &Arc<Self>) {
        if !self.close_flag.close_once() {
            return;
        }
        let pipe = Arc::clone(self);
        crate::core::bridge::run_on_loop(move || {
            let token = pipe.token.lock().unwrap().take();
            let mut file = pipe.file.lock().unwrap().take();
            if let (Some(token), Some(file)) = (token, file.as_mut()) {
                let fd = file.as_raw_fd();
                let mut source = SourceFd(&fd);
                let _ = pipe.reactor.deregister_source(&mut source, token);
            }
            if let Some(cb) = pipe.handlers.on_close.lock().unwrap().clone() {
                deliver_event(cb);
            }
        });
    }
}
