//! Unix-domain sockets (§4.5, per-protocol specifics: Unix-domain). Same lifecycle
//! shape as TCP, addressed by filesystem path instead of host/port.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use mio::net::{UnixListener as MioUnixListener, UnixStream as MioUnixStream};
use mio::{Interest, Token};

use crate::core::active_work::{ActiveWorkGuardOwned, ActiveWorkRegistry, Subsystem};
use crate::core::reactor::Reactor;
use crate::evaluator::CallbackHandle;

use super::{deliver_data, deliver_error, deliver_event, CloseFlag, StreamState, WriteQueue};

const READ_CHUNK_BYTES: usize = 64 * 1024;

#[derive(Default)]
struct Handlers {
    on_data: Mutex<Option<CallbackHandle>>,
    on_close: Mutex<Option<CallbackHandle>>,
    on_error: Mutex<Option<CallbackHandle>>,
    on_connect: Mutex<Option<CallbackHandle>>,
}

pub struct UnixSocket {
    reactor: Arc<Reactor>,
    stream: Mutex<MioUnixStream>,
    token: Mutex<Option<Token>>,
    state: Mutex<StreamState>,
    close_flag: CloseFlag,
    write_queue: WriteQueue,
    write_buffer: Mutex<VecDeque<u8>>,
    reading: AtomicBool,
    handlers: Handlers,
}

impl UnixSocket {
    fn wrap(reactor: &Arc<Reactor>, stream: MioUnixStream, state: StreamState) -> Arc<Self> {
        Arc::new(Self {
            reactor: Arc::clone(reactor),
            stream: Mutex::new(stream),
            token: Mutex::new(None),
            state: Mutex::new(state),
            close_flag: CloseFlag::new(),
            write_queue: WriteQueue::new(),
            write_buffer: Mutex::new(VecDeque::new()),
            reading: AtomicBool::new(false),
            handlers: Handlers::default(),
        })
    }

    pub fn connect(
        reactor: &Arc<Reactor>,
        active_work: &Arc<ActiveWorkRegistry>,
        path: impl AsRef<Path>,
        on_connect: CallbackHandle,
        on_error: CallbackHandle,
    ) {
        let reactor = Arc::clone(reactor);
        let active_work = Arc::clone(active_work);
        let path = path.as_ref().to_path_buf();
        crate::core::bridge::run_on_loop(move || {
            let guard = active_work.begin_owned(Subsystem::Unix);
            match MioUnixStream::connect(&path) {
                Ok(stream) => {
                    let socket = Self::wrap(&reactor, stream, StreamState::Connecting);
                    *socket.handlers.on_connect.lock().unwrap() = Some(on_connect);
                    *socket.handlers.on_error.lock().unwrap() = Some(on_error);
                    socket.register_for_connect(guard);
                }
                Err(e) => {
                    drop(guard);
                    deliver_error(on_error, format!("unix connect failed: {e}"));
                }
            }
        });
    }

    fn register_for_connect(self: &Arc<Self>, guard: ActiveWorkGuardOwned) {
        let socket = Arc::clone(self);
        let guard = Mutex::new(Some(guard));
        let handler: Arc<dyn Fn(&mio::event::Event) + Send + Sync> = Arc::new(move |_event| {
            let result = socket.stream.lock().unwrap().take_error();
            let _taken = guard.lock().unwrap().take();
            match result {
                Ok(None) => {
                    *socket.state.lock().unwrap() = StreamState::Open;
                    if let Some(cb) = socket.handlers.on_connect.lock().unwrap().clone() {
                        deliver_event(cb);
                    }
                    socket.start_reading_if_needed();
                }
                Ok(Some(e)) | Err(e) => {
                    *socket.state.lock().unwrap() = StreamState::Closed;
                    if let Some(cb) = socket.handlers.on_error.lock().unwrap().clone() {
                        deliver_error(cb, format!("unix connect failed: {e}"));
                    }
                }
            }
        });
        let token = {
            let mut stream = self.stream.lock().unwrap();
            self.reactor.register_source(&mut *stream, Interest::WRITABLE, handler).expect("register connecting socket")
        };
        *self.token.lock().unwrap() = Some(token);
    }

    pub fn start_reading_if_needed(self: &Arc<Self>) {
        if self.reading.swap(true, Ordering::SeqCst) {
            return;
        }
        let socket = Arc::clone(self);
        let reactor = Arc::clone(&self.reactor);
        let handler: Arc<dyn Fn(&mio::event::Event) + Send + Sync> = Arc::new(move |event| {
            if event.is_readable() {
                socket.on_readable();
            }
            if event.is_writable() {
                socket.flush_write_buffer();
            }
        });
        let old_token = self.token.lock().unwrap().take();
        let mut stream = self.stream.lock().unwrap();
        if let Some(old_token) = old_token {
            let _ = reactor.deregister_source(&mut *stream, old_token);
        }
        let new_token = reactor.register_source(&mut *stream, Interest::READABLE, handler).expect("register for reading");
        drop(stream);
        *self.token.lock().unwrap() = Some(new_token);
    }

    fn on_readable(self: &Arc<Self>) {
        if !self.reading.load(Ordering::SeqCst) {
            return;
        }
        let mut buf = [0u8; READ_CHUNK_BYTES];
        loop {
            match self.stream.lock().unwrap().read(&mut buf) {
                Ok(0) => {
                    self.reading.store(false, Ordering::SeqCst);
                    *self.state.lock().unwrap() = StreamState::Closing;
                    if let Some(cb) = self.handlers.on_close.lock().unwrap().clone() {
                        deliver_event(cb);
                    }
                    return;
                }
                Ok(n) => {
                    if let Some(cb) = self.handlers.on_data.lock().unwrap().clone() {
                        deliver_data(cb, buf[..n].to_vec());
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) => {
                    self.reading.store(false, Ordering::SeqCst);
                    if let Some(cb) = self.handlers.on_error.lock().unwrap().clone() {
                        deliver_error(cb, format!("unix read error: {e}"));
                    }
                    self.close();
                    return;
                }
            }
        }
    }

    pub fn on(&self, event: &str, cb: CallbackHandle) {
        match event {
            "data" => *self.handlers.on_data.lock().unwrap() = Some(cb),
            "close" => *self.handlers.on_close.lock().unwrap() = Some(cb),
            "error" => *self.handlers.on_error.lock().unwrap() = Some(cb),
            "connect" => *self.handlers.on_connect.lock().unwrap() = Some(cb),
            _ => tracing::warn!(event, "unix socket: unrecognized event name"),
        }
    }

    /// `on_complete` fires once this specific write's bytes have gone out, tracked
    /// independently of any other write queued before or after it (§4.5 "Writing").
    pub fn write(self: &Arc<Self>, data: Vec<u8>, on_complete: Option<CallbackHandle>) {
        let threshold = self.write_queue.begin_write(data.len());
        self.write_buffer.lock().unwrap().extend(data);
        if let Some(cb) = on_complete {
            self.write_queue.on_write_complete(threshold, cb);
        }
        self.flush_write_buffer();
    }

    fn flush_write_buffer(self: &Arc<Self>) {
        let flushed_len = {
            let mut buffer = self.write_buffer.lock().unwrap();
            if buffer.is_empty() {
                0
            } else {
                let (front, _) = buffer.as_slices();
                let contiguous: Vec<u8> = front.to_vec();
                match self.stream.lock().unwrap().write(&contiguous) {
                    Ok(n) => {
                        buffer.drain(..n);
                        n
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => 0,
                    Err(e) => {
                        if let Some(cb) = self.handlers.on_error.lock().unwrap().clone() {
                            deliver_error(cb, format!("unix write error: {e}"));
                        }
                        0
                    }
                }
            }
        };
        if flushed_len > 0 {
            self.write_queue.complete_write(flushed_len);
        }
        if !self.write_buffer.lock().unwrap().is_empty() {
            let token = *self.token.lock().unwrap();
            if let Some(token) = token {
                let mut stream = self.stream.lock().unwrap();
                let _ = self.reactor.reregister_source(&mut *stream, token, Interest::READABLE | Interest::WRITABLE);
            }
        }
    }

    #[must_use]
    pub fn writable_needs_drain(&self) -> bool { self.write_queue.needs_drain() }

    pub fn pause(&self) { self.reading.store(false, Ordering::SeqCst); }

    pub fn resume(self: &Arc<Self>) {
        self.reading.store(false, Ordering::SeqCst);
        self.start_reading_if_needed();
    }

    /// Idempotent close. Fails any write-completion or drain callback still waiting on
    /// unflushed bytes rather than dropping it silently (§8 property 9).
    pub fn close(self: &Arc<Self>) {
        if !self.close_flag.close_once() {
            return;
        }
        *self.state.lock().unwrap() = StreamState::Closing;
        self.write_queue.fail_pending("unix socket closed before pending write completed".to_string());
        let socket = Arc::clone(self);
        crate::core::bridge::run_on_loop(move || {
            let token = socket.token.lock().unwrap().take();
            if let Some(token) = token {
                let mut stream = socket.stream.lock().unwrap();
                let _ = socket.reactor.deregister_source(&mut *stream, token);
            }
            *socket.state.lock().unwrap() = StreamState::Closed;
            if let Some(cb) = socket.handlers.on_close.lock().unwrap().clone() {
                deliver_event(cb);
            }
        });
    }
}

/// A listening Unix-domain server. The socket file is removed from the filesystem on
/// close and its permissions are set to `0666` after bind (§4.5).
pub struct UnixServer {
    reactor: Arc<Reactor>,
    listener: Mutex<Option<MioUnixListener>>,
    token: Mutex<Option<Token>>,
    on_connection: Mutex<Option<CallbackHandle>>,
    path: PathBuf,
}

impl UnixServer {
    pub fn listen(
        reactor: &Arc<Reactor>,
        path: impl AsRef<Path>,
        on_connection: CallbackHandle,
        on_listening: Option<CallbackHandle>,
        on_error: Option<CallbackHandle>,
    ) -> Arc<Self> {
        let path = path.as_ref().to_path_buf();
        let server = Arc::new(Self {
            reactor: Arc::clone(reactor),
            listener: Mutex::new(None),
            token: Mutex::new(None),
            on_connection: Mutex::new(Some(on_connection)),
            path: path.clone(),
        });
        let server_for_loop = Arc::clone(&server);
        crate::core::bridge::run_on_loop(move || {
            match MioUnixListener::bind(&path) {
                Ok(mut listener) => {
                    #[cfg(unix)]
                    {
                        use std::os::unix::fs::PermissionsExt;
                        if let Err(e) = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o666)) {
                            tracing::warn!(error = %e, "failed to set unix socket permissions to 0666");
                        }
                    }
                    let handler_server = Arc::clone(&server_for_loop);
                    let handler: Arc<dyn Fn(&mio::event::Event) + Send + Sync> =
                        Arc::new(move |_event| handler_server.accept_all());
                    let token = server_for_loop
                        .reactor
                        .register_source(&mut listener, Interest::READABLE, handler)
                        .expect("register unix listener");
                    *server_for_loop.token.lock().unwrap() = Some(token);
                    *server_for_loop.listener.lock().unwrap() = Some(listener);
                    if let Some(cb) = on_listening {
                        deliver_event(cb);
                    }
                }
                Err(e) => {
                    if let Some(cb) = on_error {
                        deliver_error(cb, format!("unix listen failed: {e}"));
                    }
                }
            }
        });
        server
    }

    fn accept_all(self: &Arc<Self>) {
        loop {
            let accepted = {
                let listener = self.listener.lock().unwrap();
                match listener.as_ref() {
                    Some(listener) => listener.accept(),
                    None => return,
                }
            };
            match accepted {
                Ok((stream, _addr)) => {
                    let socket = UnixSocket::wrap(&self.reactor, stream, StreamState::Open);
                    if let Some(cb) = self.on_connection.lock().unwrap().clone() {
                        deliver_event(cb);
                    }
                    socket.start_reading_if_needed();
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) => {
                    tracing::warn!(error = %e, "unix accept failed");
                    return;
                }
            }
        }
    }

    pub fn close(self: &Arc<Self>) {
        let server = Arc::clone(self);
        crate::core::bridge::run_on_loop(move || {
            let token = server.token.lock().unwrap().take();
            let mut listener = server.listener.lock().unwrap().take();
            if let (Some(token), Some(listener)) = (token, listener.as_mut()) {
                let _ = server.reactor.deregister_source(listener, token);
            }
            if let Err(e) = std::fs::remove_file(&server.path) {
                if e.kind() != ErrorKind::NotFound {
                    tracing::warn!(error = %e, path = %server.path.display(), "failed to remove unix socket file on close");
                }
            }
        });
    }
}
