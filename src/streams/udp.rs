//! UDP sockets (§4.5, per-protocol specifics: UDP).

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use mio::net::UdpSocket as MioUdpSocket;
use mio::{Interest, Token};

use crate::core::reactor::Reactor;
use crate::evaluator::{CallbackHandle, Value};

use super::{deliver_error, deliver_event, CloseFlag, UDP_MAX_PAYLOAD_BYTES, UDP_WARN_PAYLOAD_BYTES};

#[derive(Default)]
struct Handlers {
    on_message: Mutex<Option<CallbackHandle>>,
    on_error: Mutex<Option<CallbackHandle>>,
    on_close: Mutex<Option<CallbackHandle>>,
}

/// A bound UDP socket. Connectionless: every datagram carries its own peer address
/// (§4.5).
pub struct UdpHandle {
    reactor: Arc<Reactor>,
    socket: Mutex<MioUdpSocket>,
    token: Mutex<Option<Token>>,
    close_flag: CloseFlag,
    handlers: Handlers,
    local_addr: SocketAddr,
}

impl UdpHandle {
    /// `bind(port, address)`: binds on the loop thread and begins listening for
    /// incoming datagrams immediately (UDP sockets have no separate "start reading"
    /// phase — every bound socket can always receive).
    pub fn bind(
        reactor: &Arc<Reactor>,
        address: std::net::IpAddr,
        port: u16,
        on_error: Option<CallbackHandle>,
    ) -> Result<Arc<Self>, std::io::Error> {
        let addr = SocketAddr::new(address, port);
        let socket = MioUdpSocket::bind(addr)?;
        let local_addr = socket.local_addr()?;
        let handle = Arc::new(Self {
            reactor: Arc::clone(reactor),
            socket: Mutex::new(socket),
            token: Mutex::new(None),
            close_flag: CloseFlag::new(),
            handlers: Handlers { on_error: Mutex::new(on_error), ..Default::default() },
            local_addr,
        });
        let handle_for_register = Arc::clone(&handle);
        let reactor = Arc::clone(reactor);
        crate::core::bridge::run_on_loop(move || {
            let listener = Arc::clone(&handle_for_register);
            let handler: Arc<dyn Fn(&mio::event::Event) + Send + Sync> = Arc::new(move |_event| listener.on_readable());
            let mut socket = handle_for_register.socket.lock().unwrap();
            match reactor.register_source(&mut *socket, Interest::READABLE, handler) {
                Ok(token) => {
                    drop(socket);
                    *handle_for_register.token.lock().unwrap() = Some(token);
                }
                Err(e) => tracing::error!(error = %e, "failed to register udp socket with reactor"),
            }
        });
        Ok(handle)
    }

    #[must_use]
    pub fn address(&self) -> SocketAddr { self.local_addr }

    fn on_readable(self: &Arc<Self>) {
        let mut buf = [0u8; UDP_MAX_PAYLOAD_BYTES];
        loop {
            let result = self.socket.lock().unwrap().recv_from(&mut buf);
            match result {
                Ok((n, peer)) => {
                    if let Some(cb) = self.handlers.on_message.lock().unwrap().clone() {
                        let message = Value::Array(vec![
                            Value::Buffer(buf[..n].to_vec()),
                            Value::Str(peer.ip().to_string()),
                            Value::Number(f64::from(peer.port())),
                        ]);
                        crate::core::bridge::run_on_loop(move || {
                            crate::core::bridge::enqueue_callback_global(
                                crate::core::bridge::CallbackPayload::new(cb, vec![message]),
                            );
                        });
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) => {
                    if let Some(cb) = self.handlers.on_error.lock().unwrap().clone() {
                        deliver_error(cb, format!("udp recv error: {e}"));
                    }
                    return;
                }
            }
        }
    }

    pub fn on(&self, event: &str, cb: CallbackHandle) {
        match event {
            "message" => *self.handlers.on_message.lock().unwrap() = Some(cb),
            "error" => *self.handlers.on_error.lock().unwrap() = Some(cb),
            "close" => *self.handlers.on_close.lock().unwrap() = Some(cb),
            _ => tracing::warn!(event, "udp socket: unrecognized event name"),
        }
    }

    /// Sends `data` to `(address, port)`. Enforces the 65507-byte hard ceiling and logs
    /// a warning (through the `error` handler) above 1472 bytes, per §4.5.
    pub fn send(
        self: &Arc<Self>,
        data: Vec<u8>,
        address: std::net::IpAddr,
        port: u16,
        on_complete: Option<CallbackHandle>,
    ) {
        if data.len() > UDP_MAX_PAYLOAD_BYTES {
            let message = format!("udp payload of {} bytes exceeds the {} byte maximum", data.len(), UDP_MAX_PAYLOAD_BYTES);
            if let Some(cb) = on_complete {
                deliver_error(cb, message.clone());
            }
            if let Some(cb) = self.handlers.on_error.lock().unwrap().clone() {
                deliver_error(cb, message);
            }
            return;
        }
        if data.len() > UDP_WARN_PAYLOAD_BYTES {
            if let Some(cb) = self.handlers.on_error.lock().unwrap().clone() {
                deliver_error(cb, format!("udp payload of {} bytes exceeds the {} byte fragmentation-safe size", data.len(), UDP_WARN_PAYLOAD_BYTES));
            }
        }
        let socket = Arc::clone(self);
        crate::core::bridge::run_on_loop(move || {
            let addr = SocketAddr::new(address, port);
            let result = socket.socket.lock().unwrap().send_to(&data, addr);
            if let Some(cb) = on_complete {
                match result {
                    Ok(_) => deliver_event(cb),
                    Err(e) => deliver_error(cb, format!("udp send error: {e}")),
                }
            }
        });
    }

    #[must_use]
    pub fn is_open(&self) -> bool { !self.close_flag.is_closed() }

    pub fn close(self: &Arc<Self>) {
        if !self.close_flag.close_once() {
            return;
        }
        let socket = Arc::clone(self);
        crate::core::bridge::run_on_loop(move || {
            let token = socket.token.lock().unwrap().take();
            if let Some(token) = token {
                let mut inner = socket.socket.lock().unwrap();
                let _ = socket.reactor.deregister_source(&mut *inner, token);
            }
            if let Some(cb) = socket.handlers.on_close.lock().unwrap().clone() {
                deliver_event(cb);
            }
        });
    }
}
