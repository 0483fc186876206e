//! `tcp.*` (§6): `createServer`, `connect`.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::evaluator::CallbackHandle;
use crate::streams::tcp::{TcpServer, TcpSocket};

use super::Modules;

/// `tcp.connect(host, port, onConnect, onError)`. The connect attempt counts as active
/// work until it resolves, keeping the event loop alive even with no other pending work
/// (§4.5, §4.8).
#[must_use]
pub fn connect(modules: &Modules, host: IpAddr, port: u16, on_connect: CallbackHandle, on_error: CallbackHandle) -> Option<Arc<TcpSocket>> {
    TcpSocket::connect(&modules.reactor, &modules.active_work, SocketAddr::new(host, port), on_connect, on_error)
}

/// `tcp.createServer(host, port, onConnection, onListening?, onError?)`.
#[must_use]
pub fn create_server(
    modules: &Modules,
    host: IpAddr,
    port: u16,
    on_connection: CallbackHandle,
    on_listening: Option<CallbackHandle>,
    on_error: Option<CallbackHandle>,
) -> Arc<TcpServer> {
    TcpServer::listen(&modules.reactor, host, port, on_connection, on_listening, on_error)
}
