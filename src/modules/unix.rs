//! `unix.*` (§6): `createServer`, `connect` — Unix-domain sockets, addressed by
//! filesystem path.

use std::path::Path;
use std::sync::Arc;

use crate::evaluator::CallbackHandle;
use crate::streams::unix::{UnixServer, UnixSocket};

use super::Modules;

pub fn connect(modules: &Modules, path: impl AsRef<Path>, on_connect: CallbackHandle, on_error: CallbackHandle) {
    UnixSocket::connect(&modules.reactor, &modules.active_work, path, on_connect, on_error);
}

#[must_use]
pub fn create_server(
    modules: &Modules,
    path: impl AsRef<Path>,
    on_connection: CallbackHandle,
    on_listening: Option<CallbackHandle>,
    on_error: Option<CallbackHandle>,
) -> Arc<UnixServer> {
    UnixServer::listen(&modules.reactor, path, on_connection, on_listening, on_error)
}
