//! `ipc.*` (§6): `openPipe` — named-pipe (FIFO) handles.

use std::path::Path;
use std::sync::Arc;

use crate::evaluator::CallbackHandle;
use crate::streams::ipc::{IpcPipe, PipeMode};

use super::Modules;

pub use crate::streams::ipc::PipeMode as Mode;

/// `ipc.openPipe(path, mode, onReady?, onError?)`.
#[must_use]
pub fn open_pipe(
    modules: &Modules,
    path: impl AsRef<Path>,
    mode: PipeMode,
    on_ready: Option<CallbackHandle>,
    on_error: Option<CallbackHandle>,
) -> Arc<IpcPipe> {
    IpcPipe::open(&modules.reactor, path, mode, on_ready, on_error)
}
