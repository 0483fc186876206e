//! The error taxonomy surfaced to script code.
//!
//! Every variant group mirrors §7 of the specification. Grounded on the `SubscribeError`
//! shape from the resilient-reactor-thread pattern: one enum, one `thiserror` message per
//! variant, a `miette` diagnostic code, and `help()` text where the failure is
//! actionable.

use miette::Diagnostic;
use thiserror::Error;

/// The runtime's error taxonomy. Every fallible core operation returns
/// `Result<T, RuntimeError>`. At a promise-returning built-in boundary this is converted
/// to a rejection reason string via [`RuntimeError::to_rejection_reason`].
#[derive(Debug, Error, Diagnostic)]
pub enum RuntimeError {
    /// Bad argument shape: missing callback, wrong value kind.
    #[error("type error: {0}")]
    #[diagnostic(code(swazi_runtime::type_error))]
    TypeError(String),

    /// No reactor, no loop, or no scheduler was registered when the operation needed
    /// one.
    #[error("runtime error: {0}")]
    #[diagnostic(
        code(swazi_runtime::no_runtime),
        help("Register a scheduler and reactor before invoking I/O built-ins.")
    )]
    NoRuntime(String),

    /// The handle is closed, the write target is gone, or the open failed.
    #[error("I/O error: {0}")]
    #[diagnostic(code(swazi_runtime::io_error))]
    Io(String),

    /// A reactor primitive failed (init/bind/listen/start/close).
    #[error("system error: {0}")]
    #[diagnostic(
        code(swazi_runtime::system_error),
        help("Check OS resource limits (file descriptors, ports already in use).")
    )]
    System(String),

    /// Platform-specific operation unavailable.
    #[error("not supported: {0}")]
    #[diagnostic(code(swazi_runtime::not_supported))]
    NotSupported(String),

    /// Size or limit violation, e.g. UDP payload over the datagram maximum.
    #[error("range error: {0}")]
    #[diagnostic(code(swazi_runtime::range_error))]
    RangeError(String),
}

impl RuntimeError {
    /// The string used as a promise rejection reason. Script code never sees Rust error
    /// types, only this descriptive string (per §7's "Rejected promise" entry).
    #[must_use]
    pub fn to_rejection_reason(&self) -> String { self.to_string() }
}
