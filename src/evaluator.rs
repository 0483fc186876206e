//! The boundary the asynchronous core exposes to the language evaluator.
//!
//! Everything here is deliberately thin: the value representation, the lexer/parser,
//! and the expression/statement evaluator are external collaborators (§1, out of
//! scope). The core never inspects a [`CallbackHandle`]'s contents — it only ever
//! stores it, passes it back to [`EvaluatorHost::invoke`], and drops it.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A minimal value carrier used to move data across the bridge (timer args, stream
/// chunks, promise results). The full value representation (objects, arrays, functions)
/// lives in the evaluator and is out of scope here; this is just enough shape to
/// describe what core producers hand back to script code.
#[derive(Debug, Clone)]
pub enum Value {
    Undefined,
    Bool(bool),
    Number(f64),
    Str(String),
    Buffer(Vec<u8>),
    Array(Vec<Value>),
    /// A descriptive rejection/error reason, per §7's "Rejected promise" entry.
    Error(String),
}

impl From<crate::error::RuntimeError> for Value {
    fn from(err: crate::error::RuntimeError) -> Self { Value::Error(err.to_rejection_reason()) }
}

/// An opaque reference to a language-level callback (closure value). The core never
/// dereferences this — only the registered [`EvaluatorHost`] knows how to invoke it.
#[derive(Clone)]
pub struct CallbackHandle(pub Arc<dyn Any + Send + Sync>);

impl fmt::Debug for CallbackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str("CallbackHandle(..)") }
}

impl CallbackHandle {
    pub fn new<T: Any + Send + Sync>(inner: T) -> Self { CallbackHandle(Arc::new(inner)) }
}

/// The evaluator's half of the boundary. A native runtime embedder implements this once
/// and registers it with the bridge at startup (see [`crate::core::bridge`]).
pub trait EvaluatorHost: Send + Sync + 'static {
    /// Invoke `callback` with `args`. Any exception the callback raises is caught by
    /// the implementation and must not propagate back into the scheduler (§4.1
    /// Failure).
    fn invoke_function(&self, callback: &CallbackHandle, args: &[Value]);
}
