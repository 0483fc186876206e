//! `swazi-runtime`: the asynchronous execution substrate for the Swazi scripting
//! language. A single-threaded reactor loop, a microtask/macrotask scheduler, a
//! cross-thread callback bridge, timers, promises, and the stream/filesystem/stdin
//! I/O surface a script-facing `timers`/`tcp`/`udp`/`unix`/`ipc`/`stdin`/`fs`/`reactor`/
//! `net` binding is built from.
//!
//! The language's own lexer, parser, and value evaluator are out of scope; this crate
//! only defines the thin boundary ([`evaluator::EvaluatorHost`], [`evaluator::Value`],
//! [`evaluator::CallbackHandle`]) an embedder implements to connect the two.

pub mod core;
pub mod error;
pub mod evaluator;
pub mod fs_promises;
pub mod modules;
pub mod promise;
pub mod runtime;
pub mod stdin;
pub mod streams;
pub mod timers;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use error::RuntimeError;
pub use evaluator::{CallbackHandle, EvaluatorHost, Value};
pub use runtime::Runtime;
