//! Core event-loop substrate: scheduler, cross-thread bridge, reactor adapter, and the
//! small accounting types shared by every subsystem built on top of them.

pub mod active_work;
pub mod bridge;
pub mod common;
pub mod memory;
pub mod reactor;
pub mod scheduler;
