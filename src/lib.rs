//! Tree synchronization engine for host tab forests.
//!
//! Ingests an asynchronous stream of tab-lifecycle signals, keeps an
//! invariant-checked in-memory forest consistent with the host's reality,
//! and persists it durably with debounced writes. See the `engine` module
//! for the architecture overview.

pub mod config;
pub mod engine;
pub mod events;
pub mod host;
pub mod logging;
pub mod policy;
pub mod projection;
pub mod storage;
pub mod tree;
pub mod verify;
