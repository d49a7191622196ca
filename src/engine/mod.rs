//! Core event-driven engine: serialized mutations over the tab forest.
//!
//! Architecture:
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ Host signals │────►│ Command queue│────►│   Mutation   │
//! │  (ingestor)  │     │  (ordered)   │     │    engine    │
//! └──────────────┘     └──────────────┘     └──────────────┘
//!                                                  │
//!                                                  ▼
//!                      ┌──────────────┐     ┌──────────────┐
//!                      │   Debounced  │◄────│  Tree store  │
//!                      │    saver     │     │ (invariants) │
//!                      └──────────────┘     └──────────────┘
//! ```
//!
//! All structural mutations run on one logical task queue: the store is
//! never observed mid-mutation, and host signals drain strictly in arrival
//! order. Persistence lags by at most the debounce window.

pub mod mutation;
pub mod reconcile;
pub mod runtime;

pub use mutation::MutationEngine;
pub use runtime::{spawn_engine, EngineHandle};
