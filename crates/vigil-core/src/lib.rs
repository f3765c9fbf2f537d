//! # `vigil` Core
//!
//! The concurrent stream-processing engine behind `vigil`.
//!
//! This crate provides:
//! - **Atom**: Lock-free shared state with an exactly-once commit callback
//! - **Streams**: Composable stream nodes and the stateful combinator library
//!   (windows, coalesce, project, stable, throttle, derivative, grouping)
//! - **Reactor**: Readiness-driven event loops, timers and a pool of loop threads
//! - **Time**: Clocks and the expiry predicates used by keyed state
//!
//! ## Design Principles
//!
//! 1. **No locks on the hot path** - stream state lives in [`Atom`]s updated by CAS
//! 2. **Synchronous processing** - events run through the graph on the thread
//!    that received them, no queue hand-off inside the core
//! 3. **One entry point per loop** - other threads reach a loop only through
//!    its [`LoopHandle`](reactor::LoopHandle)
//!
//! ## Example
//!
//! ```rust
//! use vigil_core::event::Event;
//! use vigil_core::stream::{changed_state, tap};
//!
//! let alerts = changed_state("ok") >> tap(|e: &Event| println!("{} is {}", e.host, e.state));
//!
//! alerts.push(Event::new("web-1", "cpu").with_state("critical"));
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod atom;
pub mod event;
pub mod reactor;
pub mod stream;
pub mod time;

// Re-export key types
pub use atom::{Atom, Commit};
pub use event::Event;
pub use reactor::{EventLoop, LoopHandle, LoopPool, ReactorConfig, ShutdownToken};
pub use stream::{Node, Stream};

/// Result type for vigil-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for vigil-core
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Reactor-related errors
    #[error("Reactor error: {0}")]
    Reactor(#[from] reactor::ReactorError),
}
