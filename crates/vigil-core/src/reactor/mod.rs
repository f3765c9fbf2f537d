//! # Reactor Module
//!
//! Readiness-driven event loops that feed network input into stream graphs.
//!
//! ## Architecture
//!
//! - [`EventLoop`]: one single-threaded loop owning descriptor watches and
//!   timers. Watch and timer callbacks run only on the loop's thread.
//! - [`LoopHandle`]: the thread-safe way in. Other threads queue tasks under a
//!   short-held mutex and wake the loop, which drains them itself.
//! - [`LoopPool`]: N loops, each on its own named thread.
//! - [`ShutdownToken`]: explicit, shared stop signal observed by every loop
//!   created with it.
//!
//! Stream processing is synchronous inside watch callbacks: the loop thread
//! that read an event pushes it through the graph before it polls again.
//!
//! ## Example
//!
//! ```rust,no_run
//! use vigil_core::reactor::{LoopPool, ReactorConfig, ShutdownToken};
//!
//! let token = ShutdownToken::new();
//! let pool = LoopPool::spawn(&ReactorConfig::default(), &token, |_| {})?;
//!
//! pool.handle(0).expect("loop 0").add_periodic_task(10.0, || {
//!     tracing::info!("maintenance");
//! })?;
//!
//! token.cancel();
//! pool.join()?;
//! # Ok::<(), vigil_core::reactor::ReactorError>(())
//! ```

mod event_loop;
mod handle;
mod pool;
mod source;
mod timer;

pub use event_loop::{EventLoop, Ready};
pub use handle::{LoopHandle, ShutdownToken};
pub use pool::LoopPool;
pub use source::FdSource;
pub use timer::TimerId;

use std::num::NonZeroUsize;

use mio::Interest;

/// Interest of a descriptor watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Readable readiness
    Read,
    /// Writable readiness
    Write,
    /// Both
    ReadWrite,
}

impl Mode {
    fn interest(self) -> Interest {
        match self {
            Self::Read => Interest::READABLE,
            Self::Write => Interest::WRITABLE,
            Self::ReadWrite => Interest::READABLE.add(Interest::WRITABLE),
        }
    }
}

/// Readiness reported for one watch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct Readiness {
    /// The source can be read, or its read side closed
    pub readable: bool,
    /// The source can be written, or its write side closed
    pub writable: bool,
    /// The source reported an error condition
    pub error: bool,
}

impl From<&mio::event::Event> for Readiness {
    fn from(event: &mio::event::Event) -> Self {
        Self {
            readable: event.is_readable() || event.is_read_closed(),
            writable: event.is_writable() || event.is_write_closed(),
            error: event.is_error(),
        }
    }
}

/// Identifies a descriptor watch on one loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(usize);

/// Configuration for event loops and loop pools.
#[derive(Debug, Clone)]
pub struct ReactorConfig {
    /// Number of loops in a pool
    pub threads: usize,
    /// Readiness events collected per poll
    pub events_capacity: usize,
    /// Prefix of pool thread names; the loop id is appended
    pub thread_name: String,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            threads: std::thread::available_parallelism().map_or(1, NonZeroUsize::get),
            events_capacity: 1024,
            thread_name: "vigil-loop".to_string(),
        }
    }
}

/// Errors that can occur in the reactor.
#[derive(Debug, thiserror::Error)]
pub enum ReactorError {
    /// Poller, waker or registration failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A pool thread could not be started
    #[error("Failed to spawn loop {loop_id}: {message}")]
    SpawnFailed {
        /// Loop that failed to start
        loop_id: usize,
        /// Failure description
        message: String,
    },

    /// A loop thread panicked
    #[error("Loop {loop_id} panicked")]
    LoopPanicked {
        /// Loop whose thread panicked
        loop_id: usize,
    },

    /// Interval is negative, not finite, or zero where a period is required
    #[error("Invalid timer interval: {0}s")]
    InvalidInterval(f32),

    /// No watch with this id on the loop
    #[error("Unknown watch: {0:?}")]
    UnknownWatch(WatchId),

    /// `set_timer_interval` before `set_timer`
    #[error("Loop {0} has no main timer")]
    NoMainTimer(usize),

    /// Invalid reactor configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
