//! Cross-thread entry points into an event loop.
//!
//! A [`LoopHandle`] is the only way another thread reaches a loop: it pushes a
//! [`Task`] under a short-held mutex and wakes the loop, which drains the queue
//! on its own thread. A [`ShutdownToken`] wakes every loop registered with it.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use mio::Waker;
use parking_lot::Mutex;
use tracing::warn;

use super::event_loop::EventLoop;
use super::timer;
use super::ReactorError;

/// Deferred work queued for a loop by another thread.
pub(super) enum Task {
    /// Becomes a timer firing now and then every `interval`
    Periodic {
        interval: Duration,
        task: Box<dyn FnMut() + Send>,
    },
    /// Runs once with access to the loop
    Execute(Box<dyn FnOnce(&mut EventLoop) + Send>),
}

pub(super) struct Shared {
    pub(super) id: usize,
    pub(super) waker: Arc<Waker>,
    pub(super) tasks: Mutex<VecDeque<Task>>,
    pub(super) stop: AtomicBool,
}

/// Thread-safe handle to one event loop.
#[derive(Clone)]
pub struct LoopHandle {
    pub(super) shared: Arc<Shared>,
}

impl LoopHandle {
    pub(super) fn new(id: usize, waker: Arc<Waker>) -> Self {
        Self {
            shared: Arc::new(Shared {
                id,
                waker,
                tasks: Mutex::new(VecDeque::new()),
                stop: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the loop id.
    #[must_use]
    pub fn id(&self) -> usize {
        self.shared.id
    }

    /// Wakes the loop, running its signal callback and draining queued tasks.
    pub fn signal(&self) {
        if let Err(e) = self.shared.waker.wake() {
            warn!(loop_id = self.shared.id, error = %e, "failed to wake event loop");
        }
    }

    /// Asks the loop to leave its `run` call.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
        self.signal();
    }

    /// Returns true once [`stop`](Self::stop) was called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.shared.stop.load(Ordering::Acquire)
    }

    fn enqueue(&self, task: Task) {
        self.shared.tasks.lock().push_back(task);
        self.signal();
    }

    /// Schedules `task` on the loop's thread, first immediately and then
    /// every `interval_secs`.
    ///
    /// # Errors
    ///
    /// Returns [`ReactorError::InvalidInterval`] unless the interval is a
    /// positive, finite number of seconds.
    pub fn add_periodic_task<F>(&self, interval_secs: f32, task: F) -> Result<(), ReactorError>
    where
        F: FnMut() + Send + 'static,
    {
        let interval = timer::period(interval_secs)?;
        self.enqueue(Task::Periodic {
            interval,
            task: Box::new(task),
        });
        Ok(())
    }

    /// Runs `f` once on the loop's thread with mutable access to the loop.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce(&mut EventLoop) + Send + 'static,
    {
        self.enqueue(Task::Execute(Box::new(f)));
    }

    /// Number of tasks waiting to be drained.
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.shared.tasks.lock().len()
    }
}

impl fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopHandle")
            .field("id", &self.shared.id)
            .field("stopped", &self.is_stopped())
            .field("pending_tasks", &self.pending_tasks())
            .finish()
    }
}

#[derive(Default)]
struct TokenInner {
    cancelled: AtomicBool,
    /// Wakers of registered loops; entries die with their loop
    wakers: Mutex<Vec<Weak<Waker>>>,
}

/// Cooperative shutdown signal shared by a set of loops.
///
/// Cancelling the token wakes every registered loop; each one then leaves
/// its `run` call and tears down its watches and timers.
#[derive(Clone, Default)]
pub struct ShutdownToken {
    inner: Arc<TokenInner>,
}

impl ShutdownToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the token and wakes all registered loops.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let mut wakers = self.inner.wakers.lock();
        wakers.retain(|waker| match waker.upgrade() {
            Some(waker) => {
                if let Err(e) = waker.wake() {
                    warn!(error = %e, "failed to wake event loop on shutdown");
                }
                true
            }
            None => false,
        });
    }

    /// Returns true once [`cancel`](Self::cancel) was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Number of registered loops still alive.
    pub(super) fn live_loops(&self) -> usize {
        self.inner
            .wakers
            .lock()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub(super) fn register(&self, waker: Arc<Waker>) {
        {
            let mut wakers = self.inner.wakers.lock();
            wakers.retain(|w| w.strong_count() > 0);
            wakers.push(Arc::downgrade(&waker));
        }
        // A cancel racing with registration must still reach this loop.
        if self.is_cancelled() {
            if let Err(e) = waker.wake() {
                warn!(error = %e, "failed to wake event loop on shutdown");
            }
        }
    }
}

impl fmt::Debug for ShutdownToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownToken")
            .field("cancelled", &self.is_cancelled())
            .field("loops", &self.live_loops())
            .finish()
    }
}
