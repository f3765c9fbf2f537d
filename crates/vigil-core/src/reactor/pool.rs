//! # Loop Pool
//!
//! Runs N [`EventLoop`]s, each on a dedicated named thread.
//!
//! Each thread builds its own loop, reports the loop's handle back to the
//! spawning thread, runs the per-loop init hook and then runs the loop until
//! it is stopped or the shared [`ShutdownToken`] is cancelled.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error};

use super::event_loop::EventLoop;
use super::handle::{LoopHandle, ShutdownToken};
use super::{ReactorConfig, ReactorError};

type LoopThread = JoinHandle<Result<(), ReactorError>>;

/// A fixed set of event loops on their own threads.
pub struct LoopPool {
    handles: Vec<LoopHandle>,
    threads: Vec<(usize, LoopThread)>,
    next: AtomicUsize,
}

impl LoopPool {
    /// Spawns `config.threads` loops observing `token`.
    ///
    /// `init` runs on each loop's thread before the loop starts; it is where
    /// listeners, watches and timers owned by that loop are installed.
    ///
    /// # Errors
    ///
    /// Returns [`ReactorError::InvalidConfig`] for a zero thread count, or
    /// [`ReactorError::SpawnFailed`] if a thread or its loop cannot be
    /// started. Loops already started are stopped and joined first.
    pub fn spawn<I>(config: &ReactorConfig, token: &ShutdownToken, init: I) -> Result<Self, ReactorError>
    where
        I: Fn(&mut EventLoop) + Send + Sync + 'static,
    {
        if config.threads == 0 {
            return Err(ReactorError::InvalidConfig(
                "loop pool needs at least one thread".to_string(),
            ));
        }

        let init = Arc::new(init);
        let mut pool = Self {
            handles: Vec::with_capacity(config.threads),
            threads: Vec::with_capacity(config.threads),
            next: AtomicUsize::new(0),
        };

        for loop_id in 0..config.threads {
            // Dropping a partially built pool stops and joins what was started.
            let (handle, thread) = spawn_loop(loop_id, config, token, Arc::clone(&init))?;
            pool.handles.push(handle);
            pool.threads.push((loop_id, thread));
        }

        debug!(loops = config.threads, "loop pool started");
        Ok(pool)
    }

    /// Number of loops.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns true if the pool has no loops.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Returns the handle of loop `loop_id`.
    #[must_use]
    pub fn handle(&self, loop_id: usize) -> Option<&LoopHandle> {
        self.handles.get(loop_id)
    }

    /// Returns all loop handles, ordered by id.
    #[must_use]
    pub fn handles(&self) -> &[LoopHandle] {
        &self.handles
    }

    /// Returns loop handles in round-robin order.
    #[must_use]
    pub fn next_handle(&self) -> &LoopHandle {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.handles.len();
        &self.handles[i]
    }

    /// Wakes loop `loop_id`, running its signal callback.
    ///
    /// # Errors
    ///
    /// Returns [`ReactorError::InvalidConfig`] if no such loop exists.
    pub fn signal_loop(&self, loop_id: usize) -> Result<(), ReactorError> {
        let handle = self
            .handle(loop_id)
            .ok_or_else(|| ReactorError::InvalidConfig(format!("no loop {loop_id}")))?;
        handle.signal();
        Ok(())
    }

    /// Asks every loop to stop.
    pub fn stop_all(&self) {
        for handle in &self.handles {
            handle.stop();
        }
    }

    /// Waits for every loop thread to finish.
    ///
    /// Loops keep running until stopped or until their token is cancelled.
    ///
    /// # Errors
    ///
    /// Returns the first loop failure, or [`ReactorError::LoopPanicked`] if a
    /// loop thread panicked. Every thread is joined either way.
    pub fn join(mut self) -> Result<(), ReactorError> {
        let mut result = Ok(());
        for (loop_id, thread) in std::mem::take(&mut self.threads) {
            let outcome = thread
                .join()
                .unwrap_or(Err(ReactorError::LoopPanicked { loop_id }));
            if let Err(e) = outcome {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }
}

impl Drop for LoopPool {
    fn drop(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        self.stop_all();
        for (_, thread) in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}

impl std::fmt::Debug for LoopPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopPool")
            .field("loops", &self.handles.len())
            .field("running", &self.threads.len())
            .finish_non_exhaustive()
    }
}

fn spawn_loop<I>(
    loop_id: usize,
    config: &ReactorConfig,
    token: &ShutdownToken,
    init: Arc<I>,
) -> Result<(LoopHandle, LoopThread), ReactorError>
where
    I: Fn(&mut EventLoop) + Send + Sync + 'static,
{
    let (ready_tx, ready_rx) = mpsc::sync_channel(1);
    let thread_config = config.clone();
    let token = token.clone();

    let thread = thread::Builder::new()
        .name(format!("{}-{loop_id}", config.thread_name))
        .spawn(move || {
            let mut event_loop = match EventLoop::with_shutdown(loop_id, &thread_config, &token) {
                Ok(event_loop) => event_loop,
                Err(e) => {
                    let message = e.to_string();
                    let _ = ready_tx.send(Err(message));
                    return Err(e);
                }
            };
            let _ = ready_tx.send(Ok(event_loop.handle()));

            (*init)(&mut event_loop);
            let result = event_loop.run();
            if let Err(e) = &result {
                error!(loop_id, error = %e, "event loop failed");
            }
            result
        })
        .map_err(|e| ReactorError::SpawnFailed {
            loop_id,
            message: e.to_string(),
        })?;

    // Wait for the loop to exist before handing out its handle.
    match ready_rx.recv() {
        Ok(Ok(handle)) => Ok((handle, thread)),
        Ok(Err(message)) => {
            let _ = thread.join();
            Err(ReactorError::SpawnFailed { loop_id, message })
        }
        Err(_) => {
            let _ = thread.join();
            Err(ReactorError::SpawnFailed {
                loop_id,
                message: "loop thread exited during startup".to_string(),
            })
        }
    }
}
