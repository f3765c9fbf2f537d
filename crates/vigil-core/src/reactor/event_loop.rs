//! # Event Loop
//!
//! A single-threaded, readiness-driven dispatcher for descriptor watches and
//! timers.
//!
//! ## Iteration
//!
//! Each turn of the loop:
//! 1. Waits for readiness, bounded by the earliest timer deadline
//! 2. Dispatches ready watches to their callbacks
//! 3. On wake-up, drains the cross-thread task queue and runs the signal callback
//! 4. Fires due timers
//!
//! ## Watch Callbacks
//!
//! A watch callback receives the loop itself, so it may change its own mode,
//! remove itself, add watches or schedule timers. While a callback runs its
//! watch is lent out of the table; requests concerning it are recorded and
//! applied once the callback returns.

use std::fmt;
use std::io;
use std::os::fd::OwnedFd;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fxhash::FxHashMap;
use mio::event::Source;
use mio::{Events, Poll, Registry, Token, Waker};
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use super::handle::{LoopHandle, ShutdownToken, Task};
use super::source::FdSource;
use super::timer::{self, TimerCallback, TimerId, Timers};
use super::{Mode, ReactorConfig, ReactorError, Readiness, WatchId};

/// Reserved for the loop's waker; watch ids never reach it.
const WAKE_TOKEN: Token = Token(usize::MAX);

/// Readiness delivered to a watch callback.
pub struct Ready<'a, S> {
    /// The watch being dispatched
    pub id: WatchId,
    /// The watched source
    pub source: &'a mut S,
    /// What the source is ready for
    pub readiness: Readiness,
}

impl<S> Ready<'_, S> {
    /// Returns true if the source can be read without blocking.
    #[must_use]
    pub fn ready_read(&self) -> bool {
        self.readiness.readable
    }

    /// Returns true if the source can be written without blocking.
    #[must_use]
    pub fn ready_write(&self) -> bool {
        self.readiness.writable
    }

    /// Returns true if the source reported an error condition.
    #[must_use]
    pub fn error(&self) -> bool {
        self.readiness.error
    }
}

trait WatchEntry {
    fn dispatch(&mut self, event_loop: &mut EventLoop, id: WatchId, readiness: Readiness);
    fn source(&mut self) -> &mut dyn Source;
}

struct Watch<S, F> {
    source: S,
    callback: F,
}

impl<S, F> WatchEntry for Watch<S, F>
where
    S: Source,
    F: FnMut(&mut EventLoop, Ready<'_, S>),
{
    fn dispatch(&mut self, event_loop: &mut EventLoop, id: WatchId, readiness: Readiness) {
        (self.callback)(
            event_loop,
            Ready {
                id,
                source: &mut self.source,
                readiness,
            },
        );
    }

    fn source(&mut self) -> &mut dyn Source {
        &mut self.source
    }
}

struct Registered {
    mode: Mode,
    entry: Box<dyn WatchEntry>,
}

/// Requests a callback made about its own watch.
struct Dispatch {
    id: WatchId,
    current: Mode,
    mode: Option<Mode>,
    removed: bool,
}

fn deregister(registry: &Registry, id: WatchId, registered: &mut Registered) {
    if let Err(e) = registry.deregister(registered.entry.source()) {
        trace!(watch = id.0, error = %e, "deregister failed");
    }
}

/// A single-threaded event loop.
///
/// Created on the thread that will run it. Other threads talk to it only
/// through its [`LoopHandle`].
pub struct EventLoop {
    poll: Poll,
    events: Events,
    handle: LoopHandle,
    shutdown: Option<ShutdownToken>,
    watches: FxHashMap<WatchId, Registered>,
    next_watch: usize,
    dispatching: Option<Dispatch>,
    timers: Timers,
    main_timer: Option<TimerId>,
    on_signal: Option<Box<dyn FnMut(&mut EventLoop)>>,
}

impl EventLoop {
    /// Creates a loop with the given id.
    ///
    /// # Errors
    ///
    /// Returns [`ReactorError::Io`] if the poller or its waker cannot be created.
    pub fn new(id: usize, config: &ReactorConfig) -> Result<Self, ReactorError> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);

        Ok(Self {
            poll,
            events: Events::with_capacity(config.events_capacity.max(1)),
            handle: LoopHandle::new(id, waker),
            shutdown: None,
            watches: FxHashMap::default(),
            next_watch: 0,
            dispatching: None,
            timers: Timers::default(),
            main_timer: None,
            on_signal: None,
        })
    }

    /// Creates a loop that also stops when `token` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`ReactorError::Io`] if the poller or its waker cannot be created.
    pub fn with_shutdown(
        id: usize,
        config: &ReactorConfig,
        token: &ShutdownToken,
    ) -> Result<Self, ReactorError> {
        let mut event_loop = Self::new(id, config)?;
        token.register(Arc::clone(&event_loop.handle.shared.waker));
        event_loop.shutdown = Some(token.clone());
        Ok(event_loop)
    }

    /// Returns the loop id.
    #[must_use]
    pub fn id(&self) -> usize {
        self.handle.id()
    }

    /// Returns a handle other threads can use to reach this loop.
    #[must_use]
    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    // --- watches ---

    /// Watches `source` for readiness in `mode`.
    ///
    /// The loop owns the source until the watch is removed or the loop is
    /// torn down; dropping it closes the underlying descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`ReactorError::Io`] if the source cannot be registered.
    pub fn watch<S, F>(&mut self, mut source: S, mode: Mode, callback: F) -> Result<WatchId, ReactorError>
    where
        S: Source + 'static,
        F: FnMut(&mut EventLoop, Ready<'_, S>) + 'static,
    {
        let id = WatchId(self.next_watch);
        self.next_watch += 1;

        self.poll
            .registry()
            .register(&mut source, Token(id.0), mode.interest())?;
        self.watches.insert(
            id,
            Registered {
                mode,
                entry: Box::new(Watch { source, callback }),
            },
        );
        trace!(loop_id = self.id(), watch = id.0, ?mode, "watch added");
        Ok(id)
    }

    /// Watches a raw descriptor, taking ownership of it.
    ///
    /// # Errors
    ///
    /// Returns [`ReactorError::Io`] if the descriptor cannot be registered.
    pub fn watch_fd<F>(&mut self, fd: OwnedFd, mode: Mode, callback: F) -> Result<WatchId, ReactorError>
    where
        F: FnMut(&mut EventLoop, Ready<'_, FdSource>) + 'static,
    {
        self.watch(FdSource::new(fd), mode, callback)
    }

    /// Changes the interest of a watch.
    ///
    /// # Errors
    ///
    /// Returns [`ReactorError::UnknownWatch`] if no such watch exists, or
    /// [`ReactorError::Io`] if re-registration fails.
    pub fn set_mode(&mut self, id: WatchId, mode: Mode) -> Result<(), ReactorError> {
        if let Some(dispatch) = self.dispatching.as_mut().filter(|d| d.id == id) {
            if dispatch.removed {
                return Err(ReactorError::UnknownWatch(id));
            }
            dispatch.mode = Some(mode);
            return Ok(());
        }

        let registered = self
            .watches
            .get_mut(&id)
            .ok_or(ReactorError::UnknownWatch(id))?;
        if registered.mode != mode {
            self.poll.registry().reregister(
                registered.entry.source(),
                Token(id.0),
                mode.interest(),
            )?;
            registered.mode = mode;
        }
        Ok(())
    }

    /// Returns the current mode of a watch.
    #[must_use]
    pub fn mode(&self, id: WatchId) -> Option<Mode> {
        match &self.dispatching {
            Some(d) if d.id == id => (!d.removed).then(|| d.mode.unwrap_or(d.current)),
            _ => self.watches.get(&id).map(|r| r.mode),
        }
    }

    /// Removes a watch, dropping (and so closing) its source.
    ///
    /// # Errors
    ///
    /// Returns [`ReactorError::UnknownWatch`] if no such watch exists.
    pub fn remove_watch(&mut self, id: WatchId) -> Result<(), ReactorError> {
        if let Some(dispatch) = self.dispatching.as_mut().filter(|d| d.id == id) {
            if dispatch.removed {
                return Err(ReactorError::UnknownWatch(id));
            }
            dispatch.removed = true;
            return Ok(());
        }

        let mut registered = self
            .watches
            .remove(&id)
            .ok_or(ReactorError::UnknownWatch(id))?;
        deregister(self.poll.registry(), id, &mut registered);
        trace!(loop_id = self.id(), watch = id.0, "watch removed");
        Ok(())
    }

    /// Returns true if the watch is registered on this loop.
    #[must_use]
    pub fn contains_watch(&self, id: WatchId) -> bool {
        match &self.dispatching {
            Some(d) if d.id == id => !d.removed,
            _ => self.watches.contains_key(&id),
        }
    }

    /// Number of live watches.
    #[must_use]
    pub fn watch_count(&self) -> usize {
        let lent = self.dispatching.as_ref().is_some_and(|d| !d.removed);
        self.watches.len() + usize::from(lent)
    }

    fn dispatch(&mut self, id: WatchId, readiness: Readiness) {
        let Some(mut registered) = self.watches.remove(&id) else {
            trace!(loop_id = self.id(), watch = id.0, "readiness for removed watch");
            return;
        };
        if readiness.error {
            warn!(loop_id = self.id(), watch = id.0, "watch reported an error condition");
        }

        self.dispatching = Some(Dispatch {
            id,
            current: registered.mode,
            mode: None,
            removed: false,
        });
        registered.entry.dispatch(self, id, readiness);
        let (requested, removed) = self
            .dispatching
            .take()
            .map_or((None, false), |d| (d.mode, d.removed));

        if removed {
            deregister(self.poll.registry(), id, &mut registered);
            trace!(loop_id = self.id(), watch = id.0, "watch removed");
            return;
        }

        if let Some(mode) = requested.filter(|m| *m != registered.mode) {
            let result = self.poll.registry().reregister(
                registered.entry.source(),
                Token(id.0),
                mode.interest(),
            );
            if let Err(e) = result {
                warn!(loop_id = self.id(), watch = id.0, error = %e, "failed to change watch mode, dropping watch");
                deregister(self.poll.registry(), id, &mut registered);
                return;
            }
            registered.mode = mode;
        }
        self.watches.insert(id, registered);
    }

    // --- timers ---

    /// Adds a timer firing after `after_secs` and then every `repeat_secs`;
    /// a zero repeat makes it one-shot.
    ///
    /// # Errors
    ///
    /// Returns [`ReactorError::InvalidInterval`] for negative or non-finite
    /// values.
    pub fn add_timer<F>(&mut self, after_secs: f32, repeat_secs: f32, callback: F) -> Result<TimerId, ReactorError>
    where
        F: FnMut(&mut EventLoop) + 'static,
    {
        let after = timer::delay(after_secs)?;
        let repeat = timer::repeat(repeat_secs)?;
        Ok(self
            .timers
            .insert(Instant::now() + after, repeat, false, Box::new(callback)))
    }

    /// Cancels a timer. Returns false if it already fired or was cancelled.
    pub fn cancel_timer(&mut self, id: TimerId) -> bool {
        if self.main_timer == Some(id) {
            self.main_timer = None;
        }
        self.timers.cancel(id)
    }

    /// Installs the loop's main timer, replacing any previous one. It fires
    /// immediately and then every `interval_secs`.
    ///
    /// # Errors
    ///
    /// Returns [`ReactorError::InvalidInterval`] unless the interval is a
    /// positive, finite number of seconds.
    pub fn set_timer<F>(&mut self, interval_secs: f32, callback: F) -> Result<TimerId, ReactorError>
    where
        F: FnMut(&mut EventLoop) + 'static,
    {
        let period = timer::period(interval_secs)?;
        if let Some(previous) = self.main_timer.take() {
            self.timers.cancel(previous);
        }
        let callback: TimerCallback = Box::new(callback);
        let id = self.timers.insert(Instant::now(), Some(period), true, callback);
        self.main_timer = Some(id);
        Ok(id)
    }

    /// Re-arms the main timer to fire once, `secs` from now.
    ///
    /// After that single firing the main timer stays installed but idle
    /// until re-armed again.
    ///
    /// # Errors
    ///
    /// Returns [`ReactorError::NoMainTimer`] if [`set_timer`](Self::set_timer)
    /// was never called, or [`ReactorError::InvalidInterval`] for a negative
    /// or non-finite delay.
    pub fn set_timer_interval(&mut self, secs: f32) -> Result<(), ReactorError> {
        let after = timer::delay(secs)?;
        let id = self
            .main_timer
            .filter(|id| self.timers.contains(*id))
            .ok_or(ReactorError::NoMainTimer(self.id()))?;
        self.timers.rearm(id, Instant::now() + after, None);
        Ok(())
    }

    /// Number of armed timers.
    #[must_use]
    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    fn fire_timers(&mut self) {
        let now = Instant::now();
        while let Some((id, seq, mut callback)) = self.timers.pop_due(now) {
            callback(self);
            self.timers.restore(id, seq, callback, Instant::now());
        }
    }

    // --- cross-thread ---

    /// Sets the callback run each time the loop is signalled.
    pub fn on_signal<F>(&mut self, callback: F)
    where
        F: FnMut(&mut EventLoop) + 'static,
    {
        self.on_signal = Some(Box::new(callback));
    }

    fn on_wake(&mut self) {
        let tasks = std::mem::take(&mut *self.handle.shared.tasks.lock());
        if !tasks.is_empty() {
            trace!(loop_id = self.id(), tasks = tasks.len(), "draining task queue");
        }

        for task in tasks {
            match task {
                Task::Periodic { interval, mut task } => {
                    self.timers
                        .insert(Instant::now(), Some(interval), false, Box::new(move |_| task()));
                }
                Task::Execute(f) => f(self),
            }
        }

        if self.should_stop() {
            return;
        }
        if let Some(mut callback) = self.on_signal.take() {
            callback(self);
            // The callback may have installed a replacement.
            if self.on_signal.is_none() {
                self.on_signal = Some(callback);
            }
        }
    }

    // --- running ---

    fn should_stop(&self) -> bool {
        self.handle.shared.stop.load(Ordering::Acquire)
            || self.shutdown.as_ref().is_some_and(ShutdownToken::is_cancelled)
    }

    /// Runs one iteration, waiting at most `timeout` (bounded by the next
    /// timer deadline) for readiness.
    ///
    /// # Errors
    ///
    /// Returns [`ReactorError::Io`] if polling fails for a reason other than
    /// an interrupted system call.
    pub fn turn(&mut self, timeout: Option<Duration>) -> Result<(), ReactorError> {
        let next_timer = self.timers.next_timeout(Instant::now());
        let timeout = match (timeout, next_timer) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        let mut woken = false;
        let ready: SmallVec<[(WatchId, Readiness); 16]> = self
            .events
            .iter()
            .filter_map(|event| {
                if event.token() == WAKE_TOKEN {
                    woken = true;
                    return None;
                }
                Some((WatchId(event.token().0), Readiness::from(event)))
            })
            .collect();

        for (id, readiness) in ready {
            trace!(loop_id = self.id(), watch = id.0, ?readiness, "ready");
            self.dispatch(id, readiness);
        }
        if woken {
            self.on_wake();
        }
        self.fire_timers();
        Ok(())
    }

    /// Runs until the loop is stopped or its shutdown token is cancelled,
    /// then drops every watch and timer.
    ///
    /// # Errors
    ///
    /// Returns [`ReactorError::Io`] if polling fails. Watches and timers are
    /// torn down in either case.
    pub fn run(&mut self) -> Result<(), ReactorError> {
        debug!(loop_id = self.id(), "event loop started");

        let mut result = Ok(());
        while !self.should_stop() {
            if let Err(e) = self.turn(None) {
                result = Err(e);
                break;
            }
        }

        self.teardown();
        debug!(loop_id = self.id(), "event loop stopped");
        result
    }

    /// Drops every watch, timer and queued task.
    pub fn teardown(&mut self) {
        let registry = self.poll.registry();
        for (id, mut registered) in self.watches.drain() {
            deregister(registry, id, &mut registered);
        }
        self.timers.clear();
        self.main_timer = None;
        self.handle.shared.tasks.lock().clear();
        self.on_signal = None;
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("id", &self.id())
            .field("watches", &self.watch_count())
            .field("timers", &self.timer_count())
            .field("stopping", &self.should_stop())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::io::{Read, Write};
    use std::rc::Rc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use mio::net::UnixStream;

    fn new_loop() -> EventLoop {
        EventLoop::new(0, &ReactorConfig::default()).unwrap()
    }

    fn spin(event_loop: &mut EventLoop, turns: usize) {
        for _ in 0..turns {
            event_loop.turn(Some(Duration::from_millis(20))).unwrap();
        }
    }

    #[test]
    fn test_read_watch_receives_data() {
        let mut event_loop = new_loop();
        let (reader, mut writer) = UnixStream::pair().unwrap();
        let received = Rc::new(RefCell::new(Vec::new()));

        let sink = Rc::clone(&received);
        event_loop
            .watch(reader, Mode::Read, move |_, ready| {
                assert!(ready.ready_read());
                let mut buf = [0u8; 64];
                if let Ok(n) = ready.source.read(&mut buf) {
                    sink.borrow_mut().extend_from_slice(&buf[..n]);
                }
            })
            .unwrap();

        writer.write_all(b"ping").unwrap();
        spin(&mut event_loop, 3);

        assert_eq!(&*received.borrow(), b"ping");
    }

    #[test]
    fn test_callback_switches_own_mode() {
        let mut event_loop = new_loop();
        let (stream, _peer) = UnixStream::pair().unwrap();
        let writable = Rc::new(Cell::new(0));

        let count = Rc::clone(&writable);
        let id = event_loop
            .watch(stream, Mode::Write, move |event_loop, ready| {
                assert!(ready.ready_write());
                count.set(count.get() + 1);
                event_loop.set_mode(ready.id, Mode::Read).unwrap();
            })
            .unwrap();

        spin(&mut event_loop, 3);

        assert_eq!(writable.get(), 1);
        assert_eq!(event_loop.mode(id), Some(Mode::Read));
    }

    #[test]
    fn test_callback_removes_itself() {
        let mut event_loop = new_loop();
        let (reader, mut writer) = UnixStream::pair().unwrap();

        event_loop
            .watch(reader, Mode::Read, |event_loop, ready| {
                event_loop.remove_watch(ready.id).unwrap();
                assert!(!event_loop.contains_watch(ready.id));
            })
            .unwrap();
        assert_eq!(event_loop.watch_count(), 1);

        writer.write_all(b"x").unwrap();
        spin(&mut event_loop, 2);

        assert_eq!(event_loop.watch_count(), 0);
        // The reader was dropped with its watch, so the peer sees end of file.
        let mut buf = [0u8; 1];
        assert_eq!(writer.read(&mut buf).unwrap(), 0);
    }

    /// Returns a client socket whose peer was reset.
    ///
    /// Closing a TCP socket with unread data makes the kernel answer with a
    /// reset instead of a normal close.
    fn reset_socket() -> mio::net::TcpStream {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        client.write_all(b"never read").unwrap();
        thread::sleep(Duration::from_millis(20));
        drop(server);
        client.set_nonblocking(true).unwrap();
        mio::net::TcpStream::from_std(client)
    }

    #[test]
    fn test_error_flag_reaches_callback() {
        let mut event_loop = new_loop();
        let errors = Rc::new(Cell::new(0));
        let removed = Rc::new(Cell::new(false));

        let (seen, gone) = (Rc::clone(&errors), Rc::clone(&removed));
        let id = event_loop
            .watch(reset_socket(), Mode::Read, move |event_loop, ready| {
                if ready.error() {
                    seen.set(seen.get() + 1);
                    gone.set(event_loop.remove_watch(ready.id).is_ok());
                }
            })
            .unwrap();

        for _ in 0..50 {
            event_loop.turn(Some(Duration::from_millis(20))).unwrap();
            if removed.get() {
                break;
            }
        }

        assert_eq!(errors.get(), 1);
        assert!(removed.get());
        assert!(!event_loop.contains_watch(id));
        assert_eq!(event_loop.watch_count(), 0);

        // The loop keeps serving other sources after the faulty one is gone.
        let (reader, mut writer) = UnixStream::pair().unwrap();
        let reads = Rc::new(Cell::new(0));
        let count = Rc::clone(&reads);
        event_loop
            .watch(reader, Mode::Read, move |_, ready| {
                if ready.ready_read() {
                    count.set(count.get() + 1);
                }
            })
            .unwrap();
        writer.write_all(b"x").unwrap();
        spin(&mut event_loop, 3);
        assert!(reads.get() >= 1);
    }

    #[test]
    fn test_unknown_watch() {
        let mut event_loop = new_loop();
        assert!(matches!(
            event_loop.remove_watch(WatchId(42)),
            Err(ReactorError::UnknownWatch(_))
        ));
        assert!(event_loop.set_mode(WatchId(42), Mode::Write).is_err());
    }

    #[test]
    fn test_watch_raw_fd() {
        let mut event_loop = new_loop();
        let (reader, mut writer) = std::os::unix::net::UnixStream::pair().unwrap();
        reader.set_nonblocking(true).unwrap();
        let hits = Rc::new(Cell::new(0));

        let count = Rc::clone(&hits);
        event_loop
            .watch_fd(OwnedFd::from(reader), Mode::Read, move |event_loop, ready| {
                count.set(count.get() + 1);
                event_loop.remove_watch(ready.id).unwrap();
            })
            .unwrap();

        writer.write_all(b"x").unwrap();
        spin(&mut event_loop, 2);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_main_timer_fires_immediately_and_rearms() {
        let mut event_loop = new_loop();
        let fired = Rc::new(Cell::new(0));

        let count = Rc::clone(&fired);
        event_loop
            .set_timer(3600.0, move |event_loop| {
                count.set(count.get() + 1);
                if count.get() == 1 {
                    event_loop.set_timer_interval(0.0).unwrap();
                }
            })
            .unwrap();

        spin(&mut event_loop, 3);

        // Immediate fire, then the one-shot re-arm, then nothing.
        assert_eq!(fired.get(), 2);
        assert_eq!(event_loop.timer_count(), 1);

        event_loop.set_timer_interval(0.0).unwrap();
        spin(&mut event_loop, 1);
        assert_eq!(fired.get(), 3);
    }

    #[test]
    fn test_set_timer_interval_without_main_timer() {
        let mut event_loop = new_loop();
        assert!(matches!(
            event_loop.set_timer_interval(1.0),
            Err(ReactorError::NoMainTimer(0))
        ));
    }

    #[test]
    fn test_set_timer_replaces_previous() {
        let mut event_loop = new_loop();
        let first = Rc::new(Cell::new(0));
        let second = Rc::new(Cell::new(0));

        let a = Rc::clone(&first);
        event_loop.add_timer(3600.0, 0.0, |_| {}).unwrap();
        event_loop.set_timer(3600.0, move |_| a.set(a.get() + 1)).unwrap();
        let b = Rc::clone(&second);
        event_loop.set_timer(3600.0, move |_| b.set(b.get() + 1)).unwrap();

        spin(&mut event_loop, 1);
        assert_eq!((first.get(), second.get()), (0, 1));
        assert_eq!(event_loop.timer_count(), 2);
    }

    #[test]
    fn test_cancel_timer() {
        let mut event_loop = new_loop();
        let fired = Rc::new(Cell::new(false));

        let flag = Rc::clone(&fired);
        let id = event_loop.add_timer(0.0, 0.0, move |_| flag.set(true)).unwrap();
        assert!(event_loop.cancel_timer(id));
        spin(&mut event_loop, 1);

        assert!(!fired.get());
        assert!(matches!(
            event_loop.add_timer(-1.0, 0.0, |_| {}),
            Err(ReactorError::InvalidInterval(_))
        ));
    }

    #[test]
    fn test_execute_and_periodic_task_from_other_thread() {
        let mut event_loop = new_loop();
        let handle = event_loop.handle();
        let ticks = Arc::new(AtomicUsize::new(0));
        let executed = Rc::new(Cell::new(false));

        let counter = Arc::clone(&ticks);
        let remote = handle.clone();
        thread::spawn(move || {
            remote
                .add_periodic_task(3600.0, move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
            remote.execute(|event_loop| {
                let _ = event_loop.add_timer(0.0, 0.0, |event_loop| event_loop.handle().stop());
            });
        })
        .join()
        .unwrap();

        let flag = Rc::clone(&executed);
        event_loop.on_signal(move |_| flag.set(true));
        event_loop.run().unwrap();

        assert_eq!(ticks.load(Ordering::SeqCst), 1);
        assert!(executed.get());
        assert!(handle.is_stopped());
        assert_eq!(event_loop.timer_count(), 0);
    }

    #[test]
    fn test_shutdown_token_stops_and_tears_down() {
        let token = ShutdownToken::new();
        let mut event_loop = EventLoop::with_shutdown(1, &ReactorConfig::default(), &token).unwrap();
        let (reader, _writer) = UnixStream::pair().unwrap();
        event_loop.watch(reader, Mode::Read, |_, _| {}).unwrap();
        event_loop.add_timer(3600.0, 1.0, |_| {}).unwrap();

        let canceller = token.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            canceller.cancel();
        });

        event_loop.run().unwrap();
        t.join().unwrap();

        assert_eq!(event_loop.watch_count(), 0);
        assert_eq!(event_loop.timer_count(), 0);
    }
}
