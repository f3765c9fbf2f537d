//! # Window Combinators
//!
//! Count and time based windows that fold their contents downstream.
//!
//! | Window | Emits | State |
//! |--------|-------|-------|
//! | fixed count `n` | once per `n` events, then resets | buffer |
//! | moving count `n` | after every event, last `n` events | bounded buffer |
//! | fixed time `dt` | when event time crosses the next `dt` boundary | time-ordered buffer |
//! | moving time `dt` | after every event, events newer than `max - dt` | time-ordered buffer |
//!
//! Time windows ignore events without a time. The fixed time window drops
//! events older than its current interval start instead of reordering them.

use tracing::trace;

use super::{Node, Stream};
use crate::atom::Atom;
use crate::event::Event;

/// Inserts `event` keeping `buffer` ordered by time, after equal times.
fn insert_by_time(buffer: &mut Vec<Event>, event: Event) {
    let at = buffer.partition_point(|e| e.time <= event.time);
    buffer.insert(at, event);
}

/// Folds every `n` events into one and starts over.
pub struct FixedEventWindow<F> {
    n: usize,
    fold: F,
    window: Atom<Vec<Event>>,
}

impl<F> Node for FixedEventWindow<F>
where
    F: Fn(&[Event]) -> Option<Event> + Send + Sync,
{
    fn process(&self, event: Event, forward: &mut dyn FnMut(Event)) {
        // Size check and reset share one commit, so a short buffer is never folded.
        let commit = self.window.swap_with(|window| {
            let mut next = Vec::with_capacity(window.len() + 1);
            next.extend_from_slice(window);
            next.push(event.clone());
            if next.len() >= self.n {
                (Vec::new(), Some(next))
            } else {
                (next, None)
            }
        });

        if let Some(full) = commit.output {
            if let Some(folded) = (self.fold)(&full) {
                forward(folded);
            }
        }
    }
}

/// Creates a window folding each consecutive group of `n` events.
///
/// # Panics
///
/// Panics if `n` is zero.
pub fn fixed_event_window<F>(n: usize, fold: F) -> Stream
where
    F: Fn(&[Event]) -> Option<Event> + Send + Sync + 'static,
{
    assert!(n > 0, "Window size must be positive");
    Stream::new(FixedEventWindow {
        n,
        fold,
        window: Atom::default(),
    })
}

/// Folds the last `n` events after every event.
pub struct MovingEventWindow<F> {
    n: usize,
    fold: F,
    window: Atom<Vec<Event>>,
}

impl<F> Node for MovingEventWindow<F>
where
    F: Fn(&[Event]) -> Option<Event> + Send + Sync,
{
    fn process(&self, event: Event, forward: &mut dyn FnMut(Event)) {
        let commit = self.window.update(|window| {
            let evict = usize::from(window.len() >= self.n);
            let mut next = Vec::with_capacity(window.len().min(self.n) + 1);
            next.extend_from_slice(&window[evict..]);
            next.push(event.clone());
            next
        });

        if let Some(folded) = (self.fold)(&commit.new) {
            forward(folded);
        }
    }
}

/// Creates a sliding window over the last `n` events.
///
/// # Panics
///
/// Panics if `n` is zero.
pub fn moving_event_window<F>(n: usize, fold: F) -> Stream
where
    F: Fn(&[Event]) -> Option<Event> + Send + Sync + 'static,
{
    assert!(n > 0, "Window size must be positive");
    Stream::new(MovingEventWindow {
        n,
        fold,
        window: Atom::default(),
    })
}

#[derive(Debug, Clone, Default)]
struct FixedTimeState {
    /// Buffered events ordered by time
    buffer: Vec<Event>,
    /// Start of the current interval, unset until the first event
    start: Option<i64>,
    /// Greatest time observed
    max: i64,
}

enum Bucket {
    Late,
    Buffered,
    Flushed(Vec<Event>),
}

/// Folds events in non-overlapping intervals of `dt`.
pub struct FixedTimeWindow<F> {
    dt: i64,
    fold: F,
    window: Atom<FixedTimeState>,
}

impl<F> Node for FixedTimeWindow<F>
where
    F: Fn(&[Event]) -> Option<Event> + Send + Sync,
{
    fn process(&self, event: Event, forward: &mut dyn FnMut(Event)) {
        let Some(time) = event.time else {
            trace!(host = %event.host, service = %event.service, "fixed time window: event without time");
            return;
        };

        let commit = self.window.swap_with(|window| {
            let mut next = window.clone();

            let Some(start) = window.start else {
                next.start = Some(time);
                next.max = time;
                next.buffer.push(event.clone());
                return (next, Bucket::Buffered);
            };

            if time < start {
                return (next, Bucket::Late);
            }

            next.max = next.max.max(time);
            insert_by_time(&mut next.buffer, event.clone());

            let boundary = start
                .div_euclid(self.dt)
                .saturating_mul(self.dt)
                .saturating_add(self.dt);
            if next.max < boundary {
                return (next, Bucket::Buffered);
            }

            let split = next.buffer.partition_point(|e| e.time < Some(boundary));
            let flushed = next.buffer.drain(..split).collect();
            next.start = Some(boundary);
            (next, Bucket::Flushed(flushed))
        });

        match commit.output {
            Bucket::Late => {
                trace!(time, "fixed time window: dropping event older than interval start");
            }
            Bucket::Buffered => {}
            Bucket::Flushed(events) => {
                if let Some(folded) = (self.fold)(&events) {
                    forward(folded);
                }
            }
        }
    }
}

/// Creates a tumbling window of `dt` time units.
///
/// # Panics
///
/// Panics if `dt` is not positive.
pub fn fixed_time_window<F>(dt: i64, fold: F) -> Stream
where
    F: Fn(&[Event]) -> Option<Event> + Send + Sync + 'static,
{
    assert!(dt > 0, "Window duration must be positive");
    Stream::new(FixedTimeWindow {
        dt,
        fold,
        window: Atom::default(),
    })
}

#[derive(Debug, Clone, Default)]
struct MovingTimeState {
    /// Live events ordered by time
    buffer: Vec<Event>,
    /// Greatest time observed
    max: Option<i64>,
}

/// Folds all events newer than `max - dt` after every event.
pub struct MovingTimeWindow<F> {
    dt: i64,
    fold: F,
    window: Atom<MovingTimeState>,
}

impl<F> Node for MovingTimeWindow<F>
where
    F: Fn(&[Event]) -> Option<Event> + Send + Sync,
{
    fn process(&self, event: Event, forward: &mut dyn FnMut(Event)) {
        let Some(time) = event.time else {
            return;
        };

        let commit = self.window.update(|window| {
            let mut next = window.clone();
            let max = next.max.map_or(time, |m| m.max(time));
            next.max = Some(max);
            insert_by_time(&mut next.buffer, event.clone());

            let cutoff = max.saturating_sub(self.dt);
            let expired = next.buffer.partition_point(|e| e.time < Some(cutoff));
            next.buffer.drain(..expired);
            next
        });

        if let Some(folded) = (self.fold)(&commit.new.buffer) {
            forward(folded);
        }
    }
}

/// Creates a sliding window covering the last `dt` time units.
///
/// # Panics
///
/// Panics if `dt` is not positive.
pub fn moving_time_window<F>(dt: i64, fold: F) -> Stream
where
    F: Fn(&[Event]) -> Option<Event> + Send + Sync + 'static,
{
    assert!(dt > 0, "Window duration must be positive");
    Stream::new(MovingTimeWindow {
        dt,
        fold,
        window: Atom::default(),
    })
}
