//! # State Detection Combinators
//!
//! Nodes that forward events depending on how the state label or the event
//! rate evolves: [`changed_state`], [`stable`] and [`throttle`].

use smallvec::SmallVec;
use tracing::trace;

use super::{Node, Stream};
use crate::atom::Atom;
use crate::event::Event;

/// Forwards events whose state differs from the previous event's state.
pub struct ChangedState {
    state: Atom<String>,
}

impl Node for ChangedState {
    fn process(&self, event: Event, forward: &mut dyn FnMut(Event)) {
        let commit = self.state.set(event.state.clone());
        if *commit.old != event.state {
            forward(event);
        }
    }
}

/// Creates a change detector that assumes `initial` as the previous state.
pub fn changed_state(initial: impl Into<String>) -> Stream {
    Stream::new(ChangedState {
        state: Atom::new(initial.into()),
    })
}

#[derive(Debug, Clone, Default)]
struct StableState {
    /// State of the current run, unset until the first event
    state: Option<String>,
    /// Events of the current run not yet proven stable
    buffer: Vec<Event>,
    /// Time the current run started
    start: i64,
}

/// Events to forward after a commit, in order.
type Flush = SmallVec<[Event; 2]>;

/// Forwards events once their state has held for at least `dt`.
pub struct Stable {
    dt: i64,
    run: Atom<StableState>,
}

impl Node for Stable {
    fn process(&self, event: Event, forward: &mut dyn FnMut(Event)) {
        let Some(time) = event.time else {
            trace!(host = %event.host, service = %event.service, "stable: event without time");
            return;
        };

        let commit = self.run.swap_with(|run| {
            let mut flush = Flush::new();

            // A new state starts a new run; the transition itself goes downstream.
            if run.state.as_deref() != Some(event.state.as_str()) {
                let next = StableState {
                    state: Some(event.state.clone()),
                    buffer: Vec::new(),
                    start: time,
                };
                flush.push(event.clone());
                return (next, flush);
            }

            if time < run.start {
                return (run.clone(), flush);
            }

            let mut next = run.clone();
            if time < run.start.saturating_add(self.dt) {
                next.buffer.push(event.clone());
                return (next, flush);
            }

            flush.extend(next.buffer.drain(..));
            flush.push(event.clone());
            (next, flush)
        });

        if commit.output.is_empty() {
            trace!(time, "stable: nothing released");
        }
        for event in commit.output {
            forward(event);
        }
    }
}

/// Creates a stability detector over `dt` time units.
///
/// The first event of a new state is forwarded immediately to mark the
/// transition. Further events in that state are held back until an event at
/// or past `start + dt` arrives, which releases them together with itself.
/// Events older than the run start are dropped.
///
/// # Panics
///
/// Panics if `dt` is negative.
#[must_use]
pub fn stable(dt: i64) -> Stream {
    assert!(dt >= 0, "Stability duration must not be negative");
    Stream::new(Stable {
        dt,
        run: Atom::default(),
    })
}

#[derive(Debug, Clone, Copy, Default)]
struct ThrottleState {
    /// Events forwarded in the current interval
    forwarded: usize,
    /// End of the current interval, unset until the first event
    interval_end: Option<i64>,
}

/// Forwards at most `n` events per `dt` interval of event time.
pub struct Throttle {
    n: usize,
    dt: i64,
    quota: Atom<ThrottleState>,
}

impl Node for Throttle {
    fn process(&self, event: Event, forward: &mut dyn FnMut(Event)) {
        let Some(time) = event.time else {
            return;
        };

        let commit = self.quota.swap_with(|quota| {
            let mut next = *quota;
            if next.interval_end.map_or(true, |end| time >= end) {
                next.interval_end = Some(time.saturating_add(self.dt));
                next.forwarded = 0;
            }

            let pass = next.forwarded < self.n;
            if pass {
                next.forwarded += 1;
            }
            (next, pass)
        });

        if commit.output {
            forward(event);
        }
    }
}

/// Creates a throttle letting `n` events through per `dt` time units.
///
/// An interval opens with the first event after the previous one closed and
/// lasts `dt`. Events over quota are dropped.
///
/// # Panics
///
/// Panics if `dt` is not positive.
#[must_use]
pub fn throttle(n: usize, dt: i64) -> Stream {
    assert!(dt > 0, "Throttle interval must be positive");
    Stream::new(Throttle {
        n,
        dt,
        quota: Atom::default(),
    })
}
