//! # Stream Module
//!
//! Composable stream nodes and the stateful combinator library.
//!
//! A [`Node`] receives one event and may call its forwarding continuation any
//! number of times, synchronously, before returning. A [`Stream`] owns an ordered
//! chain of nodes: whatever one node forwards becomes the input of the next, and
//! whatever the last node forwards leaves the stream through the caller's sink.
//!
//! ## Node Types
//!
//! - **Stateless**: [`filter`], [`map`], [`tap`], [`sdo`] fan-out
//! - **Windows**: [`fixed_event_window`], [`moving_event_window`],
//!   [`fixed_time_window`], [`moving_time_window`]
//! - **Keyed merge**: [`coalesce`], [`coalesce_by`], [`project`]
//! - **State detection**: [`changed_state`], [`stable`], [`throttle`], [`ddt`]
//! - **Grouping**: [`by`]
//!
//! Every stateful node owns exactly one [`Atom`](crate::atom::Atom). Its update
//! functions are pure; forwarding happens once, after the commit.
//!
//! ## Composition
//!
//! ```rust
//! use vigil_core::event::Event;
//! use vigil_core::stream::{filter, fixed_event_window, fold, sdo, tap};
//!
//! let cpu = filter(|e: &Event| e.service == "cpu")
//!     >> fixed_event_window(3, fold::mean)
//!     >> sdo(vec![
//!         tap(|e: &Event| println!("index {e:?}")),
//!         tap(|e: &Event| println!("graph {e:?}")),
//!     ]);
//!
//! for t in 0..3 {
//!     cpu.push(Event::new("web-1", "cpu").with_metric(0.5).with_time(t));
//! }
//! ```
//!
//! Graphs are acyclic by construction: a node only ever forwards downstream.

mod by;
mod coalesce;
pub mod fold;
mod rate;
mod state;
mod window;

pub use by::{by, By};
pub use coalesce::{coalesce, coalesce_by, project, Coalesce, Predicate, Project};
pub use rate::{ddt, Derivative};
pub use state::{changed_state, stable, throttle, ChangedState, Stable, Throttle};
pub use window::{
    fixed_event_window, fixed_time_window, moving_event_window, moving_time_window,
    FixedEventWindow, FixedTimeWindow, MovingEventWindow, MovingTimeWindow,
};

use std::fmt;
use std::ops::Shr;

use crate::event::Event;

/// A unit of the processing graph.
///
/// Nodes are shared by every thread that feeds their stream, so `process` takes
/// `&self` and any state must live behind an [`Atom`](crate::atom::Atom).
pub trait Node: Send + Sync {
    /// Processes one event, calling `forward` zero or more times.
    fn process(&self, event: Event, forward: &mut dyn FnMut(Event));
}

/// An owned chain of stream nodes.
pub struct Stream {
    nodes: Vec<Box<dyn Node>>,
}

impl Stream {
    /// Creates a stream made of a single node.
    #[must_use]
    pub fn new(node: impl Node + 'static) -> Self {
        Self {
            nodes: vec![Box::new(node)],
        }
    }

    /// Creates a stream from a closure node.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(Event, &mut dyn FnMut(Event)) + Send + Sync + 'static,
    {
        Self::new(FnNode(f))
    }

    /// Appends `next`, so this stream's output becomes `next`'s input.
    #[must_use]
    pub fn then(mut self, next: Stream) -> Self {
        self.nodes.extend(next.nodes);
        self
    }

    /// Pushes an event into the stream, discarding whatever leaves the last node.
    pub fn push(&self, event: Event) {
        self.push_with(event, &mut |_| {});
    }

    /// Pushes an event into the stream, handing every output of the last node
    /// to `sink`.
    pub fn push_with(&self, event: Event, sink: &mut dyn FnMut(Event)) {
        self.run(0, event, sink);
    }

    /// Number of nodes in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the chain has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn run(&self, index: usize, event: Event, sink: &mut dyn FnMut(Event)) {
        match self.nodes.get(index) {
            Some(node) => node.process(event, &mut |out| self.run(index + 1, out, sink)),
            None => sink(event),
        }
    }
}

impl Node for Stream {
    fn process(&self, event: Event, forward: &mut dyn FnMut(Event)) {
        self.push_with(event, forward);
    }
}

impl Shr for Stream {
    type Output = Stream;

    fn shr(self, rhs: Stream) -> Stream {
        self.then(rhs)
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

struct FnNode<F>(F);

impl<F> Node for FnNode<F>
where
    F: Fn(Event, &mut dyn FnMut(Event)) + Send + Sync,
{
    fn process(&self, event: Event, forward: &mut dyn FnMut(Event)) {
        (self.0)(event, forward);
    }
}

/// Fan-out node feeding each event to several independent streams.
struct Fanout {
    branches: Vec<Stream>,
}

impl Node for Fanout {
    fn process(&self, event: Event, forward: &mut dyn FnMut(Event)) {
        if let Some((last, rest)) = self.branches.split_last() {
            for branch in rest {
                branch.push_with(event.clone(), forward);
            }
            last.push_with(event, forward);
        }
    }
}

/// Feeds every event to each of `streams`; their outputs continue downstream.
#[must_use]
pub fn sdo(streams: Vec<Stream>) -> Stream {
    Stream::new(Fanout { branches: streams })
}

/// Forwards only events matching `predicate`.
pub fn filter<P>(predicate: P) -> Stream
where
    P: Fn(&Event) -> bool + Send + Sync + 'static,
{
    Stream::from_fn(move |event, forward| {
        if predicate(&event) {
            forward(event);
        }
    })
}

/// Forwards `f(event)` for every event.
pub fn map<F>(f: F) -> Stream
where
    F: Fn(Event) -> Event + Send + Sync + 'static,
{
    Stream::from_fn(move |event, forward| forward(f(event)))
}

/// Calls `f` on every event and forwards it unchanged.
///
/// This is the adapter for sinks: notification, index and graph backends are
/// handed the event here and must not block the calling thread.
pub fn tap<F>(f: F) -> Stream
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    Stream::from_fn(move |event, forward| {
        f(&event);
        forward(event);
    })
}
