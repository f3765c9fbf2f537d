//! # Keyed Merge Combinators
//!
//! [`coalesce`] keeps the latest event per key, [`project`] keeps the latest
//! event per predicate slot. Both evict stale entries and emit twice per
//! triggering event:
//!
//! 1. the fold of the entries that expired in this commit, if any
//! 2. the fold of the entries still live, if any
//!
//! Expiry and replacement are decided inside the same commit, so no reader can
//! see an event that is both retained and reported expired.

use fxhash::FxHashMap;

use super::{Node, Stream};
use crate::atom::Atom;
use crate::event::Event;
use crate::time::Expiry;

fn emit<F>(fold: &F, expired: &[Event], live: &[Event], forward: &mut dyn FnMut(Event))
where
    F: Fn(&[Event]) -> Option<Event>,
{
    if !expired.is_empty() {
        if let Some(folded) = fold(expired) {
            forward(folded);
        }
    }
    if !live.is_empty() {
        if let Some(folded) = fold(live) {
            forward(folded);
        }
    }
}

/// Latest event per key, with expiry.
pub struct Coalesce<K, E, F> {
    key: K,
    expiry: E,
    fold: F,
    events: Atom<FxHashMap<String, Event>>,
}

impl<K, E, F> Node for Coalesce<K, E, F>
where
    K: Fn(&Event) -> String + Send + Sync,
    E: Expiry,
    F: Fn(&[Event]) -> Option<Event> + Send + Sync,
{
    fn process(&self, event: Event, forward: &mut dyn FnMut(Event)) {
        let key = (self.key)(&event);

        let commit = self.events.swap_with(|events| {
            let mut live = FxHashMap::default();
            let mut expired = Vec::new();

            for (k, cached) in events {
                if *k == key {
                    continue;
                }
                if self.expiry.is_expired(cached) {
                    expired.push(cached.clone());
                } else {
                    live.insert(k.clone(), cached.clone());
                }
            }
            live.insert(key.clone(), event.clone());

            (live, expired)
        });

        let live: Vec<Event> = commit.new.values().cloned().collect();
        emit(&self.fold, &commit.output, &live, forward);
    }
}

/// Creates a coalesce keyed by `host` and `service`.
pub fn coalesce<E, F>(expiry: E, fold: F) -> Stream
where
    E: Expiry + 'static,
    F: Fn(&[Event]) -> Option<Event> + Send + Sync + 'static,
{
    coalesce_by(Event::host_service, expiry, fold)
}

/// Creates a coalesce keyed by `key`.
pub fn coalesce_by<K, E, F>(key: K, expiry: E, fold: F) -> Stream
where
    K: Fn(&Event) -> String + Send + Sync + 'static,
    E: Expiry + 'static,
    F: Fn(&[Event]) -> Option<Event> + Send + Sync + 'static,
{
    Stream::new(Coalesce {
        key,
        expiry,
        fold,
        events: Atom::default(),
    })
}

/// Predicate owning one projection slot.
pub type Predicate = Box<dyn Fn(&Event) -> bool + Send + Sync>;

/// Latest event per predicate slot, with expiry.
pub struct Project<E, F> {
    predicates: Vec<Predicate>,
    expiry: E,
    fold: F,
    slots: Atom<Vec<Option<Event>>>,
}

impl<E, F> Node for Project<E, F>
where
    E: Expiry,
    F: Fn(&[Event]) -> Option<Event> + Send + Sync,
{
    fn process(&self, event: Event, forward: &mut dyn FnMut(Event)) {
        let commit = self.slots.swap_with(|slots| {
            let mut next = slots.clone();
            let mut expired = Vec::new();
            let mut matched = false;

            for (slot, predicate) in next.iter_mut().zip(&self.predicates) {
                if !matched && predicate(&event) {
                    *slot = Some(event.clone());
                    matched = true;
                } else if slot.as_ref().is_some_and(|e| self.expiry.is_expired(e)) {
                    expired.extend(slot.take());
                }
            }

            (next, expired)
        });

        let live: Vec<Event> = commit.new.iter().flatten().cloned().collect();
        emit(&self.fold, &commit.output, &live, forward);
    }
}

/// Creates a projection with one slot per predicate.
///
/// An event fills the slot of the first predicate it satisfies; it is not
/// offered to later predicates.
pub fn project<E, F>(predicates: Vec<Predicate>, expiry: E, fold: F) -> Stream
where
    E: Expiry + 'static,
    F: Fn(&[Event]) -> Option<Event> + Send + Sync + 'static,
{
    let slots = Atom::new(vec![None; predicates.len()]);
    Stream::new(Project {
        predicates,
        expiry,
        fold,
        slots,
    })
}
