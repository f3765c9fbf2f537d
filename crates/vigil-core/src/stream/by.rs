//! # Grouping
//!
//! [`by`] partitions events by a composite key and routes each partition
//! through its own instance of a sub-stream, so per-host (or per-anything)
//! state never mixes.

use std::sync::{Arc, OnceLock};

use fxhash::FxHashMap;
use tracing::debug;

use super::{Node, Stream};
use crate::atom::Atom;
use crate::event::Event;

/// A key's instance slot; filled once, after the key is committed.
type Slot = Arc<OnceLock<Stream>>;
type Instances = FxHashMap<String, Slot>;

/// Routes events to one sub-stream instance per key.
pub struct By<F> {
    keys: Vec<String>,
    factory: F,
    instances: Atom<Instances>,
}

impl<F> By<F>
where
    F: Fn() -> Stream + Send + Sync,
{
    fn key_of(&self, event: &Event) -> String {
        let mut key = String::new();
        for field in &self.keys {
            key.push_str(&event.field(field));
            key.push(' ');
        }
        key
    }

    /// Returns the slot for `key`, claiming an empty one if none exists.
    ///
    /// Racing first events for one key all end up on the committed slot.
    /// The update only inserts an empty slot, so it stays pure under retry.
    fn slot(&self, key: &str) -> Slot {
        if let Some(slot) = self.instances.load().get(key) {
            return Arc::clone(slot);
        }

        let commit = self.instances.swap_with(|instances| {
            if let Some(existing) = instances.get(key) {
                return (instances.clone(), Arc::clone(existing));
            }
            let slot = Slot::default();
            let mut next = instances.clone();
            next.insert(key.to_owned(), Arc::clone(&slot));
            (next, slot)
        });

        if commit.old.len() != commit.new.len() {
            debug!(key, instances = commit.new.len(), "by: created keyed stream");
        }
        commit.output
    }

    /// Number of keys seen so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.load().len()
    }

    /// Returns true if no key has been seen yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.load().is_empty()
    }
}

impl<F> Node for By<F>
where
    F: Fn() -> Stream + Send + Sync,
{
    fn process(&self, event: Event, forward: &mut dyn FnMut(Event)) {
        if self.keys.is_empty() {
            return;
        }

        let key = self.key_of(&event);
        let slot = self.slot(&key);
        // Only the committed slot is ever built; late arrivals wait for it.
        slot.get_or_init(&self.factory).push_with(event, forward);
    }
}

/// Groups events by the values of `keys`, building one sub-stream per
/// distinct key with `factory`.
///
/// `factory` runs exactly once per key, on the first thread to reach the
/// committed slot. Outputs of every instance continue downstream of the `by` node.
/// With no keys every event is dropped.
pub fn by<K, F>(keys: &[K], factory: F) -> Stream
where
    K: AsRef<str>,
    F: Fn() -> Stream + Send + Sync + 'static,
{
    Stream::new(By {
        keys: keys.iter().map(|k| k.as_ref().to_owned()).collect(),
        factory,
        instances: Atom::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::testing::{times, Collected};
    use crate::stream::{fixed_event_window, map};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    fn last(events: &[Event]) -> Option<Event> {
        events.last().cloned()
    }

    #[test]
    fn test_by_isolates_keys() {
        let out = Collected::default();
        let stream = by(&["host"], || fixed_event_window(2, last)) >> out.sink();

        stream.push(Event::new("h1", "cpu").with_time(1));
        stream.push(Event::new("h2", "cpu").with_time(2));
        assert_eq!(out.len(), 0);

        stream.push(Event::new("h1", "cpu").with_time(3));
        let events = out.take();
        assert_eq!(times(&events), vec![3]);
        assert_eq!(events[0].host, "h1");

        stream.push(Event::new("h2", "cpu").with_time(4));
        assert_eq!(out.take()[0].host, "h2");
    }

    #[test]
    fn test_factory_runs_once_per_key() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&built);
        let node = By {
            keys: vec!["host".to_string(), "service".to_string()],
            factory: move || {
                counter.fetch_add(1, Ordering::SeqCst);
                map(|e| e)
            },
            instances: Atom::default(),
        };

        for host in ["a", "b", "a", "a", "b"] {
            node.process(Event::new(host, "cpu"), &mut |_| {});
        }
        node.process(Event::new("a", "mem"), &mut |_| {});

        assert_eq!(built.load(Ordering::SeqCst), 3);
        assert_eq!(node.len(), 3);
    }

    #[test]
    fn test_factory_runs_once_for_racing_first_events() {
        const THREADS: usize = 8;
        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&built);
        let stream = Arc::new(by(&["host"], move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(2));
            map(|e| e)
        }));
        let start = Arc::new(Barrier::new(THREADS));

        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                let (stream, start) = (Arc::clone(&stream), Arc::clone(&start));
                std::thread::spawn(move || {
                    start.wait();
                    let mut seen = 0;
                    stream.push_with(Event::new("h1", "cpu"), &mut |_| seen += 1);
                    seen
                })
            })
            .collect();
        let forwarded: usize = workers.into_iter().map(|w| w.join().unwrap()).sum();

        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert_eq!(forwarded, THREADS);
    }

    #[test]
    fn test_by_without_keys_drops() {
        let out = Collected::default();
        let stream = by::<&str, _>(&[], || map(|e| e)) >> out.sink();

        stream.push(Event::new("h", "s"));
        assert_eq!(out.len(), 0);
    }

    #[test]
    fn test_missing_fields_group_together() {
        let out = Collected::default();
        let stream = by(&["rack"], || fixed_event_window(2, last)) >> out.sink();

        stream.push(Event::new("h1", "s"));
        stream.push(Event::new("h2", "s"));
        assert_eq!(out.len(), 1);
    }
}
