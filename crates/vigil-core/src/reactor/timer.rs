//! Loop-local timer heap.
//!
//! Deadlines are kept in a binary min-heap with lazy deletion: cancelling or
//! re-arming a timer only bumps its arm sequence, and heap entries whose
//! sequence no longer matches are skipped when they surface.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use fxhash::FxHashMap;

use super::event_loop::EventLoop;
use super::ReactorError;

/// Callback run on the owning loop's thread when a timer fires.
pub(super) type TimerCallback = Box<dyn FnMut(&mut EventLoop)>;

/// Identifies a timer registered on one loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

struct Entry {
    deadline: Instant,
    /// Repeat period; `None` for one-shot timers
    repeat: Option<Duration>,
    /// Arm sequence matching the live heap entry
    seq: u64,
    /// Kept installed, idle, after a one-shot firing
    keep: bool,
    /// Taken out while the callback runs
    callback: Option<TimerCallback>,
}

#[derive(Default)]
pub(super) struct Timers {
    next_id: u64,
    next_seq: u64,
    heap: BinaryHeap<Reverse<(Instant, u64, TimerId)>>,
    entries: FxHashMap<TimerId, Entry>,
}

/// Converts a delay in seconds into a [`Duration`].
pub(super) fn delay(secs: f32) -> Result<Duration, ReactorError> {
    Duration::try_from_secs_f32(secs).map_err(|_| ReactorError::InvalidInterval(secs))
}

/// Converts a repeat period in seconds; zero means "do not repeat".
pub(super) fn repeat(secs: f32) -> Result<Option<Duration>, ReactorError> {
    let period = delay(secs)?;
    Ok((!period.is_zero()).then_some(period))
}

/// Converts a period that must repeat.
pub(super) fn period(secs: f32) -> Result<Duration, ReactorError> {
    repeat(secs)?.ok_or(ReactorError::InvalidInterval(secs))
}

impl Timers {
    fn arm(&mut self, id: TimerId, deadline: Instant) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse((deadline, seq, id)));
        seq
    }

    pub(super) fn insert(
        &mut self,
        deadline: Instant,
        repeat: Option<Duration>,
        keep: bool,
        callback: TimerCallback,
    ) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;

        let seq = self.arm(id, deadline);
        self.entries.insert(
            id,
            Entry {
                deadline,
                repeat,
                seq,
                keep,
                callback: Some(callback),
            },
        );
        id
    }

    pub(super) fn cancel(&mut self, id: TimerId) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Moves a live timer to a new deadline and repeat period.
    pub(super) fn rearm(&mut self, id: TimerId, deadline: Instant, repeat: Option<Duration>) -> bool {
        if !self.entries.contains_key(&id) {
            return false;
        }
        let seq = self.arm(id, deadline);
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.deadline = deadline;
            entry.repeat = repeat;
            entry.seq = seq;
        }
        true
    }

    pub(super) fn contains(&self, id: TimerId) -> bool {
        self.entries.contains_key(&id)
    }

    pub(super) fn len(&self) -> usize {
        self.entries.len()
    }

    fn is_live(&self, seq: u64, id: TimerId) -> bool {
        self.entries
            .get(&id)
            .is_some_and(|e| e.seq == seq && e.callback.is_some())
    }

    /// Time until the earliest live deadline, `None` when no timer is armed.
    pub(super) fn next_timeout(&mut self, now: Instant) -> Option<Duration> {
        while let Some(Reverse((deadline, seq, id))) = self.heap.peek().copied() {
            if self.is_live(seq, id) {
                return Some(deadline.saturating_duration_since(now));
            }
            self.heap.pop();
        }
        None
    }

    /// Pops the next timer due at `now`, lending out its callback.
    pub(super) fn pop_due(&mut self, now: Instant) -> Option<(TimerId, u64, TimerCallback)> {
        while let Some(Reverse((deadline, seq, id))) = self.heap.peek().copied() {
            if !self.is_live(seq, id) {
                self.heap.pop();
                continue;
            }
            if deadline > now {
                return None;
            }
            self.heap.pop();
            let callback = self.entries.get_mut(&id).and_then(|e| e.callback.take());
            if let Some(callback) = callback {
                return Some((id, seq, callback));
            }
        }
        None
    }

    /// Returns a lent callback after it ran.
    ///
    /// A timer cancelled by its own callback is dropped here. A timer its
    /// callback re-armed keeps the new deadline. Otherwise a repeating timer
    /// is scheduled one period later and a one-shot timer is retired, unless
    /// it is kept, in which case it idles until re-armed.
    pub(super) fn restore(&mut self, id: TimerId, seq: u64, callback: TimerCallback, now: Instant) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        entry.callback = Some(callback);

        if entry.seq != seq {
            return;
        }
        match entry.repeat {
            Some(period) => {
                let mut next = entry.deadline + period;
                if next <= now {
                    next = now + period;
                }
                entry.deadline = next;
                let seq = self.arm(id, next);
                if let Some(entry) = self.entries.get_mut(&id) {
                    entry.seq = seq;
                }
            }
            None if entry.keep => {}
            None => {
                self.entries.remove(&id);
            }
        }
    }

    pub(super) fn clear(&mut self) {
        self.heap.clear();
        self.entries.clear();
    }
}
