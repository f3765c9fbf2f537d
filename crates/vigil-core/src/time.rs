//! # Time Module
//!
//! Clocks and the expiry predicates used by keyed stream state.
//!
//! Windows, stability and throttling run on event time carried by the events
//! themselves. Only expiry compares an event against a clock, because "stale"
//! means nothing new arrived for a key while real time moved on.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::event::Event;

/// State label that marks an event as expired regardless of its ttl.
pub const EXPIRED_STATE: &str = "expired";

/// Source of the current time in seconds.
pub trait Clock: Send + Sync {
    /// Current time in seconds.
    fn now(&self) -> i64;
}

/// Wall clock, seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
    }
}

/// Manually driven clock.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Creates a clock reading `now`.
    #[must_use]
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    /// Sets the current time.
    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::Release);
    }

    /// Moves the clock forward by `secs`.
    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::Acquire)
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now(&self) -> i64 {
        (**self).now()
    }
}

/// Staleness predicate for cached events.
pub trait Expiry: Send + Sync {
    /// Returns true if `event` should be evicted from keyed state.
    fn is_expired(&self, event: &Event) -> bool;
}

impl<F> Expiry for F
where
    F: Fn(&Event) -> bool + Send + Sync,
{
    fn is_expired(&self, event: &Event) -> bool {
        self(event)
    }
}

/// Expires events whose `time + ttl` lies in the past.
///
/// Events in the `expired` state are always expired. Events without a time
/// never expire by ttl.
#[derive(Debug, Clone)]
pub struct TtlExpiry<C> {
    clock: C,
    default_ttl: f32,
}

impl<C: Clock> TtlExpiry<C> {
    /// Creates an expiry reading `clock`, using `default_ttl` seconds for
    /// events that carry no ttl.
    #[must_use]
    pub fn new(clock: C, default_ttl: f32) -> Self {
        Self { clock, default_ttl }
    }
}

impl<C: Clock> Expiry for TtlExpiry<C> {
    #[allow(clippy::cast_precision_loss)]
    fn is_expired(&self, event: &Event) -> bool {
        if event.state == EXPIRED_STATE {
            return true;
        }

        let Some(time) = event.time else {
            return false;
        };

        let ttl = f64::from(event.ttl.unwrap_or(self.default_ttl));
        (time as f64) + ttl < self.clock.now() as f64
    }
}

/// Expiry that never fires.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverExpire;

impl Expiry for NeverExpire {
    fn is_expired(&self, _event: &Event) -> bool {
        false
    }
}
