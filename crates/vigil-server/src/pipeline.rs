//! The default processing graph run by the server.
//!
//! Three branches see every ingested event:
//!
//! - per host and service, state changes away from the previous state,
//!   throttled
//! - per host and service, critical states, reported on transition and then
//!   at most once per `stable_secs` while they hold
//! - fleet wide, the number of hosts currently critical crossing
//!   `critical_hosts`

use std::sync::Arc;

use tracing::{info, warn};
use vigil_core::stream::{by, changed_state, coalesce, filter, sdo, stable, tap, throttle};
use vigil_core::time::{Clock, Expiry, TtlExpiry};
use vigil_core::{Event, Stream};

use crate::config::PipelineConfig;

const CRITICAL: &str = "critical";
const OK: &str = "ok";

/// What a notice reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// A host and service changed state
    StateChanged,
    /// A host and service is critical
    Critical,
    /// The fleet-wide critical host count crossed its threshold
    CriticalHosts,
}

/// Receives notices; called on the loop thread that processed the event.
pub type Notify = Arc<dyn Fn(Notice, &Event) + Send + Sync>;

/// Notifier that writes notices to the log.
pub fn log_notify() -> Notify {
    Arc::new(|notice: Notice, event: &Event| match notice {
        Notice::StateChanged => info!(
            host = %event.host,
            service = %event.service,
            state = %event.state,
            "state changed"
        ),
        Notice::Critical => warn!(
            host = %event.host,
            service = %event.service,
            "critical"
        ),
        Notice::CriticalHosts => warn!(
            hosts = event.metric.unwrap_or_default(),
            state = %event.state,
            "critical host count"
        ),
    })
}

fn notice(kind: Notice, notify: &Notify) -> Stream {
    let notify = Arc::clone(notify);
    tap(move |event: &Event| notify(kind, event))
}

/// Folds the latest event per host and service into one critical host count.
///
/// Returns `None` when every event has expired, so an expiry batch never
/// reports a count.
fn count_critical<E: Expiry>(expiry: &E, threshold: usize, events: &[Event]) -> Option<Event> {
    let live: Vec<&Event> = events.iter().filter(|e| !expiry.is_expired(e)).collect();
    if live.is_empty() {
        return None;
    }

    let critical = live.iter().filter(|e| e.state == CRITICAL).count();
    let state = if critical >= threshold { CRITICAL } else { OK };
    let mut count = Event::new("vigil", "critical hosts")
        .with_state(state)
        .with_metric(critical as f64);
    count.time = live.iter().filter_map(|e| e.time).max();
    Some(count)
}

/// Builds the default graph; `clock` drives event expiry.
pub fn build<C>(config: &PipelineConfig, clock: C, notify: Notify) -> Stream
where
    C: Clock + Clone + 'static,
{
    let (throttle_count, throttle_secs) = (config.throttle_count, config.throttle_secs);
    let changes = {
        let notify = Arc::clone(&notify);
        by(&["host", "service"], move || {
            changed_state(OK)
                >> throttle(throttle_count, throttle_secs)
                >> notice(Notice::StateChanged, &notify)
        })
    };

    let stable_secs = config.stable_secs;
    let stable_critical = {
        let notify = Arc::clone(&notify);
        by(&["host", "service"], move || {
            stable(stable_secs)
                >> filter(|e: &Event| e.state == CRITICAL)
                >> throttle(1, stable_secs.max(1))
                >> notice(Notice::Critical, &notify)
        })
    };

    let expiry = TtlExpiry::new(clock, config.default_ttl_secs);
    let threshold = config.critical_hosts;
    let fold_expiry = expiry.clone();
    let fleet = coalesce(expiry, move |events: &[Event]| {
        count_critical(&fold_expiry, threshold, events)
    }) >> changed_state(OK)
        >> notice(Notice::CriticalHosts, &notify);

    sdo(vec![changes, stable_critical, fleet])
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use vigil_core::time::ManualClock;

    type Notices = Arc<Mutex<Vec<(Notice, String, String)>>>;

    fn recorder() -> (Notify, Notices) {
        let seen: Notices = Arc::default();
        let sink = Arc::clone(&seen);
        let notify: Notify = Arc::new(move |notice: Notice, event: &Event| {
            sink.lock()
                .push((notice, event.host.clone(), event.state.clone()));
        });
        (notify, seen)
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            throttle_count: 2,
            throttle_secs: 60,
            stable_secs: 10,
            critical_hosts: 2,
            default_ttl_secs: 60.0,
        }
    }

    fn ev(host: &str, state: &str, time: i64) -> Event {
        Event::new(host, "cpu").with_state(state).with_time(time)
    }

    fn of(seen: &Notices, kind: Notice) -> Vec<(String, String)> {
        seen.lock()
            .iter()
            .filter(|(n, _, _)| *n == kind)
            .map(|(_, host, state)| (host.clone(), state.clone()))
            .collect()
    }

    #[test]
    fn test_state_changes_are_throttled_per_host() {
        let clock = Arc::new(ManualClock::new(0));
        let (notify, seen) = recorder();
        let graph = build(&config(), clock, notify);

        for (i, state) in ["critical", "ok", "critical", "ok"].iter().enumerate() {
            graph.push(ev("a", state, i as i64));
        }
        graph.push(ev("b", "critical", 5));

        assert_eq!(
            of(&seen, Notice::StateChanged),
            vec![
                ("a".to_string(), "critical".to_string()),
                ("a".to_string(), "ok".to_string()),
                ("b".to_string(), "critical".to_string()),
            ]
        );
    }

    #[test]
    fn test_critical_repeats_once_per_stable_interval() {
        let clock = Arc::new(ManualClock::new(0));
        let (notify, seen) = recorder();
        let graph = build(&config(), clock, notify);

        for time in [0, 4, 10, 12] {
            graph.push(ev("a", "critical", time));
        }
        graph.push(ev("a", "ok", 13));

        // The transition at 0, then the release at 10; 4 and 12 are throttled.
        let critical = vec![("a".to_string(), "critical".to_string())];
        assert_eq!(of(&seen, Notice::Critical), [critical.clone(), critical].concat());
    }

    #[test]
    fn test_critical_host_count_crosses_threshold() {
        let clock = Arc::new(ManualClock::new(0));
        let (notify, seen) = recorder();
        let graph = build(&config(), Arc::clone(&clock), notify);

        graph.push(ev("a", "critical", 0));
        assert!(of(&seen, Notice::CriticalHosts).is_empty());

        graph.push(ev("b", "critical", 1));
        graph.push(ev("c", "ok", 2));
        graph.push(ev("b", "ok", 3));

        assert_eq!(
            of(&seen, Notice::CriticalHosts),
            vec![
                ("vigil".to_string(), "critical".to_string()),
                ("vigil".to_string(), "ok".to_string()),
            ]
        );
    }

    #[test]
    fn test_expired_critical_hosts_stop_counting() {
        let clock = Arc::new(ManualClock::new(0));
        let (notify, seen) = recorder();
        let graph = build(&config(), Arc::clone(&clock), notify);

        graph.push(ev("a", "critical", 0));
        graph.push(ev("b", "critical", 0));
        assert_eq!(of(&seen, Notice::CriticalHosts).len(), 1);

        // Both critical events outlive their ttl; a fresh ok event recounts.
        clock.set(100);
        graph.push(ev("c", "ok", 100));

        let fleet = of(&seen, Notice::CriticalHosts);
        assert_eq!(fleet.last(), Some(&("vigil".to_string(), "ok".to_string())));
    }

    #[test]
    fn test_count_ignores_expired_events() {
        let clock = Arc::new(ManualClock::new(100));
        let expiry = TtlExpiry::new(Arc::clone(&clock), 10.0);

        let events = vec![ev("a", "critical", 0), ev("b", "critical", 95)];
        let count = count_critical(&expiry, 1, &events).unwrap();
        assert_eq!(count.metric, Some(1.0));
        assert_eq!(count.state, "critical");
        assert_eq!(count.time, Some(95));

        assert!(count_critical(&expiry, 1, &events[..1]).is_none());
    }
}
