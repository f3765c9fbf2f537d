//! Folds: functions reducing a slice of events to one derived event.
//!
//! A fold returns `None` when there is nothing to forward. The library folds
//! below derive their result from the latest event in the slice (greatest
//! time, last in slice order on ties) and ignore events without a metric.

use crate::event::Event;

/// Returns the latest event of `events` carrying a metric.
fn latest_with_metric(events: &[Event]) -> Option<&Event> {
    events
        .iter()
        .filter(|e| e.metric.is_some())
        .max_by_key(|e| e.time.unwrap_or(i64::MIN))
}

fn reduce(events: &[Event], f: impl Fn(f64, f64) -> f64) -> Option<Event> {
    let base = latest_with_metric(events)?;
    let metric = events
        .iter()
        .filter_map(|e| e.metric)
        .reduce(f)?;
    Some(base.clone().with_metric(metric))
}

/// Sum of metrics.
#[must_use]
pub fn sum(events: &[Event]) -> Option<Event> {
    reduce(events, |a, b| a + b)
}

/// Product of metrics.
#[must_use]
pub fn product(events: &[Event]) -> Option<Event> {
    reduce(events, |a, b| a * b)
}

/// Largest metric.
#[must_use]
pub fn maximum(events: &[Event]) -> Option<Event> {
    reduce(events, f64::max)
}

/// Smallest metric.
#[must_use]
pub fn minimum(events: &[Event]) -> Option<Event> {
    reduce(events, f64::min)
}

/// Arithmetic mean of metrics.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn mean(events: &[Event]) -> Option<Event> {
    let total = sum(events)?;
    let n = events.iter().filter(|e| e.metric.is_some()).count();
    let metric = total.metric.map(|m| m / n as f64);
    Some(Event { metric, ..total })
}

/// Number of events, metric or not.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn count(events: &[Event]) -> Option<Event> {
    let base = events.iter().max_by_key(|e| e.time.unwrap_or(i64::MIN))?;
    Some(base.clone().with_metric(events.len() as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Event> {
        vec![
            Event::new("h", "s").with_metric(2.0).with_time(1),
            Event::new("h", "s").with_time(5),
            Event::new("h", "s").with_metric(6.0).with_time(3),
        ]
    }

    #[test]
    fn test_numeric_folds() {
        let events = sample();
        assert_eq!(sum(&events).unwrap().metric, Some(8.0));
        assert_eq!(product(&events).unwrap().metric, Some(12.0));
        assert_eq!(maximum(&events).unwrap().metric, Some(6.0));
        assert_eq!(minimum(&events).unwrap().metric, Some(2.0));
        assert_eq!(mean(&events).unwrap().metric, Some(4.0));
    }

    #[test]
    fn test_result_takes_latest_metric_event() {
        let events = sample();
        assert_eq!(sum(&events).unwrap().time, Some(3));
        assert_eq!(count(&events).unwrap().time, Some(5));
        assert_eq!(count(&events).unwrap().metric, Some(3.0));
    }

    #[test]
    fn test_empty_and_metricless_slices() {
        assert!(sum(&[]).is_none());
        assert!(count(&[]).is_none());
        assert!(mean(&[Event::new("h", "s")]).is_none());
    }
}
