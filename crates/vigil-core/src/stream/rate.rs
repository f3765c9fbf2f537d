//! Rate of change.

use tracing::trace;

use super::{Node, Stream};
use crate::atom::Atom;
use crate::event::Event;

/// Last observed `(metric, time)` pair.
type Sample = Option<(f64, i64)>;

/// Forwards the per-time-unit rate of change of the metric.
pub struct Derivative {
    previous: Atom<Sample>,
}

impl Node for Derivative {
    #[allow(clippy::cast_precision_loss)]
    fn process(&self, event: Event, forward: &mut dyn FnMut(Event)) {
        let (Some(metric), Some(time)) = (event.metric, event.time) else {
            return;
        };

        let commit = self.previous.set(Some((metric, time)));
        let Some((prev_metric, prev_time)) = *commit.old else {
            return;
        };

        let elapsed = match time.checked_sub(prev_time) {
            Some(0) => return,
            Some(elapsed) => elapsed,
            None => {
                trace!(time, prev_time, "ddt: elapsed time out of range");
                return;
            }
        };

        forward(event.with_metric((metric - prev_metric) / elapsed as f64));
    }
}

/// Creates a derivative node.
///
/// The first observation only primes the node. Observations with the same
/// time as their predecessor are suppressed, as are events lacking a metric
/// or a time.
#[must_use]
pub fn ddt() -> Stream {
    Stream::new(Derivative {
        previous: Atom::new(None),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::testing::Collected;

    fn sample(metric: f64, time: i64) -> Event {
        Event::new("h", "requests").with_metric(metric).with_time(time)
    }

    #[test]
    fn test_rate_between_observations() {
        let out = Collected::default();
        let stream = ddt() >> out.sink();

        stream.push(sample(10.0, 0));
        assert_eq!(out.len(), 0);

        stream.push(sample(15.0, 5));
        let events = out.take();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].metric, Some(1.0));
        assert_eq!(events[0].time, Some(5));

        stream.push(sample(40.0, 5));
        assert_eq!(out.len(), 0);
    }

    #[test]
    fn test_negative_rate() {
        let out = Collected::default();
        let stream = ddt() >> out.sink();

        stream.push(sample(20.0, 0));
        stream.push(sample(10.0, 2));
        assert_eq!(out.take()[0].metric, Some(-5.0));
    }

    #[test]
    fn test_ignores_incomplete_events() {
        let out = Collected::default();
        let stream = ddt() >> out.sink();

        stream.push(sample(1.0, 0));
        stream.push(Event::new("h", "requests").with_time(3));
        stream.push(Event::new("h", "requests").with_metric(9.0));
        stream.push(sample(4.0, 3));

        assert_eq!(out.take()[0].metric, Some(1.0));
    }

    #[test]
    fn test_out_of_range_elapsed_time_is_dropped() {
        let out = Collected::default();
        let stream = ddt() >> out.sink();

        stream.push(sample(0.0, i64::MIN));
        stream.push(sample(1.0, i64::MAX));
        assert_eq!(out.len(), 0);

        stream.push(sample(5.0, i64::MAX - 1));
        assert_eq!(out.take()[0].metric, Some(-4.0));
    }
}
