use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Debug)]
struct Timer {
    period: Duration,
    next: DateTime<Utc>,
}

/// Periodic timers for a single-threaded event loop.
///
/// Nothing runs on its own: the loop asks for [`Scheduler::due`] timers and
/// dispatches them. A cancelled timer is forgotten immediately and is never
/// reported as due again.
#[derive(Debug, Default)]
pub struct Scheduler {
    next_id: u64,
    timers: BTreeMap<TimerId, Timer>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules a timer firing every `period`, first at `now + period`.
    /// Periods are kept to whole milliseconds, at least one.
    pub fn every(&mut self, period: Duration, now: DateTime<Utc>) -> TimerId {
        let period = Duration::milliseconds(period.num_milliseconds().max(1));
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.timers.insert(
            id,
            Timer {
                period,
                next: now + period,
            },
        );
        id
    }

    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.timers.remove(&id).is_some()
    }

    pub fn is_active(&self, id: TimerId) -> bool {
        self.timers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Timers whose deadline has passed, earliest first. Each fires once per
    /// call however many periods were missed; the next deadline stays on the
    /// timer's original cadence.
    ///
    /// A handler may cancel a timer that is later in the returned list, so
    /// dispatchers check [`Scheduler::is_active`] before running each one.
    pub fn due(&mut self, now: DateTime<Utc>) -> Vec<TimerId> {
        let mut fired: Vec<(DateTime<Utc>, TimerId)> = Vec::new();
        for (id, timer) in self.timers.iter_mut() {
            if timer.next > now {
                continue;
            }
            fired.push((timer.next, *id));
            let period_ms = timer.period.num_milliseconds();
            let missed = (now - timer.next).num_milliseconds() / period_ms;
            timer.next += Duration::milliseconds((missed + 1).saturating_mul(period_ms));
        }
        fired.sort();
        fired.into_iter().map(|(_, id)| id).collect()
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.timers.values().map(|t| t.next).min()
    }
}
