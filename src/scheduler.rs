//! The discrete event queue driving the simulation.

use crate::error::{SimError, SimResult};
use crate::units::Time;
use crate::GtuId;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Priority levels for events at the same time.
///
/// Earlier variants are processed first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Emergency overrides.
    Hazard,
    /// External and detector triggers.
    Trigger,
    /// The end of a lane change manoeuvre.
    LaneChangeFinish,
    /// Plan expiry.
    Replan,
    /// Creation of new GTUs.
    Spawn,
}

/// An event taken from the queue.
#[derive(Clone, Debug, PartialEq)]
pub struct Scheduled<T> {
    pub time: Time,
    pub priority: Priority,
    /// The GTU the event concerns, or a null ID for events not tied to one.
    pub gtu: GtuId,
    pub payload: T,
}

struct Entry<T> {
    time: Time,
    priority: Priority,
    gtu: GtuId,
    /// Insertion sequence number, the final tie breaker.
    seq: u64,
    payload: T,
}

impl<T> Entry<T> {
    fn key(&self) -> (Time, Priority, GtuId, u64) {
        (self.time, self.priority, self.gtu, self.seq)
    }
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed, so the max-heap pops the earliest event
        self.key().cmp(&other.key()).reverse()
    }
}

/// An event queue ordered by time, then priority, then GTU ID, then
/// insertion order. The order is total, so replays are deterministic.
pub struct Scheduler<T> {
    queue: BinaryHeap<Entry<T>>,
    now: Time,
    seq: u64,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self {
            queue: BinaryHeap::new(),
            now: Time::ZERO,
            seq: 0,
        }
    }
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Default::default()
    }

    /// The time of the last event taken from the queue.
    pub fn now(&self) -> Time {
        self.now
    }

    /// Schedules an event. Scheduling before the current time is an error.
    pub fn schedule(&mut self, time: Time, priority: Priority, gtu: GtuId, payload: T) -> SimResult<()> {
        if !time.is_finite() {
            return Err(SimError::Scheduler(format!("event time {time:?} is not finite")));
        }
        if time < self.now {
            return Err(SimError::Scheduler(format!(
                "event at {time:?} scheduled in the past (now {:?})",
                self.now
            )));
        }
        self.seq += 1;
        self.queue.push(Entry {
            time,
            priority,
            gtu,
            seq: self.seq,
            payload,
        });
        Ok(())
    }

    /// Takes the next event from the queue, advancing the current time to it.
    pub fn pop(&mut self) -> Option<Scheduled<T>> {
        let entry = self.queue.pop()?;
        self.now = entry.time;
        Some(Scheduled {
            time: entry.time,
            priority: entry.priority,
            gtu: entry.gtu,
            payload: entry.payload,
        })
    }

    /// The time and priority of the next event.
    pub fn peek(&self) -> Option<(Time, Priority)> {
        self.queue.peek().map(|e| (e.time, e.priority))
    }

    /// Advances the current time without processing any event. Fails if an
    /// event is due before `time`.
    pub fn advance_to(&mut self, time: Time) -> SimResult<()> {
        if let Some((next, _)) = self.peek() {
            if next < time {
                return Err(SimError::Scheduler(format!(
                    "cannot advance to {time:?} past the event at {next:?}"
                )));
            }
        }
        self.now = self.now.max(time);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use slotmap::{Key, KeyData};

    fn gtu(n: u64) -> GtuId {
        KeyData::from_ffi(n).into()
    }

    #[test]
    fn pops_by_time_then_priority_then_gtu() {
        let mut queue = Scheduler::new();
        queue.schedule(Time::new(1.0), Priority::Replan, gtu(2), "late").unwrap();
        queue.schedule(Time::new(0.5), Priority::Spawn, GtuId::null(), "spawn").unwrap();
        queue.schedule(Time::new(0.5), Priority::Replan, gtu(3), "replan 3").unwrap();
        queue.schedule(Time::new(0.5), Priority::Replan, gtu(1), "replan 1").unwrap();
        queue.schedule(Time::new(0.5), Priority::Hazard, gtu(9), "hazard").unwrap();
        queue.schedule(Time::new(0.5), Priority::Replan, gtu(1), "replan 1 again").unwrap();

        let order: Vec<_> = std::iter::from_fn(|| queue.pop().map(|e| e.payload)).collect();
        assert_eq!(
            order,
            ["hazard", "replan 1", "replan 1 again", "replan 3", "spawn", "late"]
        );
        assert_eq!(queue.now(), Time::new(1.0));
    }

    #[test]
    fn past_events_are_rejected() {
        let mut queue = Scheduler::new();
        queue.schedule(Time::new(2.0), Priority::Replan, gtu(1), ()).unwrap();
        queue.pop();
        let err = queue.schedule(Time::new(1.0), Priority::Hazard, gtu(1), ()).unwrap_err();
        assert!(err.is_fatal());
        assert!(queue.schedule(Time::new(f64::NAN), Priority::Replan, gtu(1), ()).is_err());
        assert!(queue.schedule(Time::new(2.0), Priority::Replan, gtu(1), ()).is_ok());
    }

    #[test]
    fn advance_stops_at_pending_event() {
        let mut queue = Scheduler::new();
        queue.schedule(Time::new(3.0), Priority::Replan, gtu(1), ()).unwrap();
        queue.advance_to(Time::new(2.0)).unwrap();
        assert_eq!(queue.now(), Time::new(2.0));
        assert!(queue.advance_to(Time::new(4.0)).is_err());
        assert_eq!(queue.len(), 1);
    }
}
