use crate::network::LateralDirection;
use crate::units::{Acceleration, Duration, Length, Speed, Time};
use crate::LaneId;

/// What a GTU does over the validity of an operational plan.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Segment {
    /// Constant acceleration along the lane.
    Acceleration(Acceleration),
    /// Standing still.
    Stop,
    /// Constant acceleration while moving laterally towards the given side.
    LaneChange {
        acceleration: Acceleration,
        direction: LateralDirection,
    },
}

/// A short-term kinematic commitment of a GTU, valid over `[start, end)`.
///
/// Positions are measured along the lane the plan started on. The speed
/// never becomes negative: a decelerating plan holds at standstill once the
/// GTU has stopped.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OperationalPlan {
    start: Time,
    end: Time,
    lane: LaneId,
    start_position: Length,
    start_speed: Speed,
    segment: Segment,
}

impl OperationalPlan {
    /// Creates a plan starting at `start` and lasting `duration`.
    pub fn new(
        start: Time,
        duration: Duration,
        lane: LaneId,
        start_position: Length,
        start_speed: Speed,
        segment: Segment,
    ) -> Self {
        let start_speed = match segment {
            Segment::Stop => Speed::ZERO,
            _ => start_speed.max(Speed::ZERO),
        };
        Self {
            start,
            end: start + duration,
            lane,
            start_position,
            start_speed,
            segment,
        }
    }

    /// A plan that holds the GTU at `position`.
    pub fn standstill(start: Time, duration: Duration, lane: LaneId, position: Length) -> Self {
        Self::new(start, duration, lane, position, Speed::ZERO, Segment::Stop)
    }

    pub fn start(&self) -> Time {
        self.start
    }

    pub fn end(&self) -> Time {
        self.end
    }

    pub fn lane(&self) -> LaneId {
        self.lane
    }

    pub fn start_position(&self) -> Length {
        self.start_position
    }

    pub fn start_speed(&self) -> Speed {
        self.start_speed
    }

    pub fn segment(&self) -> Segment {
        self.segment
    }

    /// Whether the plan is still valid at `time`.
    pub fn is_valid_at(&self, time: Time) -> bool {
        self.start <= time && time < self.end
    }

    /// The nominal acceleration of the plan.
    pub fn acceleration(&self) -> Acceleration {
        match self.segment {
            Segment::Acceleration(acc) => acc,
            Segment::LaneChange { acceleration, .. } => acceleration,
            Segment::Stop => Acceleration::ZERO,
        }
    }

    /// Time after the start of the plan at which the GTU comes to a standstill.
    fn stop_after(&self) -> Option<Duration> {
        let acc = self.acceleration();
        if self.start_speed.si() <= 0.0 && acc.si() <= 0.0 {
            Some(Duration::ZERO)
        } else if acc.si() < 0.0 {
            Some(self.start_speed / -acc)
        } else {
            None
        }
    }

    fn elapsed(&self, time: Time) -> Duration {
        (time - self.start).max(Duration::ZERO)
    }

    /// The time spent moving between the start of the plan and `time`.
    fn moving(&self, time: Time) -> Duration {
        let dt = self.elapsed(time);
        match self.stop_after() {
            Some(stop) => dt.min(stop),
            None => dt,
        }
    }

    pub fn speed_at(&self, time: Time) -> Speed {
        let dt = self.moving(time);
        (self.start_speed + self.acceleration() * dt).max(Speed::ZERO)
    }

    pub fn position_at(&self, time: Time) -> Length {
        let dt = self.moving(time);
        self.start_position + self.start_speed * dt + self.acceleration() * dt * dt * 0.5
    }

    pub fn acceleration_at(&self, time: Time) -> Acceleration {
        match self.stop_after() {
            Some(stop) if self.elapsed(time) >= stop => Acceleration::ZERO,
            _ => self.acceleration(),
        }
    }

    /// The time after the start of the plan at which the GTU will have
    /// travelled `distance`, or `None` if it stops first.
    pub fn time_to_travel(&self, distance: Length) -> Option<Duration> {
        let d = distance.si();
        let v = self.start_speed.si();
        let a = self.acceleration().si();
        if d <= 0.0 {
            return Some(Duration::ZERO);
        }
        if a == 0.0 {
            return (v > 0.0).then(|| Duration::new(d / v));
        }
        let discr = v * v + 2.0 * a * d;
        if discr < 0.0 {
            return None;
        }
        Some(Duration::new((discr.sqrt() - v) / a))
    }

    /// Ends the plan early, at `time`.
    pub fn truncate(&mut self, time: Time) {
        if self.start <= time && time < self.end {
            self.end = time;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use slotmap::KeyData;

    fn lane() -> LaneId {
        KeyData::from_ffi(1).into()
    }

    #[test]
    fn decelerating_plan_holds_at_standstill() {
        let plan = OperationalPlan::new(
            Time::new(10.0),
            Duration::new(5.0),
            lane(),
            Length::new(100.0),
            Speed::new(4.0),
            Segment::Acceleration(Acceleration::new(-2.0)),
        );
        assert_approx_eq!(plan.speed_at(Time::new(11.0)).si(), 2.0);
        assert_approx_eq!(plan.position_at(Time::new(11.0)).si(), 103.0);
        assert_eq!(plan.speed_at(Time::new(14.0)), Speed::ZERO);
        assert_approx_eq!(plan.position_at(Time::new(14.0)).si(), 104.0);
        assert_eq!(plan.acceleration_at(Time::new(14.0)), Acceleration::ZERO);
        assert_eq!(plan.time_to_travel(Length::new(5.0)), None);
        assert_approx_eq!(plan.time_to_travel(Length::new(3.0)).unwrap().si(), 1.0);
    }

    #[test]
    fn accelerating_plan() {
        let plan = OperationalPlan::new(
            Time::ZERO,
            Duration::new(2.0),
            lane(),
            Length::ZERO,
            Speed::ZERO,
            Segment::Acceleration(Acceleration::new(1.0)),
        );
        assert_approx_eq!(plan.position_at(Time::new(2.0)).si(), 2.0);
        assert_approx_eq!(plan.time_to_travel(Length::new(0.5)).unwrap().si(), 1.0);
        assert!(plan.is_valid_at(Time::new(1.9)));
        assert!(!plan.is_valid_at(Time::new(2.0)));
    }

    #[test]
    fn standstill_and_truncation() {
        let mut plan = OperationalPlan::standstill(Time::ZERO, Duration::new(1.0), lane(), Length::new(7.0));
        assert_eq!(plan.position_at(Time::new(0.5)), Length::new(7.0));
        assert_eq!(plan.time_to_travel(Length::new(1.0)), None);
        plan.truncate(Time::new(0.25));
        assert_eq!(plan.end(), Time::new(0.25));
        plan.truncate(Time::new(0.75));
        assert_eq!(plan.end(), Time::new(0.25));
    }
}
