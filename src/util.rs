//! Miscellaneous utility structs and functions.

use crate::units::Length;
use std::fmt::Debug;
use std::ops::{Add, Sub};

/// A closed interval on an ordered axis, such as the longitudinal extent
/// of a GTU or the time window of a manoeuvre.
#[derive(Copy, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Interval<T> {
    pub min: T,
    pub max: T,
}

impl<T> Interval<T> {
    /// Creates a new interval.
    pub const fn new(min: T, max: T) -> Self {
        Self { min, max }
    }
}

impl<T: PartialOrd> Interval<T> {
    /// Returns true if this interval overlaps with the other, touching included.
    pub fn overlaps(&self, other: &Self) -> bool {
        self.max >= other.min && other.max >= self.min
    }

    /// Returns true if this interval contains the value.
    pub fn contains(&self, value: T) -> bool {
        value >= self.min && value <= self.max
    }
}

impl<T: Sub<Output = D> + Copy, D> Interval<T> {
    /// Gets the magnitude of the interval.
    pub fn length(&self) -> D {
        self.max - self.min
    }
}

impl Interval<Length> {
    /// Creates an interval with the given centre and half width.
    pub fn disc(centre: Length, radius: Length) -> Self {
        Self {
            min: centre - radius,
            max: centre + radius,
        }
    }
}

impl<T: Add<D, Output = T> + Copy, D: Copy> Add<D> for Interval<T> {
    type Output = Interval<T>;

    fn add(self, rhs: D) -> Self::Output {
        Self {
            min: self.min + rhs,
            max: self.max + rhs,
        }
    }
}

impl<T: Debug> Debug for Interval<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Interval({:?}, {:?})", &self.min, &self.max)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::units::{Duration, Time};

    #[test]
    fn touching_extents_overlap() {
        let a = Interval::disc(Length::new(10.0), Length::new(2.0));
        let b = Interval::disc(Length::new(14.0), Length::new(2.0));
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&(b + Length::new(0.1))));
        assert_eq!(a.length(), Length::new(4.0));
    }

    #[test]
    fn time_window() {
        let window = Interval::new(Time::new(1.0), Time::new(4.0));
        assert!(window.contains(Time::new(4.0)));
        assert_eq!(window.length(), Duration::new(3.0));
    }
}
