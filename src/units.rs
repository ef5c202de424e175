//! Strongly typed physical quantities.
//!
//! Every quantity wraps an `f64` in SI units. Arithmetic that preserves the
//! dimension (or maps it onto another known dimension) is implemented; anything
//! else has to go through [`si`](Length::si) explicitly.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

macro_rules! quantity {
    ($(#[$attr:meta])* $name:ident, $unit:literal) => {
        $(#[$attr])*
        #[derive(Clone, Copy, Default, PartialEq, PartialOrd)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub struct $name(f64);

        impl $name {
            pub const ZERO: $name = $name(0.0);

            /// Creates a quantity from a value in SI units.
            pub const fn new(si: f64) -> Self {
                Self(si)
            }

            /// The value in SI units.
            pub const fn si(self) -> f64 {
                self.0
            }

            pub fn abs(self) -> Self {
                Self(self.0.abs())
            }

            pub fn min(self, other: Self) -> Self {
                Self(f64::min(self.0, other.0))
            }

            pub fn max(self, other: Self) -> Self {
                Self(f64::max(self.0, other.0))
            }

            pub fn is_finite(self) -> bool {
                self.0.is_finite()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:.4} {}", self.0, $unit)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:.3} {}", self.0, $unit)
            }
        }

        impl Add for $name {
            type Output = $name;
            fn add(self, rhs: $name) -> $name {
                $name(self.0 + rhs.0)
            }
        }

        impl Sub for $name {
            type Output = $name;
            fn sub(self, rhs: $name) -> $name {
                $name(self.0 - rhs.0)
            }
        }

        impl AddAssign for $name {
            fn add_assign(&mut self, rhs: $name) {
                self.0 += rhs.0;
            }
        }

        impl SubAssign for $name {
            fn sub_assign(&mut self, rhs: $name) {
                self.0 -= rhs.0;
            }
        }

        impl Neg for $name {
            type Output = $name;
            fn neg(self) -> $name {
                $name(-self.0)
            }
        }

        impl Mul<f64> for $name {
            type Output = $name;
            fn mul(self, rhs: f64) -> $name {
                $name(self.0 * rhs)
            }
        }

        impl Div<f64> for $name {
            type Output = $name;
            fn div(self, rhs: f64) -> $name {
                $name(self.0 / rhs)
            }
        }

        /// Dimensionless ratio of two quantities of the same kind.
        impl Div for $name {
            type Output = f64;
            fn div(self, rhs: $name) -> f64 {
                self.0 / rhs.0
            }
        }
    };
}

/// Maps `$lhs * $rhs = $out` (and the commuted form).
macro_rules! product {
    ($lhs:ident * $rhs:ident = $out:ident) => {
        impl Mul<$rhs> for $lhs {
            type Output = $out;
            fn mul(self, rhs: $rhs) -> $out {
                $out(self.0 * rhs.0)
            }
        }

        impl Mul<$lhs> for $rhs {
            type Output = $out;
            fn mul(self, rhs: $lhs) -> $out {
                $out(self.0 * rhs.0)
            }
        }

        impl Div<$rhs> for $out {
            type Output = $lhs;
            fn div(self, rhs: $rhs) -> $lhs {
                $lhs(self.0 / rhs.0)
            }
        }

        impl Div<$lhs> for $out {
            type Output = $rhs;
            fn div(self, rhs: $lhs) -> $rhs {
                $rhs(self.0 / rhs.0)
            }
        }
    };
}

quantity!(
    /// A length or distance, in m.
    Length,
    "m"
);
quantity!(
    /// A speed, in m/s.
    Speed,
    "m/s"
);
quantity!(
    /// An acceleration, in m/s<sup>2</sup>.
    Acceleration,
    "m/s2"
);
quantity!(
    /// A relative time span, in s.
    Duration,
    "s"
);

product!(Speed * Duration = Length);
product!(Acceleration * Duration = Speed);

impl Speed {
    /// Creates a speed from a value in km/h.
    pub fn from_kmh(kmh: f64) -> Self {
        Self(kmh / 3.6)
    }
}

/// An absolute simulation time, in s since the start of the simulation.
///
/// Unlike the relative quantities, time is totally ordered so it can key
/// the event queue. Construct it only from finite values.
#[derive(Clone, Copy, Default, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Time(f64);

impl Time {
    pub const ZERO: Time = Time(0.0);

    pub const fn new(si: f64) -> Self {
        Self(si)
    }

    pub const fn si(self) -> f64 {
        self.0
    }

    pub fn is_finite(self) -> bool {
        self.0.is_finite()
    }
}

impl Eq for Time {}

impl Ord for Time {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Debug for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t={:.3}s", self.0)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3} s", self.0)
    }
}

impl Add<Duration> for Time {
    type Output = Time;
    fn add(self, rhs: Duration) -> Time {
        Time(self.0 + rhs.si())
    }
}

impl Sub for Time {
    type Output = Duration;
    fn sub(self, rhs: Time) -> Duration {
        Duration::new(self.0 - rhs.0)
    }
}
