//! Behavioural parameters of a GTU.
//!
//! Parameters are keyed by a typed [`ParameterType`] which declares the
//! quantity, the default value and the constraint a value must satisfy.
//! Values are stored in SI units and checked when they are set and again when
//! they are read, so a bad value fails the planning step that uses it.

use crate::error::{SimError, SimResult};
use crate::units::{Acceleration, Duration, Length, Speed};
use std::collections::HashMap;
use std::marker::PhantomData;

/// A quantity that can be stored as a parameter value.
pub trait Quantity: Copy {
    fn from_si(si: f64) -> Self;
    fn to_si(self) -> f64;
}

macro_rules! impl_quantity {
    ($($ty:ty),*) => {
        $(impl Quantity for $ty {
            fn from_si(si: f64) -> Self {
                <$ty>::new(si)
            }
            fn to_si(self) -> f64 {
                self.si()
            }
        })*
    };
}

impl_quantity!(Length, Speed, Acceleration, Duration);

impl Quantity for f64 {
    fn from_si(si: f64) -> Self {
        si
    }
    fn to_si(self) -> f64 {
        self
    }
}

/// The constraint a parameter value must satisfy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Constraint {
    /// Strictly greater than zero.
    Positive,
    /// Greater than or equal to zero.
    NonNegative,
    /// Within the closed interval.
    Within(f64, f64),
}

impl Constraint {
    fn check(&self, value: f64) -> Result<(), String> {
        if !value.is_finite() {
            return Err(format!("value {value} is not finite"));
        }
        match *self {
            Constraint::Positive if value <= 0.0 => Err(format!("value {value} must be positive")),
            Constraint::NonNegative if value < 0.0 => {
                Err(format!("value {value} must not be negative"))
            }
            Constraint::Within(min, max) if !(min..=max).contains(&value) => {
                Err(format!("value {value} must be within [{min}, {max}]"))
            }
            _ => Ok(()),
        }
    }
}

/// A typed parameter key.
#[derive(Debug)]
pub struct ParameterType<Q> {
    id: &'static str,
    description: &'static str,
    default: f64,
    constraint: Constraint,
    _quantity: PhantomData<Q>,
}

impl<Q: Quantity> ParameterType<Q> {
    pub const fn new(
        id: &'static str,
        description: &'static str,
        default: f64,
        constraint: Constraint,
    ) -> Self {
        Self {
            id,
            description,
            default,
            constraint,
            _quantity: PhantomData,
        }
    }

    pub fn id(&self) -> &'static str {
        self.id
    }

    pub fn description(&self) -> &'static str {
        self.description
    }

    pub fn default_value(&self) -> Q {
        Q::from_si(self.default)
    }

    fn check(&self, value: f64) -> SimResult<()> {
        self.constraint
            .check(value)
            .map_err(|reason| SimError::Parameter {
                key: self.id,
                reason,
            })
    }
}

/// Maximum desired acceleration.
pub const A: ParameterType<Acceleration> =
    ParameterType::new("a", "Maximum desired acceleration", 1.25, Constraint::Positive);
/// Comfortable deceleration.
pub const B: ParameterType<Acceleration> =
    ParameterType::new("b", "Comfortable deceleration", 2.09, Constraint::Positive);
/// Deceleration a lane change may impose on the new follower.
pub const B_SAFE: ParameterType<Acceleration> = ParameterType::new(
    "bSafe",
    "Maximum deceleration imposed on the follower in the target lane",
    3.0,
    Constraint::Positive,
);
/// Physical braking limit.
pub const B_MAX: ParameterType<Acceleration> =
    ParameterType::new("bMax", "Maximum deceleration", 8.0, Constraint::Positive);
/// Stopping distance.
pub const S0: ParameterType<Length> =
    ParameterType::new("s0", "Stopping distance", 3.0, Constraint::Positive);
/// Desired time headway.
pub const T: ParameterType<Duration> =
    ParameterType::new("T", "Desired time headway", 1.2, Constraint::Positive);
/// Speed limit adherence factor.
pub const FSPEED: ParameterType<f64> = ParameterType::new(
    "fSpeed",
    "Desired speed as a factor of the speed limit",
    1.0,
    Constraint::Within(0.1, 2.0),
);
/// Look-ahead distance of perception.
pub const LOOKAHEAD: ParameterType<Length> =
    ParameterType::new("lookahead", "Look-ahead distance", 295.0, Constraint::Positive);
/// Look-back distance of perception.
pub const LOOKBACK: ParameterType<Length> =
    ParameterType::new("lookback", "Look-back distance", 200.0, Constraint::Positive);
/// ACC gap error gain, in 1/s<sup>2</sup>.
pub const ACC_KS: ParameterType<f64> =
    ParameterType::new("kS", "Gap error gain", 0.23, Constraint::NonNegative);
/// ACC speed difference gain, in 1/s.
pub const ACC_KV: ParameterType<f64> =
    ParameterType::new("kV", "Speed error gain", 0.07, Constraint::NonNegative);
/// CACC leader acceleration gain.
pub const CACC_KA: ParameterType<f64> =
    ParameterType::new("kA", "Leader acceleration gain", 0.6, Constraint::Within(0.0, 1.0));

/// A set of parameter values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Parameters {
    values: HashMap<&'static str, f64>,
}

impl Parameters {
    /// Creates an empty parameter set.
    pub fn new() -> Self {
        Default::default()
    }

    /// Creates a parameter set containing the default value of every
    /// parameter used by the car following and lane change models.
    pub fn defaults() -> Self {
        let mut params = Self::new();
        params.set_default(&A);
        params.set_default(&B);
        params.set_default(&B_SAFE);
        params.set_default(&B_MAX);
        params.set_default(&S0);
        params.set_default(&T);
        params.set_default(&FSPEED);
        params.set_default(&LOOKAHEAD);
        params.set_default(&LOOKBACK);
        params.set_default(&ACC_KS);
        params.set_default(&ACC_KV);
        params.set_default(&CACC_KA);
        params
    }

    /// Sets a parameter, rejecting values that violate its constraint.
    pub fn set<Q: Quantity>(&mut self, key: &ParameterType<Q>, value: Q) -> SimResult<()> {
        let si = value.to_si();
        key.check(si)?;
        self.values.insert(key.id, si);
        Ok(())
    }

    /// Sets a parameter to its declared default.
    pub fn set_default<Q: Quantity>(&mut self, key: &ParameterType<Q>) {
        self.values.insert(key.id, key.default);
    }

    /// Gets a parameter value.
    pub fn get<Q: Quantity>(&self, key: &ParameterType<Q>) -> SimResult<Q> {
        let si = *self.values.get(key.id).ok_or_else(|| SimError::Parameter {
            key: key.id,
            reason: "missing".to_string(),
        })?;
        key.check(si)?;
        Ok(Q::from_si(si))
    }

    /// Gets a parameter value, falling back to the default when it is not set.
    pub fn get_or_default<Q: Quantity>(&self, key: &ParameterType<Q>) -> SimResult<Q> {
        match self.values.get(key.id) {
            Some(_) => self.get(key),
            None => Ok(key.default_value()),
        }
    }

    /// Whether the parameter is set.
    pub fn contains<Q>(&self, key: &ParameterType<Q>) -> bool {
        self.values.contains_key(key.id)
    }

    /// Writes a value without checking it. Used to model corrupted input.
    #[cfg(test)]
    pub(crate) fn set_unchecked<Q: Quantity>(&mut self, key: &ParameterType<Q>, value: Q) {
        self.values.insert(key.id, value.to_si());
    }
}
