use crate::error::{SimError, SimResult};
use crate::parameters::{self, Parameters};
use crate::perception::{Headway, Relation};
use crate::units::{Acceleration, Length, Speed};
use log::warn;

/// The longitudinal acceleration model of a GTU.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CarFollowingModel {
    /// The IDM+ of Schakel et al.
    #[default]
    IdmPlus,
    /// The intelligent driver model.
    Idm,
    /// Adaptive cruise control: a linear controller on gap and speed errors.
    Acc,
    /// Cooperative adaptive cruise control: ACC plus a feed forward of the
    /// leader's acceleration, when it can be observed.
    Cacc,
}

/// The parameter values used by one evaluation of a model, in SI units.
struct ModelParams {
    /// Maximum desired acceleration.
    a: f64,
    /// Comfortable deceleration.
    b: f64,
    /// Maximum deceleration.
    b_max: f64,
    /// Stopping distance.
    s0: f64,
    /// Desired time headway.
    t: f64,
    ks: f64,
    kv: f64,
    ka: f64,
}

impl ModelParams {
    fn read(params: &Parameters) -> SimResult<Self> {
        Ok(Self {
            a: params.get(&parameters::A)?.si(),
            b: params.get(&parameters::B)?.si(),
            b_max: params.get(&parameters::B_MAX)?.si(),
            s0: params.get(&parameters::S0)?.si(),
            t: params.get(&parameters::T)?.si(),
            ks: params.get_or_default(&parameters::ACC_KS)?,
            kv: params.get_or_default(&parameters::ACC_KV)?,
            ka: params.get_or_default(&parameters::CACC_KA)?,
        })
    }

    /// Bounds an acceleration to `[-b_max, a]`, braking maximally if it isn't a number.
    fn bound(&self, acc: f64, what: &str) -> Acceleration {
        if acc.is_nan() {
            let err = SimError::numeric("car following", format!("{what} is not a number"));
            warn!("{err}; applying maximum deceleration");
            return Acceleration::new(-self.b_max);
        }
        Acceleration::new(acc.clamp(-self.b_max, self.a))
    }
}

impl CarFollowingModel {
    /// The speed the GTU wants to drive at: the speed limit scaled by the
    /// GTU's speed factor, but no more than the limit or its maximum speed.
    pub fn desired_speed(params: &Parameters, speed_limit: Speed, max_speed: Speed) -> SimResult<Speed> {
        let factor = params.get(&parameters::FSPEED)?;
        Ok((speed_limit * factor).min(speed_limit).min(max_speed))
    }

    /// Computes the acceleration of a GTU driving at `speed` behind the given
    /// leaders. Only the most restrictive leader governs. Followers are ignored.
    pub fn accelerate(
        &self,
        params: &Parameters,
        speed: Speed,
        max_speed: Speed,
        leaders: &[Headway],
        speed_limit: Speed,
    ) -> SimResult<Acceleration> {
        let p = ModelParams::read(params)?;
        let v0 = Self::desired_speed(params, speed_limit, max_speed)?.si();
        let v = speed.si();
        let acc = leaders
            .iter()
            .filter(|h| h.relation != Relation::Follower)
            .map(|h| {
                let raw = self.follow(&p, v, v0, h.distance.si(), h.speed.si(), h.acceleration);
                p.bound(raw, "acceleration towards leader")
            })
            .reduce(Acceleration::min)
            .unwrap_or_else(|| p.bound(self.free(&p, v, v0), "free flow acceleration"));
        Ok(acc)
    }

    /// Computes the acceleration of a GTU towards a single obstacle at net
    /// distance `gap` moving at `obstacle_speed`.
    pub fn follow_obstacle(
        &self,
        params: &Parameters,
        speed: Speed,
        max_speed: Speed,
        gap: Length,
        obstacle_speed: Speed,
        speed_limit: Speed,
    ) -> SimResult<Acceleration> {
        let p = ModelParams::read(params)?;
        let v0 = Self::desired_speed(params, speed_limit, max_speed)?.si();
        let raw = self.follow(&p, speed.si(), v0, gap.si(), obstacle_speed.si(), None);
        Ok(p.bound(raw, "acceleration towards obstacle"))
    }

    /// Like [`Self::follow_obstacle`], but not limited to `[-b_max, a]`.
    /// The result may be infinite or NaN.
    pub fn follow_obstacle_unbounded(
        &self,
        params: &Parameters,
        speed: Speed,
        max_speed: Speed,
        gap: Length,
        obstacle_speed: Speed,
        speed_limit: Speed,
    ) -> SimResult<Acceleration> {
        let p = ModelParams::read(params)?;
        let v0 = Self::desired_speed(params, speed_limit, max_speed)?.si();
        let raw = self.follow(&p, speed.si(), v0, gap.si(), obstacle_speed.si(), None);
        Ok(Acceleration::new(raw))
    }

    /// The acceleration needed to stop before a line `gap` ahead of the front of the GTU.
    pub fn stop_at_line(
        &self,
        params: &Parameters,
        speed: Speed,
        max_speed: Speed,
        gap: Length,
        speed_limit: Speed,
    ) -> SimResult<Acceleration> {
        self.follow_obstacle(params, speed, max_speed, gap, Speed::ZERO, speed_limit)
    }

    /// The acceleration needed to comfortably slow down to the speed limit
    /// `distance` ahead, or `None` if no braking is required yet.
    pub fn approach_speed_limit(
        &self,
        params: &Parameters,
        speed: Speed,
        max_speed: Speed,
        speed_limit: Speed,
        distance: Length,
    ) -> SimResult<Option<Acceleration>> {
        let p = ModelParams::read(params)?;
        let target = Self::desired_speed(params, speed_limit, max_speed)?.si();
        let v = speed.si();
        if distance.si() <= 0.0 {
            return Ok((v > target).then(|| p.bound(self.free(&p, v, target), "speed limit")));
        }
        let comf_acc = -p.b;
        let this_acc = (target * target - v * v) / (2.0 * distance.si());
        if this_acc <= comf_acc {
            Ok(Some(p.bound(f64::max(2.0 * comf_acc, this_acc), "speed limit")))
        } else {
            Ok(None)
        }
    }

    /// The comfortable stopping distance of a GTU driving at `speed`.
    pub fn stopping_distance(params: &Parameters, speed: Speed) -> SimResult<Length> {
        let b = params.get(&parameters::B)?;
        let s0 = params.get(&parameters::S0)?;
        let t = speed / b;
        Ok(speed * t * 0.5 + s0)
    }

    /// The acceleration without any leader.
    fn free(&self, p: &ModelParams, v: f64, v0: f64) -> f64 {
        p.a * free_term(v, v0)
    }

    /// The unbounded acceleration towards a leader.
    fn follow(&self, p: &ModelParams, v: f64, v0: f64, s: f64, v_lead: f64, a_lead: Option<Acceleration>) -> f64 {
        if s <= 0.0 {
            return f64::NEG_INFINITY;
        }
        match self {
            Self::IdmPlus => {
                let term = desired_gap(p, v, v_lead) / s;
                p.a * f64::min(free_term(v, v0), 1.0 - term * term)
            }
            Self::Idm => {
                let term = desired_gap(p, v, v_lead) / s;
                p.a * (free_term(v, v0) - term * term)
            }
            Self::Acc => self.acc(p, v, v0, s, v_lead),
            Self::Cacc => {
                let feed_forward = a_lead.map_or(0.0, |acc| p.ka * acc.si());
                self.acc(p, v, v0, s, v_lead) + feed_forward
            }
        }
    }

    /// The linear gap and speed controller, capped by the free flow acceleration.
    fn acc(&self, p: &ModelParams, v: f64, v0: f64, s: f64, v_lead: f64) -> f64 {
        let s_ref = p.s0 + v * p.t;
        let control = p.ks * (s - s_ref) + p.kv * (v_lead - v);
        f64::min(control, self.free(p, v, v0))
    }
}

/// `1 - (v/v0)^4`, where a desired speed of zero means stay at rest.
fn free_term(v: f64, v0: f64) -> f64 {
    if v0 <= 0.0 {
        return if v > 0.0 { f64::NEG_INFINITY } else { 0.0 };
    }
    1.0 - (v / v0).powi(4)
}

/// The dynamic desired gap `s*`.
fn desired_gap(p: &ModelParams, v: f64, v_lead: f64) -> f64 {
    let approach = v - v_lead;
    let factor = 1.0 / (2.0 * (p.a * p.b).sqrt());
    p.s0 + f64::max(0.0, v * p.t + v * approach * factor)
}
