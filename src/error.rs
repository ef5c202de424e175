//! Simulation error type.
//!
//! Errors raised while replanning a single GTU are isolated to that GTU by the
//! kernel; only [`SimError::Scheduler`] aborts a simulation run.

use crate::perception::Capability;
use crate::GtuId;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    /// A parameter is missing or violates its declared constraint.
    #[error("parameter `{key}`: {reason}")]
    Parameter { key: &'static str, reason: String },

    /// A decision model asked for a perception capability the GTU does not provide.
    #[error("perception category {capability:?} unavailable: {reason}")]
    PerceptionUnavailable {
        capability: Capability,
        reason: &'static str,
    },

    /// The route or network cannot tell the GTU where to go next.
    #[error("network inconsistency in {component}: {detail}")]
    NetworkInconsistency {
        component: &'static str,
        detail: String,
    },

    /// A numeric routine produced a non-finite or non-physical value.
    #[error("numeric domain error in {component}: {detail}")]
    NumericDomain {
        component: &'static str,
        detail: String,
    },

    /// The event queue invariant was violated. Fatal for the whole simulation.
    #[error("scheduler: {0}")]
    Scheduler(String),

    #[error("GTU {0:?} does not exist")]
    UnknownGtu(GtuId),
}

impl SimError {
    pub(crate) fn network(component: &'static str, detail: impl Into<String>) -> Self {
        Self::NetworkInconsistency {
            component,
            detail: detail.into(),
        }
    }

    pub(crate) fn numeric(component: &'static str, detail: impl Into<String>) -> Self {
        Self::NumericDomain {
            component,
            detail: detail.into(),
        }
    }

    /// Whether this error must stop the whole simulation rather than a single GTU.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Scheduler(_))
    }
}

pub type SimResult<T> = Result<T, SimError>;
