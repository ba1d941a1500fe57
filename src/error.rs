//! Error types shared by the integrator, the formulas and the event subsystem.

use thiserror::Error;

use crate::events::BrentError;

/// Failure reported by a derivative evaluation.
///
/// Returned from [`OdeSystem::rhs`](crate::OdeSystem::rhs) when the
/// right-hand side cannot be evaluated (e.g. a force model queried outside
/// its domain). Always fatal to the surrounding integration.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct DerivativeError {
    /// Description of the failure
    pub message: String,
}

impl DerivativeError {
    /// Create a derivative error with the given description.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors that can occur during integration
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IntegrationError {
    /// The derivative contract reported a failure; the integration is aborted
    #[error("derivative evaluation failed at t = {t}: {source}")]
    DerivativeEvaluationFailed {
        /// Time of the failing evaluation
        t: f64,
        /// Failure reported by the derivative contract
        #[source]
        source: DerivativeError,
    },
    /// A required input is empty or missing
    #[error("null input: {message}")]
    NullInput {
        /// Description of the missing input
        message: String,
    },
    /// A configuration value or call argument is out of range
    #[error("invalid parameter: {message}")]
    InvalidParameter {
        /// Description of the invalid parameter
        message: String,
    },
    /// The step-size search exceeded the allowed number of consecutive
    /// rejections (only under [`StepFailurePolicy::Fail`](crate::StepFailurePolicy::Fail))
    #[error("step size search exceeded {attempts} attempts at t = {t} (last trial h = {h})")]
    MaxIterationReached {
        /// Start time of the step that could not be accepted
        t: f64,
        /// Last trial step size
        h: f64,
        /// Number of attempts made
        attempts: usize,
    },
    /// Maximum number of integration steps exceeded
    #[error("maximum number of integration steps exceeded")]
    MaxStepsExceeded,
    /// Non-finite state detected during integration
    #[error("non-finite state detected at t = {t}")]
    NonFiniteState {
        /// Time at which non-finite state was detected
        t: f64,
    },
}

impl IntegrationError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        IntegrationError::InvalidParameter {
            message: message.into(),
        }
    }

    pub(crate) fn null(message: impl Into<String>) -> Self {
        IntegrationError::NullInput {
            message: message.into(),
        }
    }
}

/// Failure to refine an event crossing.
///
/// Never aborts the integration: the step is accepted without the event
/// firing and detection resumes on the next step.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EventError {
    /// The root finder could not bracket or converge on the crossing
    #[error("event root refinement failed: {0}")]
    Refinement(#[from] BrentError),
    /// The switching function returned a non-finite value during refinement
    #[error("switching function is not finite at t = {t}")]
    NonFiniteSwitchingValue {
        /// Candidate time at which the value was evaluated
        t: f64,
    },
}
