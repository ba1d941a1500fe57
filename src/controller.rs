//! Adaptive step-size control
//!
//! The controller turns the error-per-unit-length vector of an embedded step
//! into a normalized error ratio and decides whether the trial step is
//! accepted, together with the next trial step size.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Number of leading state components that enter the error norm.
///
/// Six covers a Cartesian position/velocity state; trailing components
/// (mass, STM entries, ...) are propagated but not error-controlled.
pub const DEFAULT_ERROR_COMPONENTS: usize = 6;

/// Tolerances for error control
///
/// The error of component `i` is scaled by
/// `max(|y_i|, |y0_i|, abs_tol / rel_tol)` and compared against `rel_tol`,
/// so `abs_tol` governs components near zero and `rel_tol` the rest.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Tolerances {
    /// Absolute tolerance
    pub abs_tol: f64,
    /// Relative tolerance
    pub rel_tol: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            abs_tol: 1e-10,
            rel_tol: 1e-10,
        }
    }
}

impl Tolerances {
    /// Create tolerances
    pub fn new(abs_tol: f64, rel_tol: f64) -> Self {
        Self { abs_tol, rel_tol }
    }

    /// Floor of the error scale, `abs_tol / rel_tol`.
    pub fn threshold(&self) -> f64 {
        self.abs_tol / self.rel_tol
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if !self.abs_tol.is_finite() || self.abs_tol <= 0.0 {
            return Err(format!("abs_tol must be positive and finite, got {}", self.abs_tol));
        }
        if !self.rel_tol.is_finite() || self.rel_tol <= 0.0 {
            return Err(format!("rel_tol must be positive and finite, got {}", self.rel_tol));
        }
        Ok(())
    }
}

/// Outcome of [`StepController::is_error_met`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepDecision {
    /// Error within tolerance; continue with `h_next`
    Accept {
        /// Normalized error ratio of the step
        ratio: f64,
        /// Suggested next trial step (same sign as the step taken)
        h_next: f64,
    },
    /// Error too large; retry with `h_retry`
    Reject {
        /// Normalized error ratio of the step
        ratio: f64,
        /// Smaller trial step to retry with
        h_retry: f64,
    },
}

impl StepDecision {
    /// Whether the step was accepted
    pub fn is_accepted(&self) -> bool {
        matches!(self, StepDecision::Accept { .. })
    }

    /// Step size suggested by the decision (next step or retry).
    pub fn next_step(&self) -> f64 {
        match *self {
            StepDecision::Accept { h_next, .. } => h_next,
            StepDecision::Reject { h_retry, .. } => h_retry,
        }
    }
}

/// Step-size controller
///
/// On rejection: `h * max(min_scale, safety_low * ratio^(-pow_low))`.
/// On acceptance: `h * min(max_scale, safety_high * ratio^(-pow_high))`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StepController {
    /// Safety factor applied when shrinking a rejected step
    pub safety_low: f64,
    /// Safety factor applied when growing an accepted step
    pub safety_high: f64,
    /// Exponent used when shrinking
    pub pow_low: f64,
    /// Exponent used when growing
    pub pow_high: f64,
    /// Smallest reduction factor per rejection
    pub min_scale: f64,
    /// Largest growth factor per accepted step
    pub max_scale: f64,
    /// Number of leading components entering the error norm
    pub error_components: usize,
}

impl Default for StepController {
    fn default() -> Self {
        Self {
            safety_low: 0.8,
            safety_high: 0.9,
            pow_low: 0.25,
            pow_high: 0.1,
            min_scale: 0.5,
            max_scale: 2.0,
            error_components: DEFAULT_ERROR_COMPONENTS,
        }
    }
}

impl StepController {
    /// Normalized maximum error ratio of a trial step
    ///
    /// ```text
    /// ratio = max_i ( |h| * |err_i| / max(|y_i|, |y0_i|, abs_tol/rel_tol) ) / rel_tol
    /// ```
    ///
    /// over the first `min(error_components, n)` components. Values `<= 1`
    /// meet the tolerance.
    pub fn error_ratio(&self, h: f64, y0: &[f64], y: &[f64], err: &[f64], tol: &Tolerances) -> f64 {
        let threshold = tol.threshold();
        let count = self.error_components.min(y.len());

        let mut max_err: f64 = 0.0;
        for i in 0..count {
            let scale = y[i].abs().max(y0[i].abs()).max(threshold);
            let e = h.abs() * err[i].abs() / scale;
            if e.is_nan() {
                return f64::INFINITY;
            }
            max_err = max_err.max(e);
        }
        max_err / tol.rel_tol
    }

    /// Decide on a trial step of size `h` and suggest the next step size.
    pub fn is_error_met(
        &self,
        h: f64,
        y0: &[f64],
        y: &[f64],
        err: &[f64],
        tol: &Tolerances,
    ) -> StepDecision {
        let ratio = self.error_ratio(h, y0, y, err, tol);
        if ratio > 1.0 {
            StepDecision::Reject {
                ratio,
                h_retry: h * self.shrink_factor(ratio),
            }
        } else {
            StepDecision::Accept {
                ratio,
                h_next: h * self.grow_factor(ratio),
            }
        }
    }

    /// Reduction factor for a rejected step.
    pub fn shrink_factor(&self, ratio: f64) -> f64 {
        let factor = self.safety_low * ratio.powf(-self.pow_low);
        // NaN compares false; fall back to the strongest reduction
        if factor.is_nan() {
            return self.min_scale;
        }
        factor.max(self.min_scale)
    }

    /// Growth factor for an accepted step.
    pub fn grow_factor(&self, ratio: f64) -> f64 {
        if ratio == 0.0 {
            return self.max_scale;
        }
        (self.safety_high * ratio.powf(-self.pow_high)).min(self.max_scale)
    }
}

/// Smallest step that still advances `t` in floating point: `16 * eps(t)`.
///
/// The floor is relative to `t`, so at `t = 0` it falls to
/// `16 * f64::MIN_POSITIVE`. Runs starting at the epoch that need a real
/// lower bound should set step limits, which replace this floor.
pub fn min_step_floor(t: f64) -> f64 {
    16.0 * (f64::EPSILON * t.abs()).max(f64::MIN_POSITIVE)
}
