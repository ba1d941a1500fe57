//! Event Finding for ODE Integration
//!
//! This module provides event detection during ODE integration, allowing
//! the integrator to stop precisely when a user-defined condition is met.
//!
//! # Overview
//!
//! A switching function `g(y, t)` is monitored after every accepted step.
//! When `g - goal` changes sign in the configured direction, the integrator
//! uses Brent's method to find the precise time of the crossing.
//!
//! # Common Applications in Astrodynamics
//!
//! - Periapsis/apoapsis detection (radial velocity = 0)
//! - Sphere of influence crossing
//! - Eclipse entry/exit
//! - Ground track crossing (ascending/descending node)
//! - Altitude threshold crossing
//! - Conjunction/opposition detection

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Switching function trait
///
/// Implement this trait (or pass a closure) to define conditions that should
/// stop the integration.
///
/// # Example
///
/// ```
/// use rkprop::SwitchingFunction;
///
/// // Zero when altitude = threshold
/// struct AltitudeEvent {
///     threshold: f64,
///     earth_radius: f64,
/// }
///
/// impl SwitchingFunction for AltitudeEvent {
///     fn value(&self, y: &[f64], _t: f64) -> f64 {
///         let r = (y[0] * y[0] + y[1] * y[1] + y[2] * y[2]).sqrt();
///         r - self.earth_radius - self.threshold
///     }
/// }
/// ```
pub trait SwitchingFunction {
    /// Evaluate the switching function at state `y` and time `t`.
    fn value(&self, y: &[f64], t: f64) -> f64;
}

impl<F> SwitchingFunction for F
where
    F: Fn(&[f64], f64) -> f64,
{
    fn value(&self, y: &[f64], t: f64) -> f64 {
        self(y, t)
    }
}

/// Direction of crossing to detect, in physical time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EventDirection {
    /// Detect when g goes from below the goal to above it (increasing)
    Rising,
    /// Detect when g goes from above the goal to below it (decreasing)
    Falling,
    /// Detect any crossing
    #[default]
    Any,
}

impl EventDirection {
    /// The direction as seen in step order when propagating with the given
    /// time direction: backward propagation mirrors rising and falling.
    pub fn in_step_order(self, time_direction: f64) -> Self {
        if time_direction >= 0.0 {
            return self;
        }
        match self {
            EventDirection::Rising => EventDirection::Falling,
            EventDirection::Falling => EventDirection::Rising,
            EventDirection::Any => EventDirection::Any,
        }
    }
}

/// Action to take when an event fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EventAction {
    /// Stop integration at this event
    #[default]
    Stop,
    /// Record the event but continue integration
    Continue,
}

/// Configuration for an event detector
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EventConfig {
    /// Which direction of crossing to detect
    pub direction: EventDirection,
    /// What to do when the event fires
    pub action: EventAction,
    /// Root-finding tolerance on the event time (default: 1e-12)
    pub threshold: f64,
    /// Target value of the switching function (default: 0)
    pub goal: f64,
    /// Fire on the n-th qualifying crossing (default: 1)
    pub repeat_count: u32,
    /// Maximum iterations for root finding (default: 100)
    pub max_iter: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            direction: EventDirection::Any,
            action: EventAction::Stop,
            threshold: 1e-12,
            goal: 0.0,
            repeat_count: 1,
            max_iter: 100,
        }
    }
}

impl EventConfig {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if !self.threshold.is_finite() || self.threshold <= 0.0 {
            return Err(format!(
                "event threshold must be positive and finite, got {}",
                self.threshold
            ));
        }
        if !self.goal.is_finite() {
            return Err(format!("event goal must be finite, got {}", self.goal));
        }
        if self.repeat_count == 0 {
            return Err("event repeat_count must be at least 1".to_string());
        }
        if self.max_iter == 0 {
            return Err("event max_iter must be at least 1".to_string());
        }
        Ok(())
    }
}

/// A switching function together with its detection settings.
///
/// ```
/// use rkprop::{EventConfig, EventDetector, EventDirection};
///
/// // Stop when y[0] decreases through 0.5
/// let detector = EventDetector::new(
///     |y: &[f64], _t: f64| y[0],
///     EventConfig {
///         direction: EventDirection::Falling,
///         goal: 0.5,
///         ..Default::default()
///     },
/// );
/// ```
pub struct EventDetector {
    function: Box<dyn SwitchingFunction>,
    config: EventConfig,
    name: Option<String>,
}

impl EventDetector {
    /// Create a detector from a switching function and its configuration.
    pub fn new<F>(function: F, config: EventConfig) -> Self
    where
        F: SwitchingFunction + 'static,
    {
        Self {
            function: Box::new(function),
            config,
            name: None,
        }
    }

    /// Attach a label used in log messages and event records.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Label of the detector, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Detection settings.
    pub fn config(&self) -> &EventConfig {
        &self.config
    }

    /// Set the crossing direction.
    pub fn set_direction(&mut self, direction: EventDirection) {
        self.config.direction = direction;
    }

    /// Set the action taken when the event fires.
    pub fn set_action(&mut self, action: EventAction) {
        self.config.action = action;
    }

    /// Set the root-finding tolerance.
    pub fn set_threshold(&mut self, threshold: f64) {
        self.config.threshold = threshold;
    }

    /// Set the target value of the switching function.
    pub fn set_goal(&mut self, goal: f64) {
        self.config.goal = goal;
    }

    /// Set on which qualifying crossing the event fires.
    pub fn set_repeat_count(&mut self, repeat_count: u32) {
        self.config.repeat_count = repeat_count;
    }

    /// Raw switching-function value.
    pub fn value(&self, y: &[f64], t: f64) -> f64 {
        self.function.value(y, t)
    }

    /// Switching-function value relative to the goal.
    pub fn difference(&self, y: &[f64], t: f64) -> f64 {
        self.function.value(y, t) - self.config.goal
    }
}

impl fmt::Debug for EventDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDetector")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Converged root from [`BrentSolver::find_root`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Root {
    /// Best root estimate
    pub x: f64,
    /// Function value at `x`
    pub fx: f64,
    /// Number of iterations used
    pub iterations: usize,
    /// Final bracket; the root lies between its ends and `x` is one of them
    pub bracket: (f64, f64),
}

impl Root {
    /// The bracket end opposite to `x`.
    pub fn other_end(&self) -> f64 {
        if self.x == self.bracket.0 {
            self.bracket.1
        } else {
            self.bracket.0
        }
    }
}

/// Brent's method for root finding
///
/// A robust root-finding algorithm combining bisection, secant method,
/// and inverse quadratic interpolation.
///
/// Reference: Brent, R.P. (1973). "Algorithms for Minimization without
/// Derivatives". Prentice-Hall.
#[derive(Debug, Clone)]
pub struct BrentSolver {
    /// Tolerance for convergence
    pub tol: f64,
    /// Maximum iterations
    pub max_iter: usize,
}

impl Default for BrentSolver {
    fn default() -> Self {
        Self {
            tol: 1e-12,
            max_iter: 100,
        }
    }
}

impl BrentSolver {
    /// Create a new Brent solver with specified tolerance
    pub fn new(tol: f64, max_iter: usize) -> Self {
        Self { tol, max_iter }
    }

    /// Find the root of f in the interval [a, b].
    ///
    /// Assumes f(a) and f(b) have opposite signs (i.e., the root is bracketed).
    /// Convergence is declared once the bracket is narrower than `tol`
    /// (widened by a few ulps of the estimate, so large abscissae still
    /// converge).
    ///
    /// # Arguments
    /// * `f` - Function to find root of
    /// * `a` - Left endpoint of bracket
    /// * `b` - Right endpoint of bracket
    /// * `fa` - f(a) (optional, will be computed if None)
    /// * `fb` - f(b) (optional, will be computed if None)
    pub fn find_root<F>(
        &self,
        mut f: F,
        mut a: f64,
        mut b: f64,
        fa: Option<f64>,
        fb: Option<f64>,
    ) -> Result<Root, BrentError>
    where
        F: FnMut(f64) -> f64,
    {
        let mut fa = fa.unwrap_or_else(|| f(a));
        let mut fb = fb.unwrap_or_else(|| f(b));

        // Check that root is bracketed
        if fa * fb > 0.0 || fa.is_nan() || fb.is_nan() {
            return Err(BrentError::NotBracketed { a, b, fa, fb });
        }

        // Ensure |f(a)| >= |f(b)|
        if fa.abs() < fb.abs() {
            std::mem::swap(&mut a, &mut b);
            std::mem::swap(&mut fa, &mut fb);
        }

        let mut c = a;
        let mut fc = fa;
        let mut mflag = true;
        let mut d = b - a; // previous step size

        for iter in 0..self.max_iter {
            // Ensure |f(a)| >= |f(b)| so b is the best guess
            if fa.abs() < fb.abs() {
                std::mem::swap(&mut a, &mut b);
                std::mem::swap(&mut fa, &mut fb);
            }

            // Check for convergence
            let tol = self.tol + 2.0 * f64::EPSILON * b.abs();
            if fb == 0.0 || (b - a).abs() <= tol {
                return Ok(Root {
                    x: b,
                    fx: fb,
                    iterations: iter + 1,
                    bracket: (a, b),
                });
            }

            // Try inverse quadratic interpolation or secant
            let s = if fa != fc && fb != fc && fa != fb {
                // Inverse quadratic interpolation
                a * fb * fc / ((fa - fb) * (fa - fc))
                    + b * fa * fc / ((fb - fa) * (fb - fc))
                    + c * fa * fb / ((fc - fa) * (fc - fb))
            } else if fb != fa {
                // Secant method
                b - fb * (b - a) / (fb - fa)
            } else {
                // Degenerate: fa == fb, fall back to bisection
                (a + b) / 2.0
            };

            // Conditions for rejecting s and falling back to bisection
            let mid = (a + b) / 2.0;
            let use_bisection =
                // s not between (3a+b)/4 and b
                (s - (3.0 * a + b) / 4.0) * (s - b) > 0.0
                // |s-b| >= |b-c|/2 when mflag set (last step was bisection)
                || (mflag && (s - b).abs() >= (b - c).abs() / 2.0)
                // |s-b| >= |c-d|/2 when mflag not set
                || (!mflag && (s - b).abs() >= (c - d).abs() / 2.0)
                // |b-c| < tol when mflag set
                || (mflag && (b - c).abs() < tol)
                // |c-d| < tol when mflag not set
                || (!mflag && (c - d).abs() < tol)
                || s.is_nan();

            let s = if use_bisection {
                mflag = true;
                mid
            } else {
                mflag = false;
                s
            };

            let fs = f(s);
            if fs.is_nan() {
                return Err(BrentError::NonFinite { x: s });
            }
            d = c; // d = previous c (two steps back)
            c = b;
            fc = fb;

            if fa * fs < 0.0 {
                b = s;
                fb = fs;
            } else {
                a = s;
                fa = fs;
            }
        }

        Err(BrentError::MaxIterations {
            current_best: b,
            f_value: fb,
            iterations: self.max_iter,
        })
    }
}

/// Errors from Brent's method
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BrentError {
    /// The root is not bracketed by the given interval
    #[error("root not bracketed: f({a}) = {fa}, f({b}) = {fb} (same sign)")]
    NotBracketed {
        /// Left endpoint
        a: f64,
        /// Right endpoint
        b: f64,
        /// Function value at left endpoint
        fa: f64,
        /// Function value at right endpoint
        fb: f64,
    },
    /// Maximum iterations reached without convergence
    #[error("max iterations ({iterations}) reached, best estimate: {current_best}, f = {f_value}")]
    MaxIterations {
        /// Best root estimate so far
        current_best: f64,
        /// Function value at best estimate
        f_value: f64,
        /// Number of iterations performed
        iterations: usize,
    },
    /// The function returned NaN
    #[error("function value is NaN at x = {x}")]
    NonFinite {
        /// Abscissa of the failing evaluation
        x: f64,
    },
}

/// Check if a crossing occurred in the specified direction (step order).
///
/// A step that starts exactly on zero is not a new crossing; a step that
/// lands exactly on zero counts when the previous sign matches `direction`.
pub fn sign_change_detected(g_old: f64, g_new: f64, direction: EventDirection) -> bool {
    if g_old == 0.0 || g_old.is_nan() || g_new.is_nan() {
        return false;
    }
    if g_old * g_new > 0.0 {
        // No sign change
        return false;
    }

    match direction {
        EventDirection::Rising => g_old < 0.0,
        EventDirection::Falling => g_old > 0.0,
        EventDirection::Any => true,
    }
}
