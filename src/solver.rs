//! Integration driver
//!
//! [`Integrator`] owns the workspace, the event list and the step-size
//! state, and advances a caller-owned state vector `y` (and time `t`) in
//! place toward a final time. Each accepted step is handed to the event
//! list first and then to the caller's observer; either may stop the run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, trace, warn};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::controller::{min_step_floor, StepController, StepDecision, Tolerances};
use crate::error::IntegrationError;
use crate::event_list::{EventList, EventRecord};
use crate::formula::{self, FixedMethod, Method};
use crate::observer::{ObserverAction, StateObserver, StepContext};
use crate::system::OdeSystem;
use crate::workspace::{Stats, Workspace};

/// Shared flag to abort a running integration.
///
/// Checked before every step; a cancelled run returns
/// [`Termination::Cancelled`] with `(y, t)` at the last accepted state.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// What to do when no acceptable step is found within `max_step_attempts`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum StepFailurePolicy {
    /// Accept the last trial step anyway and log a warning
    #[default]
    ForceAccept,
    /// Abort with [`IntegrationError::MaxIterationReached`]
    Fail,
}

/// How an integration ended
#[derive(Debug, Clone, PartialEq)]
pub enum Termination {
    /// Reached the final time; `t == tf` exactly
    Completed,
    /// A stop event fired; `(y, t)` hold the refined event state
    Event(EventRecord),
    /// The caller's observer asked to stop
    StoppedByObserver,
    /// The cancellation token was triggered
    Cancelled,
}

/// Runge-Kutta integrator with adaptive step control and event detection
///
/// # Example
/// ```
/// use rkprop::{FnSystem, Integrator, Termination, Tolerances, VariableMethod};
///
/// // Harmonic oscillator
/// let sys = FnSystem::new(2, |_t, y: &[f64], dydt: &mut [f64]| {
///     dydt[0] = y[1];
///     dydt[1] = -y[0];
/// });
///
/// let mut solver = Integrator::new(VariableMethod::Rkf78, Tolerances::new(1e-12, 1e-12));
/// let mut y = [1.0, 0.0];
/// let mut t = 0.0;
/// let end = solver.integrate(&sys, &mut y, &mut t, 10.0).unwrap();
///
/// assert_eq!(end, Termination::Completed);
/// assert_eq!(t, 10.0);
/// assert!((y[0] - 10f64.cos()).abs() < 1e-9);
/// ```
#[derive(Debug)]
pub struct Integrator {
    method: Method,
    tolerances: Tolerances,
    /// Step-size controller
    pub controller: StepController,
    /// Initial trial step (adaptive) or constant step (fixed), as a magnitude
    step_size: Option<f64>,
    /// `(min, max)` step magnitudes, when enabled
    step_limits: Option<(f64, f64)>,
    max_step_attempts: usize,
    failure_policy: StepFailurePolicy,
    max_steps: u64,
    workspace: Workspace,
    /// State at the start of the current step
    y_prev: Vec<f64>,
    /// Trial solution of the current step
    y_trial: Vec<f64>,
    /// Step magnitude suggested by the controller for the next step
    trial_step: Option<f64>,
    /// Time reached by the last `integrate_step` that did not terminate
    stepping_from: Option<f64>,
    events: EventList,
    cancellation: Option<CancellationToken>,
}

impl Integrator {
    /// Create an integrator for `method`.
    ///
    /// Tolerances only matter for adaptive methods; fixed-step methods also
    /// need a step size (see [`Integrator::fixed`]).
    pub fn new(method: impl Into<Method>, tolerances: Tolerances) -> Self {
        Self {
            method: method.into(),
            tolerances,
            controller: StepController::default(),
            step_size: None,
            step_limits: None,
            max_step_attempts: 50,
            failure_policy: StepFailurePolicy::default(),
            max_steps: 10_000_000,
            workspace: Workspace::default(),
            y_prev: Vec::new(),
            y_trial: Vec::new(),
            trial_step: None,
            stepping_from: None,
            events: EventList::new(),
            cancellation: None,
        }
    }

    /// Create a fixed-step integrator advancing by `h`.
    pub fn fixed(method: FixedMethod, h: f64) -> Self {
        let mut integrator = Self::new(method, Tolerances::default());
        integrator.step_size = Some(h);
        integrator
    }

    /// Integration method
    pub fn method(&self) -> Method {
        self.method
    }

    /// Switch the integration method; buffers are resized on the next run.
    pub fn set_method(&mut self, method: impl Into<Method>) {
        self.method = method.into();
        self.trial_step = None;
        self.stepping_from = None;
    }

    /// Error tolerances
    pub fn tolerances(&self) -> &Tolerances {
        &self.tolerances
    }

    /// Set the error tolerances
    pub fn set_tolerances(&mut self, tolerances: Tolerances) {
        self.tolerances = tolerances;
    }

    /// Initial trial step (adaptive) or constant step (fixed)
    pub fn initial_step(&self) -> Option<f64> {
        self.step_size
    }

    /// Set the initial trial step, or the constant step of a fixed method.
    ///
    /// Adaptive methods default to 1% of the integration span.
    pub fn set_initial_step(&mut self, h: f64) {
        self.step_size = Some(h.abs());
    }

    /// Enabled `(min, max)` step magnitudes
    pub fn step_limits(&self) -> Option<(f64, f64)> {
        self.step_limits
    }

    /// Bound adaptive steps to `[h_min, h_max]`
    pub fn set_step_limits(&mut self, h_min: f64, h_max: f64) {
        self.step_limits = Some((h_min, h_max));
    }

    /// Remove the step bounds; the floor falls back to `16 eps(t)`.
    pub fn clear_step_limits(&mut self) {
        self.step_limits = None;
    }

    /// Consecutive rejections allowed before the failure policy applies
    pub fn max_step_attempts(&self) -> usize {
        self.max_step_attempts
    }

    /// Set the number of consecutive rejections allowed per step
    pub fn set_max_step_attempts(&mut self, attempts: usize) {
        self.max_step_attempts = attempts;
    }

    /// Behavior when `max_step_attempts` is exhausted
    pub fn failure_policy(&self) -> StepFailurePolicy {
        self.failure_policy
    }

    /// Set the behavior when `max_step_attempts` is exhausted
    pub fn set_failure_policy(&mut self, policy: StepFailurePolicy) {
        self.failure_policy = policy;
    }

    /// Accepted-step budget per `integrate` call
    pub fn max_steps(&self) -> u64 {
        self.max_steps
    }

    /// Set the accepted-step budget per `integrate` call
    pub fn set_max_steps(&mut self, max_steps: u64) {
        self.max_steps = max_steps;
    }

    /// Statistics of the current (or last) run
    pub fn stats(&self) -> &Stats {
        &self.workspace.stats
    }

    /// Registered event detectors and fired events
    pub fn events(&self) -> &EventList {
        &self.events
    }

    /// Mutable access to the event list, to add or remove detectors
    pub fn events_mut(&mut self) -> &mut EventList {
        &mut self.events
    }

    /// Install a cancellation token
    pub fn set_cancellation(&mut self, token: CancellationToken) {
        self.cancellation = Some(token);
    }

    /// Installed cancellation token
    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }

    /// Error-per-unit-length vector of the last embedded step.
    ///
    /// After a step in which an event was refined this holds the estimate of
    /// the last re-step taken by the refinement, not of the accepted step.
    pub fn error_estimate(&self) -> &[f64] {
        self.workspace.error_estimate()
    }

    /// Size the workspace for `ode` and clear the statistics.
    ///
    /// Optional: every run sizes the workspace on its own.
    pub fn initialize<S: OdeSystem>(&mut self, ode: &S) -> Result<(), IntegrationError> {
        let n = ode.dimension();
        if n == 0 {
            return Err(IntegrationError::null("system has dimension 0"));
        }
        self.prepare(n);
        self.workspace.reset_stats();
        Ok(())
    }

    /// Clear statistics, step-size memory, event counters and event history.
    pub fn reset(&mut self) {
        self.workspace.reset_stats();
        self.trial_step = None;
        self.stepping_from = None;
        self.events.reset_counters();
        self.events.clear_history();
    }

    /// One raw step of the configured method from `(t0, y0)` with step `h`.
    ///
    /// Writes the propagated state into `yf` and, for embedded methods,
    /// refreshes [`error_estimate`](Self::error_estimate). No step control
    /// and no event detection.
    pub fn single_step<S: OdeSystem>(
        &mut self,
        ode: &S,
        t0: f64,
        h: f64,
        y0: &[f64],
        yf: &mut [f64],
    ) -> Result<(), IntegrationError> {
        let n = ode.dimension();
        if y0.len() != n || yf.len() != n {
            return Err(IntegrationError::invalid(format!(
                "state buffers must have {} components (got {} and {})",
                n,
                y0.len(),
                yf.len()
            )));
        }
        self.prepare(n);
        formula::single_step(self.method.tableau(), &mut self.workspace, ode, t0, h, y0, yf)
    }

    /// Integrate from `(y, t)` to `tf`, updating `y` and `t` in place.
    ///
    /// # Returns
    /// * `Ok(Termination::Completed)` - `t == tf` exactly
    /// * `Ok(Termination::Event(record))` - a stop event fired; `(y, t)` is
    ///   the refined event state
    /// * `Ok(Termination::Cancelled)` - the cancellation token fired
    /// * `Err(IntegrationError)` - `(y, t)` hold the last accepted state
    pub fn integrate<S: OdeSystem>(
        &mut self,
        ode: &S,
        y: &mut [f64],
        t: &mut f64,
        tf: f64,
    ) -> Result<Termination, IntegrationError> {
        self.integrate_observed(ode, y, t, tf, &mut ())
    }

    /// [`integrate`](Self::integrate), notifying `observer` after every
    /// accepted step (after the event list).
    pub fn integrate_observed<S: OdeSystem>(
        &mut self,
        ode: &S,
        y: &mut [f64],
        t: &mut f64,
        tf: f64,
        observer: &mut dyn StateObserver,
    ) -> Result<Termination, IntegrationError> {
        if *t == tf {
            return Ok(Termination::Completed);
        }
        self.begin(ode, y, *t, tf)?;
        observer.on_start(y, *t);

        let mut steps = 0u64;
        loop {
            if self.is_cancelled() {
                debug!("integration cancelled at t = {}", *t);
                return Ok(Termination::Cancelled);
            }
            if steps >= self.max_steps {
                return Err(IntegrationError::MaxStepsExceeded);
            }
            steps += 1;

            if let Some(end) = self.advance(ode, y, t, tf, observer)? {
                return Ok(end);
            }
        }
    }

    /// Advance by exactly one accepted step toward `tf`.
    ///
    /// Returns `Ok(None)` while the run goes on. Successive calls continue
    /// the same run as long as `t` is left where the previous call put it;
    /// otherwise a new run starts (statistics cleared, detectors re-primed).
    pub fn integrate_step<S: OdeSystem>(
        &mut self,
        ode: &S,
        y: &mut [f64],
        t: &mut f64,
        tf: f64,
    ) -> Result<Option<Termination>, IntegrationError> {
        if *t == tf {
            self.stepping_from = None;
            return Ok(Some(Termination::Completed));
        }
        if self.stepping_from != Some(*t) {
            self.begin(ode, y, *t, tf)?;
        }
        self.stepping_from = None;
        if self.is_cancelled() {
            return Ok(Some(Termination::Cancelled));
        }

        let end = self.advance(ode, y, t, tf, &mut ())?;
        if end.is_none() {
            self.stepping_from = Some(*t);
        }
        Ok(end)
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation.as_ref().is_some_and(|c| c.is_cancelled())
    }

    fn prepare(&mut self, n: usize) {
        self.workspace.ensure(n, self.method.tableau().stages);
        self.y_prev.resize(n, 0.0);
        self.y_trial.resize(n, 0.0);
    }

    /// Validate, size the buffers and prime the detectors for a new run.
    fn begin<S: OdeSystem>(
        &mut self,
        ode: &S,
        y: &[f64],
        t: f64,
        tf: f64,
    ) -> Result<(), IntegrationError> {
        self.validate_inputs(ode, y, t, tf)?;
        self.prepare(y.len());
        self.workspace.reset_stats();
        self.trial_step = None;
        self.events.on_start(y, t);
        Ok(())
    }

    /// Validate integration inputs
    fn validate_inputs<S: OdeSystem>(
        &self,
        ode: &S,
        y: &[f64],
        t: f64,
        tf: f64,
    ) -> Result<(), IntegrationError> {
        let n = ode.dimension();
        if n == 0 || y.is_empty() {
            return Err(IntegrationError::null("state vector is empty"));
        }
        if y.len() != n {
            return Err(IntegrationError::invalid(format!(
                "state has {} components but the system has dimension {}",
                y.len(),
                n
            )));
        }
        if !t.is_finite() || !tf.is_finite() {
            return Err(IntegrationError::invalid("t and tf must be finite"));
        }
        if let Some(i) = y.iter().position(|v| !v.is_finite()) {
            return Err(IntegrationError::invalid(format!("y[{}] is not finite", i)));
        }

        let adaptive = self.method.is_adaptive();
        match self.step_size {
            Some(h) if !h.is_finite() || h <= 0.0 => {
                return Err(IntegrationError::invalid(format!(
                    "step size must be positive and finite, got {}",
                    h
                )));
            }
            None if !adaptive => {
                return Err(IntegrationError::invalid(
                    "fixed-step method requires a step size",
                ));
            }
            _ => {}
        }
        if !adaptive {
            return Ok(());
        }

        self.tolerances.validate().map_err(IntegrationError::invalid)?;
        if let Some((h_min, h_max)) = self.step_limits {
            // NaN fails both comparisons
            if !(h_min > 0.0 && h_min.is_finite() && h_max >= h_min) {
                return Err(IntegrationError::invalid(format!(
                    "step limits must satisfy 0 < h_min <= h_max, got ({}, {})",
                    h_min, h_max
                )));
            }
        }
        if self.max_step_attempts == 0 {
            return Err(IntegrationError::invalid("max_step_attempts must be at least 1"));
        }
        let c = &self.controller;
        if !(c.min_scale > 0.0 && c.min_scale <= 1.0 && c.max_scale >= 1.0) {
            return Err(IntegrationError::invalid(format!(
                "controller scales must satisfy 0 < min_scale <= 1 <= max_scale, got ({}, {})",
                c.min_scale, c.max_scale
            )));
        }
        if c.error_components == 0 {
            return Err(IntegrationError::invalid("error_components must be at least 1"));
        }
        Ok(())
    }

    /// Clamp a step magnitude to the bounds, or to the floor at `t`.
    fn bound_step(&self, h: f64, t: f64) -> f64 {
        match self.step_limits {
            Some((h_min, h_max)) => h.max(h_min).min(h_max),
            None => h.max(min_step_floor(t)),
        }
    }

    /// Take one accepted step and notify the observers.
    fn advance(
        &mut self,
        ode: &dyn OdeSystem,
        y: &mut [f64],
        t: &mut f64,
        tf: f64,
        observer: &mut dyn StateObserver,
    ) -> Result<Option<Termination>, IntegrationError> {
        let tableau = self.method.tableau();
        let adaptive = self.method.is_adaptive();
        let t_prev = *t;
        let span = tf - t_prev;
        let direction = span.signum();

        let mut h_mag = if adaptive {
            let guess = self
                .trial_step
                .or(self.step_size)
                .unwrap_or(0.01 * span.abs());
            self.bound_step(guess, t_prev)
        } else {
            self.step_size.unwrap_or(span.abs())
        };
        // Don't overshoot the endpoint, and don't leave a sliver before it
        let mut is_final = span.abs() <= 1.1 * h_mag;
        if is_final {
            h_mag = span.abs();
        }

        self.y_prev.copy_from_slice(y);
        let mut attempts = 0usize;
        loop {
            let h = direction * h_mag;
            formula::single_step(
                tableau,
                &mut self.workspace,
                ode,
                t_prev,
                h,
                &self.y_prev,
                &mut self.y_trial,
            )?;
            if !adaptive {
                break;
            }
            attempts += 1;

            let decision = self.controller.is_error_met(
                h,
                &self.y_prev,
                &self.y_trial,
                self.workspace.error_estimate(),
                &self.tolerances,
            );
            match decision {
                StepDecision::Accept { ratio, h_next } => {
                    trace!("step accepted at t = {} with h = {} (error ratio {:.3e})", t_prev, h, ratio);
                    self.trial_step = Some(self.bound_step(h_next.abs(), t_prev));
                    break;
                }
                StepDecision::Reject { ratio, h_retry } => {
                    let shrunk = self.bound_step(h_retry.abs(), t_prev);
                    // A retry that reaches tf again is stretched onto it
                    let retry_final = span.abs() <= 1.1 * shrunk;
                    let retry = if retry_final { span.abs() } else { shrunk };
                    // Out of attempts, or pinned at the smallest allowed step
                    if attempts >= self.max_step_attempts || retry >= h_mag {
                        match self.failure_policy {
                            StepFailurePolicy::ForceAccept => {
                                warn!(
                                    "accepting step at t = {} with h = {} after {} attempts (error ratio {:.3e})",
                                    t_prev, h, attempts, ratio
                                );
                                self.trial_step = Some(h_mag);
                                break;
                            }
                            StepFailurePolicy::Fail => {
                                return Err(IntegrationError::MaxIterationReached {
                                    t: t_prev,
                                    h,
                                    attempts,
                                });
                            }
                        }
                    }
                    debug!("step rejected at t = {} with h = {} (error ratio {:.3e})", t_prev, h, ratio);
                    self.workspace.stats.rejected_steps += 1;
                    h_mag = retry;
                    is_final = retry_final;
                }
            }
        }

        let t_new = if is_final {
            tf
        } else {
            t_prev + direction * h_mag
        };
        if self.y_trial.iter().any(|v| !v.is_finite()) {
            return Err(IntegrationError::NonFiniteState { t: t_new });
        }
        y.copy_from_slice(&self.y_trial);
        *t = t_new;
        self.workspace.stats.record_accepted(h_mag);

        let mut ctx = StepContext::new(
            ode,
            tableau,
            &mut self.workspace,
            t_prev,
            &self.y_prev,
            direction,
        );
        if self.events.on_accept(y, t, &mut ctx)? == ObserverAction::Stop {
            // The observer still sees the refined event state
            observer.on_accept(y, t, &mut ctx)?;
            return Ok(Some(match self.events.last_event() {
                Some(record) => Termination::Event(record.clone()),
                None => Termination::StoppedByObserver,
            }));
        }
        if observer.on_accept(y, t, &mut ctx)? == ObserverAction::Stop {
            return Ok(Some(Termination::StoppedByObserver));
        }
        if is_final {
            return Ok(Some(Termination::Completed));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DerivativeError;
    use crate::events::{EventAction, EventConfig, EventDetector, EventDirection};
    use crate::formula::VariableMethod;
    use crate::observer::TrajectoryCollector;
    use crate::system::FnSystem;

    /// Harmonic oscillator: y'' + ω²y = 0
    /// State: [y, y']
    struct HarmonicOscillator {
        omega: f64,
    }

    impl OdeSystem for HarmonicOscillator {
        fn dimension(&self) -> usize {
            2
        }

        fn rhs(&self, _t: f64, y: &[f64], dydt: &mut [f64]) -> Result<(), DerivativeError> {
            dydt[0] = y[1];
            dydt[1] = -self.omega * self.omega * y[0];
            Ok(())
        }
    }

    /// Two-body problem for testing energy conservation
    struct TwoBody {
        mu: f64, // GM parameter
    }

    impl OdeSystem for TwoBody {
        fn dimension(&self) -> usize {
            6
        }

        fn rhs(&self, _t: f64, y: &[f64], dydt: &mut [f64]) -> Result<(), DerivativeError> {
            let r = (y[0] * y[0] + y[1] * y[1] + y[2] * y[2]).sqrt();
            let r3 = r * r * r;
            let mu_r3 = self.mu / r3;

            dydt[0] = y[3];
            dydt[1] = y[4];
            dydt[2] = y[5];
            dydt[3] = -mu_r3 * y[0];
            dydt[4] = -mu_r3 * y[1];
            dydt[5] = -mu_r3 * y[2];
            Ok(())
        }
    }

    fn energy(mu: f64, y: &[f64]) -> f64 {
        let r = (y[0] * y[0] + y[1] * y[1] + y[2] * y[2]).sqrt();
        let v2 = y[3] * y[3] + y[4] * y[4] + y[5] * y[5];
        0.5 * v2 - mu / r
    }

    fn rkf78(tol: f64) -> Integrator {
        Integrator::new(VariableMethod::Rkf78, Tolerances::new(tol, tol))
    }

    #[test]
    fn test_harmonic_oscillator() {
        let sys = HarmonicOscillator { omega: 1.0 };

        // Initial conditions: y(0) = 1, y'(0) = 0
        // Exact solution: y = cos(ωt), y' = -ω*sin(ωt)
        let mut y = [1.0, 0.0];
        let mut t = 0.0;
        let tf = 2.0 * std::f64::consts::PI; // One period

        let mut solver = rkf78(1e-12);
        solver.set_initial_step(0.1);
        let end = solver.integrate(&sys, &mut y, &mut t, tf).unwrap();

        assert_eq!(end, Termination::Completed);
        assert_eq!(t, tf, "final step must land exactly on tf");
        assert!((y[0] - 1.0).abs() < 1e-9, "y(2π) = {}, expected 1.0", y[0]);
        assert!(y[1].abs() < 1e-9, "y'(2π) = {}, expected 0.0", y[1]);

        println!("Harmonic oscillator test passed:");
        println!("  Final y = [{:.15}, {:.15}]", y[0], y[1]);
        println!("  Stats: {:?}", solver.stats());
    }

    #[test]
    fn test_exponential_decay() {
        // y' = -y, y(0) = 1
        // Exact: y = exp(-t)
        let sys = FnSystem::new(1, |_t, y: &[f64], dydt: &mut [f64]| dydt[0] = -y[0]);
        let tf = 5.0;

        let mut solver = rkf78(1e-14);
        let (mut y, mut t) = ([1.0], 0.0);
        solver.integrate(&sys, &mut y, &mut t, tf).unwrap();
        let exact = (-tf).exp();

        let rel_error = (y[0] - exact).abs() / exact;
        assert!(rel_error < 1e-10, "Relative error {} too large", rel_error);

        println!("  y({}) = {:.15}, exact = {:.15}", tf, y[0], exact);
        println!("  Relative error: {:.3e}", rel_error);
    }

    #[test]
    fn test_two_body_energy_conservation() {
        let mu = 398600.4418; // km³/s² (Earth)
        let sys = TwoBody { mu };

        // Circular orbit at 6878 km (500 km altitude)
        let r0 = 6878.0;
        let v0 = (mu / r0).sqrt();
        let y0 = [r0, 0.0, 0.0, 0.0, v0, 0.0];
        let period = 2.0 * std::f64::consts::PI * (r0.powi(3) / mu).sqrt();

        let mut solver = rkf78(1e-12);
        solver.set_initial_step(60.0);
        let mut y = y0;
        let mut t = 0.0;
        solver.integrate(&sys, &mut y, &mut t, period).unwrap();

        let e0 = energy(mu, &y0);
        let rel_energy_error = (energy(mu, &y) - e0).abs() / e0.abs();
        assert!(
            rel_energy_error < 1e-10,
            "Energy drift {} exceeds threshold",
            rel_energy_error
        );
        // Back at the start after one period
        assert!((y[0] - r0).abs() < 1e-4, "x = {}", y[0]);

        println!("  Relative drift: {:.3e}", rel_energy_error);
        println!("  Stats: {:?}", solver.stats());
    }

    #[test]
    fn test_eccentric_orbit_energy_conservation() {
        let mu = 398600.4418;
        let sys = TwoBody { mu };

        // Eccentric orbit: e=0.7, periapsis at 6678 km
        let rp = 6678.0;
        let e = 0.7;
        let a = rp / (1.0 - e);
        let v_peri = (mu * (2.0 / rp - 1.0 / a)).sqrt();
        let y0 = [rp, 0.0, 0.0, 0.0, v_peri, 0.0];
        let period = 2.0 * std::f64::consts::PI * (a.powi(3) / mu).sqrt();

        let mut solver = rkf78(1e-12);
        let mut y = y0;
        let mut t = 0.0;
        solver.integrate(&sys, &mut y, &mut t, period).unwrap();

        let e0 = energy(mu, &y0);
        let rel_energy_error = (energy(mu, &y) - e0).abs() / e0.abs();
        assert!(
            rel_energy_error < 1e-9,
            "Eccentric orbit (e=0.7) energy drift {} exceeds 1e-9",
            rel_energy_error
        );
        // Steps shrink at periapsis and grow at apoapsis
        let (smallest, largest) = solver.stats().step_range().unwrap();
        assert!(largest > 5.0 * smallest);
    }

    #[test]
    fn test_backward_integration() {
        // Harmonic oscillator integrated backward from 2π to 0
        let sys = HarmonicOscillator { omega: 1.0 };
        let mut t = 2.0 * std::f64::consts::PI;
        let mut y = [1.0, 0.0];

        let mut solver = rkf78(1e-12);
        let end = solver.integrate(&sys, &mut y, &mut t, 0.0).unwrap();

        assert_eq!(end, Termination::Completed);
        assert_eq!(t, 0.0);
        assert!((y[0] - 1.0).abs() < 1e-9, "y(0) = {}, expected 1.0", y[0]);
        assert!(y[1].abs() < 1e-9, "y'(0) = {}, expected 0.0", y[1]);
    }

    #[test]
    fn test_forward_backward_round_trip() {
        let sys = HarmonicOscillator { omega: 1.0 };
        let y0 = [1.0, 0.0];
        let period = 2.0 * std::f64::consts::PI;

        let mut solver = rkf78(1e-12);
        let mut y = y0;
        let mut t = 0.0;
        solver.integrate(&sys, &mut y, &mut t, period).unwrap();
        solver.integrate(&sys, &mut y, &mut t, 0.0).unwrap();

        assert_eq!(t, 0.0);
        assert!((y[0] - y0[0]).abs() < 1e-9, "Round-trip y[0] = {}", y[0]);
        assert!((y[1] - y0[1]).abs() < 1e-9, "Round-trip y[1] = {}", y[1]);
    }

    #[test]
    fn test_fixed_step_rk4() {
        let sys = FnSystem::new(1, |_t, y: &[f64], dydt: &mut [f64]| dydt[0] = -y[0]);
        let mut solver = Integrator::fixed(FixedMethod::Rk4, 0.1);
        let (mut y, mut t) = ([1.0], 0.0);
        let end = solver.integrate(&sys, &mut y, &mut t, 1.0).unwrap();

        assert_eq!(end, Termination::Completed);
        assert_eq!(t, 1.0);
        assert_eq!(solver.stats().num_steps, 10);
        assert_eq!(solver.stats().rejected_steps, 0);
        assert_eq!(solver.stats().fn_evals, 40);
        assert!((y[0] - (-1.0f64).exp()).abs() < 1e-6);
    }

    #[test]
    fn test_fixed_step_requires_step_size() {
        let sys = FnSystem::new(1, |_t, _y: &[f64], dydt: &mut [f64]| dydt[0] = 0.0);
        let mut solver = Integrator::new(FixedMethod::Verner8, Tolerances::default());
        let (mut y, mut t) = ([1.0], 0.0);
        let result = solver.integrate(&sys, &mut y, &mut t, 1.0);
        assert!(matches!(result, Err(IntegrationError::InvalidParameter { .. })));
    }

    #[test]
    fn test_step_rejection_with_large_initial_step() {
        // h0 = 100 is absurdly large for this problem
        let sys = HarmonicOscillator { omega: 1.0 };
        let tf = 2.0 * std::f64::consts::PI;
        let mut solver = rkf78(1e-12);
        solver.set_initial_step(100.0);

        let (mut y, mut t) = ([1.0, 0.0], 0.0);
        solver.integrate(&sys, &mut y, &mut t, tf).unwrap();

        assert_eq!(t, tf);
        assert!((y[0] - 1.0).abs() < 1e-9, "y(2π) = {}, expected 1.0", y[0]);
        assert!(
            solver.stats().rejected_steps > 0,
            "Expected step rejections with h0=100"
        );
    }

    #[test]
    fn test_max_steps_exceeded() {
        let sys = HarmonicOscillator { omega: 1.0 };
        let mut solver = rkf78(1e-12);
        solver.set_max_steps(5);
        solver.set_initial_step(0.01);

        let (mut y, mut t) = ([1.0, 0.0], 0.0);
        let result = solver.integrate(&sys, &mut y, &mut t, 100.0);
        assert!(
            matches!(result, Err(IntegrationError::MaxStepsExceeded)),
            "Expected MaxStepsExceeded, got {:?}",
            result
        );
        assert_eq!(solver.stats().num_steps, 5);
        assert!(t > 0.0 && t < 100.0);
    }

    #[test]
    fn test_forced_accept_at_step_floor() {
        // Unreachable tolerance with the step pinned: every step is forced
        let sys = FnSystem::new(1, |_t, y: &[f64], dydt: &mut [f64]| dydt[0] = -y[0]);
        let mut solver = rkf78(1e-30);
        solver.set_step_limits(0.1, 0.1);

        let (mut y, mut t) = ([1.0], 0.0);
        let end = solver.integrate(&sys, &mut y, &mut t, 1.0).unwrap();
        assert_eq!(end, Termination::Completed);
        assert_eq!(t, 1.0);
        assert_eq!(solver.stats().num_steps, 10);
        assert_eq!(solver.stats().rejected_steps, 0);
        assert!((y[0] - (-1.0f64).exp()).abs() < 1e-10);
    }

    #[test]
    fn test_stretched_final_step_respects_limits() {
        // The last step spans 0.1 plus rounding; a rejection there must not
        // leave a sliver step before tf
        let sys = FnSystem::new(1, |_t, y: &[f64], dydt: &mut [f64]| dydt[0] = -y[0]);
        let mut solver = rkf78(1e-30);
        solver.set_step_limits(0.1, 0.1);

        let mut collector = TrajectoryCollector::new();
        let (mut y, mut t) = ([1.0], 0.0);
        let end = solver
            .integrate_observed(&sys, &mut y, &mut t, 1.0, &mut collector)
            .unwrap();
        assert_eq!(end, Termination::Completed);
        assert_eq!(collector.times.last(), Some(&1.0));

        let (smallest, largest) = solver.stats().step_range().unwrap();
        println!("  step range: [{:e}, {:e}]", smallest, largest);
        assert!(smallest >= 0.1 * (1.0 - 1e-12), "sliver step {}", smallest);
        assert!(largest <= 0.1 * (1.0 + 1e-12), "oversized step {}", largest);
        for w in collector.times.windows(2) {
            assert!(w[1] - w[0] > 0.099, "step {} -> {}", w[0], w[1]);
        }
    }

    #[test]
    fn test_forced_accept_after_attempt_limit() {
        // Far too large a first step: two rejections in a row hit the
        // attempt limit while the step is still free to shrink
        let sys = HarmonicOscillator { omega: 1.0 };
        let mut solver = rkf78(1e-12);
        solver.set_initial_step(5.0);
        solver.set_max_step_attempts(2);

        let mut collector = TrajectoryCollector::new();
        let (mut y, mut t) = ([1.0, 0.0], 0.0);
        let end = solver
            .integrate_observed(&sys, &mut y, &mut t, 10.0, &mut collector)
            .unwrap();

        assert_eq!(end, Termination::Completed);
        assert_eq!(t, 10.0);
        assert!(y.iter().all(|v| v.is_finite()));
        // First step: 5.0 rejected, 2.5 rejected at the limit and accepted
        assert_eq!(collector.times[1], 2.5);

        let stats = solver.stats();
        assert!(stats.rejected_steps >= 1);
        // At most one counted rejection per step before the forced accept
        assert!(stats.rejected_steps <= stats.num_steps);
        assert_eq!(stats.fn_evals, 13 * (stats.num_steps + stats.rejected_steps));

        // Same run under the Fail policy stops at the first step
        let mut strict = rkf78(1e-12);
        strict.set_initial_step(5.0);
        strict.set_max_step_attempts(2);
        strict.set_failure_policy(StepFailurePolicy::Fail);
        let (mut y, mut t) = ([1.0, 0.0], 0.0);
        let result = strict.integrate(&sys, &mut y, &mut t, 10.0);
        match result {
            Err(IntegrationError::MaxIterationReached { t: t_fail, attempts, .. }) => {
                assert_eq!(t_fail, 0.0);
                assert_eq!(attempts, 2);
            }
            other => panic!("expected MaxIterationReached, got {:?}", other),
        }
        assert_eq!(strict.stats().rejected_steps, 1);
    }

    #[test]
    fn test_fail_policy_reports_max_iterations() {
        let sys = FnSystem::new(1, |_t, y: &[f64], dydt: &mut [f64]| dydt[0] = -y[0]);
        let mut solver = rkf78(1e-30);
        solver.set_step_limits(0.1, 0.1);
        solver.set_failure_policy(StepFailurePolicy::Fail);

        let (mut y, mut t) = ([1.0], 0.0);
        let result = solver.integrate(&sys, &mut y, &mut t, 1.0);
        match result {
            Err(IntegrationError::MaxIterationReached { t: t_fail, attempts, .. }) => {
                assert_eq!(t_fail, 0.0);
                assert_eq!(attempts, 1);
            }
            other => panic!("expected MaxIterationReached, got {:?}", other),
        }
        // State untouched
        assert_eq!(t, 0.0);
        assert_eq!(y, [1.0]);
    }

    #[test]
    fn test_fail_policy_after_attempts_exhausted() {
        let sys = HarmonicOscillator { omega: 1.0 };
        let mut solver = rkf78(1e-30);
        solver.set_failure_policy(StepFailurePolicy::Fail);
        solver.set_max_step_attempts(4);
        solver.set_initial_step(1.0);

        let (mut y, mut t) = ([1.0, 0.0], 0.0);
        let result = solver.integrate(&sys, &mut y, &mut t, 10.0);
        assert!(matches!(
            result,
            Err(IntegrationError::MaxIterationReached { attempts: 4, .. })
        ));
        assert_eq!(solver.stats().rejected_steps, 3);
    }

    #[test]
    fn test_derivative_failure_keeps_last_accepted_state() {
        struct Ephemeris;
        impl OdeSystem for Ephemeris {
            fn dimension(&self) -> usize {
                1
            }
            fn rhs(&self, t: f64, y: &[f64], dydt: &mut [f64]) -> Result<(), DerivativeError> {
                if t > 0.5 {
                    return Err(DerivativeError::new("outside ephemeris span"));
                }
                dydt[0] = -y[0];
                Ok(())
            }
        }

        let mut solver = rkf78(1e-12);
        let (mut y, mut t) = ([1.0], 0.0);
        let result = solver.integrate(&Ephemeris, &mut y, &mut t, 1.0);
        match result {
            Err(IntegrationError::DerivativeEvaluationFailed { t: t_fail, source }) => {
                assert!(t_fail > 0.5);
                assert_eq!(source.message, "outside ephemeris span");
            }
            other => panic!("expected DerivativeEvaluationFailed, got {:?}", other),
        }
        assert!(t <= 0.5, "t = {} should be the last accepted time", t);
        assert!((y[0] - (-t).exp()).abs() < 1e-10);
    }

    #[test]
    fn test_non_finite_state_detected() {
        let sys = FnSystem::new(1, |t, _y: &[f64], dydt: &mut [f64]| {
            dydt[0] = if t > 0.25 { f64::NAN } else { 1.0 };
        });
        let mut solver = Integrator::fixed(FixedMethod::Rk4, 0.1);
        let (mut y, mut t) = ([0.0], 0.0);
        let result = solver.integrate(&sys, &mut y, &mut t, 1.0);
        match result {
            Err(IntegrationError::NonFiniteState { t: t_bad }) => {
                assert!((t_bad - 0.3).abs() < 1e-12);
            }
            other => panic!("expected NonFiniteState, got {:?}", other),
        }
        assert!((t - 0.2).abs() < 1e-12);
        assert!((y[0] - 0.2).abs() < 1e-12);
    }

    // ==================== Input Validation Tests ====================

    fn validation_result(solver: &mut Integrator, y: &mut [f64], tf: f64) -> Result<Termination, IntegrationError> {
        let sys = FnSystem::new(1, |_t, _y: &[f64], dydt: &mut [f64]| dydt[0] = 0.0);
        let mut t = 0.0;
        solver.integrate(&sys, y, &mut t, tf)
    }

    #[test]
    fn test_nan_tolerance_rejected() {
        let mut solver = Integrator::new(VariableMethod::Rkf78, Tolerances::new(f64::NAN, 1e-12));
        let result = validation_result(&mut solver, &mut [1.0], 1.0);
        assert!(matches!(result, Err(IntegrationError::InvalidParameter { .. })));
    }

    #[test]
    fn test_inf_tolerance_rejected() {
        let mut solver =
            Integrator::new(VariableMethod::Rkf78, Tolerances::new(f64::INFINITY, 1e-12));
        let result = validation_result(&mut solver, &mut [1.0], 1.0);
        assert!(matches!(result, Err(IntegrationError::InvalidParameter { .. })));
    }

    #[test]
    fn test_negative_tolerance_rejected() {
        let mut solver = Integrator::new(VariableMethod::Rkf78, Tolerances::new(-1e-12, 1e-12));
        let result = validation_result(&mut solver, &mut [1.0], 1.0);
        assert!(matches!(result, Err(IntegrationError::InvalidParameter { .. })));
    }

    #[test]
    fn test_nan_initial_state_rejected() {
        let mut solver = rkf78(1e-12);
        let result = validation_result(&mut solver, &mut [f64::NAN], 1.0);
        assert!(matches!(result, Err(IntegrationError::InvalidParameter { .. })));
    }

    #[test]
    fn test_non_finite_final_time_rejected() {
        let mut solver = rkf78(1e-12);
        let result = validation_result(&mut solver, &mut [1.0], f64::INFINITY);
        assert!(matches!(result, Err(IntegrationError::InvalidParameter { .. })));
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut solver = rkf78(1e-12);
        let result = validation_result(&mut solver, &mut [1.0, 2.0], 1.0);
        assert!(matches!(result, Err(IntegrationError::InvalidParameter { .. })));
    }

    #[test]
    fn test_empty_state_rejected() {
        let sys = FnSystem::new(0, |_t, _y: &[f64], _dydt: &mut [f64]| {});
        let mut solver = rkf78(1e-12);
        let mut t = 0.0;
        let result = solver.integrate(&sys, &mut [], &mut t, 1.0);
        assert!(matches!(result, Err(IntegrationError::NullInput { .. })));
        assert!(matches!(
            solver.initialize(&sys),
            Err(IntegrationError::NullInput { .. })
        ));
    }

    #[test]
    fn test_bad_step_limits_rejected() {
        let mut solver = rkf78(1e-12);
        solver.set_step_limits(1.0, 0.1);
        let result = validation_result(&mut solver, &mut [1.0], 1.0);
        assert!(matches!(result, Err(IntegrationError::InvalidParameter { .. })));

        solver.clear_step_limits();
        assert!(validation_result(&mut solver, &mut [1.0], 1.0).is_ok());
    }

    #[test]
    fn test_zero_length_integration() {
        let sys = FnSystem::new(1, |_t, _y: &[f64], dydt: &mut [f64]| dydt[0] = 1.0);
        let mut solver = rkf78(1e-12);
        let (mut y, mut t) = ([42.0], 5.0);
        let end = solver.integrate(&sys, &mut y, &mut t, 5.0).unwrap();
        assert_eq!(end, Termination::Completed);
        assert_eq!(t, 5.0);
        assert_eq!(y[0], 42.0);
        assert_eq!(solver.stats().num_steps, 0);
    }

    // ==================== Event Finding Tests ====================

    fn threshold_event(threshold: f64, direction: EventDirection) -> EventDetector {
        EventDetector::new(
            |y: &[f64], _t: f64| y[0],
            EventConfig {
                direction,
                goal: threshold,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_event_finding_exponential() {
        // y' = y, y(0) = 1, solution: y = e^t
        // Find when y = e (should be t = 1)
        let sys = FnSystem::new(1, |_t, y: &[f64], dydt: &mut [f64]| dydt[0] = y[0]);
        let mut solver = rkf78(1e-12);
        solver
            .events_mut()
            .add(threshold_event(std::f64::consts::E, EventDirection::Rising))
            .unwrap();

        let (mut y, mut t) = ([1.0], 0.0);
        let end = solver.integrate(&sys, &mut y, &mut t, 10.0).unwrap();

        match end {
            Termination::Event(ev) => {
                println!("Event found at t = {:.15} in {} iterations", ev.t, ev.iterations);
                assert!((ev.t - 1.0).abs() < 1e-9, "Event time {} should be 1.0", ev.t);
                assert_eq!(ev.t, t);
                assert_eq!(ev.y[..], y[..]);
                assert!((y[0] - std::f64::consts::E).abs() < 1e-9, "y should be e");

                // Refinement re-steps are counted apart from the steps
                let stats = solver.stats();
                assert!(stats.refinement_evals >= 13 * ev.iterations as u64);
                assert_eq!(stats.fn_evals, 13 * (stats.num_steps + stats.rejected_steps));
            }
            other => panic!("Expected event, got {:?}", other),
        }
    }

    #[test]
    fn test_event_finding_periapsis() {
        // Two-body orbit: detect periapsis (radial velocity = 0, rising)
        let mu = 398600.4418; // km³/s² (Earth)
        let sys = TwoBody { mu };

        // Elliptical orbit: start at apoapsis
        // Apoapsis at 42164 km (GEO), periapsis at 6678 km (300 km alt)
        let ra = 42164.0;
        let rp = 6678.0;
        let a = (ra + rp) / 2.0;
        let v_apo = (mu * (2.0 / ra - 1.0 / a)).sqrt();
        let y0 = [ra, 0.0, 0.0, 0.0, -v_apo, 0.0];
        let period = 2.0 * std::f64::consts::PI * (a.powi(3) / mu).sqrt();

        // Radial velocity: r_dot = (r · v) / |r|
        let radial_velocity = |y: &[f64], _t: f64| {
            let r = (y[0] * y[0] + y[1] * y[1] + y[2] * y[2]).sqrt();
            (y[0] * y[3] + y[1] * y[4] + y[2] * y[5]) / r
        };
        let mut solver = Integrator::new(VariableMethod::Rkf78, Tolerances::new(1e-10, 1e-12));
        solver
            .events_mut()
            .add(
                EventDetector::new(
                    radial_velocity,
                    EventConfig {
                        direction: EventDirection::Rising, // Periapsis
                        threshold: 1e-6,
                        ..Default::default()
                    },
                )
                .named("periapsis"),
            )
            .unwrap();

        let mut y = y0;
        let mut t = 0.0;
        let end = solver.integrate(&sys, &mut y, &mut t, period).unwrap();

        match end {
            Termination::Event(ev) => {
                let r_event = (y[0].powi(2) + y[1].powi(2) + y[2].powi(2)).sqrt();
                println!("Periapsis found at t = {:.6} s, r = {:.6} km", ev.t, r_event);
                assert_eq!(ev.name.as_deref(), Some("periapsis"));
                assert!(
                    (ev.t - period / 2.0).abs() < 1e-3,
                    "Periapsis time {} should be half period {}",
                    ev.t,
                    period / 2.0
                );
                assert!(
                    (r_event - rp).abs() < 1e-3,
                    "Periapsis radius {} should be ~{} km",
                    r_event,
                    rp
                );
            }
            other => panic!("Expected periapsis event, got {:?}", other),
        }
    }

    #[test]
    fn test_no_event_reaches_tf() {
        let sys = FnSystem::new(1, |_t, _y: &[f64], dydt: &mut [f64]| dydt[0] = 1.0);
        let mut solver = rkf78(1e-12);
        solver
            .events_mut()
            .add(threshold_event(100.0, EventDirection::Any))
            .unwrap();

        let (mut y, mut t) = ([0.0], 0.0);
        let end = solver.integrate(&sys, &mut y, &mut t, 5.0).unwrap();
        assert_eq!(end, Termination::Completed);
        assert_eq!(t, 5.0);
        assert!((y[0] - 5.0).abs() < 1e-10);
        assert!(solver.events().history().is_empty());
    }

    #[test]
    fn test_event_near_start() {
        // y' = 1, y(0) = -0.001. Event: y = 0 at t = 0.001
        let sys = FnSystem::new(1, |_t, _y: &[f64], dydt: &mut [f64]| dydt[0] = 1.0);
        let mut solver = rkf78(1e-12);
        solver
            .events_mut()
            .add(threshold_event(0.0, EventDirection::Rising))
            .unwrap();

        let (mut y, mut t) = ([-0.001], 0.0);
        let end = solver.integrate(&sys, &mut y, &mut t, 10.0).unwrap();
        assert!(matches!(end, Termination::Event(_)));
        assert!((t - 0.001).abs() < 1e-10, "Event time {} should be 0.001", t);
        // Post-crossing side
        assert!(y[0] >= 0.0);
    }

    #[test]
    fn test_event_near_end() {
        let sys = FnSystem::new(1, |_t, _y: &[f64], dydt: &mut [f64]| dydt[0] = 1.0);
        let mut solver = rkf78(1e-12);
        solver
            .events_mut()
            .add(threshold_event(4.999, EventDirection::Rising))
            .unwrap();

        let (mut y, mut t) = ([0.0], 0.0);
        let end = solver.integrate(&sys, &mut y, &mut t, 5.0).unwrap();
        assert!(matches!(end, Termination::Event(_)));
        assert!((t - 4.999).abs() < 1e-10, "Event time {} should be 4.999", t);
    }

    #[test]
    fn test_event_action_continue() {
        // y' = 1, y(0) = -1. Event: y = 0 (rising). With Continue, integration
        // should record the event at t = 1 and keep going to tf = 5.
        let sys = FnSystem::new(1, |_t, _y: &[f64], dydt: &mut [f64]| dydt[0] = 1.0);
        let mut solver = rkf78(1e-12);
        let mut detector = threshold_event(0.0, EventDirection::Rising);
        detector.set_action(EventAction::Continue);
        let id = solver.events_mut().add(detector).unwrap();

        let (mut y, mut t) = ([-1.0], 0.0);
        let end = solver.integrate(&sys, &mut y, &mut t, 5.0).unwrap();

        assert_eq!(end, Termination::Completed);
        assert_eq!(t, 5.0);
        assert!((y[0] - 4.0).abs() < 1e-10, "y(5) should be 4.0, got {}", y[0]);

        let history = solver.events().history();
        assert_eq!(history.len(), 1, "Expected 1 recorded event");
        assert_eq!(history[0].detector, id);
        assert!((history[0].t - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_event_action_continue_multiple() {
        // Harmonic oscillator crosses x = 0 twice per period
        let sys = HarmonicOscillator { omega: 1.0 };
        let mut solver = rkf78(1e-12);
        let mut detector = threshold_event(0.0, EventDirection::Any);
        detector.set_action(EventAction::Continue);
        solver.events_mut().add(detector).unwrap();

        let (mut y, mut t) = ([1.0, 0.0], 0.0);
        let tf = 3.0 * 2.0 * std::f64::consts::PI;
        solver.integrate(&sys, &mut y, &mut t, tf).unwrap();

        let history = solver.events().history();
        assert_eq!(history.len(), 6);
        for (k, ev) in history.iter().enumerate() {
            let expected = std::f64::consts::FRAC_PI_2 + k as f64 * std::f64::consts::PI;
            assert!((ev.t - expected).abs() < 1e-8, "crossing {} at {}", k, ev.t);
        }
    }

    #[test]
    fn test_resume_after_event_does_not_refire() {
        let sys = FnSystem::new(1, |_t, _y: &[f64], dydt: &mut [f64]| dydt[0] = 1.0);
        let mut solver = rkf78(1e-12);
        solver
            .events_mut()
            .add(threshold_event(0.0, EventDirection::Rising))
            .unwrap();

        let (mut y, mut t) = ([-1.0], 0.0);
        let first = solver.integrate(&sys, &mut y, &mut t, 5.0).unwrap();
        assert!(matches!(first, Termination::Event(_)));

        let second = solver.integrate(&sys, &mut y, &mut t, 5.0).unwrap();
        assert_eq!(second, Termination::Completed);
        assert_eq!(t, 5.0);
        assert_eq!(solver.events().history().len(), 1);
    }

    #[test]
    fn test_backward_event_direction_is_physical() {
        // y' = -y is decreasing in physical time; integrating backward it
        // grows step by step, but a falling detector must still fire.
        let sys = FnSystem::new(1, |_t, y: &[f64], dydt: &mut [f64]| dydt[0] = -y[0]);

        let mut solver = rkf78(1e-12);
        solver
            .events_mut()
            .add(threshold_event(0.5, EventDirection::Falling))
            .unwrap();
        let (mut y, mut t) = ([(-1.0f64).exp()], 1.0);
        let end = solver.integrate(&sys, &mut y, &mut t, 0.0).unwrap();
        assert!(matches!(end, Termination::Event(_)));
        assert!((t - 2f64.ln()).abs() < 1e-9, "t = {}", t);

        let mut solver = rkf78(1e-12);
        solver
            .events_mut()
            .add(threshold_event(0.5, EventDirection::Rising))
            .unwrap();
        let (mut y, mut t) = ([(-1.0f64).exp()], 1.0);
        let end = solver.integrate(&sys, &mut y, &mut t, 0.0).unwrap();
        assert_eq!(end, Termination::Completed);
        assert_eq!(t, 0.0);
    }

    // ==================== Driver Surface Tests ====================

    #[test]
    fn test_integrate_step_walks_to_tf() {
        let sys = HarmonicOscillator { omega: 1.0 };
        let mut solver = rkf78(1e-10);
        let (mut y, mut t) = ([1.0, 0.0], 0.0);

        let mut calls = 0u64;
        let mut last_t = t;
        let end = loop {
            calls += 1;
            if let Some(end) = solver.integrate_step(&sys, &mut y, &mut t, 3.0).unwrap() {
                break end;
            }
            assert!(t > last_t, "steps must advance monotonically");
            last_t = t;
        };

        assert_eq!(end, Termination::Completed);
        assert_eq!(t, 3.0);
        assert_eq!(solver.stats().num_steps, calls);
        assert!((y[0] - 3f64.cos()).abs() < 1e-8);
    }

    #[test]
    fn test_observer_stop_and_collector() {
        struct StopAt(f64);
        impl StateObserver for StopAt {
            fn on_accept(
                &mut self,
                _y: &mut [f64],
                t: &mut f64,
                _ctx: &mut StepContext<'_>,
            ) -> Result<ObserverAction, IntegrationError> {
                Ok(if *t >= self.0 {
                    ObserverAction::Stop
                } else {
                    ObserverAction::Continue
                })
            }
        }

        let sys = HarmonicOscillator { omega: 1.0 };
        let mut solver = rkf78(1e-10);
        let (mut y, mut t) = ([1.0, 0.0], 0.0);
        let end = solver
            .integrate_observed(&sys, &mut y, &mut t, 10.0, &mut StopAt(2.0))
            .unwrap();
        assert_eq!(end, Termination::StoppedByObserver);
        assert!(t >= 2.0 && t < 10.0);

        let mut collector = TrajectoryCollector::new();
        let (mut y, mut t) = ([1.0, 0.0], 0.0);
        solver
            .integrate_observed(&sys, &mut y, &mut t, 1.0, &mut collector)
            .unwrap();
        assert_eq!(collector.times.first(), Some(&0.0));
        assert_eq!(collector.times.last(), Some(&1.0));
        assert_eq!(collector.len() as u64, solver.stats().num_steps + 1);
        assert!(collector.times.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_cancellation() {
        struct CancelAfter {
            token: CancellationToken,
            steps: usize,
        }
        impl StateObserver for CancelAfter {
            fn on_accept(
                &mut self,
                _y: &mut [f64],
                _t: &mut f64,
                _ctx: &mut StepContext<'_>,
            ) -> Result<ObserverAction, IntegrationError> {
                self.steps += 1;
                if self.steps == 3 {
                    self.token.cancel();
                }
                Ok(ObserverAction::Continue)
            }
        }

        let sys = HarmonicOscillator { omega: 1.0 };
        let token = CancellationToken::new();
        let mut solver = rkf78(1e-10);
        solver.set_cancellation(token.clone());

        let mut observer = CancelAfter {
            token: token.clone(),
            steps: 0,
        };
        let (mut y, mut t) = ([1.0, 0.0], 0.0);
        let end = solver
            .integrate_observed(&sys, &mut y, &mut t, 100.0, &mut observer)
            .unwrap();
        assert_eq!(end, Termination::Cancelled);
        assert_eq!(solver.stats().num_steps, 3);
        assert!(token.is_cancelled());
        assert!(solver.cancellation().is_some());
    }

    #[test]
    fn test_stats_reset_between_runs() {
        let sys = HarmonicOscillator { omega: 1.0 };
        let mut solver = rkf78(1e-10);

        let (mut y1, mut t1) = ([1.0, 0.0], 0.0);
        solver.integrate(&sys, &mut y1, &mut t1, 5.0).unwrap();
        let first = solver.stats().clone();

        let (mut y2, mut t2) = ([1.0, 0.0], 0.0);
        solver.integrate(&sys, &mut y2, &mut t2, 5.0).unwrap();
        assert_eq!(solver.stats(), &first);
        assert_eq!(y1, y2);
        assert_eq!(t1, t2);

        solver.reset();
        assert_eq!(solver.stats().num_steps, 0);
        assert_eq!(solver.stats().step_range(), None);
    }

    #[test]
    fn test_single_step_matches_formula() {
        let sys = HarmonicOscillator { omega: 1.0 };
        let mut solver = rkf78(1e-10);
        let mut yf = [0.0; 2];
        solver.single_step(&sys, 0.0, 0.1, &[1.0, 0.0], &mut yf).unwrap();
        assert!((yf[0] - 0.1f64.cos()).abs() < 1e-14);
        assert!((yf[1] + 0.1f64.sin()).abs() < 1e-14);
        assert_eq!(solver.error_estimate().len(), 2);
        assert_eq!(solver.stats().fn_evals, 13);

        let result = solver.single_step(&sys, 0.0, 0.1, &[1.0], &mut yf);
        assert!(matches!(result, Err(IntegrationError::InvalidParameter { .. })));
    }
}
