//! # rkprop: Runge-Kutta Propagation Kernel
//!
//! Explicit Runge-Kutta integrators for spacecraft trajectory propagation
//! and other astrodynamics applications, with adaptive step-size control
//! and switching-function event detection.
//!
//! ## Features
//!
//! - Fixed-step RK4, Fehlberg 8 and Verner 8 formulas
//! - Embedded RKF4(5), RKF5(6), RKF7(8) and Cash-Karp pairs with adaptive
//!   step-size control; the higher-order solution is propagated
//! - Error control on the leading state components only (position and
//!   velocity by default), so mass or STM entries ride along untouched
//! - **Event detection** with Brent's method, direction filtering,
//!   "fire on the n-th crossing" counts and stop/continue actions
//! - Observers of accepted steps, cooperative cancellation and
//!   step-by-step integration
//! - Minimal dependencies (no external linear algebra required)
//!
//! ## Basic Usage
//!
//! ```rust
//! use rkprop::{FnSystem, Integrator, Termination, Tolerances, VariableMethod};
//!
//! // Harmonic oscillator: y'' = -ω² y
//! let omega = 1.0;
//! let sys = FnSystem::new(2, move |_t, y: &[f64], dydt: &mut [f64]| {
//!     dydt[0] = y[1];
//!     dydt[1] = -omega * omega * y[0];
//! });
//!
//! let mut solver = Integrator::new(VariableMethod::Rkf78, Tolerances::new(1e-12, 1e-12));
//! solver.set_initial_step(0.1);
//!
//! let mut y = [1.0, 0.0]; // Initial conditions
//! let mut t = 0.0;
//! let end = solver.integrate(&sys, &mut y, &mut t, 10.0).unwrap();
//! assert_eq!(end, Termination::Completed);
//! assert_eq!(t, 10.0);
//! ```
//!
//! ## Event Detection
//!
//! Event detectors watch a scalar switching function of the state and fire
//! when it crosses a goal value. The crossing is bracketed by the accepted
//! step and refined by Brent's method, re-running the integrator's own
//! formula from the start of the step. Typical uses:
//!
//! - Periapsis/apoapsis (radial velocity = 0)
//! - Sphere of influence crossings
//! - Eclipse entry/exit
//! - Altitude threshold crossings
//!
//! ```rust
//! use rkprop::{
//!     EventConfig, EventDetector, EventDirection, FnSystem, Integrator, Termination, Tolerances,
//!     VariableMethod,
//! };
//!
//! // Exponential decay, y' = -y
//! let sys = FnSystem::new(1, |_t, y: &[f64], dydt: &mut [f64]| dydt[0] = -y[0]);
//! let mut solver = Integrator::new(VariableMethod::Rkf78, Tolerances::new(1e-12, 1e-12));
//!
//! // Detect when y[0] decreases through 0.5
//! let half_life = EventDetector::new(
//!     |y: &[f64], _t: f64| y[0],
//!     EventConfig {
//!         direction: EventDirection::Falling,
//!         goal: 0.5,
//!         ..Default::default()
//!     },
//! );
//! solver.events_mut().add(half_life).unwrap();
//!
//! let mut y = [1.0];
//! let mut t = 0.0;
//! match solver.integrate(&sys, &mut y, &mut t, 10.0).unwrap() {
//!     Termination::Event(ev) => assert!((ev.t - 2f64.ln()).abs() < 1e-9),
//!     other => panic!("expected an event, got {:?}", other),
//! }
//! ```
//!
//! ## Tolerance Selection
//!
//! The error of component `i` is scaled by `max(|y_i|, |y0_i|, atol/rtol)`
//! and compared against `rtol`:
//!
//! - **Position (km)**: `atol ≈ 1e-12 km` for high-precision orbit determination
//! - **Relative tolerance**: Typically `1e-12` to `1e-14`
//!
//! For energy conservation tests with RKF78 at `tol=1e-12`:
//! - Energy drift should be `< 1e-10` over one orbital period
//!
//! ## References
//!
//! 1. Fehlberg, E. (1968). "Classical Fifth-, Sixth-, Seventh-, and
//!    Eighth-Order Runge-Kutta Formulas with Stepsize Control".
//!    NASA TR R-287.
//!
//! 2. Verner, J.H. (1978). "Explicit Runge-Kutta Methods with Estimates of
//!    the Local Truncation Error". SIAM J. Numer. Anal. 15(4).
//!
//! 3. Cash, J.R. & Karp, A.H. (1990). "A Variable Order Runge-Kutta Method
//!    for Initial Value Problems with Rapidly Varying Right-Hand Sides".
//!    ACM TOMS 16(3).
//!
//! 4. Hairer, E., Nørsett, S.P., & Wanner, G. (1993). "Solving
//!    Ordinary Differential Equations I: Nonstiff Problems".
//!    Springer.
//!
//! 5. Brent, R.P. (1973). "Algorithms for Minimization without
//!    Derivatives". Prentice-Hall.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod coefficients;
pub mod controller;
pub mod error;
pub mod event_list;
pub mod events;
pub mod formula;
pub mod observer;
pub mod solver;
pub mod system;
pub mod workspace;

pub use coefficients::ButcherTableau;
pub use controller::{
    min_step_floor, StepController, StepDecision, Tolerances, DEFAULT_ERROR_COMPONENTS,
};
pub use error::{DerivativeError, EventError, IntegrationError};
pub use event_list::{DetectorId, EventList, EventRecord};
pub use events::{
    sign_change_detected, BrentError, BrentSolver, EventAction, EventConfig, EventDetector,
    EventDirection, Root, SwitchingFunction,
};
pub use formula::{single_step, FixedMethod, Method, VariableMethod};
pub use observer::{
    ObserverAction, ObserverComposite, StateObserver, StepContext, TrajectoryCollector,
};
pub use solver::{CancellationToken, Integrator, StepFailurePolicy, Termination};
pub use system::{FnSystem, OdeSystem};
pub use workspace::{Stats, Workspace};
