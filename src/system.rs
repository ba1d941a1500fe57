//! Derivative contract: the right-hand side `dy/dt = f(t, y)` supplied by the caller.

use crate::error::DerivativeError;

/// System of ordinary differential equations: dy/dt = f(t, y)
///
/// The integrator evaluates [`rhs`](OdeSystem::rhs) once per stage, several
/// times per step and again during event refinement, so implementations must
/// not carry side effects beyond writing `dydt`.
///
/// # Example
///
/// ```
/// use rkprop::{DerivativeError, OdeSystem};
///
/// struct HarmonicOscillator { omega: f64 }
///
/// impl OdeSystem for HarmonicOscillator {
///     fn dimension(&self) -> usize { 2 }
///
///     fn rhs(&self, _t: f64, y: &[f64], dydt: &mut [f64]) -> Result<(), DerivativeError> {
///         dydt[0] = y[1];
///         dydt[1] = -self.omega * self.omega * y[0];
///         Ok(())
///     }
/// }
/// ```
pub trait OdeSystem {
    /// Length of the state vector.
    fn dimension(&self) -> usize;

    /// Evaluate the right-hand side of the ODE system
    ///
    /// # Arguments
    /// * `t` - Current time
    /// * `y` - Current state vector (length [`dimension`](OdeSystem::dimension))
    /// * `dydt` - Output: derivative dy/dt
    fn rhs(&self, t: f64, y: &[f64], dydt: &mut [f64]) -> Result<(), DerivativeError>;
}

impl<S: OdeSystem + ?Sized> OdeSystem for &S {
    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn rhs(&self, t: f64, y: &[f64], dydt: &mut [f64]) -> Result<(), DerivativeError> {
        (**self).rhs(t, y, dydt)
    }
}

/// An [`OdeSystem`] built from an infallible closure.
///
/// ```
/// use rkprop::FnSystem;
///
/// // y' = -y
/// let decay = FnSystem::new(1, |_t, y: &[f64], dydt: &mut [f64]| dydt[0] = -y[0]);
/// ```
pub struct FnSystem<F> {
    dimension: usize,
    f: F,
}

impl<F> FnSystem<F>
where
    F: Fn(f64, &[f64], &mut [f64]),
{
    /// Wrap `f` as a system of the given dimension.
    pub fn new(dimension: usize, f: F) -> Self {
        Self { dimension, f }
    }
}

impl<F> OdeSystem for FnSystem<F>
where
    F: Fn(f64, &[f64], &mut [f64]),
{
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn rhs(&self, t: f64, y: &[f64], dydt: &mut [f64]) -> Result<(), DerivativeError> {
        (self.f)(t, y, dydt);
        Ok(())
    }
}
