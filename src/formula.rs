//! Single-step Runge-Kutta kernels and method selection
//!
//! A single step evaluates every stage of a [`ButcherTableau`] into the
//! [`Workspace`], combines them into the propagated solution and, for
//! embedded pairs, fills the workspace error buffer with
//! `sum_i (b_i - b_hat_i) k_i` (error per unit step length). The error
//! estimate reuses the stage derivatives; no extra evaluations are made.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::coefficients::{self, ButcherTableau};
use crate::error::IntegrationError;
use crate::system::OdeSystem;
use crate::workspace::Workspace;

/// Fixed-step methods (no error estimate)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FixedMethod {
    /// Classical fourth-order Runge-Kutta
    #[default]
    Rk4,
    /// Fehlberg's eighth-order formula (13 stages)
    Fehlberg8,
    /// Cooper-Verner eighth-order formula (11 stages)
    Verner8,
}

impl FixedMethod {
    /// Coefficients of the method.
    pub fn tableau(self) -> &'static ButcherTableau {
        match self {
            FixedMethod::Rk4 => &coefficients::RK4,
            FixedMethod::Fehlberg8 => &coefficients::FEHLBERG8,
            FixedMethod::Verner8 => &coefficients::VERNER8,
        }
    }
}

/// Variable-step methods (embedded error pairs)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum VariableMethod {
    /// Runge-Kutta-Fehlberg 4(5)
    Rkf45,
    /// Runge-Kutta-Fehlberg 5(6)
    Rkf56,
    /// Runge-Kutta-Fehlberg 7(8)
    #[default]
    Rkf78,
    /// Cash-Karp 4(5)
    CashKarp,
}

impl VariableMethod {
    /// Coefficients of the method.
    pub fn tableau(self) -> &'static ButcherTableau {
        match self {
            VariableMethod::Rkf45 => &coefficients::RKF45,
            VariableMethod::Rkf56 => &coefficients::RKF56,
            VariableMethod::Rkf78 => &coefficients::RKF78,
            VariableMethod::CashKarp => &coefficients::CASH_KARP,
        }
    }
}

/// Integration method used by an [`Integrator`](crate::Integrator).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Method {
    /// Advance by a constant step, no error control
    Fixed(FixedMethod),
    /// Advance adaptively under the step-size controller
    Variable(VariableMethod),
}

impl Default for Method {
    fn default() -> Self {
        Method::Variable(VariableMethod::default())
    }
}

impl Method {
    /// Coefficients of the method.
    pub fn tableau(self) -> &'static ButcherTableau {
        match self {
            Method::Fixed(m) => m.tableau(),
            Method::Variable(m) => m.tableau(),
        }
    }

    /// Whether the step size is adapted from an error estimate.
    pub fn is_adaptive(self) -> bool {
        matches!(self, Method::Variable(_))
    }
}

impl From<FixedMethod> for Method {
    fn from(m: FixedMethod) -> Self {
        Method::Fixed(m)
    }
}

impl From<VariableMethod> for Method {
    fn from(m: VariableMethod) -> Self {
        Method::Variable(m)
    }
}

/// Perform one Runge-Kutta step from `(t0, y0)` with step `h`, writing the
/// propagated solution into `yf`.
///
/// The workspace must be sized for `y0.len()` and at least
/// `tableau.stages`. For embedded tableaux the workspace error buffer is
/// refreshed as a side effect.
///
/// # Errors
/// Returns [`IntegrationError::DerivativeEvaluationFailed`] as soon as a
/// stage evaluation fails; `yf` is then unspecified.
#[allow(clippy::needless_range_loop)]
pub fn single_step<S: OdeSystem + ?Sized>(
    tableau: &ButcherTableau,
    ws: &mut Workspace,
    ode: &S,
    t0: f64,
    h: f64,
    y0: &[f64],
    yf: &mut [f64],
) -> Result<(), IntegrationError> {
    let n = y0.len();
    if ws.dimension() != n || ws.stages() < tableau.stages || yf.len() != n {
        return Err(IntegrationError::invalid(format!(
            "workspace sized for (n = {}, stages = {}) but step needs (n = {}, stages = {})",
            ws.dimension(),
            ws.stages(),
            n,
            tableau.stages
        )));
    }

    for i in 0..tableau.stages {
        let row = tableau.row(i);
        let (done, k_i, y_mid) = ws.stage_split(i);

        // y_mid = y0 + h * sum_{j<i} a[i][j] * k[j]
        for m in 0..n {
            let mut sum = 0.0;
            for (j, &a) in row.iter().enumerate() {
                if a != 0.0 {
                    sum += a * done[j * n + m];
                }
            }
            y_mid[m] = y0[m] + h * sum;
        }

        let t_i = t0 + tableau.c[i] * h;
        ode.rhs(t_i, y_mid, k_i)
            .map_err(|source| IntegrationError::DerivativeEvaluationFailed { t: t_i, source })?;
    }
    ws.stats.fn_evals += tableau.stages as u64;

    let stages = tableau.stages;
    let (k, err) = ws.stages_and_error();
    for m in 0..n {
        let mut sum = 0.0;
        for i in 0..stages {
            sum += tableau.b[i] * k[i * n + m];
        }
        yf[m] = y0[m] + h * sum;
    }

    if let Some(b_err) = tableau.b_err {
        for m in 0..n {
            let mut sum = 0.0;
            for i in 0..stages {
                sum += b_err[i] * k[i * n + m];
            }
            err[m] = sum;
        }
    }

    Ok(())
}
