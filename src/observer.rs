//! State observers notified after every accepted step
//!
//! An observer sees the freshly accepted `(y, t)` and may stop the
//! integration or overwrite the state (the event list does both when an
//! event fires). The [`StepContext`] handed to each observer gives access to
//! the step bracket and can re-run the integrator's single step from the
//! last accepted state, which is how event crossings are refined.

use crate::coefficients::ButcherTableau;
use crate::error::IntegrationError;
use crate::formula;
use crate::system::OdeSystem;
use crate::workspace::Workspace;

/// What the integrator should do after notifying an observer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverAction {
    /// Keep integrating
    Continue,
    /// Terminate with the (possibly overwritten) state
    Stop,
}

/// The step that was just accepted, with the means to re-evaluate it.
pub struct StepContext<'a> {
    ode: &'a dyn OdeSystem,
    tableau: &'static ButcherTableau,
    workspace: &'a mut Workspace,
    t_prev: f64,
    y_prev: &'a [f64],
    direction: f64,
}

impl<'a> StepContext<'a> {
    pub(crate) fn new(
        ode: &'a dyn OdeSystem,
        tableau: &'static ButcherTableau,
        workspace: &'a mut Workspace,
        t_prev: f64,
        y_prev: &'a [f64],
        direction: f64,
    ) -> Self {
        Self {
            ode,
            tableau,
            workspace,
            t_prev,
            y_prev,
            direction,
        }
    }

    /// Start time of the accepted step.
    pub fn t_prev(&self) -> f64 {
        self.t_prev
    }

    /// State at the start of the accepted step.
    pub fn y_prev(&self) -> &[f64] {
        self.y_prev
    }

    /// `+1.0` when integrating forward in time, `-1.0` backward.
    pub fn direction(&self) -> f64 {
        self.direction
    }

    /// The system being integrated.
    pub fn ode(&self) -> &dyn OdeSystem {
        self.ode
    }

    /// Tableau of the running method.
    pub fn tableau(&self) -> &'static ButcherTableau {
        self.tableau
    }

    /// State at `t` obtained by one step of the running method from the
    /// start of the accepted step.
    ///
    /// `t` should lie within the accepted step; the result there has the
    /// accuracy of a regular step of that length. The evaluations are
    /// counted in [`Stats::refinement_evals`](crate::Stats::refinement_evals),
    /// and the workspace error buffer is overwritten.
    pub fn propagate(&mut self, t: f64, out: &mut [f64]) -> Result<(), IntegrationError> {
        let h = t - self.t_prev;
        if h == 0.0 {
            out.copy_from_slice(self.y_prev);
            return Ok(());
        }
        let before = self.workspace.stats.fn_evals;
        let result = formula::single_step(
            self.tableau,
            self.workspace,
            self.ode,
            self.t_prev,
            h,
            self.y_prev,
            out,
        );
        let stats = &mut self.workspace.stats;
        stats.refinement_evals += stats.fn_evals - before;
        stats.fn_evals = before;
        result
    }
}

/// Observer of accepted integration steps.
pub trait StateObserver {
    /// Called once with the initial state before the first step.
    fn on_start(&mut self, _y: &[f64], _t: f64) {}

    /// Called after each accepted step with the new state.
    ///
    /// Implementations may overwrite `y` and `t`; the integrator resumes from
    /// (or terminates with) whatever they hold on return.
    fn on_accept(
        &mut self,
        y: &mut [f64],
        t: &mut f64,
        ctx: &mut StepContext<'_>,
    ) -> Result<ObserverAction, IntegrationError>;
}

impl StateObserver for () {
    fn on_accept(
        &mut self,
        _y: &mut [f64],
        _t: &mut f64,
        _ctx: &mut StepContext<'_>,
    ) -> Result<ObserverAction, IntegrationError> {
        Ok(ObserverAction::Continue)
    }
}

/// Records the initial state and every accepted state.
#[derive(Debug, Clone, Default)]
pub struct TrajectoryCollector {
    /// Times of the recorded states
    pub times: Vec<f64>,
    /// Recorded states, parallel to `times`
    pub states: Vec<Vec<f64>>,
}

impl TrajectoryCollector {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded states
    pub fn len(&self) -> usize {
        self.times.len()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Drop all recorded states
    pub fn clear(&mut self) {
        self.times.clear();
        self.states.clear();
    }
}

impl StateObserver for TrajectoryCollector {
    fn on_start(&mut self, y: &[f64], t: f64) {
        self.times.push(t);
        self.states.push(y.to_vec());
    }

    fn on_accept(
        &mut self,
        y: &mut [f64],
        t: &mut f64,
        _ctx: &mut StepContext<'_>,
    ) -> Result<ObserverAction, IntegrationError> {
        self.times.push(*t);
        self.states.push(y.to_vec());
        Ok(ObserverAction::Continue)
    }
}

/// Runs several observers in registration order.
///
/// Notification stops at the first observer that returns
/// [`ObserverAction::Stop`]; later observers do not see that step.
#[derive(Default)]
pub struct ObserverComposite<'a> {
    observers: Vec<&'a mut dyn StateObserver>,
}

impl<'a> ObserverComposite<'a> {
    /// Create an empty composite
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
        }
    }

    /// Append an observer
    pub fn push(&mut self, observer: &'a mut dyn StateObserver) {
        self.observers.push(observer);
    }

    /// Builder form of [`push`](Self::push)
    pub fn with(mut self, observer: &'a mut dyn StateObserver) -> Self {
        self.push(observer);
        self
    }

    /// Number of registered observers
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Whether no observer is registered
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl StateObserver for ObserverComposite<'_> {
    fn on_start(&mut self, y: &[f64], t: f64) {
        for observer in self.observers.iter_mut() {
            observer.on_start(y, t);
        }
    }

    fn on_accept(
        &mut self,
        y: &mut [f64],
        t: &mut f64,
        ctx: &mut StepContext<'_>,
    ) -> Result<ObserverAction, IntegrationError> {
        for observer in self.observers.iter_mut() {
            if observer.on_accept(y, t, ctx)? == ObserverAction::Stop {
                return Ok(ObserverAction::Stop);
            }
        }
        Ok(ObserverAction::Continue)
    }
}
