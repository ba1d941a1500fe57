//! Per-integrator scratch storage
//!
//! All stage derivatives live in one contiguous buffer addressed as
//! `stage * n + component`. Buffers are resized only when the
//! `(dimension, stages)` pair changes, so repeated integrations of the
//! same problem never allocate.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Integration statistics for diagnostics
///
/// `largest_step` and `smallest_step` are only meaningful once
/// `num_steps > 0`; see [`Stats::step_range`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Stats {
    /// Number of accepted steps
    pub num_steps: u64,
    /// Number of rejected step attempts
    pub rejected_steps: u64,
    /// Derivative evaluations of the integration steps (accepted and rejected)
    pub fn_evals: u64,
    /// Derivative evaluations spent re-stepping during event refinement
    pub refinement_evals: u64,
    /// Largest accepted step magnitude
    pub largest_step: f64,
    /// Smallest accepted step magnitude
    pub smallest_step: f64,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            num_steps: 0,
            rejected_steps: 0,
            fn_evals: 0,
            refinement_evals: 0,
            largest_step: 0.0,
            smallest_step: f64::INFINITY,
        }
    }
}

impl Stats {
    /// `(smallest, largest)` accepted step magnitudes, once a step was accepted.
    pub fn step_range(&self) -> Option<(f64, f64)> {
        (self.num_steps > 0).then_some((self.smallest_step, self.largest_step))
    }

    pub(crate) fn record_accepted(&mut self, h: f64) {
        let h = h.abs();
        self.num_steps += 1;
        self.largest_step = self.largest_step.max(h);
        self.smallest_step = self.smallest_step.min(h);
    }
}

/// Reusable scratch buffers sized to `(dimension, stages)`.
#[derive(Debug, Clone, Default)]
pub struct Workspace {
    dimension: usize,
    stages: usize,
    /// Stage derivatives, `stages * dimension` long
    k: Vec<f64>,
    /// Error per unit step length from the last embedded step
    err: Vec<f64>,
    /// Stage input state
    y_mid: Vec<f64>,
    /// Running statistics
    pub stats: Stats,
}

impl Workspace {
    /// Create a workspace for the given dimension and stage count.
    pub fn new(dimension: usize, stages: usize) -> Self {
        let mut ws = Self::default();
        ws.ensure(dimension, stages);
        ws
    }

    /// Resize the buffers if `(dimension, stages)` changed.
    ///
    /// Returns `true` when a reallocation happened; statistics are reset in
    /// that case.
    pub fn ensure(&mut self, dimension: usize, stages: usize) -> bool {
        if self.dimension == dimension && self.stages == stages && !self.k.is_empty() {
            return false;
        }
        self.dimension = dimension;
        self.stages = stages;
        self.k = vec![0.0; dimension * stages];
        self.err = vec![0.0; dimension];
        self.y_mid = vec![0.0; dimension];
        self.stats = Stats::default();
        true
    }

    /// State dimension the buffers are sized for.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Stage count the buffers are sized for.
    pub fn stages(&self) -> usize {
        self.stages
    }

    /// Stage derivative `i`.
    pub fn stage(&self, i: usize) -> &[f64] {
        let n = self.dimension;
        &self.k[i * n..(i + 1) * n]
    }

    /// Error-per-unit-length vector of the last embedded step.
    pub fn error_estimate(&self) -> &[f64] {
        &self.err
    }

    /// Split borrow used by the step kernels: the finished stages before
    /// `i`, the output slot for stage `i`, and the midpoint buffer.
    pub(crate) fn stage_split(&mut self, i: usize) -> (&[f64], &mut [f64], &mut [f64]) {
        let n = self.dimension;
        let (done, rest) = self.k.split_at_mut(i * n);
        (done, &mut rest[..n], &mut self.y_mid)
    }

    pub(crate) fn stages_and_error(&mut self) -> (&[f64], &mut [f64]) {
        (&self.k, &mut self.err)
    }

    /// Clear the statistics without touching the buffers.
    pub fn reset_stats(&mut self) {
        self.stats = Stats::default();
    }
}
