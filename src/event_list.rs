//! Registered event detectors and their per-run detection state
//!
//! The [`EventList`] owns every registered [`EventDetector`] together with an
//! observer that remembers the last switching-function difference, counts
//! qualifying crossings and refines a firing crossing with Brent's method.
//! The list itself is a [`StateObserver`]: the integrator notifies it after
//! every accepted step, before the caller's own observer.

use log::{debug, warn};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{EventError, IntegrationError};
use crate::events::{sign_change_detected, BrentSolver, EventAction, EventDetector};
use crate::observer::{ObserverAction, StateObserver, StepContext};

/// Handle returned by [`EventList::add`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DetectorId(u64);

/// A fired event
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EventRecord {
    /// Detector that fired
    pub detector: DetectorId,
    /// Detector label, if it has one
    pub name: Option<String>,
    /// Refined event time
    pub t: f64,
    /// State at the event time
    pub y: Vec<f64>,
    /// Switching-function value at the event, relative to the goal
    pub difference: f64,
    /// Root-finder iterations spent on the refinement
    pub iterations: usize,
    /// Action of the detector when it fired
    pub action: EventAction,
}

/// Detection state of one detector
#[derive(Debug, Clone, Default)]
struct EventObserver {
    /// `(t, difference)` at the last accepted state
    last: Option<(f64, f64)>,
    /// Difference before the current step, kept for rollback
    pre_step: Option<f64>,
    /// Qualifying crossings since the last firing
    occurrences: u32,
    /// Whether a crossing was counted (without firing) in the current step
    counted: bool,
    /// Refinements that failed
    failures: u64,
}

impl EventObserver {
    fn prime(&mut self, detector: &EventDetector, y: &[f64], t: f64) {
        self.last = Some((t, detector.difference(y, t)));
        self.pre_step = None;
        self.counted = false;
    }

    /// Update with the newly accepted state; returns the refined event when
    /// the detector fires on this step.
    fn check(
        &mut self,
        detector: &EventDetector,
        y: &[f64],
        t: f64,
        ctx: &mut StepContext<'_>,
    ) -> Result<Option<Refined>, IntegrationError> {
        let diff = detector.difference(y, t);
        let previous = self.last.replace((t, diff));
        self.counted = false;
        let Some((t_last, last)) = previous else {
            self.pre_step = None;
            return Ok(None);
        };
        self.pre_step = Some(last);

        let config = detector.config();
        let direction = config.direction.in_step_order(ctx.direction());
        if !sign_change_detected(last, diff, direction) {
            return Ok(None);
        }

        self.occurrences += 1;
        if self.occurrences < config.repeat_count {
            self.counted = true;
            return Ok(None);
        }
        self.occurrences = 0;

        match refine(detector, ctx, t_last, last, t, diff)? {
            Ok(refined) => Ok(Some(refined)),
            Err(e) => {
                self.failures += 1;
                warn!(
                    "event {} crossing in [{}, {}] not refined: {}",
                    detector.name().unwrap_or("<unnamed>"),
                    t_last,
                    t,
                    e
                );
                Ok(None)
            }
        }
    }

    /// Re-prime at a state that replaced the accepted one.
    fn reprime(&mut self, detector: &EventDetector, y: &[f64], t: f64) {
        let diff = detector.difference(y, t);
        // A crossing counted this step that lies past the new state is undone
        if self.counted {
            if let Some(pre) = self.pre_step {
                if pre * diff > 0.0 {
                    self.occurrences = self.occurrences.saturating_sub(1);
                }
            }
        }
        self.last = Some((t, diff));
        self.pre_step = None;
        self.counted = false;
    }

    /// Undo a firing whose crossing lies past an earlier stop event.
    fn rollback_fire(&mut self, repeat_count: u32) {
        self.occurrences = repeat_count.saturating_sub(1);
        self.counted = false;
    }
}

/// Refined crossing of one detector
#[derive(Debug, Clone)]
struct Refined {
    t: f64,
    y: Vec<f64>,
    difference: f64,
    iterations: usize,
}

/// Locate the crossing between `(t_a, g_a)` and `(t_b, g_b)`.
///
/// The outer error is fatal (derivative failure while re-stepping); the
/// inner one is a refinement failure that only suppresses the event.
fn refine(
    detector: &EventDetector,
    ctx: &mut StepContext<'_>,
    t_a: f64,
    g_a: f64,
    t_b: f64,
    g_b: f64,
) -> Result<Result<Refined, EventError>, IntegrationError> {
    let config = detector.config();
    let solver = BrentSolver::new(config.threshold, config.max_iter);
    let mut y = vec![0.0; ctx.y_prev().len()];
    let mut fatal: Option<IntegrationError> = None;

    let root = solver.find_root(
        |tc| {
            if fatal.is_some() {
                return f64::NAN;
            }
            match ctx.propagate(tc, &mut y) {
                Ok(()) => detector.difference(&y, tc),
                Err(e) => {
                    fatal = Some(e);
                    f64::NAN
                }
            }
        },
        t_a,
        t_b,
        Some(g_a),
        Some(g_b),
    );
    if let Some(e) = fatal {
        return Err(e);
    }
    let root = match root {
        Ok(root) => root,
        Err(e) => return Ok(Err(e.into())),
    };

    // Report the bracket end on the post-crossing side so that resuming
    // from the event state does not see the same crossing again
    let t_event = if root.fx == 0.0 || root.fx * g_b > 0.0 {
        root.x
    } else {
        root.other_end()
    };

    ctx.propagate(t_event, &mut y)?;
    let difference = detector.difference(&y, t_event);
    if !difference.is_finite() {
        return Ok(Err(EventError::NonFiniteSwitchingValue { t: t_event }));
    }

    Ok(Ok(Refined {
        t: t_event,
        y,
        difference,
        iterations: root.iterations,
    }))
}

#[derive(Debug)]
struct Entry {
    id: DetectorId,
    detector: EventDetector,
    observer: EventObserver,
}

/// Ordered collection of event detectors.
///
/// The list owns its detectors while they are registered;
/// [`remove`](EventList::remove) hands a detector back to the caller.
#[derive(Debug, Default)]
pub struct EventList {
    entries: Vec<Entry>,
    next_id: u64,
    history: Vec<EventRecord>,
}

impl EventList {
    /// Create an empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a detector.
    ///
    /// # Errors
    /// [`IntegrationError::InvalidParameter`] when the detector configuration
    /// is out of range (non-positive threshold, zero repeat count, ...).
    pub fn add(&mut self, detector: EventDetector) -> Result<DetectorId, IntegrationError> {
        detector.config().validate().map_err(IntegrationError::invalid)?;
        let id = DetectorId(self.next_id);
        self.next_id += 1;
        self.entries.push(Entry {
            id,
            detector,
            observer: EventObserver::default(),
        });
        Ok(id)
    }

    /// Unregister a detector and return it.
    pub fn remove(&mut self, id: DetectorId) -> Option<EventDetector> {
        let index = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(index).detector)
    }

    /// Registered detector by id
    pub fn get(&self, id: DetectorId) -> Option<&EventDetector> {
        self.entry(id).map(|e| &e.detector)
    }

    /// Registered detector by id, for reconfiguration
    pub fn get_mut(&mut self, id: DetectorId) -> Option<&mut EventDetector> {
        self.entries
            .iter_mut()
            .find(|e| e.id == id)
            .map(|e| &mut e.detector)
    }

    /// Ids of the registered detectors, in registration order
    pub fn ids(&self) -> impl Iterator<Item = DetectorId> + '_ {
        self.entries.iter().map(|e| e.id)
    }

    /// Number of registered detectors
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no detector is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Crossings counted toward the next firing of a detector
    pub fn occurrences(&self, id: DetectorId) -> Option<u32> {
        self.entry(id).map(|e| e.observer.occurrences)
    }

    /// Failed refinements of a detector
    pub fn refinement_failures(&self, id: DetectorId) -> Option<u64> {
        self.entry(id).map(|e| e.observer.failures)
    }

    /// Every event fired so far, in firing order
    pub fn history(&self) -> &[EventRecord] {
        &self.history
    }

    /// Most recently fired event
    pub fn last_event(&self) -> Option<&EventRecord> {
        self.history.last()
    }

    /// Forget fired events
    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Reset the detection state of every detector (counters, last values,
    /// failure counts). The history is kept.
    pub fn reset_counters(&mut self) {
        for entry in self.entries.iter_mut() {
            entry.observer = EventObserver::default();
        }
    }

    fn entry(&self, id: DetectorId) -> Option<&Entry> {
        self.entries.iter().find(|e| e.id == id)
    }
}

impl StateObserver for EventList {
    fn on_start(&mut self, y: &[f64], t: f64) {
        for entry in self.entries.iter_mut() {
            entry.observer.prime(&entry.detector, y, t);
        }
    }

    fn on_accept(
        &mut self,
        y: &mut [f64],
        t: &mut f64,
        ctx: &mut StepContext<'_>,
    ) -> Result<ObserverAction, IntegrationError> {
        let mut hits: Vec<(usize, Refined)> = Vec::new();
        for (index, entry) in self.entries.iter_mut().enumerate() {
            if let Some(refined) = entry.observer.check(&entry.detector, y, *t, ctx)? {
                hits.push((index, refined));
            }
        }
        if hits.is_empty() {
            return Ok(ObserverAction::Continue);
        }

        // Time order along the direction of integration; stable for ties
        let direction = ctx.direction();
        hits.sort_by(|a, b| (a.1.t * direction).total_cmp(&(b.1.t * direction)));

        let stop = hits
            .iter()
            .position(|(index, _)| self.entries[*index].detector.config().action == EventAction::Stop);
        let cut = stop.map_or(hits.len(), |p| p + 1);
        for (index, _) in hits.drain(cut..) {
            let entry = &mut self.entries[index];
            entry.observer.rollback_fire(entry.detector.config().repeat_count);
        }

        for (index, refined) in hits {
            let entry = &self.entries[index];
            let record = EventRecord {
                detector: entry.id,
                name: entry.detector.name().map(str::to_owned),
                t: refined.t,
                y: refined.y,
                difference: refined.difference,
                iterations: refined.iterations,
                action: entry.detector.config().action,
            };
            debug!(
                "event {} fired at t = {} after {} iterations",
                record.name.as_deref().unwrap_or("<unnamed>"),
                record.t,
                record.iterations
            );
            self.history.push(record);
        }

        if stop.is_none() {
            return Ok(ObserverAction::Continue);
        }

        let Some(event) = self.history.last() else {
            return Ok(ObserverAction::Continue);
        };
        *t = event.t;
        y.copy_from_slice(&event.y);
        for entry in self.entries.iter_mut() {
            entry.observer.reprime(&entry.detector, y, *t);
        }
        Ok(ObserverAction::Stop)
    }
}
