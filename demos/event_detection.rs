//! Event detection: periapsis finding in a two-body orbit.
//!
//! Demonstrates `EventAction::Stop` (halt at first periapsis),
//! `EventAction::Continue` (collect all periapsis crossings over multiple
//! orbits) and `repeat_count` (stop at the third periapsis).
//!
//! Run with:
//!   cargo run --example event_detection

use rkprop::{
    DerivativeError, EventAction, EventConfig, EventDetector, EventDirection, Integrator,
    OdeSystem, SwitchingFunction, Termination, Tolerances, VariableMethod,
};

/// Keplerian two-body problem.
struct TwoBody {
    mu: f64,
}

impl OdeSystem for TwoBody {
    fn dimension(&self) -> usize {
        6
    }

    fn rhs(&self, _t: f64, y: &[f64], dydt: &mut [f64]) -> Result<(), DerivativeError> {
        let r2 = y[0] * y[0] + y[1] * y[1] + y[2] * y[2];
        let r = r2.sqrt();
        let r3 = r2 * r;
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

/// Periapsis event: radial velocity r·v = 0, rising means r·v goes negative→positive
/// (i.e., radius is at a minimum).
struct PeriapsisEvent;

impl SwitchingFunction for PeriapsisEvent {
    fn value(&self, y: &[f64], _t: f64) -> f64 {
        // r_dot = (r · v) / |r|, but sign is all we need
        y[0] * y[3] + y[1] * y[4] + y[2] * y[5]
    }
}

fn radius(y: &[f64]) -> f64 {
    (y[0] * y[0] + y[1] * y[1] + y[2] * y[2]).sqrt()
}

fn periapsis(config: EventConfig) -> EventDetector {
    EventDetector::new(PeriapsisEvent, config).named("periapsis")
}

fn main() {
    let mu = 398600.4418;
    let sys = TwoBody { mu };

    // Elliptical orbit: 400 km × 2000 km altitude
    let earth_radius = 6378.137;
    let r_peri = earth_radius + 400.0;
    let r_apo = earth_radius + 2000.0;
    let a = (r_peri + r_apo) / 2.0;
    let v_peri = (mu * (2.0 / r_peri - 1.0 / a)).sqrt();

    // Start at periapsis, moving prograde
    let y0 = [r_peri, 0.0, 0.0, 0.0, v_peri, 0.0];
    let period = 2.0 * std::f64::consts::PI * (a.powi(3) / mu).sqrt();

    println!("Event Detection: Periapsis Finding");
    println!("  Orbit: {:.0} × {:.0} km altitude", 400.0, 2000.0);
    println!("  Period: {:.1} s ({:.1} min)", period, period / 60.0);
    println!();

    // --- Part 1: Stop at first periapsis after t=0 ---
    // We start at periapsis, so the next one is after one full orbit.
    let mut solver = Integrator::new(VariableMethod::Rkf78, Tolerances::new(1e-12, 1e-12));
    solver.set_initial_step(10.0);
    solver
        .events_mut()
        .add(periapsis(EventConfig {
            direction: EventDirection::Rising, // r_dot: negative → positive = periapsis
            ..Default::default()
        }))
        .unwrap();

    // Integrate for 1.5 periods to guarantee we cross periapsis
    let mut y = y0;
    let mut t = 0.0;
    println!("Part 1: EventAction::Stop");
    match solver.integrate(&sys, &mut y, &mut t, 1.5 * period).unwrap() {
        Termination::Event(ev) => {
            let r = radius(&ev.y);
            println!("  Periapsis found at t = {:.6} s", ev.t);
            println!("  Radius at periapsis: {:.6} km  (expected: {:.3})", r, r_peri);
            println!("  Radius error: {:.2e} km", (r - r_peri).abs());
            println!("  Brent iterations: {}", ev.iterations);
        }
        other => println!("  No periapsis found ({other:?}, t = {t})"),
    }
    println!();

    // --- Part 2: Collect all periapsis crossings over 5 orbits ---
    let mut solver = Integrator::new(VariableMethod::Rkf78, Tolerances::new(1e-12, 1e-12));
    solver
        .events_mut()
        .add(periapsis(EventConfig {
            direction: EventDirection::Rising,
            action: EventAction::Continue,
            ..Default::default()
        }))
        .unwrap();

    let mut y = y0;
    let mut t = 0.0;
    solver.integrate(&sys, &mut y, &mut t, 5.0 * period).unwrap();

    let history = solver.events().history();
    println!("Part 2: EventAction::Continue (5 orbits)");
    println!("  Found {} periapsis crossings:", history.len());
    for (i, ev) in history.iter().enumerate() {
        let r = radius(&ev.y);
        println!(
            "    #{}: t = {:10.3} s  r = {:.6} km  err = {:.2e} km",
            i + 1,
            ev.t,
            r,
            (r - r_peri).abs()
        );
    }
    println!();

    // --- Part 3: Stop on the third periapsis ---
    let mut solver = Integrator::new(VariableMethod::Rkf78, Tolerances::new(1e-12, 1e-12));
    solver
        .events_mut()
        .add(periapsis(EventConfig {
            direction: EventDirection::Rising,
            repeat_count: 3,
            ..Default::default()
        }))
        .unwrap();

    let mut y = y0;
    let mut t = 0.0;
    let end = solver.integrate(&sys, &mut y, &mut t, 5.0 * period).unwrap();
    println!("Part 3: repeat_count = 3");
    if let Termination::Event(ev) = end {
        println!(
            "  Stopped at t = {:.3} s ({:.6} periods)",
            ev.t,
            ev.t / period
        );
    }
}
