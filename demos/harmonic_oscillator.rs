//! Basic usage: harmonic oscillator.
//!
//! Integrates y'' + ω²y = 0 for one period with every method and compares
//! with the exact solution.
//!
//! Run with:
//!   cargo run --example harmonic_oscillator

use rkprop::{
    DerivativeError, FixedMethod, Integrator, OdeSystem, Tolerances, TrajectoryCollector,
    VariableMethod,
};

/// Simple harmonic oscillator: y'' + ω²y = 0
///
/// State vector: [y, y']
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

fn report(label: &str, solver: &Integrator, y: &[f64], y_exact: f64, v_exact: f64) {
    let stats = solver.stats();
    println!(
        "  {:<10} pos err {:.2e}  vel err {:.2e}  steps {:>5}  rejected {:>3}  evals {:>6}",
        label,
        (y[0] - y_exact).abs(),
        (y[1] - v_exact).abs(),
        stats.num_steps,
        stats.rejected_steps,
        stats.fn_evals
    );
}

fn main() {
    let omega = 2.0;
    let sys = HarmonicOscillator { omega };

    // Integrate for one full period: T = 2π/ω
    let period = 2.0 * std::f64::consts::PI / omega;
    let y0 = [1.0, 0.0]; // y(0) = 1, y'(0) = 0

    // Exact solution: y(t) = cos(ωt), y'(t) = -ω sin(ωt)
    let y_exact = (omega * period).cos();
    let v_exact = -omega * (omega * period).sin();

    println!("Harmonic Oscillator (ω = {omega})");
    println!("  Period: {period:.6} s");
    println!();

    println!("Adaptive methods (tol = 1e-12):");
    for method in [
        VariableMethod::Rkf45,
        VariableMethod::Rkf56,
        VariableMethod::Rkf78,
        VariableMethod::CashKarp,
    ] {
        let mut solver = Integrator::new(method, Tolerances::new(1e-12, 1e-12));
        solver.set_initial_step(0.01);
        let mut y = y0;
        let mut t = 0.0;
        solver.integrate(&sys, &mut y, &mut t, period).unwrap();
        report(&format!("{method:?}"), &solver, &y, y_exact, v_exact);
    }
    println!();

    println!("Fixed-step methods (h = T/64):");
    for method in [FixedMethod::Rk4, FixedMethod::Fehlberg8, FixedMethod::Verner8] {
        let mut solver = Integrator::fixed(method, period / 64.0);
        let mut y = y0;
        let mut t = 0.0;
        solver.integrate(&sys, &mut y, &mut t, period).unwrap();
        report(&format!("{method:?}"), &solver, &y, y_exact, v_exact);
    }
    println!();

    // Record the trajectory of a coarse run
    let mut solver = Integrator::new(VariableMethod::Rkf78, Tolerances::new(1e-8, 1e-8));
    let mut collector = TrajectoryCollector::new();
    let mut y = y0;
    let mut t = 0.0;
    solver
        .integrate_observed(&sys, &mut y, &mut t, period, &mut collector)
        .unwrap();

    println!("Accepted states at tol = 1e-8:");
    for (t, state) in collector.times.iter().zip(&collector.states) {
        println!("  t = {:8.5}  y = {:+.10}  y' = {:+.10}", t, state[0], state[1]);
    }
    if let Some((smallest, largest)) = solver.stats().step_range() {
        println!("  Step range: [{smallest:.5}, {largest:.5}]");
    }
}
