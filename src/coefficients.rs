//! Butcher tableaux for the supported Runge-Kutta methods
//!
//! Every tableau stores its Runge-Kutta matrix as the strictly lower
//! triangle flattened row by row: row `i` holds `i` entries, so
//! `a(i, j)` lives at index `i * (i - 1) / 2 + j`.
//!
//! Sources:
//! - Fehlberg, E. (1968). "Classical Fifth-, Sixth-, Seventh-, and
//!   Eighth-Order Runge-Kutta Formulas with Stepsize Control".
//!   NASA TR R-287 (RKF 5(6), RKF 7(8)).
//! - Fehlberg, E. (1969). NASA TR R-315 (RKF 4(5)).
//! - Cash, J.R. & Karp, A.H. (1990). ACM TOMS 16(3), 201-222.
//! - Cooper, G.J. & Verner, J.H. (1972). "Some explicit Runge-Kutta
//!   methods of high order". SIAM J. Numer. Anal. 9(3).

/// Coefficients of an explicit Runge-Kutta method.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ButcherTableau {
    /// Human-readable method name
    pub name: &'static str,
    /// Number of stages actually evaluated
    pub stages: usize,
    /// Order of the propagated solution
    pub order: u8,
    /// Order of the embedded solution, if the method estimates its error
    pub embedded_order: Option<u8>,
    /// Nodes (c_i); at least `stages` entries
    pub c: &'static [f64],
    /// Strictly lower triangle of the Runge-Kutta matrix, flattened by rows
    pub a: &'static [f64],
    /// Weights of the propagated solution (b_i)
    pub b: &'static [f64],
    /// Error weights b_i - b_hat_i, if the method is an embedded pair
    pub b_err: Option<&'static [f64]>,
}

impl ButcherTableau {
    /// Coefficients a_{i,0..i} for stage `i`.
    pub fn row(&self, i: usize) -> &'static [f64] {
        let start = i * i.saturating_sub(1) / 2;
        &self.a[start..start + i]
    }

    /// Whether the tableau carries an embedded error estimator.
    pub fn is_embedded(&self) -> bool {
        self.b_err.is_some()
    }
}

// ---------------------------------------------------------------------------
// Classical RK4
// ---------------------------------------------------------------------------

const RK4_C: [f64; 4] = [0.0, 0.5, 0.5, 1.0];

#[rustfmt::skip]
const RK4_A: [f64; 6] = [
    0.5,
    0.0, 0.5,
    0.0, 0.0, 1.0,
];

const RK4_B: [f64; 4] = [1.0 / 6.0, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 6.0];

/// Classical fourth-order Runge-Kutta.
pub const RK4: ButcherTableau = ButcherTableau {
    name: "RK4",
    stages: 4,
    order: 4,
    embedded_order: None,
    c: &RK4_C,
    a: &RK4_A,
    b: &RK4_B,
    b_err: None,
};

// ---------------------------------------------------------------------------
// Runge-Kutta-Fehlberg 4(5)
// ---------------------------------------------------------------------------

const RKF45_C: [f64; 6] = [0.0, 1.0 / 4.0, 3.0 / 8.0, 12.0 / 13.0, 1.0, 1.0 / 2.0];

#[rustfmt::skip]
const RKF45_A: [f64; 15] = [
    1.0 / 4.0,
    3.0 / 32.0, 9.0 / 32.0,
    1932.0 / 2197.0, -7200.0 / 2197.0, 7296.0 / 2197.0,
    439.0 / 216.0, -8.0, 3680.0 / 513.0, -845.0 / 4104.0,
    -8.0 / 27.0, 2.0, -3544.0 / 2565.0, 1859.0 / 4104.0, -11.0 / 40.0,
];

/// Fifth-order weights
const RKF45_B: [f64; 6] = [
    16.0 / 135.0,
    0.0,
    6656.0 / 12825.0,
    28561.0 / 56430.0,
    -9.0 / 50.0,
    2.0 / 55.0,
];

/// Fifth-order minus fourth-order weights
const RKF45_B_ERR: [f64; 6] = [
    16.0 / 135.0 - 25.0 / 216.0,
    0.0,
    6656.0 / 12825.0 - 1408.0 / 2565.0,
    28561.0 / 56430.0 - 2197.0 / 4104.0,
    -9.0 / 50.0 + 1.0 / 5.0,
    2.0 / 55.0,
];

/// Runge-Kutta-Fehlberg 4(5), propagating the fifth-order solution.
pub const RKF45: ButcherTableau = ButcherTableau {
    name: "RKF45",
    stages: 6,
    order: 5,
    embedded_order: Some(4),
    c: &RKF45_C,
    a: &RKF45_A,
    b: &RKF45_B,
    b_err: Some(&RKF45_B_ERR),
};

// ---------------------------------------------------------------------------
// Runge-Kutta-Fehlberg 5(6)
// ---------------------------------------------------------------------------

const RKF56_C: [f64; 8] = [0.0, 1.0 / 6.0, 4.0 / 15.0, 2.0 / 3.0, 4.0 / 5.0, 1.0, 0.0, 1.0];

#[rustfmt::skip]
const RKF56_A: [f64; 28] = [
    1.0 / 6.0,
    4.0 / 75.0, 16.0 / 75.0,
    5.0 / 6.0, -8.0 / 3.0, 5.0 / 2.0,
    -8.0 / 5.0, 144.0 / 25.0, -4.0, 16.0 / 25.0,
    361.0 / 320.0, -18.0 / 5.0, 407.0 / 128.0, -11.0 / 80.0, 55.0 / 128.0,
    -11.0 / 640.0, 0.0, 11.0 / 256.0, -11.0 / 160.0, 11.0 / 256.0, 0.0,
    93.0 / 640.0, -18.0 / 5.0, 803.0 / 256.0, -11.0 / 160.0, 99.0 / 256.0, 0.0, 1.0,
];

/// Sixth-order weights
const RKF56_B: [f64; 8] = [
    7.0 / 1408.0,
    0.0,
    1125.0 / 2816.0,
    9.0 / 32.0,
    125.0 / 768.0,
    0.0,
    5.0 / 66.0,
    5.0 / 66.0,
];

/// Sixth-order minus fifth-order weights: TE = (5/66) (k_0 + k_5 - k_6 - k_7) h
const RKF56_B_ERR: [f64; 8] = [
    -5.0 / 66.0,
    0.0,
    0.0,
    0.0,
    0.0,
    -5.0 / 66.0,
    5.0 / 66.0,
    5.0 / 66.0,
];

/// Runge-Kutta-Fehlberg 5(6), propagating the sixth-order solution.
pub const RKF56: ButcherTableau = ButcherTableau {
    name: "RKF56",
    stages: 8,
    order: 6,
    embedded_order: Some(5),
    c: &RKF56_C,
    a: &RKF56_A,
    b: &RKF56_B,
    b_err: Some(&RKF56_B_ERR),
};

// ---------------------------------------------------------------------------
// Runge-Kutta-Fehlberg 7(8), NASA TR R-287 Table X
// ---------------------------------------------------------------------------

/// Node coefficients (α values); c[11] and c[12] only feed the error estimate
const RKF78_C: [f64; 13] = [
    0.0,
    2.0 / 27.0,
    1.0 / 9.0,
    1.0 / 6.0,
    5.0 / 12.0,
    0.5,
    5.0 / 6.0,
    1.0 / 6.0,
    2.0 / 3.0,
    1.0 / 3.0,
    1.0,
    0.0,
    1.0,
];

/// Runge-Kutta matrix (β values)
#[rustfmt::skip]
const RKF78_A: [f64; 78] = [
    // k_1
    2.0 / 27.0,
    // k_2
    1.0 / 36.0, 1.0 / 12.0,
    // k_3
    1.0 / 24.0, 0.0, 1.0 / 8.0,
    // k_4
    5.0 / 12.0, 0.0, -25.0 / 16.0, 25.0 / 16.0,
    // k_5
    1.0 / 20.0, 0.0, 0.0, 1.0 / 4.0, 1.0 / 5.0,
    // k_6
    -25.0 / 108.0, 0.0, 0.0, 125.0 / 108.0, -65.0 / 27.0, 125.0 / 54.0,
    // k_7
    31.0 / 300.0, 0.0, 0.0, 0.0, 61.0 / 225.0, -2.0 / 9.0, 13.0 / 900.0,
    // k_8
    2.0, 0.0, 0.0, -53.0 / 6.0, 704.0 / 45.0, -107.0 / 9.0, 67.0 / 90.0, 3.0,
    // k_9
    -91.0 / 108.0, 0.0, 0.0, 23.0 / 108.0, -976.0 / 135.0, 311.0 / 54.0, -19.0 / 60.0,
    17.0 / 6.0, -1.0 / 12.0,
    // k_10
    2383.0 / 4100.0, 0.0, 0.0, -341.0 / 164.0, 4496.0 / 1025.0, -301.0 / 82.0,
    2133.0 / 4100.0, 45.0 / 82.0, 45.0 / 164.0, 18.0 / 41.0,
    // k_11 (error estimate only)
    3.0 / 205.0, 0.0, 0.0, 0.0, 0.0, -6.0 / 41.0, -3.0 / 205.0, -3.0 / 41.0, 3.0 / 41.0,
    6.0 / 41.0, 0.0,
    // k_12 (error estimate only)
    -1777.0 / 4100.0, 0.0, 0.0, -341.0 / 164.0, 4496.0 / 1025.0, -289.0 / 82.0,
    2193.0 / 4100.0, 51.0 / 82.0, 33.0 / 164.0, 12.0 / 41.0, 0.0, 1.0,
];

/// Eighth-order weights; stages 0 and 10 drop out in favor of 11 and 12
const RKF78_B: [f64; 13] = [
    0.0,
    0.0,
    0.0,
    0.0,
    0.0,
    34.0 / 105.0,
    9.0 / 35.0,
    9.0 / 35.0,
    9.0 / 280.0,
    9.0 / 280.0,
    0.0,
    41.0 / 840.0,
    41.0 / 840.0,
];

/// Eighth-order minus seventh-order weights:
/// TE = (41/840) (k_0 + k_10 - k_11 - k_12) h, with the opposite sign
const RKF78_B_ERR: [f64; 13] = [
    -41.0 / 840.0,
    0.0,
    0.0,
    0.0,
    0.0,
    0.0,
    0.0,
    0.0,
    0.0,
    0.0,
    -41.0 / 840.0,
    41.0 / 840.0,
    41.0 / 840.0,
];

/// Runge-Kutta-Fehlberg 7(8), propagating the eighth-order solution.
pub const RKF78: ButcherTableau = ButcherTableau {
    name: "RKF78",
    stages: 13,
    order: 8,
    embedded_order: Some(7),
    c: &RKF78_C,
    a: &RKF78_A,
    b: &RKF78_B,
    b_err: Some(&RKF78_B_ERR),
};

/// Fehlberg's eighth-order formula on its own: [`RKF78`] without the
/// error estimate. The 11-stage member of the pair is only seventh order,
/// so all 13 stages are evaluated.
pub const FEHLBERG8: ButcherTableau = ButcherTableau {
    name: "Fehlberg8",
    stages: 13,
    order: 8,
    embedded_order: None,
    c: &RKF78_C,
    a: &RKF78_A,
    b: &RKF78_B,
    b_err: None,
};

// ---------------------------------------------------------------------------
// Cash-Karp 4(5)
// ---------------------------------------------------------------------------

const CASH_KARP_C: [f64; 6] = [0.0, 1.0 / 5.0, 3.0 / 10.0, 3.0 / 5.0, 1.0, 7.0 / 8.0];

#[rustfmt::skip]
const CASH_KARP_A: [f64; 15] = [
    1.0 / 5.0,
    3.0 / 40.0, 9.0 / 40.0,
    3.0 / 10.0, -9.0 / 10.0, 6.0 / 5.0,
    -11.0 / 54.0, 5.0 / 2.0, -70.0 / 27.0, 35.0 / 27.0,
    1631.0 / 55296.0, 175.0 / 512.0, 575.0 / 13824.0, 44275.0 / 110592.0, 253.0 / 4096.0,
];

const CASH_KARP_B: [f64; 6] = [
    37.0 / 378.0,
    0.0,
    250.0 / 621.0,
    125.0 / 594.0,
    0.0,
    512.0 / 1771.0,
];

const CASH_KARP_B_ERR: [f64; 6] = [
    37.0 / 378.0 - 2825.0 / 27648.0,
    0.0,
    250.0 / 621.0 - 18575.0 / 48384.0,
    125.0 / 594.0 - 13525.0 / 55296.0,
    -277.0 / 14336.0,
    512.0 / 1771.0 - 1.0 / 4.0,
];

/// Cash-Karp 4(5), propagating the fifth-order solution.
pub const CASH_KARP: ButcherTableau = ButcherTableau {
    name: "CashKarp45",
    stages: 6,
    order: 5,
    embedded_order: Some(4),
    c: &CASH_KARP_C,
    a: &CASH_KARP_A,
    b: &CASH_KARP_B,
    b_err: Some(&CASH_KARP_B_ERR),
};

// ---------------------------------------------------------------------------
// Cooper-Verner 8th order, 11 stages
// ---------------------------------------------------------------------------

const SQRT21: f64 = 4.582_575_694_955_84;

const VERNER8_C: [f64; 11] = [
    0.0,
    0.5,
    0.5,
    (7.0 + SQRT21) / 14.0,
    (7.0 + SQRT21) / 14.0,
    0.5,
    (7.0 - SQRT21) / 14.0,
    (7.0 - SQRT21) / 14.0,
    0.5,
    (7.0 + SQRT21) / 14.0,
    1.0,
];

#[rustfmt::skip]
const VERNER8_A: [f64; 55] = [
    // k_1
    0.5,
    // k_2
    0.25, 0.25,
    // k_3
    1.0 / 7.0, (-7.0 - 3.0 * SQRT21) / 98.0, (21.0 + 5.0 * SQRT21) / 49.0,
    // k_4
    (11.0 + SQRT21) / 84.0, 0.0, (18.0 + 4.0 * SQRT21) / 63.0, (21.0 - SQRT21) / 252.0,
    // k_5
    (5.0 + SQRT21) / 48.0, 0.0, (9.0 + SQRT21) / 36.0, (-231.0 + 14.0 * SQRT21) / 360.0,
    (63.0 - 7.0 * SQRT21) / 80.0,
    // k_6
    (10.0 - SQRT21) / 42.0, 0.0, (-432.0 + 92.0 * SQRT21) / 315.0,
    (633.0 - 145.0 * SQRT21) / 90.0, (-504.0 + 115.0 * SQRT21) / 70.0,
    (63.0 - 13.0 * SQRT21) / 35.0,
    // k_7
    1.0 / 14.0, 0.0, 0.0, 0.0, (14.0 - 3.0 * SQRT21) / 126.0, (13.0 - 3.0 * SQRT21) / 63.0,
    1.0 / 9.0,
    // k_8
    1.0 / 32.0, 0.0, 0.0, 0.0, (91.0 - 21.0 * SQRT21) / 576.0, 11.0 / 72.0,
    (-385.0 - 75.0 * SQRT21) / 1152.0, (63.0 + 13.0 * SQRT21) / 128.0,
    // k_9
    1.0 / 14.0, 0.0, 0.0, 0.0, 1.0 / 9.0, (-733.0 - 147.0 * SQRT21) / 2205.0,
    (515.0 + 111.0 * SQRT21) / 504.0, (-51.0 - 11.0 * SQRT21) / 56.0,
    (132.0 + 28.0 * SQRT21) / 245.0,
    // k_10
    0.0, 0.0, 0.0, 0.0, (-42.0 + 7.0 * SQRT21) / 18.0, (-18.0 + 28.0 * SQRT21) / 45.0,
    (-273.0 - 53.0 * SQRT21) / 72.0, (301.0 + 53.0 * SQRT21) / 72.0,
    (28.0 - 28.0 * SQRT21) / 45.0, (49.0 - 7.0 * SQRT21) / 18.0,
];

const VERNER8_B: [f64; 11] = [
    1.0 / 20.0,
    0.0,
    0.0,
    0.0,
    0.0,
    0.0,
    0.0,
    49.0 / 180.0,
    16.0 / 45.0,
    49.0 / 180.0,
    1.0 / 20.0,
];

/// Cooper-Verner eighth-order method.
pub const VERNER8: ButcherTableau = ButcherTableau {
    name: "Verner8",
    stages: 11,
    order: 8,
    embedded_order: None,
    c: &VERNER8_C,
    a: &VERNER8_A,
    b: &VERNER8_B,
    b_err: None,
};

/// Every tableau shipped with the crate.
pub const ALL: [&ButcherTableau; 7] = [
    &RK4, &FEHLBERG8, &VERNER8, &RKF45, &RKF56, &RKF78, &CASH_KARP,
];
