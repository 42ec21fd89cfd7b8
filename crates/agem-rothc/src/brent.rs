//! Inverted-control Brent root finder.
//!
//! The solver never calls the objective itself. The caller drives it:
//!
//! ```
//! use agem_rothc::brent::BrentSolver;
//!
//! let mut solver = BrentSolver::new(-10.0, 10.0, 1e-3);
//! while !solver.finished() {
//!     let x = solver.propose();
//!     solver.evaluate(x * x - 7.0).unwrap();
//! }
//! assert!((solver.x() + 7f64.sqrt()).abs() < 1e-3);
//! ```
//!
//! This shape lets the equilibrium driver interleave many per-cell solver
//! instances with shared model runs.

use agem_core::errors::{AgemError, AgemResult};

/// Classical Brent iteration (inverse quadratic interpolation, secant and
/// bisection) over a bracket `[ax, cx]`.
///
/// The bracket endpoints and the midpoint are evaluated first; the
/// sign-changing subinterval of the three points is then iterated. If no
/// subinterval changes sign, [`evaluate`](BrentSolver::evaluate) reports a
/// `Numerical` error.
#[derive(Debug, Clone)]
pub struct BrentSolver {
    tol: f64,
    ax: f64,
    bx: f64,
    cx: f64,
    state: State,
    // Endpoint values collected during bracketing.
    f_lower: f64,
    f_mid: f64,
    // zbrent state.
    a: f64,
    b: f64,
    c: f64,
    fa: f64,
    fb: f64,
    fc: f64,
    d: f64,
    e: f64,
    proposal: f64,
    iterations: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    EvalLower,
    EvalMid,
    EvalUpper,
    Iterating,
    Finished,
}

impl BrentSolver {
    /// Create a solver over the bracket `[ax, cx]` with absolute tolerance
    /// `tol` on the root position.
    pub fn new(ax: f64, cx: f64, tol: f64) -> Self {
        Self {
            tol,
            ax,
            bx: 0.5 * (ax + cx),
            cx,
            state: State::EvalLower,
            f_lower: 0.0,
            f_mid: 0.0,
            a: 0.0,
            b: 0.0,
            c: 0.0,
            fa: 0.0,
            fb: 0.0,
            fc: 0.0,
            d: 0.0,
            e: 0.0,
            proposal: 0.0,
            iterations: 0,
        }
    }

    /// The next abscissa the caller should evaluate the objective at.
    pub fn propose(&self) -> f64 {
        match self.state {
            State::EvalLower => self.ax,
            State::EvalMid => self.bx,
            State::EvalUpper => self.cx,
            State::Iterating => self.proposal,
            State::Finished => self.b,
        }
    }

    /// Feed back the objective value at the last proposed abscissa.
    pub fn evaluate(&mut self, fx: f64) -> AgemResult<()> {
        if !fx.is_finite() {
            return Err(AgemError::Numerical(format!(
                "objective returned a non-finite value at x = {}",
                self.propose()
            )));
        }
        match self.state {
            State::EvalLower => {
                self.f_lower = fx;
                self.state = State::EvalMid;
            }
            State::EvalMid => {
                self.f_mid = fx;
                self.state = State::EvalUpper;
            }
            State::EvalUpper => {
                let f_upper = fx;
                // Select the sign-changing subinterval of the three samples.
                if self.f_lower * self.f_mid <= 0.0 {
                    self.a = self.ax;
                    self.b = self.bx;
                    self.fa = self.f_lower;
                    self.fb = self.f_mid;
                } else if self.f_mid * f_upper <= 0.0 {
                    self.a = self.bx;
                    self.b = self.cx;
                    self.fa = self.f_mid;
                    self.fb = f_upper;
                } else {
                    self.state = State::Finished;
                    return Err(AgemError::Numerical(format!(
                        "no sign change in bracket [{}, {}]",
                        self.ax, self.cx
                    )));
                }
                self.c = self.b;
                self.fc = self.fb;
                self.e = self.b - self.a;
                self.d = self.e;
                self.state = State::Iterating;
                self.advance();
            }
            State::Iterating => {
                self.fb = fx;
                self.advance();
            }
            State::Finished => {}
        }
        Ok(())
    }

    /// Whether the root position has converged to within the tolerance.
    pub fn finished(&self) -> bool {
        self.state == State::Finished
    }

    /// Current best root estimate.
    pub fn x(&self) -> f64 {
        self.b
    }

    /// Objective value at the current best estimate.
    pub fn fx(&self) -> f64 {
        self.fb
    }

    /// Iterations taken since the bracketing phase.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// One zbrent step: either declare convergence or compute the next
    /// abscissa into `self.proposal`.
    fn advance(&mut self) {
        if (self.fb > 0.0 && self.fc > 0.0) || (self.fb < 0.0 && self.fc < 0.0) {
            self.c = self.a;
            self.fc = self.fa;
            self.e = self.b - self.a;
            self.d = self.e;
        }
        if self.fc.abs() < self.fb.abs() {
            self.a = self.b;
            self.b = self.c;
            self.c = self.a;
            self.fa = self.fb;
            self.fb = self.fc;
            self.fc = self.fa;
        }

        let tol1 = 2.0 * f64::EPSILON * self.b.abs() + 0.5 * self.tol;
        let xm = 0.5 * (self.c - self.b);
        if xm.abs() <= tol1 || self.fb == 0.0 {
            self.state = State::Finished;
            return;
        }

        if self.e.abs() >= tol1 && self.fa.abs() > self.fb.abs() {
            // Inverse quadratic interpolation, or secant when a == c.
            let s = self.fb / self.fa;
            let (mut p, mut q);
            if self.a == self.c {
                p = 2.0 * xm * s;
                q = 1.0 - s;
            } else {
                let qq = self.fa / self.fc;
                let r = self.fb / self.fc;
                p = s * (2.0 * xm * qq * (qq - r) - (self.b - self.a) * (r - 1.0));
                q = (qq - 1.0) * (r - 1.0) * (s - 1.0);
            }
            if p > 0.0 {
                q = -q;
            }
            p = p.abs();
            let min1 = 3.0 * xm * q - (tol1 * q).abs();
            let min2 = (self.e * q).abs();
            if 2.0 * p < min1.min(min2) {
                self.e = self.d;
                self.d = p / q;
            } else {
                self.d = xm;
                self.e = self.d;
            }
        } else {
            self.d = xm;
            self.e = self.d;
        }

        self.a = self.b;
        self.fa = self.fb;
        if self.d.abs() > tol1 {
            self.b += self.d;
        } else {
            self.b += tol1.copysign(xm);
        }
        self.proposal = self.b;
        self.iterations += 1;
    }
}
