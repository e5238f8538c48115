//! Problem trait, solver options and reporting types shared by the backends.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use matchmove_core::Real;
use nalgebra::{DMatrix, DVector};
use thiserror::Error;

/// Dense nonlinear least-squares problem.
///
/// The objective minimized is the sum of squared residuals. Jacobian rows
/// are ordered like the residual vector; columns like the parameter vector.
pub trait NllsProblem {
    /// Number of parameters in the optimization vector.
    fn num_params(&self) -> usize;
    /// Number of residual rows.
    fn num_residuals(&self) -> usize;
    /// Residual vector at `x`, length [`NllsProblem::num_residuals`].
    fn residuals(&self, x: &DVector<Real>) -> DVector<Real>;
    /// Jacobian at `x`, `num_residuals × num_params`.
    fn jacobian(&self, x: &DVector<Real>) -> DMatrix<Real>;
}

/// Per-parameter box bounds, parallel to the parameter vector.
#[derive(Debug, Clone)]
pub struct Bounds {
    pub lower: DVector<Real>,
    pub upper: DVector<Real>,
}

/// Errors from engine configuration.
#[derive(Debug, Error)]
pub enum MethodError {
    /// Method name not in the allow-list.
    #[error("unknown optimization method '{0}' (expected one of: lm, dogbox)")]
    UnknownMethod(String),
    /// Lower bound above upper bound, or vector lengths differ.
    #[error("infeasible bounds: {0}")]
    InfeasibleBounds(String),
}

impl Bounds {
    /// Validated constructor: vectors must be parallel and `lower <= upper`
    /// componentwise.
    pub fn new(lower: DVector<Real>, upper: DVector<Real>) -> Result<Self, MethodError> {
        if lower.len() != upper.len() {
            return Err(MethodError::InfeasibleBounds(format!(
                "lower has {} entries, upper has {}",
                lower.len(),
                upper.len()
            )));
        }
        if let Some(i) = (0..lower.len()).find(|&i| lower[i] > upper[i]) {
            return Err(MethodError::InfeasibleBounds(format!(
                "component {}: lower {} > upper {}",
                i, lower[i], upper[i]
            )));
        }
        Ok(Self { lower, upper })
    }

    /// Project a vector onto the box in place.
    pub fn clamp(&self, x: &mut DVector<Real>) {
        for i in 0..x.len() {
            x[i] = x[i].clamp(self.lower[i], self.upper[i]);
        }
    }
}

/// The closed set of supported solver backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Damped Gauss-Newton; default. Bounds honored by projection.
    LevenbergMarquardt,
    /// Rectangular trust-region dogleg for bounded problems.
    Dogbox,
}

impl Default for Method {
    fn default() -> Self {
        Method::LevenbergMarquardt
    }
}

impl Method {
    pub fn name(self) -> &'static str {
        match self {
            Method::LevenbergMarquardt => "lm",
            Method::Dogbox => "dogbox",
        }
    }
}

impl FromStr for Method {
    type Err = MethodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lm" => Ok(Method::LevenbergMarquardt),
            "dogbox" => Ok(Method::Dogbox),
            other => Err(MethodError::UnknownMethod(other.to_string())),
        }
    }
}

/// Solver tolerances and iteration cap.
#[derive(Debug, Clone, Copy)]
pub struct SolveOptions {
    /// Maximum number of outer iterations.
    pub max_iters: usize,
    /// Relative tolerance on cost reduction between accepted steps.
    pub ftol: Real,
    /// Relative tolerance on the parameter step norm.
    pub xtol: Real,
    /// Tolerance on the (projected) gradient infinity norm.
    pub gtol: Real,
    /// Absolute cost below which the residual counts as zero.
    pub min_cost: Real,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            max_iters: 100,
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 1e-10,
            min_cost: 1e-20,
        }
    }
}

/// Cooperative cancellation signal, checked once per solver iteration.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; the solver returns its best iterate at the next
    /// iteration boundary.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Why a solve stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Gradient, step or cost reduction fell below tolerance.
    Converged,
    /// Residuals are (numerically) zero.
    SmallResidual,
    /// Iteration cap reached before convergence.
    MaxIterations,
    /// Cancelled via [`CancelToken`].
    Cancelled,
    /// Normal equations stayed singular or damping diverged.
    NumericalFailure,
}

impl Termination {
    pub fn is_success(self) -> bool {
        matches!(self, Termination::Converged | Termination::SmallResidual)
    }
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Termination::Converged => "converged within tolerance",
            Termination::SmallResidual => "residuals are zero within tolerance",
            Termination::MaxIterations => "maximum iterations reached",
            Termination::Cancelled => "cancelled by caller",
            Termination::NumericalFailure => "numerical failure (singular normal equations)",
        };
        f.write_str(msg)
    }
}

/// Outcome of one backend run.
///
/// `final_cost` is the sum of squared residuals at the returned (best-found)
/// parameter vector.
#[derive(Debug, Clone)]
pub struct SolveReport {
    pub iterations: usize,
    pub initial_cost: Real,
    pub final_cost: Real,
    pub termination: Termination,
}

impl SolveReport {
    pub fn converged(&self) -> bool {
        self.termination.is_success()
    }
}
