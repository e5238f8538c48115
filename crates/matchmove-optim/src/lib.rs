//! Nonlinear least-squares engine for `matchmove-rs`.
//!
//! Two trust-region style backends behind one seam: a damped Gauss-Newton
//! (Levenberg-Marquardt) solver for unconstrained and lightly bounded
//! problems, and a rectangular trust-region dogleg (`dogbox`) that honors
//! per-parameter boxes. The set of methods is closed ([`Method`]); an
//! unrecognized method name is a configuration error, never a silent
//! default.
//!
//! Both backends are cooperative: a [`CancelToken`] is checked once per
//! iteration, and the best-found parameter vector is always returned, so a
//! cancelled or diverging solve never leaves the caller with a mid-update
//! state.

pub mod dogbox;
pub mod lm;
pub mod problem;
pub mod reprojection;

pub use problem::{
    Bounds, CancelToken, Method, MethodError, NllsProblem, SolveOptions, SolveReport, Termination,
};
pub use reprojection::ReprojectionProblem;

use matchmove_core::Real;
use nalgebra::DVector;

/// Run the selected backend on a problem.
///
/// `bounds`, when present, must be parallel to `x0`; the LM backend projects
/// accepted iterates onto the box, the dogbox backend restricts its trust
/// region to it.
pub fn solve(
    method: Method,
    problem: &impl NllsProblem,
    x0: DVector<Real>,
    bounds: Option<&Bounds>,
    opts: &SolveOptions,
    cancel: &CancelToken,
) -> (DVector<Real>, SolveReport) {
    match method {
        Method::LevenbergMarquardt => lm::solve(problem, x0, bounds, opts, cancel),
        Method::Dogbox => dogbox::solve(problem, x0, bounds, opts, cancel),
    }
}
