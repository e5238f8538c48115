//! Damped Gauss-Newton (Levenberg-Marquardt) backend.
//!
//! Classic Marquardt scaling: the normal equations are damped with
//! `λ · diag(JᵀJ)`, λ shrinks on accepted steps and grows on rejected ones.
//! Bounds, when given, are honored by projecting accepted iterates onto the
//! box. The best-seen iterate is tracked throughout and is what the caller
//! gets back, whatever the termination reason.

use log::debug;
use matchmove_core::Real;
use nalgebra::{Cholesky, DVector};

use crate::problem::{Bounds, CancelToken, NllsProblem, SolveOptions, SolveReport, Termination};

/// Damping growth/shrink factors and escalation cutoff.
const LAMBDA_UP: Real = 10.0;
const LAMBDA_DOWN: Real = 10.0;
const LAMBDA_MAX: Real = 1e15;
const LAMBDA_MIN: Real = 1e-12;

/// Run LM from `x0`. Returns the best-found parameters and a report.
pub fn solve(
    problem: &impl NllsProblem,
    x0: DVector<Real>,
    bounds: Option<&Bounds>,
    opts: &SolveOptions,
    cancel: &CancelToken,
) -> (DVector<Real>, SolveReport) {
    let mut x = x0;
    if let Some(b) = bounds {
        b.clamp(&mut x);
    }

    let mut residuals = problem.residuals(&x);
    let mut cost = residuals.norm_squared();
    let initial_cost = cost;

    let mut best_x = x.clone();
    let mut best_cost = cost;

    let report = |iterations: usize, final_cost: Real, termination: Termination| SolveReport {
        iterations,
        initial_cost,
        final_cost,
        termination,
    };

    if cost <= opts.min_cost {
        return (best_x, report(0, cost, Termination::SmallResidual));
    }

    let mut lambda = 1e-3;
    let mut termination = Termination::MaxIterations;
    let mut iterations = 0;

    'outer: for iter in 0..opts.max_iters {
        if cancel.is_cancelled() {
            termination = Termination::Cancelled;
            break;
        }
        iterations = iter + 1;

        let jac = problem.jacobian(&x);
        let jtj = jac.transpose() * &jac;
        let gradient = jac.transpose() * &residuals;

        if gradient.amax() < opts.gtol {
            termination = Termination::Converged;
            iterations = iter;
            break;
        }

        let mut rhs = gradient.clone();
        rhs.neg_mut();

        // Retry the step with stronger damping until the model improves.
        loop {
            let mut damped = jtj.clone();
            for i in 0..damped.nrows() {
                damped[(i, i)] += lambda * jtj[(i, i)].max(LAMBDA_MIN);
            }

            let step = match Cholesky::new(damped) {
                Some(chol) => chol.solve(&rhs),
                None => {
                    lambda *= LAMBDA_UP;
                    if lambda > LAMBDA_MAX {
                        termination = Termination::NumericalFailure;
                        break 'outer;
                    }
                    continue;
                }
            };

            let mut x_new = &x + &step;
            if let Some(b) = bounds {
                b.clamp(&mut x_new);
            }
            let step_norm = (&x_new - &x).norm();

            let residuals_new = problem.residuals(&x_new);
            let cost_new = residuals_new.norm_squared();

            if cost_new < cost {
                let reduction = cost - cost_new;
                lambda = (lambda / LAMBDA_DOWN).max(LAMBDA_MIN);
                x = x_new;
                residuals = residuals_new;
                cost = cost_new;
                if cost < best_cost {
                    best_cost = cost;
                    best_x = x.clone();
                }
                debug!(
                    "lm iter {iter}: cost {cost:.6e}, lambda {lambda:.3e}, step {step_norm:.3e}"
                );

                if cost <= opts.min_cost {
                    termination = Termination::SmallResidual;
                    break 'outer;
                }
                if reduction <= opts.ftol * cost.max(opts.min_cost)
                    || step_norm <= opts.xtol * (x.norm() + opts.xtol)
                {
                    termination = Termination::Converged;
                    break 'outer;
                }
                break;
            }

            lambda *= LAMBDA_UP;
            if lambda > LAMBDA_MAX {
                // Damping diverged without finding a downhill step.
                termination = Termination::NumericalFailure;
                break 'outer;
            }
        }
    }

    debug!(
        "lm finished after {iterations} iterations: {termination} (cost {best_cost:.6e})"
    );
    (best_x, report(iterations, best_cost, termination))
}
