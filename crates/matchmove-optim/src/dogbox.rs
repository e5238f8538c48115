//! Rectangular trust-region dogleg backend with box bounds.
//!
//! The trust region is an infinity-norm box intersected with the feasible
//! box, so steps never leave the bounds (no post-hoc projection). The step
//! interpolates between the steepest-descent (Cauchy) point and the
//! Gauss-Newton point, standard dogleg style. Stationarity on the box is
//! measured with the projected gradient: components pushing out of an active
//! bound do not count.

use log::debug;
use matchmove_core::Real;
use nalgebra::{Cholesky, DMatrix, DVector};

use crate::problem::{Bounds, CancelToken, NllsProblem, SolveOptions, SolveReport, Termination};

const MAX_REG_ATTEMPTS: usize = 25;

/// Run the dogbox solver from `x0`. Returns the best-found parameters.
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

    let mut radius = x.amax().max(1.0);
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

        // Variables pinned at a bound with the descent direction pointing
        // outside are held fixed this iteration (scipy dogbox treatment).
        let free = free_variables(&gradient, &x, bounds);
        let pg_norm = free.iter().fold(0.0 as Real, |m, &i| m.max(gradient[i].abs()));
        if pg_norm < opts.gtol {
            termination = Termination::Converged;
            iterations = iter;
            break;
        }

        let (jtj_f, gradient_f) = reduce(&jtj, &gradient, &free);
        let gn_step_f = match gauss_newton_step(&jtj_f, &gradient_f) {
            Some(step) => step,
            None => {
                termination = Termination::NumericalFailure;
                break;
            }
        };

        // Cauchy point along the negative gradient of the free subspace.
        let curvature = (&jtj_f * &gradient_f).dot(&gradient_f);
        let sd_step_f = if curvature > 0.0 {
            -(gradient_f.norm_squared() / curvature) * &gradient_f
        } else {
            -(radius / gradient_f.amax()) * &gradient_f
        };

        let step_f = dogleg(&gn_step_f, &sd_step_f, radius);
        let mut step = DVector::zeros(x.len());
        for (k, &i) in free.iter().enumerate() {
            step[i] = step_f[k];
        }

        // Scale the step back so it stays inside the feasible box.
        if let Some(b) = bounds {
            let alpha = max_feasible_fraction(&x, &step, b);
            step *= alpha;
        }
        let step_norm = step.amax();

        let predicted = -(2.0 * gradient.dot(&step) + (&jtj * &step).dot(&step));
        if predicted <= 0.0 || step_norm == 0.0 {
            // No usable model reduction in this region; shrink and retry.
            radius *= 0.25;
            if radius < opts.xtol * (x.amax() + opts.xtol) {
                termination = Termination::Converged;
                break;
            }
            continue;
        }

        let mut x_new = &x + &step;
        if let Some(b) = bounds {
            b.clamp(&mut x_new);
        }
        let residuals_new = problem.residuals(&x_new);
        let cost_new = residuals_new.norm_squared();
        let actual = cost - cost_new;
        let rho = actual / predicted;

        if actual > 0.0 {
            x = x_new;
            residuals = residuals_new;
            cost = cost_new;
            if cost < best_cost {
                best_cost = cost;
                best_x = x.clone();
            }
            debug!(
                "dogbox iter {iter}: cost {cost:.6e}, radius {radius:.3e}, rho {rho:.3}"
            );

            if cost <= opts.min_cost {
                termination = Termination::SmallResidual;
                break 'outer;
            }
            if actual <= opts.ftol * cost.max(opts.min_cost)
                || step_norm <= opts.xtol * (x.amax() + opts.xtol)
            {
                termination = Termination::Converged;
                break 'outer;
            }
        }

        // Standard trust-region radius update.
        if rho < 0.25 {
            radius = 0.25 * step_norm.max(1e-300);
        } else if rho > 0.75 && step_norm >= 0.95 * radius {
            radius *= 2.0;
        }
        if radius < opts.xtol * (x.amax() + opts.xtol) {
            termination = Termination::Converged;
            break;
        }
    }

    debug!(
        "dogbox finished after {iterations} iterations: {termination} (cost {best_cost:.6e})"
    );
    (best_x, report(iterations, best_cost, termination))
}

/// Indices of variables free to move this iteration.
///
/// The descent direction is `-g`, so at a lower bound a positive `g[i]`
/// pushes the variable out of the box and pins it; symmetrically at an
/// upper bound.
fn free_variables(
    gradient: &DVector<Real>,
    x: &DVector<Real>,
    bounds: Option<&Bounds>,
) -> Vec<usize> {
    let Some(b) = bounds else {
        return (0..x.len()).collect();
    };
    (0..x.len())
        .filter(|&i| {
            let at_lower = x[i] <= b.lower[i] && gradient[i] > 0.0;
            let at_upper = x[i] >= b.upper[i] && gradient[i] < 0.0;
            !(at_lower || at_upper)
        })
        .collect()
}

/// Restrict the normal equations to the free subspace.
fn reduce(
    jtj: &DMatrix<Real>,
    gradient: &DVector<Real>,
    free: &[usize],
) -> (DMatrix<Real>, DVector<Real>) {
    let m = free.len();
    let jtj_f = DMatrix::from_fn(m, m, |r, c| jtj[(free[r], free[c])]);
    let gradient_f = DVector::from_fn(m, |r, _| gradient[free[r]]);
    (jtj_f, gradient_f)
}

/// Solve `(JᵀJ + μI) p = -g`, escalating μ while the factorization fails.
fn gauss_newton_step(jtj: &DMatrix<Real>, gradient: &DVector<Real>) -> Option<DVector<Real>> {
    let n = jtj.nrows();
    let mut rhs = gradient.clone();
    rhs.neg_mut();

    let mut reg = 0.0;
    let base = (jtj.trace() / n as Real).abs().max(1e-300);
    for _ in 0..MAX_REG_ATTEMPTS {
        let mut damped = jtj.clone();
        for i in 0..n {
            damped[(i, i)] += reg;
        }
        if let Some(chol) = Cholesky::new(damped) {
            return Some(chol.solve(&rhs));
        }
        reg = if reg == 0.0 { 1e-12 * base } else { reg * 10.0 };
    }
    None
}

/// Dogleg interpolation inside an infinity-norm trust region.
fn dogleg(gn: &DVector<Real>, sd: &DVector<Real>, radius: Real) -> DVector<Real> {
    if gn.amax() <= radius {
        return gn.clone();
    }
    if sd.amax() >= radius {
        return sd * (radius / sd.amax());
    }
    // ‖sd + s (gn - sd)‖_inf is monotone enough near the boundary for a
    // bisection on s ∈ [0, 1].
    let diff = gn - sd;
    let mut lo = 0.0;
    let mut hi = 1.0;
    for _ in 0..32 {
        let mid = 0.5 * (lo + hi);
        if (sd + mid * &diff).amax() > radius {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    sd + lo * diff
}

/// Largest `alpha` in [0, 1] keeping `x + alpha * step` inside the box.
fn max_feasible_fraction(x: &DVector<Real>, step: &DVector<Real>, bounds: &Bounds) -> Real {
    let mut alpha: Real = 1.0;
    for i in 0..x.len() {
        if step[i] > 0.0 {
            alpha = alpha.min((bounds.upper[i] - x[i]) / step[i]);
        } else if step[i] < 0.0 {
            alpha = alpha.min((bounds.lower[i] - x[i]) / step[i]);
        }
    }
    alpha.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// r(x) = [x0 - 3, 2 (x1 + 1)]
    struct TwoDimProblem;

    impl NllsProblem for TwoDimProblem {
        fn num_params(&self) -> usize {
            2
        }
        fn num_residuals(&self) -> usize {
            2
        }
        fn residuals(&self, x: &DVector<Real>) -> DVector<Real> {
            DVector::from_vec(vec![x[0] - 3.0, 2.0 * (x[1] + 1.0)])
        }
        fn jacobian(&self, _x: &DVector<Real>) -> DMatrix<Real> {
            DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 2.0])
        }
    }

    #[test]
    fn unbounded_problem_converges() {
        let (x, report) = solve(
            &TwoDimProblem,
            DVector::from_vec(vec![100.0, 40.0]),
            None,
            &SolveOptions::default(),
            &CancelToken::new(),
        );
        assert!((x[0] - 3.0).abs() < 1e-6, "x0 = {}", x[0]);
        assert!((x[1] + 1.0).abs() < 1e-6, "x1 = {}", x[1]);
        assert!(report.converged(), "termination {:?}", report.termination);
    }

    #[test]
    fn solution_lands_on_active_bound() {
        let bounds = Bounds::new(
            DVector::from_vec(vec![5.0, -10.0]),
            DVector::from_vec(vec![10.0, 10.0]),
        )
        .unwrap();
        let (x, report) = solve(
            &TwoDimProblem,
            DVector::from_vec(vec![8.0, 4.0]),
            Some(&bounds),
            &SolveOptions::default(),
            &CancelToken::new(),
        );
        assert!((x[0] - 5.0).abs() < 1e-9, "x0 = {}", x[0]);
        assert!((x[1] + 1.0).abs() < 1e-6, "x1 = {}", x[1]);
        assert!(report.converged(), "termination {:?}", report.termination);
    }

    #[test]
    fn infeasible_start_is_clamped_first() {
        let bounds = Bounds::new(
            DVector::from_vec(vec![0.0, 0.0]),
            DVector::from_vec(vec![10.0, 10.0]),
        )
        .unwrap();
        let (x, _) = solve(
            &TwoDimProblem,
            DVector::from_vec(vec![-50.0, -50.0]),
            Some(&bounds),
            &SolveOptions::default(),
            &CancelToken::new(),
        );
        assert!((x[0] - 3.0).abs() < 1e-6);
        assert_eq!(x[1], 0.0); // pinned at the lower bound
    }

    #[test]
    fn cancellation_returns_best_found() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let x0 = DVector::from_vec(vec![7.0, 7.0]);
        let (x, report) = solve(
            &TwoDimProblem,
            x0.clone(),
            None,
            &SolveOptions::default(),
            &cancel,
        );
        assert_eq!(report.termination, Termination::Cancelled);
        assert_eq!(x, x0);
    }
}
