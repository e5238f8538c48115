//! Reprojection residual problem over the free camera parameters.
//!
//! Snapshots the valid correspondences (resolved world position + observed
//! pixel) and the base camera, then exposes the flat `2 × n_pairs` residual
//! vector `projected - observed` as an [`NllsProblem`]. A pair that falls
//! behind the camera for a candidate parameter vector contributes a large
//! finite penalty with zero gradient, so the solver can walk out of the
//! degenerate region instead of crashing.

use matchmove_core::{
    projection, CameraParams, Constraints, CorrespondenceSet, ParamKind, Pt3, Real, Vec2,
};
use nalgebra::{DMatrix, DVector};

use crate::problem::NllsProblem;

/// Residual injected per component for a pair behind the camera (pixels).
pub const BEHIND_CAMERA_PENALTY_PX: Real = 1e3;

/// One observation: resolved world point and observed pixel.
#[derive(Debug, Clone)]
struct Observation {
    world: Pt3,
    pixel: Vec2,
}

/// Reprojection problem over the unlocked camera parameters.
#[derive(Debug, Clone)]
pub struct ReprojectionProblem {
    observations: Vec<Observation>,
    base: CameraParams,
    free: Vec<ParamKind>,
    image_width: Real,
    image_height: Real,
}

impl ReprojectionProblem {
    /// Snapshot the valid pairs of a correspondence set.
    ///
    /// Pairs without a resolved world position are excluded, per the
    /// missing-correspondence policy. The free parameter order matches
    /// `constraints.pack_free` / `free_bounds`.
    pub fn from_set(
        set: &CorrespondenceSet,
        params: &CameraParams,
        constraints: &Constraints,
        image_width: Real,
        image_height: Real,
    ) -> Self {
        let observations = set
            .valid_pairs()
            .filter_map(|pair| {
                pair.world.map(|world| Observation {
                    world,
                    pixel: pair.pixel,
                })
            })
            .collect();
        Self {
            observations,
            base: *params,
            free: constraints.free_kinds(),
            image_width,
            image_height,
        }
    }

    /// Number of snapshotted observations.
    pub fn num_observations(&self) -> usize {
        self.observations.len()
    }

    /// Materialize camera parameters for a candidate free vector.
    ///
    /// No clamping here: the backends keep iterates feasible, and clamping
    /// inside the residual would corrupt the finite differences.
    pub fn camera_for(&self, x: &DVector<Real>) -> CameraParams {
        let mut params = self.base;
        for (kind, value) in self.free.iter().zip(x.iter()) {
            params.set_value(*kind, *value);
        }
        params
    }

    /// Count of observations behind the camera for a candidate vector.
    ///
    /// Non-zero at the final solution means a data-quality warning even if
    /// the solve nominally converged.
    pub fn behind_camera_count(&self, x: &DVector<Real>) -> usize {
        let params = self.camera_for(x);
        self.observations
            .iter()
            .filter(|obs| {
                projection::project(&obs.world, &params, self.image_width, self.image_height)
                    .is_err()
            })
            .count()
    }
}

impl NllsProblem for ReprojectionProblem {
    fn num_params(&self) -> usize {
        self.free.len()
    }

    fn num_residuals(&self) -> usize {
        2 * self.observations.len()
    }

    fn residuals(&self, x: &DVector<Real>) -> DVector<Real> {
        let params = self.camera_for(x);
        let mut r = DVector::zeros(self.num_residuals());
        for (i, obs) in self.observations.iter().enumerate() {
            let row = 2 * i;
            match projection::project(&obs.world, &params, self.image_width, self.image_height) {
                Ok(projected) => {
                    let d = projected - obs.pixel;
                    r[row] = d.x;
                    r[row + 1] = d.y;
                }
                Err(_) => {
                    r[row] = BEHIND_CAMERA_PENALTY_PX;
                    r[row + 1] = BEHIND_CAMERA_PENALTY_PX;
                }
            }
        }
        r
    }

    fn jacobian(&self, x: &DVector<Real>) -> DMatrix<Real> {
        let params = self.camera_for(x);
        let mut jac = DMatrix::zeros(self.num_residuals(), self.num_params());
        for (i, obs) in self.observations.iter().enumerate() {
            let row = 2 * i;
            // Behind-camera rows keep a zero gradient: the penalty is flat.
            if let Ok(full) =
                projection::jacobian(&obs.world, &params, self.image_width, self.image_height)
            {
                for (col, kind) in self.free.iter().enumerate() {
                    jac[(row, col)] = full[(0, kind.index())];
                    jac[(row + 1, col)] = full[(1, kind.index())];
                }
            }
        }
        jac
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matchmove_core::Vec3;
    use approx::assert_relative_eq;

    fn synthetic_setup() -> (CameraParams, Constraints, CorrespondenceSet) {
        let params = CameraParams {
            translation: Vec3::new(0.0, 0.0, 10.0),
            ..CameraParams::default()
        };
        let mut set = CorrespondenceSet::new();
        for world in [
            Pt3::new(0.0, 0.0, 0.0),
            Pt3::new(1.5, -0.5, 1.0),
            Pt3::new(-2.0, 1.0, -1.0),
            Pt3::new(0.5, 2.0, 2.0),
        ] {
            let px = projection::project(&world, &params, 1920.0, 1080.0).unwrap();
            let id = set.add_pair(px);
            set.set_world_position(id, world).unwrap();
        }
        (params, Constraints::default(), set)
    }

    #[test]
    fn residuals_vanish_at_ground_truth() {
        let (params, constraints, set) = synthetic_setup();
        let problem = ReprojectionProblem::from_set(&set, &params, &constraints, 1920.0, 1080.0);
        assert_eq!(problem.num_observations(), 4);
        assert_eq!(problem.num_residuals(), 8);
        assert_eq!(problem.num_params(), 7);

        let x = constraints.pack_free(&params);
        let r = problem.residuals(&x);
        assert_relative_eq!(r.norm(), 0.0, epsilon = 1e-9);
        assert_eq!(problem.behind_camera_count(&x), 0);
    }

    #[test]
    fn pairs_without_world_position_are_excluded() {
        let (params, constraints, mut set) = synthetic_setup();
        set.add_pair(Vec2::new(12.0, 34.0)); // never resolved in the scene
        let problem = ReprojectionProblem::from_set(&set, &params, &constraints, 1920.0, 1080.0);
        assert_eq!(problem.num_observations(), 4);
    }

    #[test]
    fn behind_camera_contributes_flat_penalty() {
        let (params, constraints, mut set) = synthetic_setup();
        let id = set.add_pair(Vec2::new(100.0, 100.0));
        set.set_world_position(id, Pt3::new(0.0, 0.0, 40.0)).unwrap();

        let problem = ReprojectionProblem::from_set(&set, &params, &constraints, 1920.0, 1080.0);
        let x = constraints.pack_free(&params);
        let r = problem.residuals(&x);
        assert_eq!(r[8], BEHIND_CAMERA_PENALTY_PX);
        assert_eq!(r[9], BEHIND_CAMERA_PENALTY_PX);
        assert_eq!(problem.behind_camera_count(&x), 1);

        let jac = problem.jacobian(&x);
        for col in 0..problem.num_params() {
            assert_eq!(jac[(8, col)], 0.0);
            assert_eq!(jac[(9, col)], 0.0);
        }
    }

    #[test]
    fn jacobian_columns_follow_free_kind_order() {
        let (params, mut constraints, set) = synthetic_setup();
        constraints.lock(ParamKind::TranslateX, true);
        constraints.lock(ParamKind::RotateY, true);

        let problem = ReprojectionProblem::from_set(&set, &params, &constraints, 1920.0, 1080.0);
        let x = constraints.pack_free(&params);
        assert_eq!(problem.num_params(), 5);

        let jac = problem.jacobian(&x);
        let full = projection::jacobian(
            &set.iter().next().unwrap().world.unwrap(),
            &params,
            1920.0,
            1080.0,
        )
        .unwrap();
        for (col, kind) in constraints.free_kinds().into_iter().enumerate() {
            assert_relative_eq!(jac[(0, col)], full[(0, kind.index())], epsilon = 1e-12);
        }
    }
}
