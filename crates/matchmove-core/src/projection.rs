//! Pinhole + film-offset projection and its parameter Jacobian.
//!
//! Pipeline: world point → camera space (inverse of the camera world
//! transform) → perspective division by depth → film plane in mm (focal
//! length scale plus additive film offset) → NDC by the half film aperture →
//! pixels. The camera looks down -Z; pixel origin is top-left with y down.
//!
//! A point at or behind the camera plane has no meaningful projection and is
//! reported as [`ProjectionError::BehindCamera`] instead of silently
//! projecting a mirrored point. Callers that need to keep a solver moving
//! convert this into a large finite penalty.

use nalgebra::SMatrix;
use thiserror::Error;

use crate::math::{Pt3, Real, Vec2};
use crate::params::{CameraParams, ParamKind};

/// Minimum camera-space depth for a projectable point.
pub const MIN_DEPTH: Real = 1e-6;

/// 2×9 Jacobian of a projected pixel with respect to the camera parameters,
/// columns in [`ParamKind::ALL`] order.
pub type PixelJacobian = SMatrix<Real, 2, 9>;

/// Errors from the projection model.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ProjectionError {
    /// The point is at or behind the camera plane (depth ≤ [`MIN_DEPTH`]).
    #[error("point is behind the camera (depth {depth})")]
    BehindCamera { depth: Real },
}

/// Project a world-space point to pixel coordinates.
///
/// Returns the pixel position with top-left origin, y growing downward.
/// Off-frame results are allowed; only non-positive depth is an error.
pub fn project(
    point: &Pt3,
    params: &CameraParams,
    image_width: Real,
    image_height: Real,
) -> Result<Vec2, ProjectionError> {
    let p_cam = params.world_transform().inverse_transform_point(point);

    // Camera looks down -Z, so depth is the negated camera-space z.
    let depth = -p_cam.z;
    if depth <= MIN_DEPTH {
        return Err(ProjectionError::BehindCamera { depth });
    }

    let x_film = p_cam.x / depth * params.focal_length + params.film_offset.x;
    let y_film = p_cam.y / depth * params.focal_length + params.film_offset.y;

    let ndc_x = x_film / (0.5 * params.film_aperture.x);
    let ndc_y = y_film / (0.5 * params.film_aperture.y);

    Ok(Vec2::new(
        (ndc_x + 1.0) * 0.5 * image_width,
        (1.0 - ndc_y) * 0.5 * image_height,
    ))
}

/// Jacobian of [`project`] with respect to the nine camera parameters.
///
/// Central finite differences with per-kind steps ([`ParamKind::fd_step`]).
/// If a perturbed evaluation lands behind the camera the difference falls
/// back to one-sided; a column whose both sides are degenerate is zero.
/// Fails only if the point is behind the camera at the base parameters.
pub fn jacobian(
    point: &Pt3,
    params: &CameraParams,
    image_width: Real,
    image_height: Real,
) -> Result<PixelJacobian, ProjectionError> {
    let base = project(point, params, image_width, image_height)?;

    let mut jac = PixelJacobian::zeros();
    for kind in ParamKind::ALL {
        let h = kind.fd_step();
        let value = params.value(kind);

        let mut plus = *params;
        plus.set_value(kind, value + h);
        let mut minus = *params;
        minus.set_value(kind, value - h);

        let fwd = project(point, &plus, image_width, image_height);
        let bwd = project(point, &minus, image_width, image_height);

        let col = match (fwd, bwd) {
            (Ok(f), Ok(b)) => (f - b) / (2.0 * h),
            (Ok(f), Err(_)) => (f - base) / h,
            (Err(_), Ok(b)) => (base - b) / h,
            (Err(_), Err(_)) => Vec2::zeros(),
        };
        jac.set_column(kind.index(), &col);
    }
    Ok(jac)
}
