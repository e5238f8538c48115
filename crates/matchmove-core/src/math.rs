//! Mathematical utilities and type definitions.
//!
//! This module provides the fundamental scalar/vector types used throughout
//! the workspace and helpers for building the camera's world transform from
//! translation plus Euler angles.

use nalgebra::{
    Isometry3, Matrix3, Matrix4, Point2, Point3, Translation3, UnitQuaternion, Vector2, Vector3,
};

/// Scalar type used throughout the library (currently `f64`).
pub type Real = f64;

/// 2D vector with [`Real`] components.
pub type Vec2 = Vector2<Real>;
/// 3D vector with [`Real`] components.
pub type Vec3 = Vector3<Real>;
/// 2D point with [`Real`] coordinates.
pub type Pt2 = Point2<Real>;
/// 3D point with [`Real`] coordinates.
pub type Pt3 = Point3<Real>;
/// 3×3 matrix with [`Real`] entries.
pub type Mat3 = Matrix3<Real>;
/// 4×4 matrix with [`Real`] entries.
pub type Mat4 = Matrix4<Real>;
/// 3D rigid transform (SE(3)) using [`Real`].
pub type Iso3 = Isometry3<Real>;

/// Rotation from Euler angles in degrees, XYZ order (X applied first).
///
/// Equivalent to `Rz(z) * Ry(y) * Rx(x)` acting on column vectors, which is
/// the common DCC "rotate order XYZ" convention.
pub fn rotation_from_euler_deg(rotation: &Vec3) -> UnitQuaternion<Real> {
    UnitQuaternion::from_euler_angles(
        rotation.x.to_radians(),
        rotation.y.to_radians(),
        rotation.z.to_radians(),
    )
}

/// Euler angles in degrees (XYZ order, X applied first) from a rotation.
pub fn euler_deg_from_rotation(rotation: &UnitQuaternion<Real>) -> Vec3 {
    let (rx, ry, rz) = rotation.euler_angles();
    Vec3::new(rx.to_degrees(), ry.to_degrees(), rz.to_degrees())
}

/// World transform of a camera from translation and Euler degrees.
///
/// The returned isometry maps camera-space points into world space; its
/// inverse is the view transform used by projection.
pub fn world_from_camera(translation: &Vec3, rotation_deg: &Vec3) -> Iso3 {
    Iso3::from_parts(
        Translation3::from(*translation),
        rotation_from_euler_deg(rotation_deg),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn euler_round_trip() {
        let r = Vec3::new(10.0, -35.0, 72.5);
        let back = euler_deg_from_rotation(&rotation_from_euler_deg(&r));
        assert_relative_eq!(r.x, back.x, epsilon = 1e-9);
        assert_relative_eq!(r.y, back.y, epsilon = 1e-9);
        assert_relative_eq!(r.z, back.z, epsilon = 1e-9);
    }

    #[test]
    fn identity_pose_maps_camera_to_world() {
        let iso = world_from_camera(&Vec3::new(1.0, 2.0, 3.0), &Vec3::zeros());
        let p = iso.transform_point(&Pt3::origin());
        assert_relative_eq!(p.x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(p.y, 2.0, epsilon = 1e-12);
        assert_relative_eq!(p.z, 3.0, epsilon = 1e-12);
    }

    #[test]
    fn rotate_order_applies_x_first() {
        // 90° about X then 90° about Y: +Y goes to +Z, then +Z goes to +X.
        // The reversed order would leave +Y on +Z instead.
        let q = rotation_from_euler_deg(&Vec3::new(90.0, 90.0, 0.0));
        let v = q.transform_vector(&Vec3::y());
        assert_relative_eq!(v.x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(v.y, 0.0, epsilon = 1e-12);
        assert_relative_eq!(v.z, 0.0, epsilon = 1e-12);
    }
}
