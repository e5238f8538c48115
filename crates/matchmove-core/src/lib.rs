//! Core types for `matchmove-rs`: camera parameters, projection and the
//! 3D↔2D correspondence store.
//!
//! This crate contains:
//! - linear algebra type aliases (`Real`, `Vec2`, `Pt3`, ...),
//! - the nine-parameter camera model and its per-parameter lock/bound
//!   constraints ([`CameraParams`], [`Constraints`]),
//! - the pinhole + film-offset projection and its Jacobian ([`projection`]),
//! - the ordered correspondence store ([`CorrespondenceSet`]).
//!
//! Conventions (applied uniformly across the workspace):
//! - the camera looks down **-Z** with +Y up; rotation is Euler **XYZ**
//!   (X applied first) in **degrees**,
//! - focal length, film offset and film aperture are in millimetres,
//! - pixel origin is **top-left** with y growing downward.

/// Linear algebra type aliases and rigid-transform helpers.
pub mod math;
/// Camera parameters and per-parameter optimization constraints.
pub mod params;
/// Pinhole + film-offset projection and its parameter Jacobian.
pub mod projection;
/// Ordered store of 3D↔2D locator pairs.
pub mod correspondence;

pub use correspondence::*;
pub use math::*;
pub use params::*;
pub use projection::*;
