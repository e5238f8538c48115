//! Camera parameters and their optimization constraints.
//!
//! The camera under match is described by nine scalar parameters: three
//! translation components, three Euler rotation components (degrees, XYZ
//! order), focal length and a two-component film offset (both mm). The set
//! of parameter kinds is closed ([`ParamKind`]), so lookups are checked at
//! compile time instead of going through string names.
//!
//! [`Constraints`] holds a lock flag and optional `[min, max]` bounds per
//! parameter and maps the full parameter set onto the ordered free-parameter
//! vector consumed by the solver.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::math::{world_from_camera, Iso3, Real, Vec2, Vec3};

/// Smallest focal-length lower bound accepted (mm). A camera with
/// non-positive focal length has no valid projection, so the focal bound can
/// never be relaxed below this floor.
pub const MIN_FOCAL_MM: Real = 1e-3;

/// Errors from constraint configuration and free-vector mapping.
#[derive(Debug, Error)]
pub enum ConstraintError {
    /// Lower bound exceeds upper bound.
    #[error("invalid bounds for {kind}: min {min} > max {max}")]
    InvalidBounds { kind: ParamKind, min: Real, max: Real },
    /// Focal length must keep a positive lower bound at all times.
    #[error("focal length lower bound must be positive, got {0:?}")]
    NonPositiveFocalBound(Option<Real>),
    /// Free-parameter vector length does not match the unlocked subset.
    #[error("free parameter vector length mismatch: expected {expected}, got {got}")]
    LengthMismatch { expected: usize, got: usize },
}

/// The closed set of optimizable camera parameters, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    TranslateX,
    TranslateY,
    TranslateZ,
    RotateX,
    RotateY,
    RotateZ,
    FocalLength,
    FilmOffsetX,
    FilmOffsetY,
}

impl ParamKind {
    /// All parameter kinds in canonical free-vector order.
    pub const ALL: [ParamKind; 9] = [
        ParamKind::TranslateX,
        ParamKind::TranslateY,
        ParamKind::TranslateZ,
        ParamKind::RotateX,
        ParamKind::RotateY,
        ParamKind::RotateZ,
        ParamKind::FocalLength,
        ParamKind::FilmOffsetX,
        ParamKind::FilmOffsetY,
    ];

    /// Index into the canonical order.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Stable snake_case name used by the session exchange format.
    pub fn name(self) -> &'static str {
        match self {
            ParamKind::TranslateX => "translate_x",
            ParamKind::TranslateY => "translate_y",
            ParamKind::TranslateZ => "translate_z",
            ParamKind::RotateX => "rotate_x",
            ParamKind::RotateY => "rotate_y",
            ParamKind::RotateZ => "rotate_z",
            ParamKind::FocalLength => "focal_length",
            ParamKind::FilmOffsetX => "film_offset_x",
            ParamKind::FilmOffsetY => "film_offset_y",
        }
    }

    /// Parse a stable name back into a kind.
    pub fn from_name(name: &str) -> Option<ParamKind> {
        ParamKind::ALL.into_iter().find(|k| k.name() == name)
    }

    /// Central finite-difference step for numeric derivatives.
    ///
    /// Rotation uses a smaller step than translation since one degree of
    /// rotation moves distant points much further than one world unit of
    /// translation.
    pub fn fd_step(self) -> Real {
        match self {
            ParamKind::TranslateX | ParamKind::TranslateY | ParamKind::TranslateZ => 1e-4,
            ParamKind::RotateX | ParamKind::RotateY | ParamKind::RotateZ => 1e-3,
            ParamKind::FocalLength => 1e-4,
            ParamKind::FilmOffsetX | ParamKind::FilmOffsetY => 1e-4,
        }
    }
}

impl std::fmt::Display for ParamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The nine-parameter camera model plus the (fixed) film aperture.
///
/// Rotation is Euler XYZ in degrees; focal length, film offset and film
/// aperture are millimetres. The aperture describes the film back used for
/// the NDC conversion and is carried state, not an optimizable parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraParams {
    pub translation: Vec3,
    pub rotation: Vec3,
    pub focal_length: Real,
    pub film_offset: Vec2,
    pub film_aperture: Vec2,
}

impl Default for CameraParams {
    /// Camera at the origin with a 35 mm lens on a 36×24 mm full-frame back.
    fn default() -> Self {
        Self {
            translation: Vec3::zeros(),
            rotation: Vec3::zeros(),
            focal_length: 35.0,
            film_offset: Vec2::zeros(),
            film_aperture: Vec2::new(36.0, 24.0),
        }
    }
}

impl CameraParams {
    /// Read a single parameter by kind.
    pub fn value(&self, kind: ParamKind) -> Real {
        match kind {
            ParamKind::TranslateX => self.translation.x,
            ParamKind::TranslateY => self.translation.y,
            ParamKind::TranslateZ => self.translation.z,
            ParamKind::RotateX => self.rotation.x,
            ParamKind::RotateY => self.rotation.y,
            ParamKind::RotateZ => self.rotation.z,
            ParamKind::FocalLength => self.focal_length,
            ParamKind::FilmOffsetX => self.film_offset.x,
            ParamKind::FilmOffsetY => self.film_offset.y,
        }
    }

    /// Write a single parameter by kind.
    pub fn set_value(&mut self, kind: ParamKind, value: Real) {
        match kind {
            ParamKind::TranslateX => self.translation.x = value,
            ParamKind::TranslateY => self.translation.y = value,
            ParamKind::TranslateZ => self.translation.z = value,
            ParamKind::RotateX => self.rotation.x = value,
            ParamKind::RotateY => self.rotation.y = value,
            ParamKind::RotateZ => self.rotation.z = value,
            ParamKind::FocalLength => self.focal_length = value,
            ParamKind::FilmOffsetX => self.film_offset.x = value,
            ParamKind::FilmOffsetY => self.film_offset.y = value,
        }
    }

    /// World transform of the camera (camera space → world space).
    pub fn world_transform(&self) -> Iso3 {
        world_from_camera(&self.translation, &self.rotation)
    }
}

/// Lock flag and optional bounds for one parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub locked: bool,
    pub lower: Option<Real>,
    pub upper: Option<Real>,
}

impl Constraint {
    /// Clamp a value into the bounds, if any.
    pub fn clamp(&self, mut value: Real) -> Real {
        if let Some(lo) = self.lower {
            value = value.max(lo);
        }
        if let Some(hi) = self.upper {
            value = value.min(hi);
        }
        value
    }
}

/// Per-parameter constraints for all nine camera parameters.
///
/// Determines the optimizer's free-variable subspace: locked parameters are
/// excluded from the free vector, bounds are forwarded to the bounded
/// solver. The free vector and its bounds are always parallel and ordered by
/// [`ParamKind::ALL`]; changing locks between solves changes the vector
/// length, so an in-flight solve must be restarted, never resumed.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraints {
    entries: [Constraint; 9],
}

impl Default for Constraints {
    /// Translation and rotation start free and unbounded, focal length is
    /// bounded to [1, 1000] mm, film offsets are bounded to [-50, 50] mm and
    /// locked until explicitly enabled.
    fn default() -> Self {
        let mut entries = [Constraint::default(); 9];
        entries[ParamKind::FocalLength.index()] = Constraint {
            locked: false,
            lower: Some(1.0),
            upper: Some(1000.0),
        };
        for kind in [ParamKind::FilmOffsetX, ParamKind::FilmOffsetY] {
            entries[kind.index()] = Constraint {
                locked: true,
                lower: Some(-50.0),
                upper: Some(50.0),
            };
        }
        Self { entries }
    }
}

impl Constraints {
    /// Lock or unlock a parameter.
    pub fn lock(&mut self, kind: ParamKind, locked: bool) {
        self.entries[kind.index()].locked = locked;
    }

    pub fn is_locked(&self, kind: ParamKind) -> bool {
        self.entries[kind.index()].locked
    }

    /// Set the bounds for a parameter. `None` means unbounded on that side.
    ///
    /// Focal length must always keep a positive lower bound; requests that
    /// would drop it are rejected before any state changes.
    pub fn set_bounds(
        &mut self,
        kind: ParamKind,
        lower: Option<Real>,
        upper: Option<Real>,
    ) -> Result<(), ConstraintError> {
        if kind == ParamKind::FocalLength && lower.map_or(true, |lo| lo < MIN_FOCAL_MM) {
            return Err(ConstraintError::NonPositiveFocalBound(lower));
        }
        if let (Some(lo), Some(hi)) = (lower, upper) {
            if lo > hi {
                return Err(ConstraintError::InvalidBounds {
                    kind,
                    min: lo,
                    max: hi,
                });
            }
        }
        let entry = &mut self.entries[kind.index()];
        entry.lower = lower;
        entry.upper = upper;
        Ok(())
    }

    pub fn bounds(&self, kind: ParamKind) -> (Option<Real>, Option<Real>) {
        let entry = &self.entries[kind.index()];
        (entry.lower, entry.upper)
    }

    /// Full constraint record for a parameter.
    pub fn get(&self, kind: ParamKind) -> Constraint {
        self.entries[kind.index()]
    }

    /// Replace the full constraint record for a parameter (session import).
    pub fn set(&mut self, kind: ParamKind, constraint: Constraint) -> Result<(), ConstraintError> {
        let locked = constraint.locked;
        self.set_bounds(kind, constraint.lower, constraint.upper)?;
        self.entries[kind.index()].locked = locked;
        Ok(())
    }

    /// Unlocked parameter kinds in canonical order.
    pub fn free_kinds(&self) -> Vec<ParamKind> {
        ParamKind::ALL
            .into_iter()
            .filter(|k| !self.is_locked(*k))
            .collect()
    }

    /// Number of unlocked parameters.
    pub fn num_free(&self) -> usize {
        ParamKind::ALL.iter().filter(|k| !self.is_locked(**k)).count()
    }

    /// Gather the unlocked parameters into the ordered free vector.
    pub fn pack_free(&self, params: &CameraParams) -> DVector<Real> {
        DVector::from_iterator(
            self.num_free(),
            self.free_kinds().into_iter().map(|k| params.value(k)),
        )
    }

    /// Scatter a solved free vector back into the parameter set.
    ///
    /// Locked parameters are untouched; unlocked values are clamped into
    /// their bounds on the way in.
    pub fn apply_free(
        &self,
        params: &mut CameraParams,
        values: &DVector<Real>,
    ) -> Result<(), ConstraintError> {
        let kinds = self.free_kinds();
        if values.len() != kinds.len() {
            return Err(ConstraintError::LengthMismatch {
                expected: kinds.len(),
                got: values.len(),
            });
        }
        for (kind, value) in kinds.into_iter().zip(values.iter()) {
            params.set_value(kind, self.get(kind).clamp(*value));
        }
        Ok(())
    }

    /// Per-free-parameter `(lower, upper)` vectors, parallel to
    /// [`Constraints::pack_free`]. Unbounded sides are ±∞.
    pub fn free_bounds(&self) -> (DVector<Real>, DVector<Real>) {
        let kinds = self.free_kinds();
        let lower = DVector::from_iterator(
            kinds.len(),
            kinds
                .iter()
                .map(|k| self.get(*k).lower.unwrap_or(Real::NEG_INFINITY)),
        );
        let upper = DVector::from_iterator(
            kinds.len(),
            kinds
                .iter()
                .map(|k| self.get(*k).upper.unwrap_or(Real::INFINITY)),
        );
        (lower, upper)
    }

    /// Clamp all parameter values into their current bounds.
    pub fn clamp_params(&self, params: &mut CameraParams) {
        for kind in ParamKind::ALL {
            params.set_value(kind, self.get(kind).clamp(params.value(kind)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_order_is_stable() {
        for (i, kind) in ParamKind::ALL.into_iter().enumerate() {
            assert_eq!(kind.index(), i);
            assert_eq!(ParamKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ParamKind::from_name("zoom"), None);
    }

    #[test]
    fn value_accessors_cover_all_kinds() {
        let mut params = CameraParams::default();
        for (i, kind) in ParamKind::ALL.into_iter().enumerate() {
            params.set_value(kind, i as Real + 1.0);
        }
        for (i, kind) in ParamKind::ALL.into_iter().enumerate() {
            assert_eq!(params.value(kind), i as Real + 1.0);
        }
    }

    #[test]
    fn default_constraints_lock_film_offset_only() {
        let c = Constraints::default();
        assert!(!c.is_locked(ParamKind::TranslateX));
        assert!(!c.is_locked(ParamKind::RotateZ));
        assert!(c.is_locked(ParamKind::FilmOffsetX));
        assert!(c.is_locked(ParamKind::FilmOffsetY));
        assert_eq!(c.bounds(ParamKind::FocalLength), (Some(1.0), Some(1000.0)));
        assert_eq!(c.bounds(ParamKind::FilmOffsetY), (Some(-50.0), Some(50.0)));
        assert_eq!(c.num_free(), 7);
    }

    #[test]
    fn pack_apply_round_trip_skips_locked() {
        let mut c = Constraints::default();
        c.lock(ParamKind::TranslateY, true);

        let mut params = CameraParams::default();
        params.translation = Vec3::new(1.0, 2.0, 3.0);

        let mut free = c.pack_free(&params);
        assert_eq!(free.len(), 6);
        // First two free entries are translate_x and translate_z.
        free[0] = 10.0;
        free[1] = 30.0;
        c.apply_free(&mut params, &free).unwrap();

        assert_eq!(params.translation.x, 10.0);
        assert_eq!(params.translation.y, 2.0);
        assert_eq!(params.translation.z, 30.0);
    }

    #[test]
    fn apply_free_rejects_length_mismatch() {
        let c = Constraints::default();
        let mut params = CameraParams::default();
        let err = c
            .apply_free(&mut params, &DVector::zeros(3))
            .unwrap_err();
        assert!(matches!(err, ConstraintError::LengthMismatch { .. }));
    }

    #[test]
    fn apply_free_clamps_into_bounds() {
        let mut c = Constraints::default();
        for kind in ParamKind::ALL {
            if kind != ParamKind::FocalLength {
                c.lock(kind, true);
            }
        }
        let mut params = CameraParams::default();
        c.apply_free(&mut params, &DVector::from_element(1, -5.0))
            .unwrap();
        assert_eq!(params.focal_length, 1.0);
    }

    #[test]
    fn focal_bound_must_stay_positive() {
        let mut c = Constraints::default();
        assert!(matches!(
            c.set_bounds(ParamKind::FocalLength, Some(0.0), Some(100.0)),
            Err(ConstraintError::NonPositiveFocalBound(_))
        ));
        assert!(matches!(
            c.set_bounds(ParamKind::FocalLength, None, Some(100.0)),
            Err(ConstraintError::NonPositiveFocalBound(_))
        ));
        c.set_bounds(ParamKind::FocalLength, Some(5.0), Some(85.0))
            .unwrap();
        assert_eq!(c.bounds(ParamKind::FocalLength), (Some(5.0), Some(85.0)));
    }

    #[test]
    fn inverted_bounds_rejected() {
        let mut c = Constraints::default();
        assert!(matches!(
            c.set_bounds(ParamKind::TranslateX, Some(2.0), Some(-2.0)),
            Err(ConstraintError::InvalidBounds { .. })
        ));
    }

    #[test]
    fn free_bounds_parallel_to_free_vector() {
        let mut c = Constraints::default();
        c.lock(ParamKind::FilmOffsetX, false);
        c.set_bounds(ParamKind::TranslateZ, Some(0.0), None).unwrap();

        let kinds = c.free_kinds();
        let (lower, upper) = c.free_bounds();
        assert_eq!(lower.len(), kinds.len());
        assert_eq!(upper.len(), kinds.len());

        let iz = kinds
            .iter()
            .position(|k| *k == ParamKind::TranslateZ)
            .unwrap();
        assert_eq!(lower[iz], 0.0);
        assert_eq!(upper[iz], Real::INFINITY);

        let ix = kinds.iter().position(|k| *k == ParamKind::TranslateX).unwrap();
        assert_eq!(lower[ix], Real::NEG_INFINITY);
    }
}
