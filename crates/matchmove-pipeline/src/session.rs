//! JSON session exchange.
//!
//! A [`Session`] is a plain serde document carrying the full matcher state:
//! reference image, camera parameters with their per-parameter constraints,
//! and the correspondence pairs. Constraints are keyed by the stable
//! snake_case parameter names so documents stay readable and diff-friendly,
//! and pair ids survive a round trip so host-side references stay valid.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use matchmove_core::{
    CameraParams, Constraint, LocatorPair, PairId, ParamKind, Pt3, Real, Vec2, Vec3,
};

use crate::matcher::{CameraMatcher, MatchError};

/// Version written into new documents; older readers reject newer versions.
pub const FORMAT_VERSION: u32 = 1;

/// Errors from session encoding, decoding and state reconstruction.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// A constraint entry names a parameter this build does not know.
    #[error("unknown parameter name {0:?}")]
    UnknownParameter(String),
    /// The document was written by a newer format revision.
    #[error("unsupported session version {0} (this build reads up to {FORMAT_VERSION})")]
    UnsupportedVersion(u32),
    #[error(transparent)]
    Match(#[from] MatchError),
}

/// Lock flag and optional bounds for one parameter, as persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionConstraint {
    pub locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<Real>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<Real>,
}

/// Camera snapshot: name, parameter values and the constraint table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCamera {
    pub name: String,
    pub translation: [Real; 3],
    pub rotation: [Real; 3],
    pub focal_length: Real,
    pub film_offset: [Real; 2],
    pub film_aperture: [Real; 2],
    /// Keyed by [`ParamKind::name`]; sorted for stable output.
    pub constraints: BTreeMap<String, SessionConstraint>,
}

/// One persisted correspondence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPair {
    pub pair_id: u64,
    pub locator: String,
    pub pixel: [Real; 2],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world: Option<[Real; 3]>,
}

/// The session document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    pub image_width: u32,
    pub image_height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera: Option<SessionCamera>,
    #[serde(default)]
    pub pairs: Vec<SessionPair>,
}

fn default_version() -> u32 {
    FORMAT_VERSION
}

impl Session {
    /// Snapshot a matcher into a document.
    pub fn from_matcher(matcher: &CameraMatcher) -> Self {
        let camera = matcher.camera().map(|cam| {
            let p = &cam.params;
            let constraints = ParamKind::ALL
                .into_iter()
                .map(|kind| {
                    let c = matcher.constraints().get(kind);
                    (
                        kind.name().to_string(),
                        SessionConstraint {
                            locked: c.locked,
                            min: c.lower,
                            max: c.upper,
                        },
                    )
                })
                .collect();
            SessionCamera {
                name: cam.name.clone(),
                translation: [p.translation.x, p.translation.y, p.translation.z],
                rotation: [p.rotation.x, p.rotation.y, p.rotation.z],
                focal_length: p.focal_length,
                film_offset: [p.film_offset.x, p.film_offset.y],
                film_aperture: [p.film_aperture.x, p.film_aperture.y],
                constraints,
            }
        });
        let pairs = matcher
            .pairs()
            .iter()
            .map(|pair| SessionPair {
                pair_id: pair.id.0,
                locator: pair.locator.clone(),
                pixel: [pair.pixel.x, pair.pixel.y],
                world: pair.world.map(|w| [w.x, w.y, w.z]),
            })
            .collect();
        Self {
            version: FORMAT_VERSION,
            image_path: matcher.image().path.clone(),
            image_width: matcher.image().width,
            image_height: matcher.image().height,
            camera,
            pairs,
        }
    }

    /// Reconstruct a matcher from the document.
    ///
    /// Ids are restored verbatim and the id allocator ends up past the
    /// largest restored id, so pairs added afterwards never collide.
    pub fn apply(&self) -> Result<CameraMatcher, SessionError> {
        if self.version > FORMAT_VERSION {
            return Err(SessionError::UnsupportedVersion(self.version));
        }

        let mut matcher = CameraMatcher::new();
        if self.image_width > 0 && self.image_height > 0 {
            matcher.set_image(self.image_path.clone(), self.image_width, self.image_height)?;
        }

        if let Some(cam) = &self.camera {
            let params = CameraParams {
                translation: Vec3::new(cam.translation[0], cam.translation[1], cam.translation[2]),
                rotation: Vec3::new(cam.rotation[0], cam.rotation[1], cam.rotation[2]),
                focal_length: cam.focal_length,
                film_offset: Vec2::new(cam.film_offset[0], cam.film_offset[1]),
                film_aperture: Vec2::new(cam.film_aperture[0], cam.film_aperture[1]),
            };
            matcher.attach_camera(cam.name.clone(), params);
            for (name, sc) in &cam.constraints {
                let kind = ParamKind::from_name(name)
                    .ok_or_else(|| SessionError::UnknownParameter(name.clone()))?;
                matcher.set_constraint(
                    kind,
                    Constraint {
                        locked: sc.locked,
                        lower: sc.min,
                        upper: sc.max,
                    },
                )?;
            }
        }

        for pair in &self.pairs {
            matcher
                .pairs_mut()
                .insert_pair(LocatorPair {
                    id: PairId(pair.pair_id),
                    locator: pair.locator.clone(),
                    pixel: Vec2::new(pair.pixel[0], pair.pixel[1]),
                    world: pair.world.map(|w| Pt3::new(w[0], w[1], w[2])),
                })
                .map_err(MatchError::from)?;
        }

        Ok(matcher)
    }

    /// Encode as pretty-printed JSON.
    pub fn to_json_string(&self) -> Result<String, SessionError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Decode from JSON.
    pub fn from_json_str(text: &str) -> Result<Self, SessionError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn populated_matcher() -> CameraMatcher {
        let mut m = CameraMatcher::new();
        m.set_image(Some("plates/ref_0040.jpg".into()), 1920, 1080)
            .unwrap();
        m.attach_camera(
            "shot_cam",
            CameraParams {
                translation: Vec3::new(0.25, -1.5, 11.0),
                rotation: Vec3::new(3.0, -12.5, 0.75),
                focal_length: 50.0,
                film_offset: Vec2::new(0.4, -0.2),
                film_aperture: Vec2::new(36.0, 24.0),
            },
        );
        m.lock(ParamKind::TranslateZ, true);
        m.set_bounds(ParamKind::FocalLength, Some(18.0), Some(135.0))
            .unwrap();

        let a = m.add_pair_with_locator(Vec2::new(640.0, 360.0), "corner_ne");
        m.set_world_position(a, Pt3::new(1.0, 2.0, 3.0)).unwrap();
        m.add_pair(Vec2::new(100.5, 900.25)); // world still unresolved
        m
    }

    #[test]
    fn json_round_trip_restores_full_state() {
        let original = populated_matcher();
        let text = Session::from_matcher(&original).to_json_string().unwrap();
        let restored = Session::from_json_str(&text).unwrap().apply().unwrap();

        assert_eq!(restored.image(), original.image());

        let (orig_cam, rest_cam) = (original.camera().unwrap(), restored.camera().unwrap());
        assert_eq!(rest_cam.name, orig_cam.name);
        for kind in ParamKind::ALL {
            assert_relative_eq!(
                rest_cam.params.value(kind),
                orig_cam.params.value(kind),
                epsilon = 1e-9
            );
            assert_eq!(
                restored.constraints().get(kind),
                original.constraints().get(kind),
                "constraint mismatch for {kind}"
            );
        }

        assert_eq!(restored.pairs().len(), original.pairs().len());
        for (orig, rest) in original.pairs().iter().zip(restored.pairs().iter()) {
            assert_eq!(rest.id, orig.id);
            assert_eq!(rest.locator, orig.locator);
            assert_relative_eq!(rest.pixel.x, orig.pixel.x, epsilon = 1e-9);
            assert_relative_eq!(rest.pixel.y, orig.pixel.y, epsilon = 1e-9);
            assert_eq!(rest.world.is_some(), orig.world.is_some());
        }
    }

    #[test]
    fn restored_ids_do_not_collide_with_new_pairs() {
        let original = populated_matcher();
        let max_id = original.pairs().iter().map(|p| p.id.0).max().unwrap();

        let mut restored = Session::from_matcher(&original).apply().unwrap();
        let fresh = restored.add_pair(Vec2::new(5.0, 5.0));
        assert!(fresh.0 > max_id, "fresh id {fresh} collides");
    }

    #[test]
    fn empty_document_yields_empty_matcher() {
        let session = Session::from_matcher(&CameraMatcher::new());
        let restored = session.apply().unwrap();
        assert!(restored.camera().is_none());
        assert_eq!(restored.image().width, 0);
        assert!(restored.pairs().is_empty());
    }

    #[test]
    fn duplicate_pair_ids_are_rejected() {
        let mut session = Session::from_matcher(&populated_matcher());
        let dup = session.pairs[0].clone();
        session.pairs.push(dup);
        assert!(matches!(
            session.apply(),
            Err(SessionError::Match(MatchError::Correspondence(_)))
        ));
    }

    #[test]
    fn unknown_parameter_name_is_rejected() {
        let mut session = Session::from_matcher(&populated_matcher());
        session
            .camera
            .as_mut()
            .unwrap()
            .constraints
            .insert("zoom".into(), SessionConstraint { locked: false, min: None, max: None });
        assert!(matches!(
            session.apply(),
            Err(SessionError::UnknownParameter(name)) if name == "zoom"
        ));
    }

    #[test]
    fn newer_version_is_rejected() {
        let mut session = Session::from_matcher(&CameraMatcher::new());
        session.version = FORMAT_VERSION + 1;
        assert!(matches!(
            session.apply(),
            Err(SessionError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn missing_optional_fields_deserialize_with_defaults() {
        let text = r#"{ "image_width": 1280, "image_height": 720 }"#;
        let session = Session::from_json_str(text).unwrap();
        assert_eq!(session.version, FORMAT_VERSION);
        assert!(session.camera.is_none());
        assert!(session.pairs.is_empty());
        assert!(session.apply().is_ok());
    }
}
