//! Ordered store of 3D↔2D locator pairs.
//!
//! A [`LocatorPair`] ties a clicked pixel in the reference image to a 3D
//! point owned by the host scene. The pair never owns the 3D point: it holds
//! a locator lookup key and caches the last world position pushed in via
//! [`CorrespondenceSet::set_world_position`] or snapshotted from a
//! [`SceneProvider`]. A pair without a resolved world position is skipped by
//! residual assembly rather than faulting.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::math::{Pt3, Real, Vec2};
use crate::params::CameraParams;
use crate::projection::{self, ProjectionError};

/// Unique identifier of a locator pair within one correspondence set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PairId(pub u64);

impl std::fmt::Display for PairId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PairId({})", self.0)
    }
}

/// Errors from correspondence lookups and residual evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum CorrespondenceError {
    /// No pair with this id exists in the set.
    #[error("unknown pair {0}")]
    UnknownPair(PairId),
    /// A pair with this id already exists (session import).
    #[error("duplicate pair id {0}")]
    DuplicatePairId(PairId),
    /// The pair has no resolved 3D world position yet.
    #[error("pair {0} has no world position set")]
    MissingWorldPoint(PairId),
    /// The resolved 3D point does not project (behind the camera).
    #[error(transparent)]
    Projection(#[from] ProjectionError),
}

/// Supplies current world positions for locator lookup keys.
///
/// Implemented by the host scene collaborator. The store snapshots positions
/// through this trait before a solve so one solve sees consistent geometry.
pub trait SceneProvider {
    fn world_position(&self, locator: &str) -> Option<Pt3>;
}

/// One 3D↔2D correspondence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocatorPair {
    pub id: PairId,
    /// Lookup key of the 3D point in the host scene.
    pub locator: String,
    /// Observed pixel position, top-left origin. May be off-frame.
    pub pixel: Vec2,
    /// Cached world position; `None` until the host resolves it.
    pub world: Option<Pt3>,
}

/// Insertion-ordered collection of locator pairs with unique ids.
#[derive(Debug, Clone, Default)]
pub struct CorrespondenceSet {
    pairs: Vec<LocatorPair>,
    next_id: u64,
}

/// Prefix for auto-generated locator names.
const LOCATOR_PREFIX: &str = "match_loc";

impl CorrespondenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pair for a clicked pixel with an auto-generated locator name.
    ///
    /// The world position stays unset until the host places the 3D point.
    pub fn add_pair(&mut self, pixel: Vec2) -> PairId {
        let id = self.alloc_id();
        let locator = format!("{}_{:03}", LOCATOR_PREFIX, id.0);
        self.pairs.push(LocatorPair {
            id,
            locator,
            pixel,
            world: None,
        });
        id
    }

    /// Add a pair bound to an existing scene locator.
    pub fn add_pair_with_locator(&mut self, pixel: Vec2, locator: impl Into<String>) -> PairId {
        let id = self.alloc_id();
        self.pairs.push(LocatorPair {
            id,
            locator: locator.into(),
            pixel,
            world: None,
        });
        id
    }

    /// Insert a fully-formed pair, keeping the id allocator ahead of it.
    ///
    /// Used by session import; rejects duplicate ids.
    pub fn insert_pair(&mut self, pair: LocatorPair) -> Result<(), CorrespondenceError> {
        if self.pairs.iter().any(|p| p.id == pair.id) {
            return Err(CorrespondenceError::DuplicatePairId(pair.id));
        }
        self.next_id = self.next_id.max(pair.id.0 + 1);
        self.pairs.push(pair);
        Ok(())
    }

    fn alloc_id(&mut self) -> PairId {
        let id = PairId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Cache the world position for a pair.
    pub fn set_world_position(&mut self, id: PairId, world: Pt3) -> Result<(), CorrespondenceError> {
        self.get_mut(id)?.world = Some(world);
        Ok(())
    }

    /// Move the observed pixel of a pair.
    pub fn set_pixel(&mut self, id: PairId, pixel: Vec2) -> Result<(), CorrespondenceError> {
        self.get_mut(id)?.pixel = pixel;
        Ok(())
    }

    /// Remove a pair. Returns `true` if it existed.
    pub fn remove_pair(&mut self, id: PairId) -> bool {
        let before = self.pairs.len();
        self.pairs.retain(|p| p.id != id);
        self.pairs.len() != before
    }

    pub fn clear(&mut self) {
        self.pairs.clear();
    }

    pub fn get(&self, id: PairId) -> Result<&LocatorPair, CorrespondenceError> {
        self.pairs
            .iter()
            .find(|p| p.id == id)
            .ok_or(CorrespondenceError::UnknownPair(id))
    }

    fn get_mut(&mut self, id: PairId) -> Result<&mut LocatorPair, CorrespondenceError> {
        self.pairs
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(CorrespondenceError::UnknownPair(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &LocatorPair> {
        self.pairs.iter()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Pairs with a resolved world position, in insertion order.
    pub fn valid_pairs(&self) -> impl Iterator<Item = &LocatorPair> {
        self.pairs.iter().filter(|p| p.world.is_some())
    }

    pub fn num_valid(&self) -> usize {
        self.valid_pairs().count()
    }

    /// Refresh cached world positions from the host scene.
    ///
    /// Locators the provider no longer knows lose their cached position, so
    /// stale geometry cannot leak into a later solve.
    pub fn sync_world_positions(&mut self, scene: &impl SceneProvider) {
        for pair in &mut self.pairs {
            pair.world = scene.world_position(&pair.locator);
        }
    }

    /// Residual `projected - observed` in pixels for one pair.
    pub fn residual(
        &self,
        id: PairId,
        params: &CameraParams,
        image_width: Real,
        image_height: Real,
    ) -> Result<Vec2, CorrespondenceError> {
        let pair = self.get(id)?;
        let world = pair
            .world
            .ok_or(CorrespondenceError::MissingWorldPoint(id))?;
        let projected = projection::project(&world, params, image_width, image_height)?;
        Ok(projected - pair.pixel)
    }

    /// RMS reprojection error in pixels over projectable pairs.
    ///
    /// Pairs without a world position or behind the camera are excluded;
    /// returns `None` when nothing can be measured.
    pub fn rms_error(
        &self,
        params: &CameraParams,
        image_width: Real,
        image_height: Real,
    ) -> Option<Real> {
        let mut sum = 0.0;
        let mut count = 0usize;
        for pair in self.valid_pairs() {
            if let Ok(r) = self.residual(pair.id, params, image_width, image_height) {
                sum += r.norm_squared();
                count += 1;
            }
        }
        (count > 0).then(|| (sum / count as Real).sqrt())
    }

    /// Sum of squared residual components over projectable pairs.
    ///
    /// This is the objective the solver minimizes; `None` when nothing can
    /// be measured.
    pub fn sum_squared_error(
        &self,
        params: &CameraParams,
        image_width: Real,
        image_height: Real,
    ) -> Option<Real> {
        let mut sum = 0.0;
        let mut count = 0usize;
        for pair in self.valid_pairs() {
            if let Ok(r) = self.residual(pair.id, params, image_width, image_height) {
                sum += r.norm_squared();
                count += 1;
            }
        }
        (count > 0).then_some(sum)
    }

    /// Per-pair reprojection error in pixels, insertion order.
    ///
    /// Pairs behind the camera report infinity so the caller can flag them;
    /// pairs without a world position are skipped.
    pub fn pair_errors(
        &self,
        params: &CameraParams,
        image_width: Real,
        image_height: Real,
    ) -> Vec<(PairId, Real)> {
        self.valid_pairs()
            .map(|pair| {
                let err = self
                    .residual(pair.id, params, image_width, image_height)
                    .map_or(Real::INFINITY, |r| r.norm());
                (pair.id, err)
            })
            .collect()
    }

    /// Current projected pixel for each projectable pair (overlay support).
    pub fn projected_pixels(
        &self,
        params: &CameraParams,
        image_width: Real,
        image_height: Real,
    ) -> Vec<(PairId, Vec2)> {
        self.valid_pairs()
            .filter_map(|pair| {
                let world = pair.world?;
                projection::project(&world, params, image_width, image_height)
                    .ok()
                    .map(|px| (pair.id, px))
            })
            .collect()
    }
}
