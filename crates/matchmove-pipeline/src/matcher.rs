//! Camera matcher facade: one camera, one reference image, one
//! correspondence set, and the solve orchestration over them.

use log::{info, warn};
use thiserror::Error;

use matchmove_core::{
    CameraParams, Constraint, ConstraintError, Constraints, CorrespondenceError,
    CorrespondenceSet, PairId, ParamKind, Pt3, Real, SceneProvider, Vec2,
};
use matchmove_optim::{
    solve, Bounds, CancelToken, Method, MethodError, NllsProblem, ReprojectionProblem, SolveOptions,
    SolveReport, Termination,
};

/// Errors reported before any solve attempt (input errors) or by matcher
/// state management. No partial mutation happens on any of these.
#[derive(Debug, Error)]
pub enum MatchError {
    /// No camera attached yet; call `attach_camera` first.
    #[error("no camera attached")]
    NoCamera,
    /// Image dimensions are unset or non-positive.
    #[error("invalid image dimensions {width}x{height}")]
    InvalidImage { width: u32, height: u32 },
    /// No correspondence has both a pixel and a resolved world position.
    #[error("insufficient data: {valid} valid correspondence(s), need at least 1")]
    InsufficientData { valid: usize },
    #[error(transparent)]
    Constraint(#[from] ConstraintError),
    #[error(transparent)]
    Correspondence(#[from] CorrespondenceError),
    #[error(transparent)]
    Method(#[from] MethodError),
}

/// Reference image description. The path is an opaque reference for the
/// host; no file I/O happens here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageSpec {
    pub path: Option<String>,
    pub width: u32,
    pub height: u32,
}

/// The camera under match: host-side name plus the parameter snapshot the
/// matcher owns. The host applies solved values back to its live camera.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachedCamera {
    pub name: String,
    pub params: CameraParams,
}

/// Settings for one solve invocation.
#[derive(Debug, Clone, Default)]
pub struct SolveSettings {
    pub method: Method,
    pub options: SolveOptions,
    pub cancel: CancelToken,
}

impl SolveSettings {
    /// Settings with a method parsed from its allow-listed name.
    pub fn with_method_name(name: &str) -> Result<Self, MethodError> {
        Ok(Self {
            method: name.parse()?,
            ..Self::default()
        })
    }
}

/// Outcome of one solve. Transient; not persisted in sessions.
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// True when the solver terminated within tolerance.
    pub converged: bool,
    pub termination: Termination,
    pub iterations: usize,
    /// RMS reprojection error in pixels over the solved pairs.
    pub rms_error: Real,
    /// Sum of squared residual components (the minimized objective).
    pub sum_squared_error: Real,
    /// Pairs behind the camera at the final parameters. Non-zero on a
    /// converged solve is a data-quality warning.
    pub behind_camera: usize,
}

/// Owns the matcher state for one camera/image pairing.
#[derive(Debug, Clone, Default)]
pub struct CameraMatcher {
    image: ImageSpec,
    camera: Option<AttachedCamera>,
    constraints: Constraints,
    pairs: CorrespondenceSet,
}

impl CameraMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the reference image. Dimensions must be positive.
    pub fn set_image(
        &mut self,
        path: Option<String>,
        width: u32,
        height: u32,
    ) -> Result<(), MatchError> {
        if width == 0 || height == 0 {
            return Err(MatchError::InvalidImage { width, height });
        }
        self.image = ImageSpec {
            path,
            width,
            height,
        };
        Ok(())
    }

    pub fn image(&self) -> &ImageSpec {
        &self.image
    }

    /// Attach the camera to match. Resets constraints to defaults; any
    /// previous camera's parameter snapshot is discarded.
    pub fn attach_camera(&mut self, name: impl Into<String>, params: CameraParams) {
        self.camera = Some(AttachedCamera {
            name: name.into(),
            params,
        });
        self.constraints = Constraints::default();
    }

    pub fn camera(&self) -> Option<&AttachedCamera> {
        self.camera.as_ref()
    }

    pub fn params(&self) -> Option<&CameraParams> {
        self.camera.as_ref().map(|c| &c.params)
    }

    /// Direct parameter edits between solves.
    pub fn params_mut(&mut self) -> Option<&mut CameraParams> {
        self.camera.as_mut().map(|c| &mut c.params)
    }

    pub fn constraints(&self) -> &Constraints {
        &self.constraints
    }

    /// Lock or unlock a parameter for the next solve.
    pub fn lock(&mut self, kind: ParamKind, locked: bool) {
        self.constraints.lock(kind, locked);
    }

    /// Set bounds for a parameter and re-clamp the current value into them,
    /// so the camera never sits outside its own constraints.
    pub fn set_bounds(
        &mut self,
        kind: ParamKind,
        lower: Option<Real>,
        upper: Option<Real>,
    ) -> Result<(), MatchError> {
        self.constraints.set_bounds(kind, lower, upper)?;
        if let Some(camera) = self.camera.as_mut() {
            let clamped = self.constraints.get(kind).clamp(camera.params.value(kind));
            camera.params.set_value(kind, clamped);
        }
        Ok(())
    }

    /// Restore a full constraint record (session import).
    pub(crate) fn set_constraint(
        &mut self,
        kind: ParamKind,
        constraint: Constraint,
    ) -> Result<(), MatchError> {
        self.constraints.set(kind, constraint)?;
        Ok(())
    }

    // Pair management, delegating to the correspondence set.

    pub fn add_pair(&mut self, pixel: Vec2) -> PairId {
        self.pairs.add_pair(pixel)
    }

    pub fn add_pair_with_locator(&mut self, pixel: Vec2, locator: impl Into<String>) -> PairId {
        self.pairs.add_pair_with_locator(pixel, locator)
    }

    pub fn set_world_position(&mut self, id: PairId, world: Pt3) -> Result<(), MatchError> {
        Ok(self.pairs.set_world_position(id, world)?)
    }

    pub fn set_pixel(&mut self, id: PairId, pixel: Vec2) -> Result<(), MatchError> {
        Ok(self.pairs.set_pixel(id, pixel)?)
    }

    pub fn remove_pair(&mut self, id: PairId) -> bool {
        self.pairs.remove_pair(id)
    }

    pub fn clear_pairs(&mut self) {
        self.pairs.clear();
    }

    pub fn pairs(&self) -> &CorrespondenceSet {
        &self.pairs
    }

    pub(crate) fn pairs_mut(&mut self) -> &mut CorrespondenceSet {
        &mut self.pairs
    }

    /// Snapshot world positions from the host scene before a solve.
    pub fn sync_world_positions(&mut self, scene: &impl SceneProvider) {
        self.pairs.sync_world_positions(scene);
    }

    /// Current RMS reprojection error in pixels, if measurable.
    pub fn rms_error(&self) -> Option<Real> {
        let params = self.params()?;
        self.pairs
            .rms_error(params, self.image.width as Real, self.image.height as Real)
    }

    /// Per-pair reprojection errors (pixels; infinite for behind-camera).
    pub fn pair_errors(&self) -> Vec<(PairId, Real)> {
        match self.params() {
            Some(params) => self.pairs.pair_errors(
                params,
                self.image.width as Real,
                self.image.height as Real,
            ),
            None => Vec::new(),
        }
    }

    /// Projected pixel for each projectable pair, for overlay rendering.
    pub fn projected_pixels(&self) -> Vec<(PairId, Vec2)> {
        match self.params() {
            Some(params) => self.pairs.projected_pixels(
                params,
                self.image.width as Real,
                self.image.height as Real,
            ),
            None => Vec::new(),
        }
    }

    /// Run one solve to completion (or cancellation).
    ///
    /// Input errors are returned as `Err` before anything is touched.
    /// Numerical failures come back as an `Ok` result with `converged ==
    /// false`; in every failure mode the camera keeps its pre-solve values
    /// unless the solver found a strict improvement.
    pub fn solve(&mut self, settings: &SolveSettings) -> Result<OptimizationResult, MatchError> {
        let (width, height) = (self.image.width, self.image.height);
        if width == 0 || height == 0 {
            return Err(MatchError::InvalidImage { width, height });
        }
        let params = self
            .camera
            .as_ref()
            .map(|c| c.params)
            .ok_or(MatchError::NoCamera)?;

        let (w, h) = (width as Real, height as Real);
        let problem = ReprojectionProblem::from_set(&self.pairs, &params, &self.constraints, w, h);
        let valid = problem.num_observations();
        if valid == 0 {
            return Err(MatchError::InsufficientData { valid });
        }

        let x0 = self.constraints.pack_free(&params);
        if x0.is_empty() {
            // Nothing to optimize; report the current error unchanged.
            let rms = self.pairs.rms_error(&params, w, h).unwrap_or(Real::INFINITY);
            return Ok(OptimizationResult {
                converged: true,
                termination: Termination::Converged,
                iterations: 0,
                rms_error: rms,
                sum_squared_error: rms * rms * valid as Real,
                behind_camera: problem.behind_camera_count(&x0),
            });
        }

        if valid < 3 {
            warn!("only {valid} valid pairs; the solve is likely under-determined");
        }
        if problem.num_residuals() < x0.len() {
            warn!(
                "{} free parameters against {} residuals; consider locking parameters",
                x0.len(),
                problem.num_residuals()
            );
        }

        let (lower, upper) = self.constraints.free_bounds();
        let bounds = Bounds::new(lower, upper)?;

        let (x_best, report) = solve(
            settings.method,
            &problem,
            x0,
            Some(&bounds),
            &settings.options,
            &settings.cancel,
        );

        // Write back only a strict improvement; a diverging or cancelled
        // solve must never corrupt the last good parameters.
        if report.final_cost < report.initial_cost || report.converged() {
            if let Some(camera) = self.camera.as_mut() {
                self.constraints.apply_free(&mut camera.params, &x_best)?;
            }
        }

        let result = self.build_result(&problem, &x_best, &report, valid);
        info!(
            "solve ({}) finished: {} after {} iterations, rms {:.4} px",
            settings.method.name(),
            result.termination,
            result.iterations,
            result.rms_error
        );
        if result.behind_camera > 0 {
            warn!(
                "{} pair(s) project behind the camera at the solution",
                result.behind_camera
            );
        }
        Ok(result)
    }

    fn build_result(
        &self,
        problem: &ReprojectionProblem,
        x_best: &nalgebra::DVector<Real>,
        report: &SolveReport,
        valid: usize,
    ) -> OptimizationResult {
        OptimizationResult {
            converged: report.converged(),
            termination: report.termination,
            iterations: report.iterations,
            rms_error: (report.final_cost / valid as Real).sqrt(),
            sum_squared_error: report.final_cost,
            behind_camera: problem.behind_camera_count(x_best),
        }
    }
}
