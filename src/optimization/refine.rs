//! Nonlinear refinement of intrinsics, distortion and per-view poses.
//!
//! Builds one parameter vector holding the camera intrinsics, the 5
//! distortion coefficients and a 6-dof pose (axis-angle rotation +
//! translation) per accepted view, and minimizes the stacked reprojection
//! residuals with Levenberg-Marquardt. Constraint configurations tie fy to
//! fx (fixed aspect ratio) or hold the tangential coefficients at zero by
//! excluding those entries from the free parameter set.
//!
//! [`calibrate`] runs the two standard passes: a constrained coarse pass
//! that stabilizes the intrinsic guess, then a full pass with all
//! distortion coefficients free, both seeded from the estimate in hand.

use crate::camera::{CameraModel, RadTanModel};
use crate::optimization::linear::{estimate_intrinsics, pose_from_homography, view_homographies};
use crate::optimization::{compute_projection_error, CalibrationError, Pose};
use crate::pattern::Correspondences;
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt, TerminationReason};
use log::{debug, info};
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn, Rotation3, Vector3};

/// Entries before the first pose block: fx, fy, cx, cy, k1, k2, p1, p2, k3.
const INTRINSIC_PARAMS: usize = 9;
/// Axis-angle rotation plus translation.
const POSE_PARAMS: usize = 6;

/// Residual value standing in for a projection that left the valid domain
/// (point behind the camera) during iteration.
const INVALID_PROJECTION_RESIDUAL: f64 = 1e6;

/// Constraint configuration of one refinement pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefineOptions {
    /// Tie fy to fx at the seed's aspect ratio.
    pub fix_aspect_ratio: bool,
    /// Hold the tangential coefficients p1, p2 at zero.
    pub zero_tangential: bool,
    /// Seed from the caller's model instead of re-running the linear
    /// estimate.
    pub use_intrinsic_guess: bool,
}

impl RefineOptions {
    /// First pass: constrained, stabilizes the intrinsic guess.
    pub fn coarse() -> Self {
        RefineOptions {
            fix_aspect_ratio: true,
            zero_tangential: true,
            use_intrinsic_guess: true,
        }
    }

    /// Second pass: all distortion coefficients free.
    pub fn full() -> Self {
        RefineOptions {
            fix_aspect_ratio: false,
            zero_tangential: false,
            use_intrinsic_guess: true,
        }
    }
}

struct BundleProblem<'a> {
    correspondences: &'a Correspondences,
    /// Full parameter vector; fixed entries keep their seeded values.
    full: DVector<f64>,
    /// Positions in `full` the solver is allowed to move.
    free_indices: Vec<usize>,
    /// fy / fx captured at seed time, enforced while tied.
    aspect_ratio: f64,
    tie_fy_to_fx: bool,
}

impl BundleProblem<'_> {
    fn apply_ties(full: &mut DVector<f64>, tie_fy_to_fx: bool, aspect_ratio: f64) {
        if tie_fy_to_fx {
            full[1] = aspect_ratio * full[0];
        }
    }

    fn model_from(full: &DVector<f64>) -> RadTanModel {
        RadTanModel {
            intrinsics: crate::camera::Intrinsics {
                fx: full[0],
                fy: full[1],
                cx: full[2],
                cy: full[3],
            },
            resolution: crate::camera::Resolution {
                width: 0,
                height: 0,
            },
            distortions: [full[4], full[5], full[6], full[7], full[8]],
        }
    }

    fn residuals_for(&self, full: &DVector<f64>) -> DVector<f64> {
        let model = Self::model_from(full);
        let total = self.correspondences.total_points();
        let mut residuals = DVector::zeros(2 * total);

        let mut row = 0;
        for view in 0..self.correspondences.len() {
            let base = INTRINSIC_PARAMS + POSE_PARAMS * view;
            let rotation =
                Rotation3::new(Vector3::new(full[base], full[base + 1], full[base + 2]));
            let translation = Vector3::new(full[base + 3], full[base + 4], full[base + 5]);

            let object = &self.correspondences.object_points[view];
            let image = &self.correspondences.image_points[view];
            for (p3, p2) in object.iter().zip(image.iter()) {
                let p_cam = rotation * p3 + translation;
                match model.project(&p_cam) {
                    Ok(projected) => {
                        residuals[row] = projected.x - p2.x;
                        residuals[row + 1] = projected.y - p2.y;
                    }
                    Err(_) => {
                        residuals[row] = INVALID_PROJECTION_RESIDUAL;
                        residuals[row + 1] = INVALID_PROJECTION_RESIDUAL;
                    }
                }
                row += 2;
            }
        }

        residuals
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for BundleProblem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        for (slot, &idx) in self.free_indices.iter().enumerate() {
            self.full[idx] = x[slot];
        }
        Self::apply_ties(&mut self.full, self.tie_fy_to_fx, self.aspect_ratio);
    }

    fn params(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.free_indices.len(),
            self.free_indices.iter().map(|&idx| self.full[idx]),
        )
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        Some(self.residuals_for(&self.full))
    }

    /// Forward-difference Jacobian over the free parameters.
    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let base = self.residuals_for(&self.full);
        let mut jac = DMatrix::zeros(base.nrows(), self.free_indices.len());

        for (col, &idx) in self.free_indices.iter().enumerate() {
            let step = 1e-6 * (1.0 + self.full[idx].abs());
            let mut perturbed = self.full.clone();
            perturbed[idx] += step;
            Self::apply_ties(&mut perturbed, self.tie_fy_to_fx, self.aspect_ratio);

            let shifted = self.residuals_for(&perturbed);
            for r in 0..base.nrows() {
                jac[(r, col)] = (shifted[r] - base[r]) / step;
            }
        }

        Some(jac)
    }
}

/// One refinement pass under the given constraint configuration.
///
/// Seeds the intrinsics and distortion from `initial` (or from a fresh
/// linear estimate when `use_intrinsic_guess` is off), derives one pose
/// per view from its homography, and minimizes the total squared
/// reprojection error. Returns the refined model, the per-view poses and
/// the RMS reprojection error sqrt(total squared residual / point count).
pub fn refine(
    correspondences: &Correspondences,
    initial: &RadTanModel,
    options: &RefineOptions,
) -> Result<(RadTanModel, Vec<Pose>, f64), CalibrationError> {
    let n_views = correspondences.len();
    if n_views < 2 {
        return Err(CalibrationError::IllConditioned(format!(
            "{} view(s) cannot constrain intrinsics and distortion; at least 2 distinct orientations required",
            n_views
        )));
    }

    let mut model = initial.clone();
    if !options.use_intrinsic_guess {
        model.intrinsics = estimate_intrinsics(correspondences, model.resolution)?;
        model.distortions = [0.0; 5];
    }
    if options.zero_tangential {
        model.distortions[2] = 0.0;
        model.distortions[3] = 0.0;
    }

    let homographies = view_homographies(correspondences)?;
    if homographies.len() != n_views {
        return Err(CalibrationError::IllConditioned(
            "a view lost its homography; pose seeding is incomplete".to_string(),
        ));
    }
    let poses: Vec<Pose> = homographies
        .iter()
        .map(|h| pose_from_homography(h, &model.intrinsics))
        .collect::<Result<_, _>>()?;

    let mut full = DVector::zeros(INTRINSIC_PARAMS + POSE_PARAMS * n_views);
    full[0] = model.intrinsics.fx;
    full[1] = model.intrinsics.fy;
    full[2] = model.intrinsics.cx;
    full[3] = model.intrinsics.cy;
    for (i, d) in model.distortions.iter().enumerate() {
        full[4 + i] = *d;
    }
    for (view, pose) in poses.iter().enumerate() {
        let base = INTRINSIC_PARAMS + POSE_PARAMS * view;
        let rvec = pose.rotation.scaled_axis();
        full[base] = rvec.x;
        full[base + 1] = rvec.y;
        full[base + 2] = rvec.z;
        full[base + 3] = pose.translation.x;
        full[base + 4] = pose.translation.y;
        full[base + 5] = pose.translation.z;
    }

    let mut free_indices = vec![0usize];
    if !options.fix_aspect_ratio {
        free_indices.push(1);
    }
    free_indices.extend([2, 3, 4, 5]);
    if !options.zero_tangential {
        free_indices.extend([6, 7]);
    }
    free_indices.push(8);
    for view in 0..n_views {
        let base = INTRINSIC_PARAMS + POSE_PARAMS * view;
        free_indices.extend(base..base + POSE_PARAMS);
    }

    let residual_count = 2 * correspondences.total_points();
    if residual_count < free_indices.len() {
        return Err(CalibrationError::IllConditioned(format!(
            "{} residuals cannot constrain {} free parameters",
            residual_count,
            free_indices.len()
        )));
    }

    let aspect_ratio = model.intrinsics.fy / model.intrinsics.fx;
    let problem = BundleProblem {
        correspondences,
        full,
        free_indices,
        aspect_ratio,
        tie_fy_to_fx: options.fix_aspect_ratio,
    };

    let lm = LevenbergMarquardt::new()
        .with_ftol(1e-12)
        .with_xtol(1e-12)
        .with_gtol(1e-12)
        .with_patience(100);

    let (problem, report) = lm.minimize(problem);

    // Hitting the iteration cap is a valid stop; everything else that is
    // not a convergence counts as failure.
    let acceptable = report.termination.was_successful()
        || matches!(report.termination, TerminationReason::LostPatience);
    if !acceptable {
        return Err(CalibrationError::ConvergenceFailure(format!(
            "{:?} after {} evaluations",
            report.termination, report.number_of_evaluations
        )));
    }
    debug!(
        "refinement pass: {:?} after {} evaluations",
        report.termination, report.number_of_evaluations
    );

    let full = problem.full;
    if full.iter().any(|v| !v.is_finite()) {
        return Err(CalibrationError::ConvergenceFailure(
            "refinement produced non-finite parameters".to_string(),
        ));
    }

    let mut refined = BundleProblem::model_from(&full);
    refined.resolution = initial.resolution;
    refined
        .validate_params()
        .map_err(|e| CalibrationError::ConvergenceFailure(e.to_string()))?;

    let refined_poses: Vec<Pose> = (0..n_views)
        .map(|view| {
            let base = INTRINSIC_PARAMS + POSE_PARAMS * view;
            Pose {
                rotation: Rotation3::new(Vector3::new(
                    full[base],
                    full[base + 1],
                    full[base + 2],
                )),
                translation: Vector3::new(full[base + 3], full[base + 4], full[base + 5]),
            }
        })
        .collect();

    let stats = compute_projection_error(&refined, &refined_poses, correspondences)?;

    Ok((refined, refined_poses, stats.rmse))
}

/// The standard two-pass refinement: a coarse constrained pass followed by
/// a full pass, both seeded from the intrinsic estimate in hand.
pub fn calibrate(
    correspondences: &Correspondences,
    initial: &RadTanModel,
) -> Result<(RadTanModel, Vec<Pose>, f64), CalibrationError> {
    let (coarse_model, _, coarse_rms) = refine(correspondences, initial, &RefineOptions::coarse())?;
    info!("coarse refinement pass: rms {:.4} px", coarse_rms);

    let (model, poses, rms) = refine(correspondences, &coarse_model, &RefineOptions::full())?;
    info!("full refinement pass: rms {:.4} px", rms);

    Ok((model, poses, rms))
}
