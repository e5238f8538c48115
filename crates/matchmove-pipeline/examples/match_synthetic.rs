//! End-to-end camera match on synthetic data.
//!
//! This example shows:
//! - Attaching a camera and a reference image
//! - Adding 3D↔2D correspondences
//! - Locking parameters and setting bounds
//! - Running the bounded solve
//! - Saving and restoring the session as JSON
//!
//! Run with: cargo run --example match_synthetic

use matchmove_core::{projection, CameraParams, ParamKind, Pt3, Vec3};
use matchmove_pipeline::{CameraMatcher, Session, SolveSettings};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const IMG_W: u32 = 1920;
const IMG_H: u32 = 1080;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    // Ground truth camera the observations are synthesized through.
    let truth = CameraParams {
        translation: Vec3::new(0.6, -0.4, 14.0),
        rotation: Vec3::new(5.0, -12.0, 1.0),
        focal_length: 50.0,
        ..CameraParams::default()
    };

    let points = [
        Pt3::new(0.0, 0.0, 0.0),
        Pt3::new(2.5, 0.0, 0.0),
        Pt3::new(0.0, 2.5, 0.0),
        Pt3::new(-2.0, -1.0, 1.5),
        Pt3::new(1.5, -2.0, -1.0),
        Pt3::new(-1.0, 1.5, 2.0),
        Pt3::new(3.0, 1.0, -2.0),
    ];

    let mut matcher = CameraMatcher::new();
    matcher.set_image(Some("plates/ref_0040.jpg".into()), IMG_W, IMG_H)?;

    // Start from a perturbed guess; the solve should pull it back.
    let mut rng = StdRng::seed_from_u64(42);
    let mut start = truth;
    start.translation += Vec3::new(
        rng.gen_range(-0.5..0.5),
        rng.gen_range(-0.5..0.5),
        rng.gen_range(-0.5..0.5),
    );
    start.rotation += Vec3::new(
        rng.gen_range(-3.0..3.0),
        rng.gen_range(-3.0..3.0),
        rng.gen_range(-3.0..3.0),
    );
    start.focal_length += rng.gen_range(-5.0..5.0);
    matcher.attach_camera("shot_cam", start);

    for world in points {
        let pixel = projection::project(&world, &truth, IMG_W as f64, IMG_H as f64)?;
        let id = matcher.add_pair(pixel);
        matcher.set_world_position(id, world)?;
    }
    println!("Added {} correspondences", matcher.pairs().len());
    println!(
        "Initial rms error: {:.3} px",
        matcher.rms_error().unwrap_or(f64::INFINITY)
    );

    // Keep the focal length inside a plausible lens range and leave the
    // film offset out of the solve.
    matcher.set_bounds(ParamKind::FocalLength, Some(18.0), Some(135.0))?;
    matcher.lock(ParamKind::FilmOffsetX, true);
    matcher.lock(ParamKind::FilmOffsetY, true);

    let settings = SolveSettings::with_method_name("dogbox")?;
    let result = matcher.solve(&settings)?;
    println!(
        "Solve finished: {} after {} iterations, rms {:.5} px",
        result.termination, result.iterations, result.rms_error
    );

    let solved = matcher.params().expect("camera attached");
    println!(
        "Recovered translation ({:.4}, {:.4}, {:.4}) vs truth ({:.4}, {:.4}, {:.4})",
        solved.translation.x,
        solved.translation.y,
        solved.translation.z,
        truth.translation.x,
        truth.translation.y,
        truth.translation.z
    );
    println!(
        "Recovered focal {:.4} mm vs truth {:.4} mm",
        solved.focal_length, truth.focal_length
    );

    // Round-trip the matcher state through the session document.
    let json = Session::from_matcher(&matcher).to_json_string()?;
    println!("Session JSON is {} bytes", json.len());
    let restored = Session::from_json_str(&json)?.apply()?;
    println!(
        "Restored {} pairs, rms {:.5} px",
        restored.pairs().len(),
        restored.rms_error().unwrap_or(f64::INFINITY)
    );

    Ok(())
}
