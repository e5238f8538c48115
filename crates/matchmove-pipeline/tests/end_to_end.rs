//! Full workflow through the public API: build a matcher, solve, persist the
//! session, restore it and check the solved state survived.

use approx::assert_relative_eq;
use matchmove_core::{projection, CameraParams, ParamKind, Pt3, Vec3};
use matchmove_pipeline::{CameraMatcher, Session, SolveSettings};

const IMG_W: u32 = 1920;
const IMG_H: u32 = 1080;

fn truth() -> CameraParams {
    CameraParams {
        translation: Vec3::new(0.3, -0.6, 12.0),
        rotation: Vec3::new(4.0, -8.0, 1.0),
        focal_length: 40.0,
        ..CameraParams::default()
    }
}

fn matcher_with_synthetic_pairs(start: CameraParams) -> CameraMatcher {
    let truth = truth();
    let mut m = CameraMatcher::new();
    m.set_image(Some("ref.jpg".into()), IMG_W, IMG_H).unwrap();
    m.attach_camera("shot_cam", start);
    for world in [
        Pt3::new(0.0, 0.0, 0.0),
        Pt3::new(2.0, 0.0, 0.0),
        Pt3::new(0.0, 2.0, 0.0),
        Pt3::new(-2.0, -1.0, 1.0),
        Pt3::new(1.0, -2.0, -1.0),
        Pt3::new(-1.5, 1.5, 2.0),
        Pt3::new(3.0, 1.0, -2.0),
    ] {
        let px = projection::project(&world, &truth, IMG_W as f64, IMG_H as f64).unwrap();
        let id = m.add_pair(px);
        m.set_world_position(id, world).unwrap();
    }
    m
}

#[test]
fn solve_then_session_round_trip_keeps_solved_camera() {
    let mut start = truth();
    start.translation.x += 0.4;
    start.rotation.y -= 2.0;
    start.focal_length += 3.0;

    let mut matcher = matcher_with_synthetic_pairs(start);
    matcher
        .set_bounds(ParamKind::FocalLength, Some(18.0), Some(135.0))
        .unwrap();

    let result = matcher
        .solve(&SolveSettings::with_method_name("dogbox").unwrap())
        .unwrap();
    assert!(result.converged, "termination {:?}", result.termination);
    assert!(result.rms_error < 1e-4, "rms {}", result.rms_error);

    let json = Session::from_matcher(&matcher).to_json_string().unwrap();
    let restored = Session::from_json_str(&json).unwrap().apply().unwrap();

    let solved = matcher.params().unwrap();
    let back = restored.params().unwrap();
    for kind in ParamKind::ALL {
        assert_relative_eq!(back.value(kind), solved.value(kind), epsilon = 1e-9);
    }

    // The restored matcher measures the same error without re-solving.
    let rms = restored.rms_error().unwrap();
    assert_relative_eq!(rms, matcher.rms_error().unwrap(), epsilon = 1e-9);
}

#[test]
fn restored_session_can_continue_solving() {
    let mut start = truth();
    start.translation.y -= 0.5;

    let matcher = matcher_with_synthetic_pairs(start);
    let json = Session::from_matcher(&matcher).to_json_string().unwrap();
    let mut restored = Session::from_json_str(&json).unwrap().apply().unwrap();

    let result = restored.solve(&SolveSettings::default()).unwrap();
    assert!(result.converged, "termination {:?}", result.termination);
    assert!(result.rms_error < 1e-4, "rms {}", result.rms_error);
}
