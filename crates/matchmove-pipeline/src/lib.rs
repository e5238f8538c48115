//! Matcher facade and session exchange for `matchmove-rs`.
//!
//! [`CameraMatcher`] owns the reference-image description, the camera
//! parameter snapshot with its constraints, and the correspondence set for
//! one camera/image pairing, and drives the optimization engine over them.
//! [`Session`] is the JSON exchange document that persists and restores the
//! full matcher state.
//!
//! The matcher is a single-owner, single-threaded object: one solve runs to
//! completion (or cancellation) before the next starts, and callers using it
//! from multiple threads must serialize access themselves.

pub mod matcher;
pub mod session;

pub use matcher::{
    AttachedCamera, CameraMatcher, ImageSpec, MatchError, OptimizationResult, SolveSettings,
};
pub use session::{Session, SessionError};
