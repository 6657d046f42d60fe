//! Movement
//!
//! Deterministic player movement shared by the client predictor and the
//! authoritative server. Everything here is pure: the same state, tuning,
//! intent and geometry always produce the same next state.

pub mod contact;
pub mod grapple;
pub mod input;
pub mod slide;
pub mod solver;
pub mod state;
pub mod tuning;

pub use contact::{Contact, ContactKind};
pub use input::MoveIntent;
pub use solver::{replay, step};
pub use state::{ActorMotionState, GrappleState, MotionPhase, SurfaceContact};
pub use tuning::{MotionTuning, MotionTuningDelta, TuningError};
