//! Core deterministic primitives.
//!
//! Shared by the movement solver on both client and server. Nothing in here
//! reads the clock or any global state.

pub mod vec3;
pub mod hash;

// Re-export core types
pub use vec3::Vec3;
pub use hash::{StateHash, StateHasher};
