//! Grapple Rope
//!
//! Attach by ray along the view, shorten for a short window, keep the body
//! inside the rope sphere. The rope only pulls; it never pushes.

use crate::world::CollisionQuery;
use super::state::{ActorMotionState, GrappleState};
use super::tuning::MotionTuning;

/// Slack allowed before the rope counts as taut (m).
pub const TAUT_SLACK: f32 = 1e-3;

/// Toggle the grapple: detach if attached, otherwise try to attach.
///
/// Returns true if the grapple is attached afterwards.
pub fn toggle<C: CollisionQuery + ?Sized>(
    state: &mut ActorMotionState,
    tuning: &MotionTuning,
    world: &C,
) -> bool {
    if state.grapple.take().is_some() {
        return false;
    }

    let eye = state.eye_position(tuning);
    let target = eye + state.look().scale(tuning.grapple_max_range);
    let Some(hit) = world.ray(eye, target) else {
        return false;
    };

    let distance = hit.position.distance(state.position);
    state.grapple = Some(GrappleState {
        anchor: hit.position,
        rope_length: distance.max(tuning.grapple_min_length),
        auto_shorten_remaining: tuning.grapple_auto_shorten_time,
    });
    true
}

/// Rope forces for one tick: shorten during the window, remove outward
/// radial velocity and reel in when taut.
pub fn apply_rope(state: &mut ActorMotionState, tuning: &MotionTuning, dt: f32) {
    let Some(mut rope) = state.grapple else {
        return;
    };

    if rope.auto_shorten_remaining > 0.0 {
        rope.rope_length = (rope.rope_length - tuning.grapple_shorten_rate * dt)
            .max(tuning.grapple_min_length);
        rope.auto_shorten_remaining = (rope.auto_shorten_remaining - dt).max(0.0);
    }
    state.grapple = Some(rope);

    let to_anchor = rope.anchor - state.position;
    let distance = to_anchor.length();
    if distance + TAUT_SLACK < rope.rope_length || distance <= f32::EPSILON {
        return;
    }

    let dir = to_anchor.scale(1.0 / distance);
    let radial = state.velocity.dot(dir);
    if radial < 0.0 {
        state.velocity -= dir.scale(radial);
    }

    let radial = state.velocity.dot(dir);
    if radial < tuning.grapple_pull_speed {
        let pull = (tuning.grapple_pull_accel * dt).min(tuning.grapple_pull_speed - radial);
        state.velocity += dir.scale(pull);
    }
}

/// Pull the body back onto the rope sphere after the move.
///
/// The correction is swept so it never passes through geometry. If geometry
/// blocks it the rope is released.
pub fn constrain<C: CollisionQuery + ?Sized>(
    state: &mut ActorMotionState,
    tuning: &MotionTuning,
    world: &C,
) {
    let Some(rope) = state.grapple else {
        return;
    };

    let offset = state.position - rope.anchor;
    let distance = offset.length();
    if distance <= rope.rope_length || distance <= f32::EPSILON {
        return;
    }

    let target = rope.anchor + offset.scale(rope.rope_length / distance);
    if world.sweep(state.position, target, &state.capsule(tuning)).is_some() {
        state.grapple = None;
        return;
    }
    state.position = target;

    let outward = offset.scale(1.0 / distance);
    let radial = state.velocity.dot(outward);
    if radial > 0.0 {
        state.velocity -= outward.scale(radial);
    }
}

/// Distance from the body to the anchor, if attached.
pub fn rope_distance(state: &ActorMotionState) -> Option<f32> {
    state.grapple.map(|g| g.anchor.distance(state.position))
}

// =============================================================================
// TESTS
// =============================================================================
