//! Step-Slide Move
//!
//! Moves a box along its velocity for one tick, sliding along everything it
//! touches. Up to four sweeps per tick; velocity is clipped against every
//! plane hit so far, and two planes that cannot both be satisfied are handled
//! by moving along their crease. The grounded variant also tries the move
//! from `step_height` higher and keeps whichever went further.

use crate::core::vec3::Vec3;
use crate::world::{Capsule, CollisionQuery};
use super::contact::{classify, Contact, ContactKind};
use super::tuning::MotionTuning;

/// Sweeps per move.
pub const MAX_BUMPS: usize = 4;

/// Velocity components smaller than this are zeroed after a clip (m/s).
pub const STOP_EPSILON: f32 = 1e-3;

/// Result of a move.
#[derive(Debug, Clone, PartialEq)]
pub struct MoveOutcome {
    /// Final position
    pub position: Vec3,
    /// Final velocity
    pub velocity: Vec3,
    /// Surfaces touched, in order
    pub contacts: Vec<Contact>,
}

/// Clip `velocity` against a plane, removing `overbounce` times its
/// into-plane component.
pub fn clip_velocity(velocity: Vec3, normal: Vec3, overbounce: f32) -> Vec3 {
    let backoff = velocity.dot(normal) * overbounce;
    let mut out = velocity - normal.scale(backoff);
    for c in [&mut out.x, &mut out.y, &mut out.z] {
        if *c > -STOP_EPSILON && *c < STOP_EPSILON {
            *c = 0.0;
        }
    }
    out
}

/// Plain slide move.
pub fn slide_move<C: CollisionQuery + ?Sized>(
    world: &C,
    start: Vec3,
    velocity: Vec3,
    dt: f32,
    shape: &Capsule,
    tuning: &MotionTuning,
) -> MoveOutcome {
    let primal = velocity;
    let mut position = start;
    let mut velocity = velocity;
    let mut contacts = Vec::new();
    let mut planes = [Vec3::ZERO; MAX_BUMPS];
    let mut num_planes = 0usize;
    let mut time_left = dt;

    for _ in 0..MAX_BUMPS {
        let end = position + velocity.scale(time_left);
        let Some(hit) = world.sweep(position, end, shape) else {
            position = end;
            break;
        };

        if hit.fraction > 0.0 {
            position = hit.position;
            num_planes = 0;
        }

        contacts.push(Contact { normal: hit.normal, kind: classify(hit.normal, tuning) });
        time_left -= time_left * hit.fraction;

        if num_planes >= MAX_BUMPS {
            velocity = Vec3::ZERO;
            break;
        }
        planes[num_planes] = hit.normal;
        num_planes += 1;

        // find a clip that leaves velocity moving away from every plane
        let mut clipped = None;
        for i in 0..num_planes {
            let candidate = clip_velocity(velocity, planes[i], tuning.overbounce);
            let ok = (0..num_planes).all(|j| j == i || candidate.dot(planes[j]) >= 0.0);
            if ok {
                clipped = Some(candidate);
                break;
            }
        }

        match clipped {
            Some(v) => velocity = v,
            None if num_planes == 2 => {
                let dir = planes[0].cross(planes[1]).normalize_or_zero();
                velocity = dir.scale(dir.dot(velocity));
            }
            None => {
                velocity = Vec3::ZERO;
                break;
            }
        }

        // turned back on ourselves: stop dead rather than jitter in a corner
        if velocity.dot(primal) <= 0.0 {
            velocity = Vec3::ZERO;
            break;
        }
    }

    MoveOutcome { position, velocity, contacts }
}

/// Grounded move: plain slide, then the same slide from `step_height` up
/// pushed back down. The raised result is kept only if it lands on walkable
/// ground and covers more horizontal distance.
pub fn step_slide_move<C: CollisionQuery + ?Sized>(
    world: &C,
    start: Vec3,
    velocity: Vec3,
    dt: f32,
    shape: &Capsule,
    tuning: &MotionTuning,
) -> MoveOutcome {
    let down = slide_move(world, start, velocity, dt, shape, tuning);
    if down.contacts.is_empty() || tuning.step_height <= 0.0 {
        return down;
    }

    let raised_target = start + Vec3::UP.scale(tuning.step_height);
    let raised = match world.sweep(start, raised_target, shape) {
        Some(hit) => hit.position,
        None => raised_target,
    };
    let lift = raised.z - start.z;
    if lift <= STOP_EPSILON {
        return down;
    }

    let mut up = slide_move(world, raised, velocity, dt, shape, tuning);
    let Some(landing) = world.sweep(up.position, up.position - Vec3::UP.scale(lift), shape) else {
        return down;
    };
    if classify(landing.normal, tuning) != ContactKind::Ground {
        return down;
    }

    let down_dist = (down.position - start).horizontal().length_squared();
    let up_dist = (landing.position - start).horizontal().length_squared();
    if down_dist >= up_dist {
        return down;
    }

    up.position = landing.position;
    up.velocity.z = down.velocity.z;
    up.contacts.push(Contact { normal: landing.normal, kind: ContactKind::Ground });
    up
}

// =============================================================================
// TESTS
// =============================================================================
