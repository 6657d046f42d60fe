//! Kinematic Solver
//!
//! One pure step function shared by the client predictor and the server.
//!
//! ## Determinism
//!
//! `step` only reads its arguments. Given the same state, tuning, intent,
//! `dt` and unchanged geometry it produces a bit-identical result on the same
//! build: no clock, no randomness, no hash-ordered iteration and every float
//! expression evaluated in a fixed order.
//!
//! ## Tick order
//!
//! 1. Look, timers, contact ageing, jump buffering, crouch, wall probe,
//!    grapple toggle, then one phase transition.
//! 2. Jump requests resolve in priority order: vault, wall-jump, jump.
//! 3. Grounded: friction then Quake-style accelerate. Airborne: surf,
//!    counter-strafe or air-accelerate, then gravity.
//! 4. Rope forces, step-slide-move, ground categorisation and snap, rope
//!    length correction.

#[cfg(feature = "debug-tracing")]
use tracing::trace;
use tracing::warn;

use crate::core::vec3::Vec3;
use crate::world::CollisionQuery;
use super::contact::{self, ContactKind};
use super::grapple;
use super::input::{clamp_pitch, wrap_yaw, MoveIntent};
use super::slide::{slide_move, step_slide_move};
use super::state::{ActorMotionState, MotionPhase, SurfaceContact};
use super::tuning::MotionTuning;

/// Air-control steering gain (CPM).
const AIR_CONTROL_GAIN: f32 = 32.0;

/// Horizontal speed treated as standing still (m/s).
const REST_SPEED: f32 = 1e-3;

/// Minimum facing (cosine) towards a wall for a vault.
const VAULT_FACING_COS: f32 = 0.5;

/// Advance one actor by one tick.
pub fn step<C: CollisionQuery + ?Sized>(
    state: &ActorMotionState,
    tuning: &MotionTuning,
    intent: &MoveIntent,
    world: &C,
    dt: f32,
) -> ActorMotionState {
    let mut s = state.clone();
    if !(dt > 0.0 && dt.is_finite()) {
        return s;
    }

    // 1. look, timers, contacts, phase
    s.yaw = wrap_yaw(s.yaw + intent.yaw_delta);
    s.pitch = clamp_pitch(s.pitch + intent.pitch_delta);
    s.wall_jump_lock = (s.wall_jump_lock - dt).max(0.0);
    s.vault_cooldown = (s.vault_cooldown - dt).max(0.0);
    s.jump_buffer = (s.jump_buffer - dt).max(0.0);
    age_contacts(&mut s, tuning, dt);

    if intent.jump_pressed {
        s.jump_buffer = tuning.jump_buffer_time.max(dt);
    }
    let jump_requested = s.jump_buffer > 0.0 || (tuning.auto_hop && intent.jump_held && s.grounded);

    update_crouch(&mut s, intent, tuning, world);

    if let Some(normal) = contact::probe_wall(world, &s, tuning) {
        s.wall_contact = Some(SurfaceContact::fresh(normal));
    }
    if intent.grapple_pressed {
        grapple::toggle(&mut s, tuning, world);
    }
    s.phase = s.next_phase(dt);

    // 2. jumps
    let mut jumped = false;
    if jump_requested {
        jumped = try_vault(&mut s, tuning, world) || try_wall_jump(&mut s, tuning) || try_ground_jump(&mut s, tuning);
        if jumped {
            s.jump_buffer = 0.0;
        }
    }

    // 3. acceleration
    let wish = intent.wish_dir(s.yaw);
    if s.grounded {
        ground_move(&mut s, tuning, wish, dt);
    } else {
        air_move(&mut s, tuning, intent, wish, dt, jumped);
    }

    // 4. rope, move, ground
    grapple::apply_rope(&mut s, tuning, dt);

    let was_grounded = s.grounded;
    let shape = s.capsule(tuning);
    let outcome = if was_grounded {
        step_slide_move(world, s.position, s.velocity, dt, &shape, tuning)
    } else {
        slide_move(world, s.position, s.velocity, dt, &shape, tuning)
    };
    s.position = outcome.position;
    s.velocity = outcome.velocity;
    for touched in &outcome.contacts {
        match touched.kind {
            ContactKind::Surf => s.surf_contact = Some(SurfaceContact::fresh(touched.normal)),
            ContactKind::Wall => s.wall_contact = Some(SurfaceContact::fresh(touched.normal)),
            ContactKind::Ground | ContactKind::Ceiling => {}
        }
    }

    categorize_ground(&mut s, tuning, world, was_grounded, jumped);
    grapple::constrain(&mut s, tuning, world);
    sanitize(&mut s);

    #[cfg(feature = "debug-tracing")]
    trace!(
        phase = ?s.phase,
        grounded = s.grounded,
        pos = ?s.position,
        vel = ?s.velocity,
        "solver step"
    );

    s
}

/// Run a sequence of intents from an initial state.
pub fn replay<C: CollisionQuery + ?Sized>(
    initial: &ActorMotionState,
    tuning: &MotionTuning,
    intents: &[MoveIntent],
    world: &C,
    dt: f32,
) -> ActorMotionState {
    intents
        .iter()
        .fold(initial.clone(), |state, intent| step(&state, tuning, intent, world, dt))
}

// =============================================================================
// TIMERS & POSTURE
// =============================================================================

fn age_contacts(s: &mut ActorMotionState, tuning: &MotionTuning, dt: f32) {
    if let Some(mut wall) = s.wall_contact {
        wall.age += dt;
        s.wall_contact = (wall.age <= tuning.wall_contact_grace).then_some(wall);
    }
    if let Some(mut surf) = s.surf_contact {
        surf.age += dt;
        s.surf_contact = (surf.age <= dt).then_some(surf);
    }
}

fn update_crouch<C: CollisionQuery + ?Sized>(
    s: &mut ActorMotionState,
    intent: &MoveIntent,
    tuning: &MotionTuning,
    world: &C,
) {
    if intent.slide_held {
        if !s.crouched {
            s.crouched = true;
            s.height = tuning.crouch_height;
            let speed = s.velocity.horizontal_length();
            if s.grounded && speed >= tuning.slide_min_speed {
                s.sliding = true;
                let dir = s.velocity.horizontal().scale(1.0 / speed);
                s.velocity += dir.scale(tuning.slide_boost);
            }
        }
    } else if s.crouched {
        let rise = tuning.stand_height - tuning.crouch_height;
        let up = s.position + Vec3::UP.scale(rise);
        if rise <= 0.0 || world.sweep(s.position, up, &s.capsule(tuning)).is_none() {
            s.crouched = false;
            s.sliding = false;
            s.height = tuning.stand_height;
        }
    }

    if s.sliding && s.velocity.horizontal_length() < tuning.crouch_speed {
        s.sliding = false;
    }
}

// =============================================================================
// JUMPS
// =============================================================================

fn try_vault<C: CollisionQuery + ?Sized>(
    s: &mut ActorMotionState,
    tuning: &MotionTuning,
    world: &C,
) -> bool {
    if s.vault_cooldown > 0.0 {
        return false;
    }
    let Some(wall) = s.wall_contact.filter(|c| c.age == 0.0) else {
        return false;
    };
    let into = (-wall.normal).horizontal().normalize_or_zero();
    if s.forward().dot(into) < VAULT_FACING_COS {
        return false;
    }
    let Some(height) = contact::probe_ledge(world, s, tuning, wall.normal) else {
        return false;
    };

    let tangent = s.velocity.horizontal().reject(into);
    let rise = (2.0 * tuning.gravity * (height + tuning.vault_clearance)).sqrt();
    s.velocity = tangent + into.scale(tuning.vault_forward_speed) + Vec3::UP.scale(rise);
    s.vault_cooldown = tuning.vault_cooldown;
    s.grounded = false;
    s.ground_normal = Vec3::UP;
    s.sliding = false;
    s.phase = MotionPhase::Vaulting;
    true
}

fn try_wall_jump(s: &mut ActorMotionState, tuning: &MotionTuning) -> bool {
    if s.grounded || s.wall_jump_lock > 0.0 {
        return false;
    }
    let Some(wall) = s.wall_contact.filter(|c| c.age <= tuning.wall_contact_grace) else {
        return false;
    };
    let away = wall.normal.horizontal().normalize_or_zero();
    if away == Vec3::ZERO {
        return false;
    }

    let mut horizontal = s.velocity.horizontal();
    let into = horizontal.dot(away);
    if into < 0.0 {
        horizontal -= away.scale(into);
    }
    s.velocity = horizontal + away.scale(tuning.wall_jump_push_speed);
    s.velocity.z = tuning.wall_jump_up_speed;
    s.wall_jump_lock = tuning.wall_jump_cooldown;
    s.wall_contact = None;
    s.phase = MotionPhase::Airborne;
    true
}

fn try_ground_jump(s: &mut ActorMotionState, tuning: &MotionTuning) -> bool {
    if !s.grounded {
        return false;
    }
    s.velocity.z = tuning.jump_speed();
    s.grounded = false;
    s.ground_normal = Vec3::UP;
    s.sliding = false;
    s.phase = MotionPhase::Airborne;
    true
}

// =============================================================================
// ACCELERATION
// =============================================================================

fn ground_move(s: &mut ActorMotionState, tuning: &MotionTuning, wish: Vec3, dt: f32) {
    let t90 = if s.sliding { tuning.slide_stop_t90 } else { tuning.ground_stop_t90 };
    let decay = (-tuning.friction_rate(t90) * dt).exp();
    let max_speed = if s.crouched { tuning.crouch_speed } else { tuning.max_ground_speed };

    let mut horizontal = s.velocity.horizontal();
    if s.sliding || wish == Vec3::ZERO {
        horizontal = horizontal.scale(decay);
    } else {
        // friction acts on whatever the wish is not driving
        let along = horizontal.dot(wish);
        let lateral = horizontal - wish.scale(along);
        let along = if along > max_speed {
            max_speed + (along - max_speed) * decay
        } else if along < 0.0 {
            along * decay
        } else {
            along
        };
        horizontal = wish.scale(along) + lateral.scale(decay);

        let add = max_speed - along;
        if add > 0.0 {
            let accel = (tuning.ground_accel() * dt * max_speed).min(add);
            horizontal += wish.scale(accel);
        }
    }

    if horizontal.length_squared() < REST_SPEED * REST_SPEED {
        horizontal = Vec3::ZERO;
    }
    s.velocity = horizontal.reject(s.ground_normal);
}

fn air_move(
    s: &mut ActorMotionState,
    tuning: &MotionTuning,
    intent: &MoveIntent,
    wish: Vec3,
    dt: f32,
    jumped: bool,
) {
    let mut gravity = tuning.gravity;

    match s.phase {
        MotionPhase::Surfing => {
            if let Some(surf) = s.surf_contact {
                surf_redirect(s, tuning, surf.normal, dt);
            }
            air_accelerate(s, tuning, wish, dt);
            if s.velocity.z > 0.0 {
                gravity *= tuning.surf_gravity_scale;
            }
        }
        _ => {
            if is_counter_strafing(s, tuning, wish) {
                let horizontal = s.velocity.horizontal();
                let speed = horizontal.length();
                let braked = (speed - tuning.counter_strafe_decel * dt).max(0.0);
                let scaled = horizontal.scale(braked / speed);
                s.velocity = scaled.with_z(s.velocity.z);
            } else {
                air_accelerate(s, tuning, wish, dt);
                if intent.forward != 0.0 && intent.right == 0.0 {
                    air_control(s, tuning, wish, dt);
                }
            }

            if s.phase == MotionPhase::Vaulting {
                let forward = s.forward();
                let along = s.velocity.dot(forward);
                if along < tuning.vault_forward_speed {
                    s.velocity += forward.scale(tuning.vault_forward_speed - along);
                }
            }
        }
    }

    let wallrun = s.phase == MotionPhase::WallContact
        && intent.forward > 0.0
        && s.velocity.horizontal_length() >= tuning.wallrun_min_speed;
    if wallrun {
        gravity *= tuning.wallrun_gravity_scale;
    }

    if !jumped {
        s.velocity.z -= gravity * dt;
    }
    if wallrun && s.velocity.z < -tuning.wallrun_max_fall_speed {
        s.velocity.z = -tuning.wallrun_max_fall_speed;
    }
}

fn is_counter_strafing(s: &ActorMotionState, tuning: &MotionTuning, wish: Vec3) -> bool {
    if wish == Vec3::ZERO {
        return false;
    }
    let horizontal = s.velocity.horizontal();
    let speed = horizontal.length();
    if speed <= REST_SPEED {
        return false;
    }
    horizontal.scale(1.0 / speed).dot(wish) < tuning.counter_strafe_cos()
}

fn air_accelerate(s: &mut ActorMotionState, tuning: &MotionTuning, wish: Vec3, dt: f32) {
    if wish == Vec3::ZERO {
        return;
    }
    let wish_speed = tuning.air_max_wish_speed;
    let current = s.velocity.dot(wish);
    let add = wish_speed - current;
    if add <= 0.0 {
        return;
    }
    let accel = (tuning.air_accel * wish_speed * dt).min(add);
    s.velocity += wish.scale(accel);
}

fn air_control(s: &mut ActorMotionState, tuning: &MotionTuning, wish: Vec3, dt: f32) {
    if tuning.air_control <= 0.0 {
        return;
    }
    let horizontal = s.velocity.horizontal();
    let speed = horizontal.length();
    if speed <= REST_SPEED {
        return;
    }
    let dir = horizontal.scale(1.0 / speed);
    let dot = dir.dot(wish);
    if dot <= 0.0 {
        return;
    }
    let k = AIR_CONTROL_GAIN * tuning.air_control * dot * dot * dt;
    let steered = (dir.scale(speed) + wish.scale(k)).normalize_or_zero();
    s.velocity = steered.scale(speed).with_z(s.velocity.z);
}

/// Bend velocity onto the ramp plane, keeping speed.
fn surf_redirect(s: &mut ActorMotionState, tuning: &MotionTuning, normal: Vec3, dt: f32) {
    let speed = s.velocity.length();
    let along = s.velocity.reject(normal);
    let along_speed = along.length();
    if speed <= REST_SPEED || along_speed <= REST_SPEED {
        return;
    }
    let target = along.scale(speed / along_speed);
    let blend = 1.0 - (-tuning.surf_redirect_rate * dt).exp();
    s.velocity = s.velocity.lerp(target, blend);
}

// =============================================================================
// GROUND
// =============================================================================

fn categorize_ground<C: CollisionQuery + ?Sized>(
    s: &mut ActorMotionState,
    tuning: &MotionTuning,
    world: &C,
    was_grounded: bool,
    jumped: bool,
) {
    let leaving = jumped || s.velocity.dot(s.ground_normal) > tuning.ground_leave_speed;
    if leaving {
        s.grounded = false;
        s.ground_normal = Vec3::UP;
        return;
    }

    let distance = if was_grounded { tuning.ground_snap_distance } else { tuning.ground_probe_epsilon };
    let Some(hit) = contact::probe_ground(world, s, tuning, distance) else {
        s.grounded = false;
        s.ground_normal = Vec3::UP;
        return;
    };

    match contact::classify(hit.normal, tuning) {
        ContactKind::Ground if s.velocity.dot(hit.normal) <= tuning.ground_leave_speed => {
            s.grounded = true;
            s.ground_normal = hit.normal;
            if s.velocity.z <= 0.0 {
                s.position = hit.position;
                s.velocity.z = 0.0;
            }
        }
        ContactKind::Surf => {
            s.grounded = false;
            s.ground_normal = Vec3::UP;
            s.surf_contact = Some(SurfaceContact::fresh(hit.normal));
        }
        _ => {
            s.grounded = false;
            s.ground_normal = Vec3::UP;
        }
    }
}

/// Never hand a non-finite state to the next tick.
fn sanitize(s: &mut ActorMotionState) {
    if !s.position.is_finite() || !s.velocity.is_finite() || !s.yaw.is_finite() || !s.pitch.is_finite() {
        warn!(pos = ?s.position, vel = ?s.velocity, "non-finite motion state, zeroing");
        let fix = |v: f32| if v.is_finite() { v } else { 0.0 };
        s.position = Vec3::new(fix(s.position.x), fix(s.position.y), fix(s.position.z));
        s.velocity = Vec3::new(fix(s.velocity.x), fix(s.velocity.y), fix(s.velocity.z));
        s.yaw = fix(s.yaw);
        s.pitch = fix(s.pitch);
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movement::grapple::rope_distance;
    use crate::movement::state::GrappleState;
    use crate::world::{Brush, BrushWorld, EmptyWorld};
    use proptest::prelude::*;

    const DT: f32 = 1.0 / 60.0;

    fn grounded_actor(tuning: &MotionTuning, x: f32) -> ActorMotionState {
        let mut s = ActorMotionState::spawn(Vec3::new(x, 0.0, 0.001), 0.0, tuning);
        s.grounded = true;
        s.phase = MotionPhase::Grounded;
        s
    }

    fn ledge_world(height: f32) -> BrushWorld {
        BrushWorld::flat_floor().with(Brush::cuboid(
            Vec3::new(12.0, -2.0, 0.0),
            Vec3::new(14.0, 2.0, height),
        ))
    }

    #[test]
    fn test_acceleration_reaches_ninety_percent_at_t90() {
        let tuning = MotionTuning::default();
        let world = BrushWorld::flat_floor();
        let mut s = grounded_actor(&tuning, 0.0);
        let ticks = (tuning.run_t90 / DT).round() as usize;
        for _ in 0..ticks {
            s = step(&s, &tuning, &MoveIntent::forward(), &world, DT);
        }
        let speed = s.velocity.horizontal_length();
        assert!(s.grounded);
        assert!((speed - 6.3).abs() <= 6.3 * 0.05, "speed {speed}");
    }

    #[test]
    fn test_ground_speed_caps_at_max() {
        let tuning = MotionTuning::default();
        let world = BrushWorld::flat_floor();
        let mut s = grounded_actor(&tuning, -20.0);
        for _ in 0..120 {
            s = step(&s, &tuning, &MoveIntent::forward(), &world, DT);
        }
        assert!((s.velocity.horizontal_length() - tuning.max_ground_speed).abs() < 1e-3);
    }

    #[test]
    fn test_friction_stops_actor() {
        let tuning = MotionTuning::default();
        let world = BrushWorld::flat_floor();
        let mut s = grounded_actor(&tuning, 0.0);
        s.velocity = Vec3::new(7.0, 0.0, 0.0);
        let ticks = (tuning.ground_stop_t90 / DT).ceil() as usize;
        for _ in 0..ticks {
            s = step(&s, &tuning, &MoveIntent::NEUTRAL, &world, DT);
        }
        assert!(s.velocity.horizontal_length() < 0.7 * 1.05);
    }

    #[test]
    fn test_jump_sets_exact_take_off_speed() {
        let tuning = MotionTuning::default();
        let world = BrushWorld::flat_floor();
        let s = grounded_actor(&tuning, 0.0);
        let intent = MoveIntent { jump_pressed: true, jump_held: true, ..MoveIntent::NEUTRAL };
        let next = step(&s, &tuning, &intent, &world, DT);
        assert_eq!(next.velocity.z, (2.0 * tuning.gravity * tuning.jump_height).sqrt());
        assert!(!next.grounded);
    }

    #[test]
    fn test_hop_skips_ground_friction() {
        let tuning = MotionTuning::default();
        let world = BrushWorld::flat_floor();
        let mut s = grounded_actor(&tuning, 0.0);
        s.velocity = Vec3::new(7.0, 0.0, 0.0);

        let hop = MoveIntent { jump_pressed: true, jump_held: true, ..MoveIntent::NEUTRAL };
        let hopped = step(&s, &tuning, &hop, &world, DT);
        let walked = step(&s, &tuning, &MoveIntent::NEUTRAL, &world, DT);

        assert!((hopped.velocity.horizontal_length() - 7.0).abs() < 1e-4);
        assert!(walked.velocity.horizontal_length() < 7.0 - 0.1);
    }

    #[test]
    fn test_jump_buffer_fires_on_landing() {
        let tuning = MotionTuning::default();
        let world = BrushWorld::flat_floor();
        let mut s = ActorMotionState::spawn(Vec3::new(0.0, 0.0, 0.05), 0.0, &tuning);
        s.velocity.z = -3.0;
        let press = MoveIntent { jump_pressed: true, ..MoveIntent::NEUTRAL };
        s = step(&s, &tuning, &press, &world, DT);
        // pressed mid-air: nothing yet
        assert!(s.velocity.z <= 0.0);

        let mut launched = false;
        for _ in 0..4 {
            s = step(&s, &tuning, &MoveIntent::NEUTRAL, &world, DT);
            if s.velocity.z > 5.0 {
                launched = true;
                break;
            }
        }
        assert!(launched);
    }

    #[test]
    fn test_gravity_applies_in_air() {
        let tuning = MotionTuning::default();
        let s = ActorMotionState::spawn(Vec3::new(0.0, 0.0, 10.0), 0.0, &tuning);
        let next = step(&s, &tuning, &MoveIntent::NEUTRAL, &EmptyWorld, DT);
        assert!((next.velocity.z + tuning.gravity * DT).abs() < 1e-6);
        assert!(!next.grounded);
    }

    #[test]
    fn test_determinism_across_recomputation() {
        let tuning = MotionTuning::default();
        let world = BrushWorld::demo_course();
        let intents: Vec<MoveIntent> = (0..240)
            .map(|i| MoveIntent {
                yaw_delta: if i % 20 < 10 { 0.01 } else { -0.01 },
                forward: 1.0,
                right: if i % 30 < 15 { 1.0 } else { -1.0 },
                jump_pressed: i % 45 == 0,
                jump_held: i % 45 < 5,
                grapple_pressed: i == 100 || i == 160,
                ..MoveIntent::NEUTRAL
            })
            .collect();
        let start = grounded_actor(&tuning, 0.0);

        let once = replay(&start, &tuning, &intents, &world, DT);

        // recompute every intermediate state three times before moving on
        let mut s = start.clone();
        for intent in &intents {
            let a = step(&s, &tuning, intent, &world, DT);
            let b = step(&s, &tuning, intent, &world, DT);
            assert_eq!(a.compute_hash(), b.compute_hash());
            s = step(&s, &tuning, intent, &world, DT);
        }
        assert_eq!(once.compute_hash(), s.compute_hash());
    }

    #[test]
    fn test_low_step_is_walked_never_vaulted() {
        let tuning = MotionTuning::default();
        let world = ledge_world(0.3);
        let mut s = grounded_actor(&tuning, 10.0);
        let intent = MoveIntent { jump_held: false, ..MoveIntent::forward() };
        let mut max_z = 0.0f32;
        for i in 0..60 {
            let tick_intent = MoveIntent { jump_pressed: i == 20, ..intent };
            s = step(&s, &tuning, &tick_intent, &world, DT);
            assert_ne!(s.phase, MotionPhase::Vaulting);
            max_z = max_z.max(s.position.z);
        }
        // walked up onto the step without jumping first
        let mut t = grounded_actor(&tuning, 10.0);
        let mut climbed = false;
        for _ in 0..40 {
            t = step(&t, &tuning, &MoveIntent::forward(), &world, DT);
            if t.grounded && t.position.z > 0.29 && t.position.z < 0.32 {
                climbed = true;
            }
        }
        assert!(climbed);
        assert!(max_z > 0.29);
    }

    #[test]
    fn test_vaultable_ledge_triggers_vault() {
        let tuning = MotionTuning::default();
        let world = ledge_world(1.0);
        let mut s = grounded_actor(&tuning, 12.0 - tuning.capsule_radius - 0.1);
        let jump = MoveIntent { jump_pressed: true, ..MoveIntent::forward() };
        s = step(&s, &tuning, &jump, &world, DT);
        assert_eq!(s.phase, MotionPhase::Vaulting);
        assert!(s.vault_cooldown > 0.0);

        let mut on_ledge = false;
        for _ in 0..45 {
            s = step(&s, &tuning, &MoveIntent::forward(), &world, DT);
            if s.grounded && s.position.z > 0.99 && s.position.x > 12.0 {
                on_ledge = true;
                break;
            }
        }
        assert!(on_ledge, "ended at {:?}", s.position);
    }

    #[test]
    fn test_tall_wall_fails_vault() {
        let tuning = MotionTuning::default();
        let world = ledge_world(2.0);
        let s = grounded_actor(&tuning, 12.0 - tuning.capsule_radius - 0.1);
        let jump = MoveIntent { jump_pressed: true, ..MoveIntent::forward() };
        let next = step(&s, &tuning, &jump, &world, DT);
        assert_ne!(next.phase, MotionPhase::Vaulting);
        assert_eq!(next.velocity.z, tuning.jump_speed());
    }

    #[test]
    fn test_wall_jump_pushes_away_and_locks() {
        let tuning = MotionTuning::default();
        let world = ledge_world(4.0);
        let mut s = ActorMotionState::spawn(Vec3::new(12.0 - tuning.capsule_radius - 0.05, 0.0, 2.0), std::f32::consts::PI, &tuning);
        s.velocity = Vec3::new(0.0, 3.0, -1.0);
        let jump = MoveIntent { jump_pressed: true, ..MoveIntent::NEUTRAL };
        let next = step(&s, &tuning, &jump, &world, DT);
        assert!(next.velocity.x < -4.0);
        assert_eq!(next.velocity.z, tuning.wall_jump_up_speed);
        assert!(next.wall_jump_lock > 0.0);

        // second press inside the lockout does nothing
        let mut again = next.clone();
        again.position.x = s.position.x;
        again.velocity = s.velocity;
        let after = step(&again, &tuning, &jump, &world, DT);
        assert!(after.velocity.z < 0.0);
    }

    #[test]
    fn test_wallrun_caps_fall_speed() {
        let tuning = MotionTuning::default();
        let world = BrushWorld::new().with(Brush::cuboid(
            Vec3::new(1.0, -50.0, -10.0),
            Vec3::new(2.0, 50.0, 10.0),
        ));
        let mut s = ActorMotionState::spawn(Vec3::new(1.0 - tuning.capsule_radius - 0.05, 0.0, 0.0), std::f32::consts::FRAC_PI_2, &tuning);
        s.velocity = Vec3::new(0.0, 8.0, -5.0);
        for _ in 0..10 {
            s = step(&s, &tuning, &MoveIntent::forward(), &world, DT);
        }
        assert_eq!(s.phase, MotionPhase::WallContact);
        assert!(s.velocity.z >= -tuning.wallrun_max_fall_speed - 1e-4);
    }

    #[test]
    fn test_counter_strafe_brakes() {
        let tuning = MotionTuning::default();
        let mut s = ActorMotionState::spawn(Vec3::new(0.0, 0.0, 10.0), 0.0, &tuning);
        s.velocity = Vec3::new(10.0, 0.0, 0.0);
        let back = MoveIntent { forward: -1.0, ..MoveIntent::NEUTRAL };
        let next = step(&s, &tuning, &back, &EmptyWorld, DT);
        let expected = 10.0 - tuning.counter_strafe_decel * DT;
        assert!((next.velocity.x - expected).abs() < 1e-5);
        assert_eq!(next.velocity.y, 0.0);
    }

    #[test]
    fn test_surf_keeps_speed_on_ramp() {
        let tuning = MotionTuning::default();
        let world = BrushWorld::new().with(Brush::ramp(
            Vec3::new(-50.0, 0.0, -20.0),
            Vec3::new(50.0, 10.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        ));
        // ramp normal z ~ 0.447: inside the surf band
        let mut s = ActorMotionState::spawn(Vec3::new(0.0, 3.0, -11.0), 0.0, &tuning);
        s.velocity = Vec3::new(15.0, 0.0, -2.0);
        let mut surfed = false;
        for _ in 0..60 {
            s = step(&s, &tuning, &MoveIntent::NEUTRAL, &world, DT);
            if s.phase == MotionPhase::Surfing {
                surfed = true;
            }
            assert!(!s.grounded);
        }
        assert!(surfed);
        assert!(s.velocity.x > 13.0, "lost speed: {:?}", s.velocity);
    }

    #[test]
    fn test_grapple_tether_holds() {
        let tuning = MotionTuning::default();
        let world = BrushWorld::new().with(Brush::cuboid(
            Vec3::new(-50.0, -50.0, 20.0),
            Vec3::new(50.0, 50.0, 21.0),
        ));
        let mut s = ActorMotionState::spawn(Vec3::new(0.0, 0.0, 5.0), 0.0, &tuning);
        s.pitch = 1.0;
        s.velocity = Vec3::new(12.0, 0.0, -6.0);
        let fire = MoveIntent { grapple_pressed: true, ..MoveIntent::NEUTRAL };
        s = step(&s, &tuning, &fire, &world, DT);
        let attached = s.grapple.expect("attached");
        assert_eq!(s.phase, MotionPhase::GrappleAttached);

        for _ in 0..300 {
            s = step(&s, &tuning, &MoveIntent::NEUTRAL, &world, DT);
            let rope = s.grapple.expect("still attached").rope_length;
            let d = rope_distance(&s).expect("attached");
            assert!(d <= rope + 1e-3, "distance {d} exceeds rope {rope}");
        }
        assert!(s.grapple.unwrap().rope_length <= attached.rope_length);
    }

    #[test]
    fn test_grapple_rope_never_shorter_than_minimum() {
        let tuning = MotionTuning::default();
        let mut s = ActorMotionState::spawn(Vec3::ZERO, 0.0, &tuning);
        s.grapple = Some(GrappleState {
            anchor: Vec3::new(0.0, 0.0, 2.5),
            rope_length: 2.5,
            auto_shorten_remaining: 10.0,
        });
        for _ in 0..120 {
            s = step(&s, &tuning, &MoveIntent::NEUTRAL, &EmptyWorld, DT);
        }
        assert!(s.grapple.expect("attached").rope_length >= tuning.grapple_min_length);
    }

    #[test]
    fn test_crouch_waits_for_headroom() {
        let tuning = MotionTuning::default();
        let world = BrushWorld::flat_floor().with(Brush::cuboid(
            Vec3::new(-5.0, -5.0, 1.3),
            Vec3::new(5.0, 5.0, 2.0),
        ));
        let mut s = grounded_actor(&tuning, 0.0);
        s.crouched = true;
        s.height = tuning.crouch_height;
        let s2 = step(&s, &tuning, &MoveIntent::NEUTRAL, &world, DT);
        assert!(s2.crouched);

        let open = BrushWorld::flat_floor();
        let s3 = step(&s, &tuning, &MoveIntent::NEUTRAL, &open, DT);
        assert!(!s3.crouched);
        assert_eq!(s3.height, tuning.stand_height);
    }

    #[test]
    fn test_zero_dt_is_noop() {
        let tuning = MotionTuning::default();
        let s = grounded_actor(&tuning, 0.0);
        let next = step(&s, &tuning, &MoveIntent::forward(), &EmptyWorld, 0.0);
        assert_eq!(next, s);
    }

    proptest! {
        #[test]
        fn prop_step_never_produces_non_finite(
            vx in -50.0f32..50.0, vy in -50.0f32..50.0, vz in -50.0f32..50.0,
            fwd in -1i8..=1, right in -1i8..=1, jump in any::<bool>(), slide in any::<bool>(),
        ) {
            let tuning = MotionTuning::default();
            let world = BrushWorld::demo_course();
            let mut s = ActorMotionState::spawn(Vec3::new(0.0, 0.0, 1.0), 0.0, &tuning);
            s.velocity = Vec3::new(vx, vy, vz);
            let intent = MoveIntent {
                forward: fwd as f32,
                right: right as f32,
                jump_pressed: jump,
                jump_held: jump,
                slide_held: slide,
                ..MoveIntent::NEUTRAL
            };
            for _ in 0..30 {
                s = step(&s, &tuning, &intent, &world, DT);
                prop_assert!(s.position.is_finite());
                prop_assert!(s.velocity.is_finite());
            }
        }

        #[test]
        fn prop_step_is_deterministic(
            vx in -20.0f32..20.0, vy in -20.0f32..20.0, yaw in -3.0f32..3.0,
        ) {
            let tuning = MotionTuning::default();
            let world = BrushWorld::demo_course();
            let mut s = grounded_actor(&tuning, 0.0);
            s.velocity = Vec3::new(vx, vy, 0.0);
            s.yaw = yaw;
            let a = replay(&s, &tuning, &[MoveIntent::forward(); 20], &world, DT);
            let b = replay(&s, &tuning, &[MoveIntent::forward(); 20], &world, DT);
            prop_assert_eq!(a.compute_hash(), b.compute_hash());
        }
    }
}
