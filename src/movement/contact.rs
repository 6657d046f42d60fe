//! Contact Classification
//!
//! A surface is ground, wall, ceiling or surf ramp purely by the z of its
//! normal. Classification happens here once and the resulting
//! [`ContactKind`] is what the rest of the solver branches on.

use serde::{Serialize, Deserialize};

use crate::core::vec3::Vec3;
use crate::world::{Capsule, CollisionQuery, Hit};
use super::state::ActorMotionState;
use super::tuning::MotionTuning;

/// Normals pointing further down than this are ceilings.
pub const CEILING_NORMAL_Z: f32 = -0.7;

/// Smallest box height used by the raised wall probes.
const MIN_PROBE_HEIGHT: f32 = 0.1;

/// Gap kept above a ledge when checking that the body fits.
const LEDGE_LIFT: f32 = 0.01;

/// What a touched surface is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactKind {
    /// Walkable
    Ground,
    /// Too steep to walk or surf
    Wall,
    /// Facing down
    Ceiling,
    /// Steep ramp inside the surf band
    Surf,
}

/// A surface touched during a move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    /// Surface normal
    pub normal: Vec3,
    /// Classification of the normal
    pub kind: ContactKind,
}

/// Classify a surface normal.
pub fn classify(normal: Vec3, tuning: &MotionTuning) -> ContactKind {
    if normal.z >= tuning.walkable_normal_z() {
        ContactKind::Ground
    } else if normal.z >= tuning.surf_min_normal_z {
        ContactKind::Surf
    } else if normal.z <= CEILING_NORMAL_Z {
        ContactKind::Ceiling
    } else {
        ContactKind::Wall
    }
}

/// Probe the four world-cardinal directions for a wall.
///
/// The probe box is raised by `step_height` so anything low enough to step
/// onto never reads as a wall. Returns the nearest wall normal.
pub fn probe_wall<C: CollisionQuery + ?Sized>(
    world: &C,
    state: &ActorMotionState,
    tuning: &MotionTuning,
) -> Option<Vec3> {
    let from = state.position + Vec3::UP.scale(tuning.step_height);
    let shape = Capsule::new(
        tuning.capsule_radius,
        (state.height - tuning.step_height).max(MIN_PROBE_HEIGHT),
    );
    let reach = tuning.wall_probe_distance;
    let directions = [
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(-1.0, 0.0, 0.0),
        Vec3::new(0.0, 1.0, 0.0),
        Vec3::new(0.0, -1.0, 0.0),
    ];

    let mut best: Option<Hit> = None;
    for dir in directions {
        let Some(hit) = world.sweep(from, from + dir.scale(reach), &shape) else {
            continue;
        };
        if classify(hit.normal, tuning) != ContactKind::Wall {
            continue;
        }
        if best.map_or(true, |b| hit.fraction < b.fraction) {
            best = Some(hit);
        }
    }
    best.map(|hit| hit.normal)
}

/// Sweep the body straight down by `distance`.
pub fn probe_ground<C: CollisionQuery + ?Sized>(
    world: &C,
    state: &ActorMotionState,
    tuning: &MotionTuning,
    distance: f32,
) -> Option<Hit> {
    let from = state.position;
    world.sweep(from, from - Vec3::UP.scale(distance), &state.capsule(tuning))
}

/// Height of a vaultable ledge beyond `wall_normal`, if there is one.
///
/// A ray is dropped from just above the highest vaultable height at a point
/// past the wall. The ledge must be walkable, strictly higher than anything
/// the step-up move handles, no higher than `vault_max_ledge`, and the body
/// must fit on top of it.
pub fn probe_ledge<C: CollisionQuery + ?Sized>(
    world: &C,
    state: &ActorMotionState,
    tuning: &MotionTuning,
    wall_normal: Vec3,
) -> Option<f32> {
    let into = (-wall_normal).horizontal().normalize_or_zero();
    if into == Vec3::ZERO {
        return None;
    }

    let base = state.position;
    let over = base + into.scale(tuning.capsule_radius + tuning.vault_reach);
    let top = over.with_z(base.z + tuning.vault_max_ledge + LEDGE_LIFT);
    let hit = world.ray(top, over)?;
    if classify(hit.normal, tuning) != ContactKind::Ground {
        return None;
    }

    let height = hit.position.z - base.z;
    let min_height = tuning.vault_min_ledge.max(tuning.step_height);
    if !(height > min_height && height <= tuning.vault_max_ledge) {
        return None;
    }

    let shape = Capsule::new(tuning.capsule_radius, tuning.stand_height);
    let lifted = base.with_z(hit.position.z + LEDGE_LIFT);
    if world.sweep(base, lifted, &shape).is_some() {
        return None;
    }
    let landing = over.with_z(lifted.z);
    if world.sweep(lifted, landing, &shape).is_some() {
        return None;
    }
    Some(height)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{Brush, BrushWorld};

    fn tuning() -> MotionTuning {
        MotionTuning::default()
    }

    fn actor_at(x: f32) -> ActorMotionState {
        ActorMotionState::spawn(Vec3::new(x, 0.0, 0.001), 0.0, &tuning())
    }

    fn ledge(height: f32) -> BrushWorld {
        BrushWorld::flat_floor().with(Brush::cuboid(
            Vec3::new(2.0, -2.0, 0.0),
            Vec3::new(4.0, 2.0, height),
        ))
    }

    #[test]
    fn test_classify_bands() {
        let t = tuning();
        assert_eq!(classify(Vec3::UP, &t), ContactKind::Ground);
        assert_eq!(classify(Vec3::new(0.0, -0.9, 0.44).normalize_or_zero(), &t), ContactKind::Surf);
        assert_eq!(classify(Vec3::new(1.0, 0.0, 0.0), &t), ContactKind::Wall);
        assert_eq!(classify(Vec3::DOWN, &t), ContactKind::Ceiling);
        // 30 degree slope is walkable at the default 45 degree limit
        let n = Vec3::new(0.5, 0.0, 0.866);
        assert_eq!(classify(n, &t), ContactKind::Ground);
    }

    #[test]
    fn test_wall_probe_finds_nearby_wall() {
        let world = ledge(2.0);
        let actor = actor_at(2.0 - 0.35 - 0.05);
        assert_eq!(probe_wall(&world, &actor, &tuning()), Some(Vec3::new(-1.0, 0.0, 0.0)));
    }

    #[test]
    fn test_wall_probe_ignores_steps() {
        let world = ledge(0.3);
        let actor = actor_at(2.0 - 0.35 - 0.05);
        assert_eq!(probe_wall(&world, &actor, &tuning()), None);
    }

    #[test]
    fn test_wall_probe_out_of_reach() {
        let world = ledge(2.0);
        let actor = actor_at(0.0);
        assert_eq!(probe_wall(&world, &actor, &tuning()), None);
    }

    #[test]
    fn test_ledge_heights() {
        let t = tuning();
        let wall = Vec3::new(-1.0, 0.0, 0.0);
        let x = 2.0 - 0.35 - 0.05;

        let h = probe_ledge(&ledge(1.0), &actor_at(x), &t, wall).expect("vaultable");
        assert!((h - 1.0).abs() < 0.01);

        assert!(probe_ledge(&ledge(0.3), &actor_at(x), &t, wall).is_none());
        assert!(probe_ledge(&ledge(2.0), &actor_at(x), &t, wall).is_none());
    }

    #[test]
    fn test_ledge_needs_headroom() {
        let t = tuning();
        let world = ledge(1.0).with(Brush::cuboid(
            Vec3::new(1.0, -2.0, 2.0),
            Vec3::new(5.0, 2.0, 2.5),
        ));
        let x = 2.0 - 0.35 - 0.05;
        assert!(probe_ledge(&world, &actor_at(x), &t, Vec3::new(-1.0, 0.0, 0.0)).is_none());
    }
}
