//! Actor Motion State
//!
//! Everything the solver carries from one tick to the next for one actor.

use serde::{Serialize, Deserialize};

use crate::core::hash::{StateHash, StateHasher};
use crate::core::vec3::Vec3;
use crate::world::Capsule;
use super::input::{forward_vector, look_vector};
use super::tuning::MotionTuning;

/// Movement phase, re-evaluated once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionPhase {
    /// Standing on walkable ground
    Grounded,
    /// Free flight
    #[default]
    Airborne,
    /// Riding a surf ramp
    Surfing,
    /// Airborne and touching a wall
    WallContact,
    /// Rising from a vault
    Vaulting,
    /// Swinging on the grapple
    GrappleAttached,
}

impl MotionPhase {
    /// Stable numeric tag used for hashing.
    pub fn tag(self) -> u8 {
        match self {
            MotionPhase::Grounded => 0,
            MotionPhase::Airborne => 1,
            MotionPhase::Surfing => 2,
            MotionPhase::WallContact => 3,
            MotionPhase::Vaulting => 4,
            MotionPhase::GrappleAttached => 5,
        }
    }
}

/// A remembered surface contact.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurfaceContact {
    /// Surface normal
    pub normal: Vec3,
    /// Seconds since the surface was last detected
    pub age: f32,
}

impl SurfaceContact {
    /// Contact detected this instant.
    pub fn fresh(normal: Vec3) -> Self {
        Self { normal, age: 0.0 }
    }
}

/// Grapple rope.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GrappleState {
    /// Attach point in the world
    pub anchor: Vec3,
    /// Current rope length
    pub rope_length: f32,
    /// Remaining auto-shorten window (seconds)
    pub auto_shorten_remaining: f32,
}

/// Per-actor state mutated once per tick by the solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorMotionState {
    /// Feet position
    pub position: Vec3,
    /// Velocity (m/s)
    pub velocity: Vec3,
    /// View yaw (radians, 0 faces +X)
    pub yaw: f32,
    /// View pitch (radians, positive up)
    pub pitch: f32,
    /// Standing on walkable ground
    pub grounded: bool,
    /// Normal of the ground under the actor (UP when airborne)
    pub ground_normal: Vec3,
    /// Crouched (reduced height)
    pub crouched: bool,
    /// Sliding while crouched
    pub sliding: bool,
    /// Current collision height
    pub height: f32,
    /// Last wall touched, if still remembered
    pub wall_contact: Option<SurfaceContact>,
    /// Last surf ramp touched, if still remembered
    pub surf_contact: Option<SurfaceContact>,
    /// Attached grapple
    pub grapple: Option<GrappleState>,
    /// Remaining wall-jump lockout
    pub wall_jump_lock: f32,
    /// Remaining vault lockout
    pub vault_cooldown: f32,
    /// Remaining time a jump press stays queued
    pub jump_buffer: f32,
    /// Phase used for this tick's movement rules
    pub phase: MotionPhase,
}

impl ActorMotionState {
    /// Fresh actor at a spawn point.
    pub fn spawn(position: Vec3, yaw: f32, tuning: &MotionTuning) -> Self {
        Self {
            position,
            velocity: Vec3::ZERO,
            yaw,
            pitch: 0.0,
            grounded: false,
            ground_normal: Vec3::UP,
            crouched: false,
            sliding: false,
            height: tuning.stand_height,
            wall_contact: None,
            surf_contact: None,
            grapple: None,
            wall_jump_lock: 0.0,
            vault_cooldown: 0.0,
            jump_buffer: 0.0,
            phase: MotionPhase::Airborne,
        }
    }

    /// Reset to a spawn point. Look direction is replaced by `yaw`.
    pub fn respawn(&mut self, position: Vec3, yaw: f32, tuning: &MotionTuning) {
        *self = Self::spawn(position, yaw, tuning);
    }

    /// Collision shape for the current height.
    #[inline]
    pub fn capsule(&self, tuning: &MotionTuning) -> Capsule {
        Capsule::new(tuning.capsule_radius, self.height)
    }

    /// Eye position.
    pub fn eye_position(&self, tuning: &MotionTuning) -> Vec3 {
        let eye = tuning.eye_height * (self.height / tuning.stand_height);
        self.position + Vec3::UP.scale(eye)
    }

    /// Horizontal facing.
    pub fn forward(&self) -> Vec3 {
        forward_vector(self.yaw)
    }

    /// View direction.
    pub fn look(&self) -> Vec3 {
        look_vector(self.yaw, self.pitch)
    }

    /// Hash of every field, bit for bit.
    pub fn compute_hash(&self) -> StateHash {
        let mut h = StateHasher::for_motion_state();
        self.hash_into(&mut h);
        h.finalize()
    }

    /// Feed every field into an existing hasher.
    pub fn hash_into(&self, h: &mut StateHasher) {
        h.update_vec3(self.position);
        h.update_vec3(self.velocity);
        h.update_f32(self.yaw);
        h.update_f32(self.pitch);
        h.update_bool(self.grounded);
        h.update_vec3(self.ground_normal);
        h.update_bool(self.crouched);
        h.update_bool(self.sliding);
        h.update_f32(self.height);
        for contact in [self.wall_contact, self.surf_contact] {
            match contact {
                Some(c) => {
                    h.update_u8(1);
                    h.update_vec3(c.normal);
                    h.update_f32(c.age);
                }
                None => h.update_u8(0),
            }
        }
        match self.grapple {
            Some(g) => {
                h.update_u8(1);
                h.update_vec3(g.anchor);
                h.update_f32(g.rope_length);
                h.update_f32(g.auto_shorten_remaining);
            }
            None => h.update_u8(0),
        }
        h.update_f32(self.wall_jump_lock);
        h.update_f32(self.vault_cooldown);
        h.update_f32(self.jump_buffer);
        h.update_u8(self.phase.tag());
    }

    /// Phase transition, evaluated once per tick after contacts are refreshed.
    ///
    /// `dt` is the tick length; a contact aged by at most one tick counts as
    /// touching now.
    pub fn next_phase(&self, dt: f32) -> MotionPhase {
        if self.grapple.is_some() {
            return MotionPhase::GrappleAttached;
        }
        if self.grounded {
            return MotionPhase::Grounded;
        }
        if self.phase == MotionPhase::Vaulting && self.velocity.z > 0.0 {
            return MotionPhase::Vaulting;
        }
        if self.surf_contact.is_some_and(|c| c.age <= dt) {
            return MotionPhase::Surfing;
        }
        if self.wall_contact.is_some_and(|c| c.age == 0.0) {
            return MotionPhase::WallContact;
        }
        MotionPhase::Airborne
    }
}

// =============================================================================
// TESTS
// =============================================================================
