//! Movement Intent
//!
//! The solver does not read wire packets. Each [`InputCommand`] is turned
//! into a [`MoveIntent`] first: look deltas in radians, axes clamped to
//! `{-1, 0, 1}` and the four buttons.
//!
//! [`InputCommand`]: crate::network::protocol::InputCommand

use std::f32::consts::{PI, TAU};
use serde::{Serialize, Deserialize};

use crate::core::vec3::Vec3;

/// Radians per look unit per unit of `look_scale`.
pub const LOOK_UNIT: f32 = 1e-6;

/// Pitch limit (radians, just short of straight up/down).
pub const MAX_PITCH: f32 = 89.0 * PI / 180.0;

/// One tick of player intent.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MoveIntent {
    /// Yaw change this tick (radians, positive turns left)
    pub yaw_delta: f32,
    /// Pitch change this tick (radians, positive looks up)
    pub pitch_delta: f32,
    /// Forward axis in `{-1, 0, 1}`
    pub forward: f32,
    /// Right axis in `{-1, 0, 1}`
    pub right: f32,
    /// Jump went down this tick
    pub jump_pressed: bool,
    /// Jump is held
    pub jump_held: bool,
    /// Crouch/slide is held
    pub slide_held: bool,
    /// Grapple went down this tick
    pub grapple_pressed: bool,
}

impl MoveIntent {
    /// Intent with no input at all.
    pub const NEUTRAL: Self = Self {
        yaw_delta: 0.0,
        pitch_delta: 0.0,
        forward: 0.0,
        right: 0.0,
        jump_pressed: false,
        jump_held: false,
        slide_held: false,
        grapple_pressed: false,
    };

    /// Intent that only moves forward.
    pub fn forward() -> Self {
        Self { forward: 1.0, ..Self::NEUTRAL }
    }

    /// True if any movement axis is non-zero.
    #[inline]
    pub fn has_move(&self) -> bool {
        self.forward != 0.0 || self.right != 0.0
    }

    /// Horizontal unit wish direction for a view yaw, or zero.
    pub fn wish_dir(&self, yaw: f32) -> Vec3 {
        if !self.has_move() {
            return Vec3::ZERO;
        }
        let wish = forward_vector(yaw).scale(self.forward) + right_vector(yaw).scale(self.right);
        wish.normalize_or_zero()
    }
}

/// Convert raw look units to radians.
#[inline]
pub fn look_radians(delta: i16, scale: u16) -> f32 {
    delta as f32 * scale as f32 * LOOK_UNIT
}

/// Clamp a movement axis to `{-1, 0, 1}`.
#[inline]
pub fn axis(value: i8) -> f32 {
    value.signum() as f32
}

/// Wrap a yaw into `[-PI, PI)`.
#[inline]
pub fn wrap_yaw(yaw: f32) -> f32 {
    (yaw + PI).rem_euclid(TAU) - PI
}

/// Clamp a pitch to the look limits.
#[inline]
pub fn clamp_pitch(pitch: f32) -> f32 {
    pitch.clamp(-MAX_PITCH, MAX_PITCH)
}

/// Horizontal forward for a yaw (yaw 0 faces +X).
#[inline]
pub fn forward_vector(yaw: f32) -> Vec3 {
    Vec3::new(yaw.cos(), yaw.sin(), 0.0)
}

/// Horizontal right for a yaw.
#[inline]
pub fn right_vector(yaw: f32) -> Vec3 {
    Vec3::new(yaw.sin(), -yaw.cos(), 0.0)
}

/// Full look direction including pitch.
#[inline]
pub fn look_vector(yaw: f32, pitch: f32) -> Vec3 {
    let (sp, cp) = pitch.sin_cos();
    Vec3::new(yaw.cos() * cp, yaw.sin() * cp, sp)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_clamps() {
        assert_eq!(axis(127), 1.0);
        assert_eq!(axis(-5), -1.0);
        assert_eq!(axis(0), 0.0);
    }

    #[test]
    fn test_look_radians() {
        let r = look_radians(1000, 1000);
        assert!((r - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_right_is_clockwise_of_forward() {
        let f = forward_vector(0.3);
        let r = right_vector(0.3);
        assert!(f.dot(r).abs() < 1e-6);
        // forward x right points down in a z-up right-handed frame
        assert!(f.cross(r).z < 0.0);
    }

    #[test]
    fn test_wish_dir_is_normalized() {
        let intent = MoveIntent { forward: 1.0, right: 1.0, ..MoveIntent::NEUTRAL };
        let wish = intent.wish_dir(0.0);
        assert!((wish.length() - 1.0).abs() < 1e-6);
        assert_eq!(MoveIntent::NEUTRAL.wish_dir(1.0), Vec3::ZERO);
    }

    #[test]
    fn test_wrap_yaw() {
        assert!((wrap_yaw(2.5 * PI) - 0.5 * PI).abs() < 1e-5);
        assert!((wrap_yaw(0.5) - 0.5).abs() < 1e-6);
        assert!(clamp_pitch(10.0) <= MAX_PITCH);
    }
}
