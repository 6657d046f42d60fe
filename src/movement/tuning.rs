//! Motion Tuning
//!
//! Every constant the solver reads. A tuning value is immutable once built;
//! changes arrive as a [`MotionTuningDelta`] that produces a new validated
//! tuning under a new config version.

use std::collections::BTreeMap;
use std::path::Path;
use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Tuning errors.
#[derive(Debug, Error)]
pub enum TuningError {
    /// A field is outside its documented range.
    #[error("{field} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        /// Field name
        field: &'static str,
        /// Offending value
        value: f32,
        /// Lower bound
        min: f32,
        /// Upper bound
        max: f32,
    },

    /// Two fields contradict each other.
    #[error("inconsistent tuning: {0}")]
    Inconsistent(String),

    /// Patch names a field that does not exist.
    #[error("unknown tuning field: {0}")]
    UnknownField(String),

    /// Patch value has the wrong type.
    #[error("invalid tuning value: {0}")]
    InvalidValue(String),

    /// Tuning file could not be read.
    #[error("failed to read tuning file: {0}")]
    Io(#[from] std::io::Error),
}

/// Sparse tuning patch: field name to new value.
pub type MotionTuningDelta = BTreeMap<String, serde_json::Value>;

/// Movement constants shared by client and server.
///
/// Units are metres, seconds and degrees unless a field says otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionTuning {
    // --- ground ---
    /// Downward acceleration (m/s^2)
    pub gravity: f32,
    /// Target running speed (m/s)
    pub max_ground_speed: f32,
    /// Time to reach 90% of `max_ground_speed` from rest
    pub run_t90: f32,
    /// Time for friction to remove 90% of ground speed
    pub ground_stop_t90: f32,
    /// Target speed while crouched (m/s)
    pub crouch_speed: f32,
    /// Minimum horizontal speed that turns a crouch into a slide
    pub slide_min_speed: f32,
    /// Speed added along the motion when a slide starts
    pub slide_boost: f32,
    /// Friction time constant while sliding
    pub slide_stop_t90: f32,

    // --- air ---
    /// Wish speed cap for air acceleration (m/s)
    pub air_max_wish_speed: f32,
    /// Air acceleration factor
    pub air_accel: f32,
    /// Air steering strength (0 disables)
    pub air_control: f32,
    /// Angle between wish and velocity beyond which the actor brakes
    pub counter_strafe_angle_deg: f32,
    /// Braking deceleration while counter-strafing (m/s^2)
    pub counter_strafe_decel: f32,

    // --- jumping ---
    /// Apex height of a standing jump
    pub jump_height: f32,
    /// How long an early jump press stays queued
    pub jump_buffer_time: f32,
    /// Holding jump re-jumps on landing
    pub auto_hop: bool,
    /// Speed along the ground normal that counts as leaving the ground
    pub ground_leave_speed: f32,

    // --- body ---
    /// Collision radius
    pub capsule_radius: f32,
    /// Standing height
    pub stand_height: f32,
    /// Crouched height
    pub crouch_height: f32,
    /// Eye height above the feet when standing
    pub eye_height: f32,
    /// Highest ledge walked over without jumping
    pub step_height: f32,

    // --- surfaces ---
    /// Steepest walkable slope
    pub max_ground_slope_deg: f32,
    /// Lowest normal z still treated as a surf ramp
    pub surf_min_normal_z: f32,
    /// Rate at which velocity is bent onto a surf ramp (1/s)
    pub surf_redirect_rate: f32,
    /// Gravity multiplier while rising on a surf ramp
    pub surf_gravity_scale: f32,

    // --- walls ---
    /// Reach of the four wall probes
    pub wall_probe_distance: f32,
    /// How long a wall contact stays usable for wall-jumps
    pub wall_contact_grace: f32,
    /// Horizontal speed needed to wallrun
    pub wallrun_min_speed: f32,
    /// Fall speed cap while wallrunning (m/s)
    pub wallrun_max_fall_speed: f32,
    /// Gravity multiplier while wallrunning
    pub wallrun_gravity_scale: f32,
    /// Vertical speed of a wall-jump
    pub wall_jump_up_speed: f32,
    /// Speed away from the wall on a wall-jump
    pub wall_jump_push_speed: f32,
    /// Lockout after a wall-jump
    pub wall_jump_cooldown: f32,

    // --- vault ---
    /// Lowest vaultable ledge (never below `step_height` in practice)
    pub vault_min_ledge: f32,
    /// Highest vaultable ledge
    pub vault_max_ledge: f32,
    /// Distance past the body probed for a ledge
    pub vault_reach: f32,
    /// Extra height cleared over the ledge
    pub vault_clearance: f32,
    /// Forward speed given by a vault
    pub vault_forward_speed: f32,
    /// Lockout after a vault
    pub vault_cooldown: f32,

    // --- grapple ---
    /// Shortest rope
    pub grapple_min_length: f32,
    /// Longest attach distance
    pub grapple_max_range: f32,
    /// Inward speed cap when reeling
    pub grapple_pull_speed: f32,
    /// Inward acceleration when reeling (m/s^2)
    pub grapple_pull_accel: f32,
    /// Window after attach during which the rope shortens
    pub grapple_auto_shorten_time: f32,
    /// Shortening rate during that window (m/s)
    pub grapple_shorten_rate: f32,

    // --- collision ---
    /// Velocity clip factor against hit planes
    pub overbounce: f32,
    /// Downward probe length while grounded
    pub ground_snap_distance: f32,
    /// Downward probe length while airborne
    pub ground_probe_epsilon: f32,
}

impl Default for MotionTuning {
    fn default() -> Self {
        Self {
            gravity: 20.0,
            max_ground_speed: 7.0,
            run_t90: 0.2,
            ground_stop_t90: 0.12,
            crouch_speed: 3.0,
            slide_min_speed: 5.0,
            slide_boost: 1.5,
            slide_stop_t90: 1.5,

            air_max_wish_speed: 0.9,
            air_accel: 40.0,
            air_control: 0.6,
            counter_strafe_angle_deg: 104.0,
            counter_strafe_decel: 6.0,

            jump_height: 1.0,
            jump_buffer_time: 0.1,
            auto_hop: true,
            ground_leave_speed: 1.0,

            capsule_radius: 0.35,
            stand_height: 1.8,
            crouch_height: 1.1,
            eye_height: 1.6,
            step_height: 0.45,

            max_ground_slope_deg: 45.0,
            surf_min_normal_z: 0.1,
            surf_redirect_rate: 7.0,
            surf_gravity_scale: 0.6,

            wall_probe_distance: 0.15,
            wall_contact_grace: 0.2,
            wallrun_min_speed: 4.0,
            wallrun_max_fall_speed: 1.5,
            wallrun_gravity_scale: 0.35,
            wall_jump_up_speed: 5.5,
            wall_jump_push_speed: 5.0,
            wall_jump_cooldown: 0.35,

            vault_min_ledge: 0.5,
            vault_max_ledge: 1.4,
            vault_reach: 0.5,
            vault_clearance: 0.2,
            vault_forward_speed: 4.0,
            vault_cooldown: 0.5,

            grapple_min_length: 2.0,
            grapple_max_range: 30.0,
            grapple_pull_speed: 12.0,
            grapple_pull_accel: 30.0,
            grapple_auto_shorten_time: 0.35,
            grapple_shorten_rate: 6.0,

            overbounce: 1.001,
            ground_snap_distance: 0.3,
            ground_probe_epsilon: 0.03,
        }
    }
}

impl MotionTuning {
    /// Check every field against its documented range.
    pub fn validate(&self) -> Result<(), TuningError> {
        let ranges = [
            ("gravity", self.gravity, 0.01, 200.0),
            ("max_ground_speed", self.max_ground_speed, 0.01, 100.0),
            ("run_t90", self.run_t90, 0.001, 10.0),
            ("ground_stop_t90", self.ground_stop_t90, 0.001, 10.0),
            ("crouch_speed", self.crouch_speed, 0.0, 100.0),
            ("slide_min_speed", self.slide_min_speed, 0.0, 100.0),
            ("slide_boost", self.slide_boost, 0.0, 50.0),
            ("slide_stop_t90", self.slide_stop_t90, 0.001, 60.0),
            ("air_max_wish_speed", self.air_max_wish_speed, 0.0, 100.0),
            ("air_accel", self.air_accel, 0.0, 1000.0),
            ("air_control", self.air_control, 0.0, 2.0),
            ("counter_strafe_angle_deg", self.counter_strafe_angle_deg, 90.0, 180.0),
            ("counter_strafe_decel", self.counter_strafe_decel, 0.0, 200.0),
            ("jump_height", self.jump_height, 0.01, 20.0),
            ("jump_buffer_time", self.jump_buffer_time, 0.0, 1.0),
            ("ground_leave_speed", self.ground_leave_speed, 0.0, 50.0),
            ("capsule_radius", self.capsule_radius, 0.05, 5.0),
            ("stand_height", self.stand_height, 0.1, 10.0),
            ("crouch_height", self.crouch_height, 0.1, 10.0),
            ("eye_height", self.eye_height, 0.0, 10.0),
            ("step_height", self.step_height, 0.0, 2.0),
            ("max_ground_slope_deg", self.max_ground_slope_deg, 0.1, 89.9),
            ("surf_min_normal_z", self.surf_min_normal_z, 0.0, 1.0),
            ("surf_redirect_rate", self.surf_redirect_rate, 0.0, 100.0),
            ("surf_gravity_scale", self.surf_gravity_scale, 0.0, 2.0),
            ("wall_probe_distance", self.wall_probe_distance, 0.0, 2.0),
            ("wall_contact_grace", self.wall_contact_grace, 0.0, 5.0),
            ("wallrun_min_speed", self.wallrun_min_speed, 0.0, 100.0),
            ("wallrun_max_fall_speed", self.wallrun_max_fall_speed, 0.0, 100.0),
            ("wallrun_gravity_scale", self.wallrun_gravity_scale, 0.0, 2.0),
            ("wall_jump_up_speed", self.wall_jump_up_speed, 0.0, 100.0),
            ("wall_jump_push_speed", self.wall_jump_push_speed, 0.0, 100.0),
            ("wall_jump_cooldown", self.wall_jump_cooldown, 0.0, 10.0),
            ("vault_min_ledge", self.vault_min_ledge, 0.0, 5.0),
            ("vault_max_ledge", self.vault_max_ledge, 0.0, 5.0),
            ("vault_reach", self.vault_reach, 0.01, 5.0),
            ("vault_clearance", self.vault_clearance, 0.0, 2.0),
            ("vault_forward_speed", self.vault_forward_speed, 0.0, 50.0),
            ("vault_cooldown", self.vault_cooldown, 0.0, 10.0),
            ("grapple_min_length", self.grapple_min_length, 0.1, 100.0),
            ("grapple_max_range", self.grapple_max_range, 0.1, 500.0),
            ("grapple_pull_speed", self.grapple_pull_speed, 0.0, 200.0),
            ("grapple_pull_accel", self.grapple_pull_accel, 0.0, 1000.0),
            ("grapple_auto_shorten_time", self.grapple_auto_shorten_time, 0.0, 10.0),
            ("grapple_shorten_rate", self.grapple_shorten_rate, 0.0, 100.0),
            ("overbounce", self.overbounce, 1.0, 2.0),
            ("ground_snap_distance", self.ground_snap_distance, 0.0, 2.0),
            ("ground_probe_epsilon", self.ground_probe_epsilon, 0.002, 0.5),
            // derived checks share the table so their messages read the same
            ("walkable_normal_z", self.walkable_normal_z(), 0.0, 1.0),
            ("ground_accel", self.ground_accel(), 0.0, 10_000.0),
            ("ground_friction_rate", self.friction_rate(self.ground_stop_t90), 0.0, 10_000.0),
            ("jump_speed", self.jump_speed(), 0.0, 1_000.0),
        ];

        for (field, value, min, max) in ranges {
            if !(value >= min && value <= max) {
                return Err(TuningError::OutOfRange { field, value, min, max });
            }
        }

        if self.surf_min_normal_z >= self.walkable_normal_z() {
            return Err(TuningError::Inconsistent(
                "surf_min_normal_z must be below the walkable normal".into(),
            ));
        }
        if self.crouch_height > self.stand_height {
            return Err(TuningError::Inconsistent("crouch_height exceeds stand_height".into()));
        }
        if self.step_height >= self.crouch_height {
            return Err(TuningError::Inconsistent("step_height must be below crouch_height".into()));
        }
        if self.vault_min_ledge > self.vault_max_ledge {
            return Err(TuningError::Inconsistent("vault_min_ledge exceeds vault_max_ledge".into()));
        }
        if self.grapple_min_length > self.grapple_max_range {
            return Err(TuningError::Inconsistent("grapple_min_length exceeds grapple_max_range".into()));
        }
        Ok(())
    }

    /// Apply a sparse patch, returning a new validated tuning.
    ///
    /// The patch is applied as a whole: any unknown field, wrongly typed
    /// value or range violation rejects it and `self` is left as it was.
    pub fn apply_delta(&self, delta: &MotionTuningDelta) -> Result<Self, TuningError> {
        let mut value = serde_json::to_value(self)
            .map_err(|e| TuningError::InvalidValue(e.to_string()))?;
        let fields = value
            .as_object_mut()
            .ok_or_else(|| TuningError::InvalidValue("tuning is not an object".into()))?;

        for (name, new_value) in delta {
            match fields.get_mut(name) {
                Some(slot) => *slot = new_value.clone(),
                None => return Err(TuningError::UnknownField(name.clone())),
            }
        }

        let patched: Self = serde_json::from_value(value)
            .map_err(|e| TuningError::InvalidValue(e.to_string()))?;
        patched.validate()?;
        Ok(patched)
    }

    /// Load a tuning from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, TuningError> {
        let text = std::fs::read_to_string(path)?;
        let tuning: Self = serde_json::from_str(&text)
            .map_err(|e| TuningError::InvalidValue(e.to_string()))?;
        tuning.validate()?;
        Ok(tuning)
    }

    // =========================================================================
    // Derived constants
    // =========================================================================

    /// Ground acceleration factor. Reaching 90% of top speed takes `run_t90`.
    #[inline]
    pub fn ground_accel(&self) -> f32 {
        0.9 / self.run_t90
    }

    /// Exponential decay rate that removes 90% of speed in `t90` seconds.
    #[inline]
    pub fn friction_rate(&self, t90: f32) -> f32 {
        std::f32::consts::LN_10 / t90
    }

    /// Take-off speed for a jump of `jump_height`.
    #[inline]
    pub fn jump_speed(&self) -> f32 {
        (2.0 * self.gravity * self.jump_height).sqrt()
    }

    /// Lowest normal z that counts as walkable ground.
    #[inline]
    pub fn walkable_normal_z(&self) -> f32 {
        self.max_ground_slope_deg.to_radians().cos()
    }

    /// Cosine of the counter-strafe angle.
    #[inline]
    pub fn counter_strafe_cos(&self) -> f32 {
        self.counter_strafe_angle_deg.to_radians().cos()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_is_valid() {
        MotionTuning::default().validate().expect("defaults validate");
    }

    #[test]
    fn test_out_of_range_rejected() {
        let tuning = MotionTuning { air_control: 3.0, ..Default::default() };
        assert!(matches!(
            tuning.validate(),
            Err(TuningError::OutOfRange { field: "air_control", .. })
        ));
    }

    #[test]
    fn test_nan_rejected() {
        let tuning = MotionTuning { gravity: f32::NAN, ..Default::default() };
        assert!(tuning.validate().is_err());
    }

    #[test]
    fn test_surf_band_below_walkable() {
        let tuning = MotionTuning { surf_min_normal_z: 0.9, ..Default::default() };
        assert!(matches!(tuning.validate(), Err(TuningError::Inconsistent(_))));
    }

    #[test]
    fn test_apply_delta() {
        let base = MotionTuning::default();
        let mut delta = MotionTuningDelta::new();
        delta.insert("gravity".into(), json!(15.0));
        delta.insert("auto_hop".into(), json!(false));

        let patched = base.apply_delta(&delta).expect("patch applies");
        assert_eq!(patched.gravity, 15.0);
        assert!(!patched.auto_hop);
        assert_eq!(patched.max_ground_speed, base.max_ground_speed);
    }

    #[test]
    fn test_apply_delta_unknown_field() {
        let mut delta = MotionTuningDelta::new();
        delta.insert("moon_gravity".into(), json!(1.6));
        assert!(matches!(
            MotionTuning::default().apply_delta(&delta),
            Err(TuningError::UnknownField(_))
        ));
    }

    #[test]
    fn test_apply_delta_is_atomic() {
        let mut delta = MotionTuningDelta::new();
        delta.insert("gravity".into(), json!(15.0));
        delta.insert("overbounce".into(), json!(5.0));
        assert!(MotionTuning::default().apply_delta(&delta).is_err());

        let mut delta = MotionTuningDelta::new();
        delta.insert("gravity".into(), json!("heavy"));
        assert!(matches!(
            MotionTuning::default().apply_delta(&delta),
            Err(TuningError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let tuning: MotionTuning = serde_json::from_str(r#"{"gravity": 9.5}"#).unwrap();
        assert_eq!(tuning.gravity, 9.5);
        assert_eq!(tuning.run_t90, MotionTuning::default().run_t90);
    }

    #[test]
    fn test_derived_constants() {
        let tuning = MotionTuning::default();
        assert!((tuning.ground_accel() - 4.5).abs() < 1e-6);
        assert!((tuning.jump_speed() - 40.0f32.sqrt()).abs() < 1e-6);
        assert!((tuning.walkable_normal_z() - 0.70710677).abs() < 1e-5);
    }
}
