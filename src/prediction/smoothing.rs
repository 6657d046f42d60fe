//! Render Offset
//!
//! When reconciliation moves the predicted position, the camera keeps the
//! old position through an offset that decays exponentially to zero. The
//! offset never feeds back into simulation.

use crate::core::vec3::Vec3;

/// Default decay rate (1/s).
pub const DEFAULT_DECAY_HZ: f32 = 10.0;

/// Decaying visual correction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderOffset {
    offset: Vec3,
    decay_hz: f32,
}

impl Default for RenderOffset {
    fn default() -> Self {
        Self::new(DEFAULT_DECAY_HZ)
    }
}

impl RenderOffset {
    /// Zero offset decaying at `decay_hz`.
    pub fn new(decay_hz: f32) -> Self {
        Self { offset: Vec3::ZERO, decay_hz: decay_hz.max(0.0) }
    }

    /// Current offset.
    pub fn value(&self) -> Vec3 {
        self.offset
    }

    /// Decay rate (1/s).
    pub fn decay_hz(&self) -> f32 {
        self.decay_hz
    }

    /// Accumulate a correction.
    pub fn add(&mut self, delta: Vec3) {
        if delta.is_finite() {
            self.offset = self.offset + delta;
        }
    }

    /// Decay by one frame of `dt` seconds.
    pub fn advance(&mut self, dt: f32) {
        if dt > 0.0 && dt.is_finite() {
            self.offset = self.offset.scale((-self.decay_hz * dt).exp());
        }
    }

    /// Drop the offset.
    pub fn clear(&mut self) {
        self.offset = Vec3::ZERO;
    }

    /// True if the offset is zero.
    pub fn is_zero(&self) -> bool {
        self.offset == Vec3::ZERO
    }

    /// Seconds for any offset to fall below 1% of its size.
    pub fn settle_time(&self) -> f32 {
        100f32.ln() / self.decay_hz
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decays_below_one_percent_in_settle_time() {
        let mut offset = RenderOffset::new(10.0);
        let delta = Vec3::new(1.5, -0.5, 0.25);
        offset.add(delta);

        let dt = 1.0 / 60.0;
        let frames = (offset.settle_time() / dt).ceil() as usize;
        for _ in 0..frames {
            offset.advance(dt);
        }
        assert!(offset.value().length() < 0.01 * delta.length());
    }

    #[test]
    fn test_corrections_accumulate() {
        let mut offset = RenderOffset::default();
        offset.add(Vec3::new(1.0, 0.0, 0.0));
        offset.add(Vec3::new(0.0, 2.0, 0.0));
        assert_eq!(offset.value(), Vec3::new(1.0, 2.0, 0.0));
        offset.clear();
        assert!(offset.is_zero());
    }

    #[test]
    fn test_ignores_bad_input() {
        let mut offset = RenderOffset::default();
        offset.add(Vec3::new(f32::NAN, 0.0, 0.0));
        assert!(offset.is_zero());
        offset.add(Vec3::new(1.0, 0.0, 0.0));
        offset.advance(-1.0);
        offset.advance(f32::INFINITY);
        assert_eq!(offset.value(), Vec3::new(1.0, 0.0, 0.0));
    }
}
