//! Rewind History
//!
//! Recent `(tick, position)` samples per player, used to test hits against
//! where a target was on the shooter's screen.

use std::collections::VecDeque;

use crate::core::vec3::Vec3;

/// Default history length (one second at 60 Hz).
pub const DEFAULT_REWIND_TICKS: usize = 64;

/// Bounded ring of past positions, oldest first.
#[derive(Debug, Clone)]
pub struct RewindHistory {
    entries: VecDeque<(u32, Vec3)>,
    capacity: usize,
}

impl Default for RewindHistory {
    fn default() -> Self {
        Self::new(DEFAULT_REWIND_TICKS)
    }
}

impl RewindHistory {
    /// Empty history keeping at most `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { entries: VecDeque::with_capacity(capacity), capacity }
    }

    /// Record a sample, evicting the oldest when full.
    pub fn push(&mut self, tick: u32, position: Vec3) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((tick, position));
    }

    /// Position recorded nearest to `tick`. Ties go to the older sample.
    pub fn at(&self, tick: u32) -> Option<Vec3> {
        self.entries
            .iter()
            .min_by_key(|(t, _)| t.abs_diff(tick))
            .map(|&(_, p)| p)
    }

    /// Most recent sample.
    pub fn latest(&self) -> Option<(u32, Vec3)> {
        self.entries.back().copied()
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every sample (respawn).
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Distance along a ray to an axis-aligned box, if the ray enters it within
/// `max_distance`. `dir` must be unit length. A ray starting inside the box
/// hits at distance zero.
pub fn ray_box_distance(origin: Vec3, dir: Vec3, max_distance: f32, mins: Vec3, maxs: Vec3) -> Option<f32> {
    let mut enter = 0.0f32;
    let mut leave = max_distance;

    for axis in 0..3 {
        let o = origin.axis(axis);
        let d = dir.axis(axis);
        let lo = mins.axis(axis);
        let hi = maxs.axis(axis);

        if d.abs() < 1e-8 {
            if o < lo || o > hi {
                return None;
            }
            continue;
        }

        let inv = 1.0 / d;
        let (t0, t1) = {
            let a = (lo - o) * inv;
            let b = (hi - o) * inv;
            if a <= b { (a, b) } else { (b, a) }
        };
        enter = enter.max(t0);
        leave = leave.min(t1);
        if enter > leave {
            return None;
        }
    }
    Some(enter)
}

// =============================================================================
// TESTS
// =============================================================================
