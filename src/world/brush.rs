//! Convex Brush World
//!
//! Static geometry made of convex brushes (intersections of half-spaces),
//! traced with the classic box-versus-brush clip: every brush plane is pushed
//! out by the swept box's support offset and the segment is clipped against
//! the resulting half-spaces. Hits are reported a small distance in front of
//! the surface so the next sweep never starts inside solid.

use crate::core::vec3::Vec3;
use super::{Capsule, CollisionQuery, Hit};

/// Distance kept between a blocked shape and the surface it hit (metres).
pub const SURFACE_EPSILON: f32 = 0.001;

/// Half-space boundary. Points with `normal . p > dist` are outside.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    /// Outward unit normal
    pub normal: Vec3,
    /// Distance from the origin along the normal
    pub dist: f32,
}

impl Plane {
    /// Plane through `point` with outward `normal`.
    pub fn through(normal: Vec3, point: Vec3) -> Self {
        let normal = normal.normalize_or_zero();
        Self { normal, dist: normal.dot(point) }
    }
}

/// A convex solid.
#[derive(Debug, Clone, PartialEq)]
pub struct Brush {
    planes: Vec<Plane>,
    mins: Vec3,
    maxs: Vec3,
}

impl Brush {
    /// Build a brush from its bounds and any extra cutting planes.
    ///
    /// The six axial bounding planes are always included; they act as the
    /// bevels that keep box traces tight around edges.
    pub fn new(mins: Vec3, maxs: Vec3, extra: &[Plane]) -> Self {
        let mins = mins.min(maxs);
        let maxs = maxs.max(mins);
        let mut planes = vec![
            Plane { normal: Vec3::new(1.0, 0.0, 0.0), dist: maxs.x },
            Plane { normal: Vec3::new(-1.0, 0.0, 0.0), dist: -mins.x },
            Plane { normal: Vec3::new(0.0, 1.0, 0.0), dist: maxs.y },
            Plane { normal: Vec3::new(0.0, -1.0, 0.0), dist: -mins.y },
            Plane { normal: Vec3::new(0.0, 0.0, 1.0), dist: maxs.z },
            Plane { normal: Vec3::new(0.0, 0.0, -1.0), dist: -mins.z },
        ];
        planes.extend_from_slice(extra);
        Self { planes, mins, maxs }
    }

    /// Axis-aligned box.
    pub fn cuboid(mins: Vec3, maxs: Vec3) -> Self {
        Self::new(mins, maxs, &[])
    }

    /// Wedge filling the lower part of the box, rising along the horizontal
    /// axis `rise` (one of `±X`, `±Y`) from `mins.z` to `maxs.z`.
    pub fn ramp(mins: Vec3, maxs: Vec3, rise: Vec3) -> Self {
        let rise = rise.horizontal().normalize_or_zero();
        let extent = maxs - mins;
        let run = (extent.x * rise.x).abs() + (extent.y * rise.y).abs();
        let normal = rise.scale(-extent.z) + Vec3::UP.scale(run);
        let low = Vec3::new(
            if rise.x < 0.0 { maxs.x } else { mins.x },
            if rise.y < 0.0 { maxs.y } else { mins.y },
            mins.z,
        );
        Self::new(mins, maxs, &[Plane::through(normal, low)])
    }

    /// Bounding box minimum.
    pub fn mins(&self) -> Vec3 {
        self.mins
    }

    /// Bounding box maximum.
    pub fn maxs(&self) -> Vec3 {
        self.maxs
    }

    /// Clip a box moving from `start` to `end` against this brush.
    ///
    /// Returns the entry fraction and the plane normal that was crossed.
    /// A box that starts inside the brush passes through it.
    fn clip(&self, start: Vec3, end: Vec3, mins: Vec3, maxs: Vec3) -> Option<(f32, Vec3)> {
        let mut enter = -1.0f32;
        let mut leave = 1.0f32;
        let mut clip_normal = None;
        let mut start_out = false;

        for plane in &self.planes {
            let n = plane.normal;
            let offset = Vec3::new(
                if n.x < 0.0 { maxs.x } else { mins.x },
                if n.y < 0.0 { maxs.y } else { mins.y },
                if n.z < 0.0 { maxs.z } else { mins.z },
            );
            let dist = plane.dist - offset.dot(n);
            let d1 = start.dot(n) - dist;
            let d2 = end.dot(n) - dist;

            if d1 > 0.0 {
                start_out = true;
            }

            // Entirely in front of this plane: cannot touch the brush.
            if d1 > 0.0 && (d2 >= SURFACE_EPSILON || d2 >= d1) {
                return None;
            }

            if d1 <= 0.0 && d2 <= 0.0 {
                continue;
            }

            if d1 > d2 {
                let f = (d1 - SURFACE_EPSILON) / (d1 - d2);
                if f > enter {
                    enter = f;
                    clip_normal = Some(n);
                }
            } else {
                let f = (d1 + SURFACE_EPSILON) / (d1 - d2);
                if f < leave {
                    leave = f;
                }
            }
        }

        if !start_out {
            return None;
        }

        match clip_normal {
            Some(normal) if enter < leave && enter > -1.0 => Some((enter.max(0.0), normal)),
            _ => None,
        }
    }

    fn overlaps(&self, lo: Vec3, hi: Vec3) -> bool {
        lo.x <= self.maxs.x && hi.x >= self.mins.x
            && lo.y <= self.maxs.y && hi.y >= self.mins.y
            && lo.z <= self.maxs.z && hi.z >= self.mins.z
    }
}

/// Static world of convex brushes.
#[derive(Debug, Clone, Default)]
pub struct BrushWorld {
    brushes: Vec<Brush>,
}

impl BrushWorld {
    /// Create an empty world.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a brush.
    pub fn push(&mut self, brush: Brush) -> &mut Self {
        self.brushes.push(brush);
        self
    }

    /// Builder form of [`BrushWorld::push`].
    pub fn with(mut self, brush: Brush) -> Self {
        self.brushes.push(brush);
        self
    }

    /// Number of brushes.
    pub fn len(&self) -> usize {
        self.brushes.len()
    }

    /// True if the world has no brushes.
    pub fn is_empty(&self) -> bool {
        self.brushes.is_empty()
    }

    /// Flat 100 x 100 m floor whose top is at `z = 0`.
    pub fn flat_floor() -> Self {
        Self::new().with(Brush::cuboid(
            Vec3::new(-50.0, -50.0, -1.0),
            Vec3::new(50.0, 50.0, 0.0),
        ))
    }

    /// Small practice course: a floor with a step, a vaultable ledge, a tall
    /// wall, a surf ramp and a ceiling slab to grapple from.
    pub fn demo_course() -> Self {
        Self::flat_floor()
            // 0.3 m step
            .with(Brush::cuboid(Vec3::new(6.0, -2.0, 0.0), Vec3::new(8.0, 2.0, 0.3)))
            // 1.0 m ledge
            .with(Brush::cuboid(Vec3::new(12.0, -2.0, 0.0), Vec3::new(14.0, 2.0, 1.0)))
            // 3.0 m wall
            .with(Brush::cuboid(Vec3::new(20.0, -6.0, 0.0), Vec3::new(21.0, 6.0, 3.0)))
            // surf ramp rising towards +Y
            .with(Brush::ramp(Vec3::new(-10.0, 10.0, 0.0), Vec3::new(10.0, 14.0, 6.0), Vec3::new(0.0, 1.0, 0.0)))
            // ceiling slab
            .with(Brush::cuboid(Vec3::new(-20.0, -20.0, 12.0), Vec3::new(-5.0, -5.0, 13.0)))
    }
}

impl CollisionQuery for BrushWorld {
    fn sweep(&self, from: Vec3, to: Vec3, shape: &Capsule) -> Option<Hit> {
        let delta = to - from;
        if !from.is_finite() || !to.is_finite() || delta.length_squared() < 1e-12 {
            return None;
        }
        if !shape.radius.is_finite() || !shape.height.is_finite() {
            return None;
        }

        let mins = shape.mins();
        let maxs = shape.maxs();
        let pad = Vec3::new(SURFACE_EPSILON, SURFACE_EPSILON, SURFACE_EPSILON);
        let lo = from.min(to) + mins - pad;
        let hi = from.max(to) + maxs + pad;

        let mut best: Option<(f32, Vec3)> = None;
        for brush in &self.brushes {
            if !brush.overlaps(lo, hi) {
                continue;
            }
            if let Some((fraction, normal)) = brush.clip(from, to, mins, maxs) {
                if best.map_or(true, |(f, _)| fraction < f) {
                    best = Some((fraction, normal));
                }
            }
        }

        best.map(|(fraction, normal)| Hit {
            normal,
            fraction,
            position: from + delta.scale(fraction),
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn player() -> Capsule {
        Capsule::new(0.35, 1.8)
    }

    #[test]
    fn test_sweep_down_lands_on_floor() {
        let world = BrushWorld::flat_floor();
        let hit = world
            .sweep(Vec3::new(0.0, 0.0, 2.0), Vec3::new(0.0, 0.0, -2.0), &player())
            .expect("floor hit");
        assert_eq!(hit.normal, Vec3::UP);
        assert!(hit.position.z > 0.0 && hit.position.z < 0.01);
        assert!(hit.fraction > 0.0 && hit.fraction < 1.0);
    }

    #[test]
    fn test_sweep_into_wall_stops_at_radius() {
        let world = BrushWorld::new().with(Brush::cuboid(
            Vec3::new(5.0, -5.0, 0.0),
            Vec3::new(6.0, 5.0, 3.0),
        ));
        let hit = world
            .sweep(Vec3::new(0.0, 0.0, 0.5), Vec3::new(10.0, 0.0, 0.5), &player())
            .expect("wall hit");
        assert_eq!(hit.normal, Vec3::new(-1.0, 0.0, 0.0));
        assert!((hit.position.x - (5.0 - 0.35)).abs() < 0.01);
    }

    #[test]
    fn test_ray_ignores_shape_extents() {
        let world = BrushWorld::new().with(Brush::cuboid(
            Vec3::new(5.0, -5.0, 0.0),
            Vec3::new(6.0, 5.0, 3.0),
        ));
        let hit = world
            .ray(Vec3::new(0.0, 0.0, 1.0), Vec3::new(10.0, 0.0, 1.0))
            .expect("ray hit");
        assert!((hit.position.x - 5.0).abs() < 0.01);
    }

    #[test]
    fn test_degenerate_sweep_is_no_hit() {
        let world = BrushWorld::flat_floor();
        let p = Vec3::new(0.0, 0.0, 0.5);
        assert!(world.sweep(p, p, &player()).is_none());
        assert!(world.sweep(p, Vec3::new(f32::NAN, 0.0, 0.0), &player()).is_none());
    }

    #[test]
    fn test_start_inside_brush_passes_through() {
        let world = BrushWorld::flat_floor();
        let hit = world.sweep(Vec3::new(0.0, 0.0, -0.5), Vec3::new(1.0, 0.0, -0.5), &player());
        assert!(hit.is_none());
    }

    #[test]
    fn test_miss_above_geometry() {
        let world = BrushWorld::flat_floor();
        let hit = world.sweep(Vec3::new(0.0, 0.0, 1.0), Vec3::new(5.0, 0.0, 1.0), &player());
        assert!(hit.is_none());
    }

    #[test]
    fn test_ramp_normal_points_up_and_back() {
        let world = BrushWorld::new().with(Brush::ramp(
            Vec3::new(-5.0, 0.0, 0.0),
            Vec3::new(5.0, 4.0, 8.0),
            Vec3::new(0.0, 1.0, 0.0),
        ));
        let hit = world
            .ray(Vec3::new(0.0, 1.0, 10.0), Vec3::new(0.0, 1.0, -1.0))
            .expect("ramp hit");
        assert!(hit.normal.y < 0.0);
        assert!(hit.normal.z > 0.4 && hit.normal.z < 0.5);
        assert!((hit.position.z - 2.0).abs() < 0.01);
    }

    #[test]
    fn test_sweep_picks_nearest_brush() {
        let world = BrushWorld::new()
            .with(Brush::cuboid(Vec3::new(8.0, -1.0, 0.0), Vec3::new(9.0, 1.0, 2.0)))
            .with(Brush::cuboid(Vec3::new(4.0, -1.0, 0.0), Vec3::new(5.0, 1.0, 2.0)));
        let hit = world
            .ray(Vec3::new(0.0, 0.0, 1.0), Vec3::new(10.0, 0.0, 1.0))
            .expect("hit");
        assert!((hit.position.x - 4.0).abs() < 0.01);
    }
}
