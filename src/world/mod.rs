//! World Queries
//!
//! The solver never sees level geometry directly. It asks a [`CollisionQuery`]
//! for swept-shape and ray hits and a [`pvs::LevelVisibility`] for network
//! relevance. Level loading lives outside this crate; [`brush::BrushWorld`]
//! is a small convex-brush world used by the binaries and the tests.

pub mod brush;
pub mod pvs;

use serde::{Serialize, Deserialize};

use crate::core::vec3::Vec3;

pub use brush::{Brush, BrushWorld};
pub use pvs::{LeafId, LeafVolumes, LevelVisibility};

/// Player collision shape.
///
/// The origin is the centre of the feet. Sweeps treat the capsule as its
/// bounding box: `(-radius, -radius, 0)` to `(radius, radius, height)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Capsule {
    /// Horizontal radius
    pub radius: f32,
    /// Full height from feet to top
    pub height: f32,
}

impl Capsule {
    /// Create a new capsule.
    pub const fn new(radius: f32, height: f32) -> Self {
        Self { radius, height }
    }

    /// Zero-sized shape (rays).
    pub const POINT: Self = Self { radius: 0.0, height: 0.0 };

    /// Box minimum relative to the origin.
    #[inline]
    pub fn mins(&self) -> Vec3 {
        Vec3::new(-self.radius, -self.radius, 0.0)
    }

    /// Box maximum relative to the origin.
    #[inline]
    pub fn maxs(&self) -> Vec3 {
        Vec3::new(self.radius, self.radius, self.height)
    }
}

/// Result of a sweep or ray that touched geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    /// Unit surface normal at the contact
    pub normal: Vec3,
    /// Fraction of the requested motion completed, in `[0, 1)`
    pub fraction: f32,
    /// Shape origin at the contact
    pub position: Vec3,
}

/// Swept collision against static level geometry.
///
/// Implementations must be deterministic for unchanged geometry. A degenerate
/// request (zero length, non-finite input) returns `None`.
pub trait CollisionQuery {
    /// Sweep `shape` from `from` to `to`; first blocking hit, if any.
    fn sweep(&self, from: Vec3, to: Vec3, shape: &Capsule) -> Option<Hit>;

    /// Cast a ray from `from` to `to`; first blocking hit, if any.
    fn ray(&self, from: Vec3, to: Vec3) -> Option<Hit> {
        self.sweep(from, to, &Capsule::POINT)
    }
}

impl<T: CollisionQuery + ?Sized> CollisionQuery for &T {
    fn sweep(&self, from: Vec3, to: Vec3, shape: &Capsule) -> Option<Hit> {
        (**self).sweep(from, to, shape)
    }

    fn ray(&self, from: Vec3, to: Vec3) -> Option<Hit> {
        (**self).ray(from, to)
    }
}

impl<T: CollisionQuery + ?Sized> CollisionQuery for std::sync::Arc<T> {
    fn sweep(&self, from: Vec3, to: Vec3, shape: &Capsule) -> Option<Hit> {
        (**self).sweep(from, to, shape)
    }

    fn ray(&self, from: Vec3, to: Vec3) -> Option<Hit> {
        (**self).ray(from, to)
    }
}

/// Geometry with nothing in it.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyWorld;

impl CollisionQuery for EmptyWorld {
    fn sweep(&self, _from: Vec3, _to: Vec3, _shape: &Capsule) -> Option<Hit> {
        None
    }
}
