//! Snapshot Relevance
//!
//! Decides which remote players go into a viewer's snapshot. With a PVS the
//! test is leaf membership; without one it is plain distance. Anything
//! uncertain counts as visible.

use std::sync::Arc;

use crate::world::pvs::{LeafId, LevelVisibility};
use super::protocol::{PlayerId, PlayerRow};

/// Distance used when no visibility data is loaded (metres).
pub const DEFAULT_FALLBACK_DISTANCE: f32 = 60.0;

/// True if a candidate in `candidate_leaf` may be visible from `viewer_leaf`.
///
/// Unknown leaves and leaves without a recorded set are visible.
pub fn is_relevant<V: LevelVisibility + ?Sized>(
    viewer_leaf: Option<LeafId>,
    candidate_leaf: Option<LeafId>,
    pvs: &V,
) -> bool {
    match (viewer_leaf, candidate_leaf) {
        (Some(viewer), Some(candidate)) => pvs
            .pvs_set(viewer)
            .map_or(true, |set| set.contains(&candidate)),
        _ => true,
    }
}

/// Per-viewer row filter.
#[derive(Clone)]
pub struct RelevanceFilter {
    visibility: Option<Arc<dyn LevelVisibility>>,
    fallback_distance: f32,
}

impl std::fmt::Debug for RelevanceFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelevanceFilter")
            .field("pvs", &self.has_pvs())
            .field("fallback_distance", &self.fallback_distance)
            .finish()
    }
}

impl Default for RelevanceFilter {
    fn default() -> Self {
        Self::distance_only(DEFAULT_FALLBACK_DISTANCE)
    }
}

impl RelevanceFilter {
    /// Filter driven by PVS data.
    pub fn with_visibility(visibility: Arc<dyn LevelVisibility>) -> Self {
        Self { visibility: Some(visibility), fallback_distance: DEFAULT_FALLBACK_DISTANCE }
    }

    /// Filter by distance alone.
    pub fn distance_only(distance: f32) -> Self {
        Self { visibility: None, fallback_distance: distance }
    }

    /// True if PVS data is in use.
    pub fn has_pvs(&self) -> bool {
        self.visibility.is_some()
    }

    /// Ids from `rows` relevant to `viewer`, in row order.
    ///
    /// The viewer always sees itself. A viewer missing from `rows` sees
    /// everyone.
    pub fn visible_ids(&self, viewer: PlayerId, rows: &[PlayerRow]) -> Vec<PlayerId> {
        let Some(me) = rows.iter().find(|r| r.id == viewer) else {
            return rows.iter().map(|r| r.id).collect();
        };

        match &self.visibility {
            Some(pvs) => {
                let viewer_leaf = pvs.leaf_for_position(me.position());
                rows.iter()
                    .filter(|r| {
                        r.id == viewer
                            || is_relevant(viewer_leaf, pvs.leaf_for_position(r.position()), pvs.as_ref())
                    })
                    .map(|r| r.id)
                    .collect()
            }
            None => {
                let max_sq = self.fallback_distance * self.fallback_distance;
                rows.iter()
                    .filter(|r| {
                        let d_sq = (r.position() - me.position()).length_squared();
                        // NaN distances fall through as visible
                        r.id == viewer || !(d_sq > max_sq)
                    })
                    .map(|r| r.id)
                    .collect()
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
