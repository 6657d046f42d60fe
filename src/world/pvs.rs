//! Potentially Visible Sets
//!
//! Leaf lookup and per-leaf visibility lists used to scope snapshots.
//! Only network relevance reads this; nothing here affects simulation.

use std::collections::{BTreeMap, BTreeSet};

use crate::core::vec3::Vec3;

/// Identifier of a visibility leaf.
pub type LeafId = u32;

/// Source of leaf membership and visibility.
pub trait LevelVisibility: Send + Sync {
    /// Leaf containing `position`, or `None` if unknown or ambiguous.
    fn leaf_for_position(&self, position: Vec3) -> Option<LeafId>;

    /// Leaves potentially visible from `leaf`, or `None` if not recorded.
    fn pvs_set(&self, leaf: LeafId) -> Option<&BTreeSet<LeafId>>;
}

/// Axis-aligned leaf volume.
#[derive(Debug, Clone, Copy, PartialEq)]
struct LeafVolume {
    id: LeafId,
    mins: Vec3,
    maxs: Vec3,
}

impl LeafVolume {
    fn contains(&self, p: Vec3) -> bool {
        p.x >= self.mins.x && p.x <= self.maxs.x
            && p.y >= self.mins.y && p.y <= self.maxs.y
            && p.z >= self.mins.z && p.z <= self.maxs.z
    }
}

/// Visibility built from boxes and explicit leaf-to-leaf lists.
///
/// A point inside more than one box is treated as ambiguous and maps to no
/// leaf, so it is visible to everyone.
#[derive(Debug, Clone, Default)]
pub struct LeafVolumes {
    leaves: Vec<LeafVolume>,
    visible: BTreeMap<LeafId, BTreeSet<LeafId>>,
}

impl LeafVolumes {
    /// Create an empty visibility graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a leaf volume. Every leaf can see itself.
    pub fn add_leaf(&mut self, id: LeafId, mins: Vec3, maxs: Vec3) -> &mut Self {
        self.leaves.push(LeafVolume { id, mins: mins.min(maxs), maxs: maxs.max(mins) });
        self.visible.entry(id).or_default().insert(id);
        self
    }

    /// Record that `from` can see each leaf in `to`.
    pub fn set_visible(&mut self, from: LeafId, to: &[LeafId]) -> &mut Self {
        let set = self.visible.entry(from).or_default();
        set.insert(from);
        set.extend(to.iter().copied());
        self
    }

    /// Number of leaves.
    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }
}

impl LevelVisibility for LeafVolumes {
    fn leaf_for_position(&self, position: Vec3) -> Option<LeafId> {
        let mut found = None;
        for leaf in &self.leaves {
            if leaf.contains(position) {
                if found.is_some() {
                    return None;
                }
                found = Some(leaf.id);
            }
        }
        found
    }

    fn pvs_set(&self, leaf: LeafId) -> Option<&BTreeSet<LeafId>> {
        self.visible.get(&leaf)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_lookup() {
        let mut vis = LeafVolumes::new();
        vis.add_leaf(1, Vec3::new(0.0, 0.0, 0.0), Vec3::new(10.0, 10.0, 10.0));
        vis.add_leaf(2, Vec3::new(20.0, 0.0, 0.0), Vec3::new(30.0, 10.0, 10.0));
        assert_eq!(vis.leaf_count(), 2);

        assert_eq!(vis.leaf_for_position(Vec3::new(5.0, 5.0, 1.0)), Some(1));
        assert_eq!(vis.leaf_for_position(Vec3::new(25.0, 5.0, 1.0)), Some(2));
        assert_eq!(vis.leaf_for_position(Vec3::new(15.0, 5.0, 1.0)), None);
    }

    #[test]
    fn test_overlapping_leaves_are_ambiguous() {
        let mut vis = LeafVolumes::new();
        vis.add_leaf(1, Vec3::new(0.0, 0.0, 0.0), Vec3::new(10.0, 10.0, 10.0));
        vis.add_leaf(2, Vec3::new(5.0, 0.0, 0.0), Vec3::new(15.0, 10.0, 10.0));
        assert_eq!(vis.leaf_for_position(Vec3::new(7.0, 5.0, 1.0)), None);
    }

    #[test]
    fn test_leaf_sees_itself() {
        let mut vis = LeafVolumes::new();
        vis.add_leaf(3, Vec3::ZERO, Vec3::new(1.0, 1.0, 1.0));
        vis.set_visible(3, &[4]);
        let set = vis.pvs_set(3).expect("set");
        assert!(set.contains(&3));
        assert!(set.contains(&4));
    }
}
