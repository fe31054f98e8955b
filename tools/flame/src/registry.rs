//! The target registry of one resolution pass.

use std::collections::BTreeMap;

use crate::model::{Target, TargetId};

/// All registered targets, keyed by [`TargetId`].
///
/// Insertion is idempotent: the first registration of an id wins and later
/// ones are ignored. Iteration follows `TargetId` order.
#[derive(Debug, Default)]
pub struct TargetRegistry {
    targets: BTreeMap<TargetId, Target>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `target` unless its id is already present.
    ///
    /// Returns `true` if the target was inserted.
    pub fn insert(&mut self, target: Target) -> bool {
        if self.targets.contains_key(&target.id) {
            return false;
        }
        self.targets.insert(target.id.clone(), target);
        true
    }

    pub fn contains(&self, id: &TargetId) -> bool {
        self.targets.contains_key(id)
    }

    pub fn get(&self, id: &TargetId) -> Option<&Target> {
        self.targets.get(id)
    }

    /// Mutable access for closure aggregation.
    pub(crate) fn get_mut(&mut self, id: &TargetId) -> Option<&mut Target> {
        self.targets.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Target> {
        self.targets.values()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }
}
