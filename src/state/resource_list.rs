//! Resource lists.
//!
//! A [`ResourceList`] holds the recorded resources of one group together
//! with the provisions, modifications and terminations scheduled while
//! planning. Whatever is in no bucket is unchanged.

use std::collections::BTreeSet;
use tracing::debug;

use crate::deployable::Deployable;
use crate::planner::Changeset;

use super::resource::{Resource, ResourceKey};

/// Recorded resources of one group plus the changes planned for them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceList {
    resources: Vec<Resource>,
    provisions: Vec<Resource>,
    modifications: Vec<Resource>,
    terminations: Vec<Resource>,
}

/// Appends a resource, replacing an earlier entry with the same key.
fn push_unique(bucket: &mut Vec<Resource>, resource: Resource) {
    let key = resource.key();
    match bucket.iter_mut().find(|entry| entry.key() == key) {
        Some(entry) => *entry = resource,
        None => bucket.push(resource),
    }
}

impl ResourceList {
    /// Creates a list from recorded resources.
    #[must_use]
    pub const fn new(resources: Vec<Resource>) -> Self {
        Self {
            resources,
            provisions: Vec::new(),
            modifications: Vec::new(),
            terminations: Vec::new(),
        }
    }

    /// Returns the recorded resources.
    #[must_use]
    pub fn all(&self) -> &[Resource] {
        &self.resources
    }

    /// Returns the number of recorded resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns whether no resource is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Consumes the list, returning the recorded resources.
    #[must_use]
    pub fn into_resources(self) -> Vec<Resource> {
        self.resources
    }

    /// Finds the resources of a deployable.
    ///
    /// Falls back to scheduled provisions when nothing is recorded.
    #[must_use]
    pub fn find(&self, deployable: &Deployable) -> Vec<&Resource> {
        let recorded: Vec<&Resource> = self
            .resources
            .iter()
            .filter(|r| r.refers_to(deployable))
            .collect();
        if !recorded.is_empty() {
            return recorded;
        }
        self.provisions
            .iter()
            .filter(|r| r.refers_to(deployable))
            .collect()
    }

    /// Finds the first recorded resource with an identity.
    #[must_use]
    pub fn find_by_id(&self, id: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.id == id)
    }

    /// Returns whether a deployable has a recorded resource.
    #[must_use]
    pub fn exists(&self, deployable: &Deployable) -> bool {
        self.resources.iter().any(|r| r.refers_to(deployable))
    }

    /// Schedules a deployable for provisioning.
    pub fn provision(&mut self, deployable: &Deployable) {
        self.provision_resource(deployable.as_resource());
    }

    /// Schedules the recorded resources of a deployable for modification.
    ///
    /// Returns false when nothing is recorded for it.
    pub fn modify(&mut self, deployable: &Deployable) -> bool {
        let desired = deployable.as_resource();
        let updates: Vec<Resource> = self
            .resources
            .iter()
            .filter(|r| r.refers_to(deployable))
            .map(|current| current.superseded_by(&desired))
            .collect();

        let found = !updates.is_empty();
        for update in updates {
            self.modify_resource(update);
        }
        found
    }

    /// Schedules the recorded resources of a deployable for termination.
    pub fn terminate(&mut self, deployable: &Deployable) {
        let doomed: Vec<Resource> = self
            .resources
            .iter()
            .filter(|r| r.refers_to(deployable))
            .cloned()
            .collect();
        for resource in doomed {
            self.terminate_resource(resource);
        }
    }

    /// Schedules a resource for provisioning.
    pub fn provision_resource(&mut self, resource: Resource) {
        debug!("Provision {} ({:?})", resource.id, resource.node_index);
        push_unique(&mut self.provisions, resource);
    }

    /// Schedules a resource for modification.
    pub fn modify_resource(&mut self, resource: Resource) {
        debug!("Modify {} ({:?})", resource.id, resource.node_index);
        push_unique(&mut self.modifications, resource);
    }

    /// Schedules a resource for termination.
    pub fn terminate_resource(&mut self, resource: Resource) {
        debug!("Terminate {} ({:?})", resource.id, resource.node_index);
        push_unique(&mut self.terminations, resource);
    }

    /// Terminates every recorded resource no desired deployable refers to.
    pub fn terminate_unused_resources(&mut self, desired: &[Deployable]) {
        let ids: BTreeSet<&str> = desired.iter().map(Deployable::deployable_id).collect();
        let unused: Vec<Resource> = self
            .resources
            .iter()
            .filter(|r| !ids.contains(r.id.as_str()))
            .cloned()
            .collect();
        for resource in unused {
            self.terminate_resource(resource);
        }
    }

    /// Promotes touched resources to modifications.
    pub fn modify_touched_resources(&mut self) {
        let touched: Vec<Resource> = self
            .resources
            .iter()
            .filter(|r| r.touched)
            .cloned()
            .collect();
        for resource in touched {
            self.modify_resource(resource);
        }
    }

    /// Replaces the recorded resources of an identity with their nodes.
    ///
    /// Scheduled entries for the unexpanded form are dropped.
    pub fn reset(&mut self, id: &str, nodes: Vec<Resource>) {
        let parent: ResourceKey = (id.to_string(), None);
        self.resources.retain(|r| r.id != id);
        self.resources.extend(nodes);
        for bucket in [
            &mut self.provisions,
            &mut self.modifications,
            &mut self.terminations,
        ] {
            bucket.retain(|r| r.key() != parent);
        }
    }

    fn scheduled_keys(&self) -> BTreeSet<ResourceKey> {
        self.provisions
            .iter()
            .chain(&self.modifications)
            .chain(&self.terminations)
            .map(Resource::key)
            .collect()
    }

    /// Returns the recorded resources no bucket mentions.
    #[must_use]
    pub fn unchanged(&self) -> Vec<&Resource> {
        let scheduled = self.scheduled_keys();
        self.resources
            .iter()
            .filter(|r| !scheduled.contains(&r.key()))
            .collect()
    }

    /// Returns whether anything is scheduled.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !(self.provisions.is_empty() && self.modifications.is_empty() && self.terminations.is_empty())
    }

    /// Serializes the scheduled changes.
    ///
    /// A resource scheduled for termination is never also modified.
    #[must_use]
    pub fn serialize(&self) -> Changeset {
        let terminated: BTreeSet<ResourceKey> =
            self.terminations.iter().map(Resource::key).collect();
        let modifications: Vec<Resource> = self
            .modifications
            .iter()
            .filter(|r| !terminated.contains(&r.key()))
            .cloned()
            .collect();

        Changeset {
            provisions: self.provisions.clone(),
            modifications,
            terminations: self.terminations.clone(),
            unchanged: self.unchanged().into_iter().cloned().collect(),
            has_changes: self.has_changes(),
        }
    }
}

impl From<Vec<Resource>> for ResourceList {
    fn from(resources: Vec<Resource>) -> Self {
        Self::new(resources)
    }
}
