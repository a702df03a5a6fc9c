//! Stage-scoped view over the state document.
//!
//! [`State`] reads resource lists for a group and merges what the executor
//! reports back into the document. Credentials and other preserved output
//! keys survive an update that reports them empty.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::deployable::Deployable;
use crate::error::{Result, StateError};
use crate::params::{Params, get_str, is_truthy};

use super::resource::Resource;
use super::resource_list::ResourceList;
use super::store::StateStore;
use super::types::{Facts, ResourcePatch, STATE_VERSION, StateDocument};

/// Output keys kept when an update reports them empty.
pub const DEFAULT_PRESERVED_KEYS: &[&str] = &[
    "username",
    "password",
    "root_username",
    "root_password",
    "key_id",
    "secret",
    "host",
    "smtp_username",
    "smtp_password",
    "smtp_host",
];

/// The state of one stage.
#[derive(Debug, Clone)]
pub struct State {
    document: StateDocument,
    stage: String,
    preserved_keys: BTreeSet<String>,
}

impl State {
    /// Wraps a document for one stage.
    #[must_use]
    pub fn new(document: StateDocument, stage: impl Into<String>) -> Self {
        Self {
            document,
            stage: stage.into(),
            preserved_keys: DEFAULT_PRESERVED_KEYS.iter().map(|k| (*k).to_string()).collect(),
        }
    }

    /// Replaces the output keys preserved on update.
    #[must_use]
    pub fn with_preserved_keys(mut self, keys: impl IntoIterator<Item = String>) -> Self {
        self.preserved_keys = keys.into_iter().collect();
        self
    }

    /// Loads the state of a stage from a store.
    ///
    /// A missing document yields an empty state.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be read or was written by a
    /// newer version.
    pub async fn load(store: &dyn StateStore, stage: &str) -> Result<Self> {
        let document = store.load().await?.unwrap_or_default();

        if document.version > STATE_VERSION {
            return Err(StateError::VersionMismatch {
                expected: STATE_VERSION,
                found: document.version,
            }
            .into());
        }

        debug!(
            "Loaded {} resources for stage '{stage}' from {} store",
            document.resource_count(stage),
            store.backend_type()
        );
        Ok(Self::new(document, stage))
    }

    /// Writes the whole document back.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails to write.
    pub async fn save(&self, store: &dyn StateStore) -> Result<()> {
        store.save(&self.document).await
    }

    /// Returns the stage.
    #[must_use]
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Returns the underlying document.
    #[must_use]
    pub const fn document(&self) -> &StateDocument {
        &self.document
    }

    /// Returns the groups recorded for the stage.
    #[must_use]
    pub fn groups(&self) -> Vec<String> {
        self.document
            .stage(&self.stage)
            .map(|groups| groups.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn group_resources(&self, group: &str) -> &[Resource] {
        self.document
            .stage(&self.stage)
            .and_then(|groups| groups.get(group))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Returns the resources of a group.
    #[must_use]
    pub fn get_resources(&self, group: &str) -> ResourceList {
        ResourceList::new(self.group_resources(group).to_vec())
    }

    /// Returns the resources of one deployable.
    #[must_use]
    pub fn get_deployable_resources(&self, deployable: &Deployable) -> ResourceList {
        let resources = self
            .group_resources(deployable.group())
            .iter()
            .filter(|r| r.refers_to(deployable))
            .cloned()
            .collect();
        ResourceList::new(resources)
    }

    /// Returns the resources of a group with an identity.
    #[must_use]
    pub fn find_resources(&self, group: &str, id: &str) -> Vec<&Resource> {
        self.group_resources(group)
            .iter()
            .filter(|r| r.id == id)
            .collect()
    }

    /// Returns the single resource of a group with an identity.
    ///
    /// # Errors
    ///
    /// Returns an error if more than one resource matches.
    pub fn unique_resource(&self, group: &str, id: &str) -> Result<Option<&Resource>> {
        match self.find_resources(group, id).as_slice() {
            [] => Ok(None),
            [resource] => Ok(Some(*resource)),
            found => Err(StateError::Inconsistent {
                group: group.to_string(),
                found: found.len(),
            }
            .into()),
        }
    }

    /// Returns the output of a group expected to hold a single resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the group holds more than one resource.
    pub fn singleton_output(&self, group: &str) -> Result<Option<&Params>> {
        match self.group_resources(group) {
            [] => Ok(None),
            [resource] => Ok(Some(&resource.output)),
            found => Err(StateError::Inconsistent {
                group: group.to_string(),
                found: found.len(),
            }
            .into()),
        }
    }

    /// Merges the resources reported for a group and replaces the group.
    ///
    /// Node records sharing an identity are folded into one record. Output
    /// keys in the preserved list keep their previous value when reported
    /// empty, and flags are cleared.
    pub fn update(&mut self, group: &str, incoming: Vec<Resource>) {
        let previous = self.group_resources(group).to_vec();
        let merged: Vec<Resource> = fold_node_records(incoming)
            .into_iter()
            .map(|resource| self.merge(group, resource, &previous))
            .collect();

        info!("Recorded {} resources for group '{group}'", merged.len());
        self.document
            .set_group_resources(&self.stage, group, merged);
    }

    fn merge(&self, group: &str, mut resource: Resource, previous: &[Resource]) -> Resource {
        if let Some(current) = previous.iter().find(|r| r.id == resource.id) {
            let mut output = current.output.clone();
            for (key, value) in std::mem::take(&mut resource.output) {
                if self.preserved_keys.contains(&key) && !is_truthy(&value) {
                    if output.contains_key(&key) {
                        debug!("Preserving '{key}' of {}", resource.id);
                    }
                    output.entry(key).or_insert(value);
                    continue;
                }
                output.insert(key, value);
            }
            resource.output = output;
            resource.created_at = current.created_at;
        }

        if resource.group.is_empty() {
            resource.group = group.to_string();
        }
        resource.reference = get_str(&resource.provision_params, "reference").map(str::to_string);
        resource.tainted = false;
        resource.touched = false;
        resource
    }

    /// Applies the facts reported by the executor.
    pub fn apply_facts(&mut self, facts: Facts) {
        self.update(&facts.group, facts.resources);
    }

    /// Applies a patch to every resource of a group.
    ///
    /// Returns the number of resources patched.
    pub fn merge_group_resource_attributes(&mut self, group: &str, patch: &ResourcePatch) -> usize {
        let Some(resources) = self
            .document
            .stages
            .get_mut(&self.stage)
            .and_then(|groups| groups.get_mut(group))
        else {
            warn!("No resources recorded for group '{group}'");
            return 0;
        };

        for resource in resources.iter_mut() {
            patch.apply(resource);
        }
        resources.len()
    }
}

/// Folds node records sharing an identity, keeping first-seen order.
fn fold_node_records(incoming: Vec<Resource>) -> Vec<Resource> {
    let mut order: Vec<String> = Vec::new();
    let mut nodes: BTreeMap<String, Vec<Resource>> = BTreeMap::new();
    let mut folded: Vec<Resource> = Vec::with_capacity(incoming.len());

    for resource in incoming {
        if resource.node_index.is_some() {
            if !nodes.contains_key(&resource.id) {
                order.push(resource.id.clone());
            }
            nodes.entry(resource.id.clone()).or_default().push(resource);
        } else {
            folded.push(resource);
        }
    }

    for id in order {
        if let Some(mut group) = nodes.remove(&id) {
            group.sort_by_key(|node| node.node_index);
            folded.extend(Resource::fold_nodes(&group));
        }
    }
    folded
}
