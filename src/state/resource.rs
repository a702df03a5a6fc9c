//! Resource records.
//!
//! A [`Resource`] is the persisted record of one provisioned unit, or an
//! entry of a changeset while planning. Expandable services are recorded as
//! one resource whose output lists its `nodes`; planning works on the
//! expanded per-node form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::deployable::Deployable;
use crate::params::{Params, get_str};
use crate::planner::{ParamDiff, diff_params};

/// Record of one provisioned unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Identity of the deployable the resource belongs to.
    pub id: String,
    /// Provisioning group.
    #[serde(default)]
    pub group: String,
    /// When the resource was first provisioned.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Parameters the resource was provisioned with.
    #[serde(default)]
    pub provision_params: Params,
    /// Opaque provider response.
    #[serde(default)]
    pub result: Value,
    /// Provider output (hosts, ports, credentials, nodes).
    #[serde(default)]
    pub output: Params,
    /// Forces a destructive replacement on the next pass.
    #[serde(default)]
    pub tainted: bool,
    /// Forces a modification on the next pass.
    #[serde(default)]
    pub touched: bool,
    /// Last applied version or commit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Index of the node, for the expanded form of expandable services.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_index: Option<usize>,
}

/// Key deduplicating changeset entries: identity plus node index.
pub type ResourceKey = (String, Option<usize>);

impl Resource {
    /// Creates a resource that has not been provisioned yet.
    #[must_use]
    pub fn new(id: &str, group: &str, provision_params: Params) -> Self {
        Self {
            id: id.to_string(),
            group: group.to_string(),
            created_at: Utc::now(),
            provision_params,
            result: Value::Null,
            output: Params::new(),
            tainted: false,
            touched: false,
            reference: None,
            node_index: None,
        }
    }

    /// Returns the logical name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        get_str(&self.provision_params, "name")
    }

    /// Returns the deduplication key.
    #[must_use]
    pub fn key(&self) -> ResourceKey {
        (self.id.clone(), self.node_index)
    }

    /// Returns whether the resource belongs to a deployable.
    #[must_use]
    pub fn refers_to(&self, deployable: &Deployable) -> bool {
        self.id == deployable.deployable_id()
    }

    /// Marks the resource for replacement.
    pub const fn taint(&mut self) {
        self.tainted = true;
    }

    /// Marks the resource for modification.
    pub const fn touch(&mut self) {
        self.touched = true;
    }

    /// Returns the attributes that differ from a desired snapshot.
    #[must_use]
    pub fn diff_params(&self, desired: &Params) -> ParamDiff {
        diff_params(&self.provision_params, desired)
    }

    /// Builds the record of one node of this resource.
    ///
    /// The node is named `<name>-<index>` unless a name is given.
    #[must_use]
    pub fn for_node(&self, index: usize, name: Option<&str>) -> Self {
        let mut node = self.clone();
        let name = name.map_or_else(
            || format!("{}-{index}", self.name().unwrap_or(&self.id)),
            str::to_string,
        );

        node.provision_params.remove("nodes");
        node.provision_params
            .insert("name".to_string(), Value::String(name));
        node.output = Params::new();
        node.node_index = Some(index);
        node
    }

    /// Expands the recorded `nodes` output into per-node resources.
    ///
    /// A resource without recorded nodes is its own single node.
    #[must_use]
    pub fn node_list(&self) -> Vec<Self> {
        let nodes = self
            .output
            .get("nodes")
            .and_then(Value::as_array)
            .filter(|nodes| !nodes.is_empty());

        let Some(nodes) = nodes else {
            if self.node_index.is_some() {
                return vec![self.clone()];
            }
            let mut node = self.for_node(1, None);
            node.output = self.output.clone();
            node.output.remove("nodes");
            return vec![node];
        };

        nodes
            .iter()
            .enumerate()
            .map(|(position, entry)| {
                let output = entry.as_object().cloned().unwrap_or_default();
                let name = get_str(&output, "name").map(str::to_string);
                let index = name
                    .as_deref()
                    .and_then(node_suffix)
                    .unwrap_or(position + 1);

                let mut node = self.for_node(index, name.as_deref());
                node.output = output;
                node
            })
            .collect()
    }

    /// Folds per-node records back into the single record stored in state.
    ///
    /// Returns `None` for an empty slice.
    #[must_use]
    pub fn fold_nodes(nodes: &[Self]) -> Option<Self> {
        let first = nodes.first()?;
        let mut parent = first.clone();
        parent.node_index = None;

        if let Some(name) = first.name() {
            let base = match (first.node_index, name.rsplit_once('-')) {
                (Some(index), Some((base, suffix))) if suffix == index.to_string() => base,
                _ => name,
            };
            parent
                .provision_params
                .insert("name".to_string(), Value::from(base.to_string()));
        }
        parent
            .provision_params
            .insert("nodes".to_string(), Value::from(nodes.len()));

        let entries: Vec<Value> = nodes
            .iter()
            .map(|node| {
                let mut entry = node.output.clone();
                if let Some(name) = node.name() {
                    entry.insert("name".to_string(), Value::from(name));
                }
                Value::Object(entry)
            })
            .collect();

        parent.output = Params::new();
        parent
            .output
            .insert("nodes".to_string(), Value::Array(entries));
        parent.created_at = nodes
            .iter()
            .map(|node| node.created_at)
            .min()
            .unwrap_or(first.created_at);
        Some(parent)
    }

    /// Replaces the parameters with those of a desired record, keeping what
    /// the provider reported for this one.
    #[must_use]
    pub fn superseded_by(&self, desired: &Self) -> Self {
        Self {
            provision_params: desired.provision_params.clone(),
            reference: desired.reference.clone(),
            ..self.clone()
        }
    }
}

fn node_suffix(name: &str) -> Option<usize> {
    name.rsplit_once('-')
        .and_then(|(_, suffix)| suffix.parse().ok())
}
