//! Persisted state document and executor feedback.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::resource::Resource;

/// Current version of the state format.
pub const STATE_VERSION: u32 = 1;

const fn default_version() -> u32 {
    STATE_VERSION
}

/// Resources of one stage, keyed by group.
pub type StageResources = BTreeMap<String, Vec<Resource>>;

/// The whole state document: `{version, <stage>: {<group>: [Resource]}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDocument {
    /// State format version.
    #[serde(default = "default_version")]
    pub version: u32,
    /// Resources keyed by stage, then group.
    #[serde(flatten)]
    pub stages: BTreeMap<String, StageResources>,
}

impl Default for StateDocument {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            stages: BTreeMap::new(),
        }
    }
}

impl StateDocument {
    /// Returns the resources of a stage.
    #[must_use]
    pub fn stage(&self, stage: &str) -> Option<&StageResources> {
        self.stages.get(stage)
    }

    /// Replaces the resources of one group.
    pub fn set_group_resources(&mut self, stage: &str, group: &str, resources: Vec<Resource>) {
        self.stages
            .entry(stage.to_string())
            .or_default()
            .insert(group.to_string(), resources);
    }

    /// Returns the total number of resources of a stage.
    #[must_use]
    pub fn resource_count(&self, stage: &str) -> usize {
        self.stage(stage)
            .map_or(0, |groups| groups.values().map(Vec::len).sum())
    }
}

/// Resources the executor reports for a group after applying its changeset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Facts {
    /// Group the facts describe.
    pub group: String,
    /// Every resource of the group after execution.
    #[serde(default)]
    pub resources: Vec<Resource>,
}

/// Flags applied to every resource of a group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePatch {
    /// Sets the touched flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub touched: Option<bool>,
    /// Sets the tainted flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tainted: Option<bool>,
    /// Sets the reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl ResourcePatch {
    /// A patch that marks resources as touched.
    #[must_use]
    pub const fn touch() -> Self {
        Self {
            touched: Some(true),
            tainted: None,
            reference: None,
        }
    }

    /// A patch that marks resources as tainted.
    #[must_use]
    pub const fn taint() -> Self {
        Self {
            touched: None,
            tainted: Some(true),
            reference: None,
        }
    }

    /// Applies the patch to a resource.
    pub fn apply(&self, resource: &mut Resource) {
        if let Some(touched) = self.touched {
            resource.touched = touched;
        }
        if let Some(tainted) = self.tainted {
            resource.tainted = tainted;
        }
        if let Some(reference) = &self.reference {
            resource.reference = Some(reference.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Params;

    #[test]
    fn test_document_layout() {
        let mut document = StateDocument::default();
        document.set_group_resources(
            "production",
            "databases",
            vec![Resource::new("service-mysql-db", "databases", Params::new())],
        );

        let json = serde_json::to_value(&document).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["production"]["databases"][0]["id"], "service-mysql-db");
        assert_eq!(document.resource_count("production"), 1);
        assert_eq!(document.resource_count("staging"), 0);
    }

    #[test]
    fn test_document_parses_stages() {
        let content = r#"{
            "version": 1,
            "staging": {"instances": [{"id": "service-application-web", "group": "instances"}]}
        }"#;
        let document: StateDocument = serde_json::from_str(content).unwrap();
        assert_eq!(document.version, 1);
        assert_eq!(document.stage("staging").unwrap()["instances"].len(), 1);
    }

    #[test]
    fn test_missing_version_defaults() {
        let document: StateDocument = serde_json::from_str("{}").unwrap();
        assert_eq!(document, StateDocument::default());
    }

    #[test]
    fn test_patch_only_sets_given_fields() {
        let mut resource = Resource::new("utility-project", "project", Params::new());
        resource.tainted = true;

        ResourcePatch::touch().apply(&mut resource);
        assert!(resource.touched);
        assert!(resource.tainted);

        let patch = ResourcePatch {
            reference: Some("v1.2.0".to_string()),
            ..ResourcePatch::default()
        };
        patch.apply(&mut resource);
        assert_eq!(resource.reference.as_deref(), Some("v1.2.0"));
    }
}
