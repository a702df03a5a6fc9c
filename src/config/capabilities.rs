//! Capability tables.
//!
//! The tables describe which kinds exist, which provider manages them, how
//! they map to provisioning groups and what attributes they accept. They are
//! plain data: adding a kind is a table change, not a code change.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::debug;

use crate::deployable::AttributeSpec;
use crate::error::{ConfigError, Result, StackplanError};

/// Built-in tables shipped with the binary.
const BUILTIN_CAPABILITIES: &str = include_str!("capabilities.yaml");

/// Per-kind attribute schemas.
pub type AttributeTable = BTreeMap<String, BTreeMap<String, AttributeSpec>>;

/// Root of the capability tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    /// Table format version.
    #[serde(default = "default_version")]
    pub version: u32,

    /// Known providers.
    #[serde(default)]
    pub providers: Vec<String>,

    /// Group mapping and group dependency graph.
    pub groups: GroupTable,

    /// Kinds that spawn a variable number of indexed nodes.
    #[serde(default)]
    pub expandable_kinds: BTreeSet<String>,

    /// Attributes never considered by change detection.
    #[serde(default)]
    pub diff_ignore_keys: BTreeSet<String>,

    /// Output keys whose previous value survives a falsy update.
    #[serde(default)]
    pub preserved_output_keys: BTreeSet<String>,

    /// Credential-bearing output fields.
    #[serde(default)]
    pub credentials: CredentialTable,

    /// Service tables.
    pub services: ServiceTable,

    /// Dependency tables.
    #[serde(default)]
    pub dependencies: DependencyTable,

    /// Available versions per kind.
    #[serde(default)]
    pub versions: BTreeMap<String, VersionTable>,

    /// Utility tables.
    #[serde(default)]
    pub utilities: UtilityTable,

    /// Environment entries every service of a kind exports.
    #[serde(default)]
    pub default_environment: BTreeMap<String, BTreeMap<String, String>>,
}

/// Group mapping and dependency graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupTable {
    /// Kind to provisioning group.
    #[serde(default)]
    pub kinds: BTreeMap<String, String>,

    /// Groups that must converge before a group.
    #[serde(default)]
    pub depends_on: BTreeMap<String, Vec<String>>,

    /// Groups executed on every run, changed or not.
    #[serde(default)]
    pub omnipresent: BTreeSet<String>,
}

/// Credential fields that a provider generates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialTable {
    /// Providers that generate credentials.
    #[serde(default)]
    pub providers: BTreeSet<String>,

    /// Credential output fields per group.
    #[serde(default)]
    pub keys: BTreeMap<String, Vec<String>>,
}

/// Kinds that collapse into a generic provisionable host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StandaloneTable {
    /// Kind the standalone service is provisioned as.
    pub kind: String,

    /// Kinds that can run standalone.
    #[serde(default)]
    pub kinds: BTreeSet<String>,
}

/// Service tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceTable {
    /// Generically provisionable kinds.
    #[serde(default)]
    pub available: BTreeSet<String>,

    /// Kinds that can run on a plain host.
    #[serde(default)]
    pub standalone: StandaloneTable,

    /// Kinds managed per provider.
    #[serde(default)]
    pub managed: BTreeMap<String, BTreeSet<String>>,

    /// Kinds that sit behind a load balancer.
    #[serde(default)]
    pub load_balanced: BTreeSet<String>,

    /// Replacement triggers: `default` plus per-kind lists.
    #[serde(default)]
    pub replacement_triggers: BTreeMap<String, Vec<String>>,

    /// Groups a provider never replaces.
    #[serde(default)]
    pub replacement_exempt: BTreeMap<String, BTreeSet<String>>,

    /// Per-kind attribute schemas.
    #[serde(default)]
    pub attributes: AttributeTable,
}

/// Dependency tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyTable {
    /// Available dependency kinds.
    #[serde(default)]
    pub available: BTreeSet<String>,

    /// Per-kind attribute schemas.
    #[serde(default)]
    pub attributes: AttributeTable,
}

/// Available versions of a kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionTable {
    /// Accepted versions.
    pub available: Vec<String>,
    /// Version used when none is given.
    pub default: String,
}

/// Utility tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UtilityTable {
    /// Utilities available everywhere.
    #[serde(default)]
    pub available: BTreeSet<String>,

    /// Utilities managed per provider.
    #[serde(default)]
    pub managed: BTreeMap<String, BTreeSet<String>>,

    /// Default host groups per utility.
    #[serde(default)]
    pub host_groups: BTreeMap<String, Vec<String>>,

    /// Per-kind attribute schemas.
    #[serde(default)]
    pub attributes: AttributeTable,
}

const fn default_version() -> u32 {
    1
}

impl Capabilities {
    /// Returns the built-in capability tables.
    ///
    /// # Errors
    ///
    /// Returns an error if the embedded tables are malformed.
    pub fn builtin() -> Result<Self> {
        Self::from_yaml(BUILTIN_CAPABILITIES, None)
    }

    /// Loads capability tables from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or is inconsistent.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }
            .into());
        }

        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content, Some(path.display().to_string()))
    }

    /// Parses capability tables from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid or the tables are inconsistent.
    pub fn from_yaml(content: &str, location: Option<String>) -> Result<Self> {
        let capabilities: Self = serde_yaml::from_str(content)
            .map_err(|e| ConfigError::parse(format!("YAML parse error: {e}"), location))?;
        capabilities.check()?;
        debug!(
            "Loaded capabilities: {} kinds, {} providers",
            capabilities.groups.kinds.len(),
            capabilities.providers.len()
        );
        Ok(capabilities)
    }

    /// Checks cross-table references.
    fn check(&self) -> Result<()> {
        let standalone = &self.services.standalone;
        if !standalone.kinds.is_empty() && !self.groups.kinds.contains_key(&standalone.kind) {
            return Err(invalid(format!(
                "standalone kind '{}' is not mapped to a group",
                standalone.kind
            )));
        }

        for provider in self
            .services
            .managed
            .keys()
            .chain(self.utilities.managed.keys())
        {
            if !self.providers.contains(provider) {
                return Err(invalid(format!("unknown provider '{provider}'")));
            }
        }

        for (kind, versions) in &self.versions {
            if !versions.available.contains(&versions.default) {
                return Err(invalid(format!(
                    "default version '{}' of '{kind}' is not available",
                    versions.default
                )));
            }
        }

        Ok(())
    }

    /// Returns the provisioning group of a kind.
    #[must_use]
    pub fn group_for(&self, kind: &str) -> Option<&str> {
        self.groups.kinds.get(kind).map(String::as_str)
    }

    /// Returns the groups a group depends on.
    #[must_use]
    pub fn depends_on(&self, group: &str) -> &[String] {
        self.groups.depends_on.get(group).map(Vec::as_slice).unwrap_or_default()
    }

    /// Returns whether a group runs on every reconciliation.
    #[must_use]
    pub fn is_omnipresent(&self, group: &str) -> bool {
        self.groups.omnipresent.contains(group)
    }

    /// Returns whether a provider manages a service kind.
    #[must_use]
    pub fn is_managed_service(&self, provider: &str, kind: &str) -> bool {
        self.services
            .managed
            .get(provider)
            .is_some_and(|kinds| kinds.contains(kind))
    }

    /// Returns whether a provider manages a utility kind.
    #[must_use]
    pub fn is_managed_utility(&self, provider: &str, kind: &str) -> bool {
        self.utilities
            .managed
            .get(provider)
            .is_some_and(|kinds| kinds.contains(kind))
    }

    /// Returns whether a utility can be used with the given provider.
    #[must_use]
    pub fn utility_available(&self, kind: &str, provider: Option<&str>) -> bool {
        self.utilities.available.contains(kind)
            || provider.is_some_and(|p| self.is_managed_utility(p, kind))
    }

    /// Returns the replacement triggers of a kind.
    ///
    /// Groups exempted for the provider never trigger a replacement.
    #[must_use]
    pub fn replacement_triggers(
        &self,
        kind: &str,
        group: &str,
        provider: Option<&str>,
    ) -> BTreeSet<String> {
        let exempt = provider
            .and_then(|p| self.services.replacement_exempt.get(p))
            .is_some_and(|groups| groups.contains(group));
        if exempt {
            return BTreeSet::new();
        }

        let triggers = &self.services.replacement_triggers;
        ["default", kind]
            .iter()
            .filter_map(|key| triggers.get(*key))
            .flatten()
            .cloned()
            .collect()
    }

    /// Returns the credential output fields of a group for a provider.
    #[must_use]
    pub fn credential_keys(&self, group: &str, provider: Option<&str>) -> &[String] {
        let generates = self.credentials.providers.is_empty()
            || provider.is_some_and(|p| self.credentials.providers.contains(p));
        if !generates {
            return &[];
        }
        self.credentials.keys.get(group).map(Vec::as_slice).unwrap_or_default()
    }
}

fn invalid(message: String) -> StackplanError {
    ConfigError::InvalidCapabilities { message }.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_tables_load() {
        let capabilities = Capabilities::builtin().unwrap();
        assert_eq!(capabilities.group_for("mysql"), Some("databases"));
        assert_eq!(capabilities.group_for("application"), Some("instances"));
        assert!(capabilities.is_managed_service("aws", "mysql"));
        assert!(capabilities.is_omnipresent("project"));
        assert!(capabilities.expandable_kinds.contains("application"));
    }

    #[test]
    fn test_replacement_triggers_merge_default() {
        let capabilities = Capabilities::builtin().unwrap();
        let triggers = capabilities.replacement_triggers("application", "instances", Some("aws"));
        assert!(triggers.contains("storage"));
        assert!(triggers.contains("region"));
    }

    #[test]
    fn test_exempt_group_has_no_triggers() {
        let capabilities = Capabilities::builtin().unwrap();
        assert!(
            capabilities
                .replacement_triggers("mysql", "databases", Some("aws"))
                .is_empty()
        );
        assert!(
            !capabilities
                .replacement_triggers("mysql", "databases", None)
                .is_empty()
        );
    }

    #[test]
    fn test_credential_keys_require_generating_provider() {
        let capabilities = Capabilities::builtin().unwrap();
        assert!(!capabilities.credential_keys("mailer", Some("aws")).is_empty());
        assert!(capabilities.credential_keys("mailer", None).is_empty());
        assert!(capabilities.credential_keys("databases", Some("aws")).is_empty());
    }

    #[test]
    fn test_rejects_unknown_default_version() {
        let yaml = r#"
groups:
  kinds: {mysql: databases}
services:
  available: []
versions:
  mysql: {available: ["5.7"], default: "9.9"}
"#;
        let result = Capabilities::from_yaml(yaml, None);
        assert!(matches!(
            result,
            Err(StackplanError::Config(ConfigError::InvalidCapabilities { .. }))
        ));
    }
}
