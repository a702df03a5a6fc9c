//! Deployable model.
//!
//! A [`Deployable`] is one desired unit: a service, a software dependency
//! attached to a service, or a cross-cutting utility. All variants share one
//! struct holding a validated attribute bag; the [`Variant`] is chosen once,
//! by the [`DeployableFactory`].

mod factory;
mod schema;
mod set;
mod utility;

pub use factory::DeployableFactory;
pub use schema::{AttributeSpec, DataType, Schema, SchemaBuilder};
pub use set::DeployableSet;
pub use utility::{UtilityEntry, UtilityKind};

use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

use crate::error::Result;
use crate::params::{Params, get_str};
use crate::state::{Resource, State};

/// How a service is provisioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceFlavor {
    /// Run by the provider as a managed offering.
    Managed,
    /// Installed on a generic host of the standalone kind.
    Standalone,
    /// Provisioned as a host of its own kind.
    Provisionable,
}

/// Variant of a deployable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// A service.
    Service(ServiceFlavor),
    /// A software dependency installed on a service's hosts.
    Dependency,
    /// A cross-cutting utility.
    Utility(UtilityKind),
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service(ServiceFlavor::Managed) => write!(f, "managed service"),
            Self::Service(ServiceFlavor::Standalone) => write!(f, "standalone service"),
            Self::Service(ServiceFlavor::Provisionable) => write!(f, "service"),
            Self::Dependency => write!(f, "dependency"),
            Self::Utility(kind) => write!(f, "{kind} utility"),
        }
    }
}

/// The deployable a utility entry was derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentRef {
    /// Identity of the parent.
    pub id: String,
    /// Kind of the parent.
    pub kind: String,
    /// Group the parent is provisioned in.
    pub group: String,
}

/// One desired unit of the project.
#[derive(Debug, Clone)]
pub struct Deployable {
    id: String,
    kind: String,
    provider: Option<String>,
    group: String,
    variant: Variant,
    schema: Schema,
    attributes: Params,
    host_groups: Vec<String>,
    depends_on: Vec<String>,
    replacement_triggers: BTreeSet<String>,
    diff_ignored_keys: BTreeSet<String>,
    expandable: bool,
    parent: Option<ParentRef>,
}

impl Deployable {
    /// Returns the stable identity.
    #[must_use]
    pub fn deployable_id(&self) -> &str {
        &self.id
    }

    /// Returns the kind.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Returns the provider, if managed by one.
    #[must_use]
    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    /// Returns the provisioning group.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Returns the variant.
    #[must_use]
    pub const fn variant(&self) -> Variant {
        self.variant
    }

    /// Returns the host groups targeted.
    #[must_use]
    pub fn host_groups(&self) -> &[String] {
        &self.host_groups
    }

    /// Returns the groups that must converge first.
    #[must_use]
    pub fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    /// Returns whether the deployable spawns indexed nodes.
    #[must_use]
    pub const fn nodes_expandable(&self) -> bool {
        self.expandable
    }

    /// Returns the desired number of nodes.
    ///
    /// Missing, zero or negative counts mean a single node.
    #[must_use]
    pub fn nodes(&self) -> usize {
        self.attributes
            .get("nodes")
            .and_then(Value::as_u64)
            .and_then(|n| usize::try_from(n).ok())
            .filter(|n| *n > 0)
            .unwrap_or(1)
    }

    /// Returns the attributes whose change forces a replacement.
    #[must_use]
    pub const fn replacement_triggers(&self) -> &BTreeSet<String> {
        &self.replacement_triggers
    }

    /// Returns the attributes excluded from change detection.
    #[must_use]
    pub const fn diff_ignored_keys(&self) -> &BTreeSet<String> {
        &self.diff_ignored_keys
    }

    /// Returns the logical name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        get_str(&self.attributes, "name")
    }

    /// Returns the parent of a utility entry.
    #[must_use]
    pub const fn parent(&self) -> Option<&ParentRef> {
        self.parent.as_ref()
    }

    /// Returns the full attribute bag.
    #[must_use]
    pub const fn attributes(&self) -> &Params {
        &self.attributes
    }

    /// Returns one attribute.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name).filter(|value| !value.is_null())
    }

    /// Sets a declared attribute. Undeclared attributes are ignored.
    pub fn set_attribute(&mut self, name: &str, value: Value) -> bool {
        if !self.schema.contains(name) {
            return false;
        }
        let value = self.schema.coerce(name, value);
        self.attributes.insert(name.to_string(), value);
        true
    }

    /// Validates the current attributes.
    ///
    /// # Errors
    ///
    /// Returns a validation error listing every failing attribute.
    pub fn validate(&self) -> Result<()> {
        self.schema.validate(&self.kind, &self.attributes)?;
        Ok(())
    }

    /// Returns the parameters passed on to the executor.
    #[must_use]
    pub fn provision_params(&self) -> Params {
        self.schema.serialize(&self.attributes)
    }

    /// Builds the resource describing this deployable.
    #[must_use]
    pub fn as_resource(&self) -> Resource {
        let mut resource = Resource::new(&self.id, &self.group, self.provision_params());
        resource.reference = get_str(&self.attributes, "reference").map(str::to_string);
        resource
    }

    /// Builds one resource per desired node, named `<name>-1..<name>-N`.
    #[must_use]
    pub fn as_node_resources(&self) -> Vec<Resource> {
        let base = self.as_resource();
        (1..=self.nodes()).map(|index| base.for_node(index, None)).collect()
    }

    /// Refreshes attributes that depend on already provisioned resources.
    ///
    /// # Errors
    ///
    /// Returns an error if the state holds more than one resource for a
    /// singleton parent, or a template cannot be rendered.
    pub fn process_state(&mut self, state: &State) -> Result<()> {
        match self.variant {
            Variant::Utility(kind) => utility::process_state(kind, self, state),
            Variant::Service(_) | Variant::Dependency => Ok(()),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::config::Capabilities;
    use serde_json::json;

    pub fn capabilities() -> Capabilities {
        Capabilities::builtin().unwrap()
    }

    pub fn params(value: Value) -> Params {
        value.as_object().cloned().unwrap()
    }

    pub fn service(capabilities: &Capabilities, kind: &str, provider: Option<&str>, attrs: Value) -> Deployable {
        DeployableFactory::new(capabilities)
            .service(kind, provider, &params(attrs))
            .unwrap()
    }

    pub fn application(capabilities: &Capabilities, nodes: u64) -> Deployable {
        service(
            capabilities,
            "application",
            Some("aws"),
            json!({"name": "application-server", "size": "t2.micro", "storage": 10, "nodes": nodes}),
        )
    }

    pub fn managed_mysql(capabilities: &Capabilities, size: &str) -> Deployable {
        service(
            capabilities,
            "mysql",
            Some("aws"),
            json!({"name": "mysql-database", "size": size, "storage": 30}),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_service_identity() {
        let capabilities = capabilities();
        let mysql = managed_mysql(&capabilities, "db.t2.micro");
        assert_eq!(mysql.deployable_id(), "service-mysql-mysql-database");
        assert_eq!(mysql.group(), "databases");
        assert_eq!(mysql.variant(), Variant::Service(ServiceFlavor::Managed));
    }

    #[test]
    fn test_identity_is_stable() {
        let capabilities = capabilities();
        let first = managed_mysql(&capabilities, "db.t2.micro");
        let second = managed_mysql(&capabilities, "db.m5.large");
        assert_eq!(first.deployable_id(), second.deployable_id());
    }

    #[test]
    fn test_nodes_default_to_one() {
        let capabilities = capabilities();
        let mysql = managed_mysql(&capabilities, "db.t2.micro");
        assert_eq!(mysql.nodes(), 1);
        assert!(!mysql.nodes_expandable());

        let application = application(&capabilities, 3);
        assert_eq!(application.nodes(), 3);
        assert!(application.nodes_expandable());
    }

    #[test]
    fn test_invalid_node_counts_mean_one_node() {
        let capabilities = capabilities();
        assert_eq!(application(&capabilities, 0).nodes(), 1);

        let negative = service(
            &capabilities,
            "application",
            Some("aws"),
            json!({"name": "application-server", "size": "t2.micro", "storage": 10, "nodes": -1}),
        );
        assert_eq!(negative.nodes(), 1);
        assert_eq!(negative.as_node_resources().len(), 1);
    }

    #[test]
    fn test_node_resources_are_suffixed() {
        let capabilities = capabilities();
        let resources = application(&capabilities, 3).as_node_resources();

        let names: Vec<&str> = resources.iter().filter_map(Resource::name).collect();
        assert_eq!(
            names,
            vec!["application-server-1", "application-server-2", "application-server-3"]
        );
        assert!(resources.iter().all(|r| !r.provision_params.contains_key("nodes")));
        assert!(resources.iter().all(|r| r.id == "service-application-application-server"));
    }

    #[test]
    fn test_set_attribute_ignores_undeclared() {
        let capabilities = capabilities();
        let mut mysql = managed_mysql(&capabilities, "db.t2.micro");

        assert!(mysql.set_attribute("size", Value::from("db.m5.large")));
        assert!(!mysql.set_attribute("gpu", Value::from("a100")));
        assert_eq!(mysql.attribute("size"), Some(&Value::from("db.m5.large")));
        assert!(mysql.attribute("gpu").is_none());
    }

    #[test]
    fn test_provision_params_skip_internal_attributes() {
        let capabilities = capabilities();
        let app = service(
            &capabilities,
            "application",
            Some("aws"),
            serde_json::json!({
                "name": "web", "size": "t2.micro", "storage": 10,
                "dependencies": ["nginx"]
            }),
        );

        let params = app.provision_params();
        assert!(!params.contains_key("dependencies"));
        assert_eq!(params["kind"], serde_json::json!("application"));
        assert_eq!(params["nodes"], serde_json::json!(1));
    }
}
