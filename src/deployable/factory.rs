//! Deployable factory.
//!
//! Resolves the variant of a kind through the capability tables, merges the
//! variant's base attributes with the per-kind table into a schema, validates
//! the input and derives the deployable's identity.

use std::collections::BTreeSet;
use tracing::debug;

use crate::config::{Capabilities, ConfigHasher};
use crate::error::{DeployableCategory, DeployableError, Result};
use crate::params::{Params, get_str};

use super::schema::{AttributeSpec, DataType, Schema, SchemaBuilder};
use super::{Deployable, ParentRef, ServiceFlavor, UtilityKind, Variant};

/// Builds deployables from flat attribute maps.
#[derive(Debug, Clone, Copy)]
pub struct DeployableFactory<'a> {
    capabilities: &'a Capabilities,
    hasher: ConfigHasher,
}

/// Everything needed to finish a deployable once its variant is known.
struct Blueprint<'a> {
    kind: String,
    provider: Option<&'a str>,
    variant: Variant,
    schema: Schema,
    input: Params,
    host_groups: Vec<String>,
    parent: Option<ParentRef>,
}

impl<'a> DeployableFactory<'a> {
    /// Creates a factory over the given capability tables.
    #[must_use]
    pub const fn new(capabilities: &'a Capabilities) -> Self {
        Self {
            capabilities,
            hasher: ConfigHasher::new(),
        }
    }

    /// Returns the capability tables.
    #[must_use]
    pub const fn capabilities(&self) -> &'a Capabilities {
        self.capabilities
    }

    /// Builds a deployable of any category.
    ///
    /// Dependencies read their host service kind from the `service`
    /// attribute.
    ///
    /// # Errors
    ///
    /// Returns a lookup error if no variant serves the kind, or a validation
    /// error listing every failing attribute.
    pub fn factory(
        &self,
        category: DeployableCategory,
        kind: &str,
        provider: Option<&str>,
        attributes: &Params,
    ) -> Result<Deployable> {
        match category {
            DeployableCategory::Service => self.service(kind, provider, attributes),
            DeployableCategory::Dependency => {
                let service = get_str(attributes, "service").unwrap_or_default().to_string();
                self.dependency(kind, &service, attributes)
            }
            DeployableCategory::Utility => {
                let utility = kind.parse::<UtilityKind>()?;
                self.utility(utility, provider, attributes, None, None)
            }
        }
    }

    /// Builds a service.
    ///
    /// Kinds managed by the provider become managed services; kinds that can
    /// run standalone are provisioned as the standalone kind; generically
    /// available kinds are provisioned as themselves.
    ///
    /// # Errors
    ///
    /// Returns a lookup or validation error.
    pub fn service(
        &self,
        kind: &str,
        provider: Option<&str>,
        attributes: &Params,
    ) -> Result<Deployable> {
        let services = &self.capabilities.services;
        let provider = provider.filter(|p| !p.is_empty());

        let flavor = if provider.is_some_and(|p| self.capabilities.is_managed_service(p, kind)) {
            ServiceFlavor::Managed
        } else if services.standalone.kinds.contains(kind) {
            ServiceFlavor::Standalone
        } else if services.available.contains(kind) {
            ServiceFlavor::Provisionable
        } else {
            return Err(
                DeployableError::not_available(DeployableCategory::Service, kind, provider).into(),
            );
        };

        let mut builder = self.with_provider(base_attributes()).extend_service();
        builder = match flavor {
            ServiceFlavor::Managed => builder.extend_managed(),
            ServiceFlavor::Standalone | ServiceFlavor::Provisionable => {
                builder.extend_provisionable()
            }
        };
        builder = builder.extend(services.attributes.get(kind).into_iter().flatten());
        builder = self.with_version(builder, kind);

        let mut input = attributes.clone();
        let effective_kind = if flavor == ServiceFlavor::Standalone {
            input.insert("software".to_string(), kind.into());
            services.standalone.kind.clone()
        } else {
            kind.to_string()
        };

        debug!("Resolved {kind} as {:?} service", flavor);

        self.finish(Blueprint {
            host_groups: vec![effective_kind.clone()],
            kind: effective_kind,
            provider: provider.filter(|_| flavor == ServiceFlavor::Managed),
            variant: Variant::Service(flavor),
            schema: builder.build(),
            input,
            parent: None,
        })
    }

    /// Builds a dependency installed on the hosts of a service kind.
    ///
    /// # Errors
    ///
    /// Returns a lookup or validation error.
    pub fn dependency(&self, kind: &str, service: &str, attributes: &Params) -> Result<Deployable> {
        let dependencies = &self.capabilities.dependencies;
        if !dependencies.available.contains(kind) {
            return Err(
                DeployableError::not_available(DeployableCategory::Dependency, kind, None).into(),
            );
        }

        let builder = base_attributes()
            .attribute("service", AttributeSpec::required(DataType::String))
            .extend(dependencies.attributes.get(kind).into_iter().flatten());
        let builder = self.with_version(builder, kind);

        let mut input = attributes.clone();
        input.insert("service".to_string(), service.into());

        self.finish(Blueprint {
            kind: kind.to_string(),
            provider: None,
            variant: Variant::Dependency,
            schema: builder.build(),
            input,
            host_groups: vec![service.to_string()],
            parent: None,
        })
    }

    /// Builds a utility entry.
    ///
    /// # Errors
    ///
    /// Returns a lookup or validation error.
    pub fn utility(
        &self,
        kind: UtilityKind,
        provider: Option<&str>,
        attributes: &Params,
        host_groups: Option<Vec<String>>,
        parent: Option<&Deployable>,
    ) -> Result<Deployable> {
        let utilities = &self.capabilities.utilities;
        let name = kind.as_str();
        let provider = provider.filter(|p| !p.is_empty());

        if !self.capabilities.utility_available(name, provider) {
            return Err(
                DeployableError::not_available(DeployableCategory::Utility, name, provider).into(),
            );
        }
        let managed = provider.filter(|p| self.capabilities.is_managed_utility(p, name));

        let builder = self
            .with_provider(base_attributes())
            .attribute(
                "unique",
                AttributeSpec::optional(DataType::Boolean).with_default(false),
            )
            .extend(utilities.attributes.get(name).into_iter().flatten());

        let host_groups = host_groups
            .or_else(|| utilities.host_groups.get(name).cloned())
            .unwrap_or_default();

        self.finish(Blueprint {
            kind: name.to_string(),
            provider: managed,
            variant: Variant::Utility(kind),
            schema: builder.build(),
            input: attributes.clone(),
            host_groups,
            parent: parent.map(|p| ParentRef {
                id: p.deployable_id().to_string(),
                kind: p.kind().to_string(),
                group: p.group().to_string(),
            }),
        })
    }

    fn with_provider(&self, builder: SchemaBuilder) -> SchemaBuilder {
        let spec = AttributeSpec::optional(DataType::String);
        let spec = if self.capabilities.providers.is_empty() {
            spec
        } else {
            spec.with_choices(self.capabilities.providers.iter().map(String::as_str))
        };
        builder.attribute("provider", spec)
    }

    fn with_version(&self, builder: SchemaBuilder, kind: &str) -> SchemaBuilder {
        match self.capabilities.versions.get(kind) {
            Some(versions) => builder.attribute(
                "version",
                AttributeSpec::required(DataType::String)
                    .with_choices(versions.available.iter().map(String::as_str))
                    .with_default(versions.default.as_str()),
            ),
            None => builder,
        }
    }

    fn finish(&self, blueprint: Blueprint<'_>) -> Result<Deployable> {
        let Blueprint {
            kind,
            provider,
            variant,
            schema,
            input,
            host_groups,
            parent,
        } = blueprint;

        let group = self
            .capabilities
            .group_for(&kind)
            .ok_or_else(|| DeployableError::UnmappedKind { kind: kind.clone() })?
            .to_string();

        let mut attributes = schema.apply(&input);
        attributes.insert("kind".to_string(), kind.as_str().into());
        if let Some(provider) = provider {
            attributes.insert("provider".to_string(), provider.into());
        }
        schema.validate(&kind, &attributes)?;

        let id = match variant {
            Variant::Service(_) => format!(
                "service-{kind}-{}",
                get_str(&attributes, "name").unwrap_or_default()
            ),
            Variant::Dependency => format!(
                "dependency-{}-{kind}",
                get_str(&attributes, "service").unwrap_or_default()
            ),
            Variant::Utility(utility) => {
                utility.identity(&attributes, parent.as_ref(), &self.hasher)
            }
        };

        let expandable =
            self.capabilities.expandable_kinds.contains(&kind) && schema.contains("nodes");
        let replacement_triggers = self.capabilities.replacement_triggers(&kind, &group, provider);
        let depends_on = self.capabilities.depends_on(&group).to_vec();
        let diff_ignored_keys: BTreeSet<String> = self.capabilities.diff_ignore_keys.clone();

        debug!("Built deployable {id} in group {group}");

        Ok(Deployable {
            id,
            kind,
            provider: provider.map(str::to_string),
            group,
            variant,
            schema,
            attributes,
            host_groups,
            depends_on,
            replacement_triggers,
            diff_ignored_keys,
            expandable,
            parent,
        })
    }
}

/// Attributes every deployable accepts.
fn base_attributes() -> SchemaBuilder {
    SchemaBuilder::new()
        .attribute("kind", AttributeSpec::required(DataType::String))
        .attribute("reference", AttributeSpec::optional(DataType::String))
}

trait ServiceSchema {
    fn extend_service(self) -> Self;
    fn extend_provisionable(self) -> Self;
    fn extend_managed(self) -> Self;
}

impl ServiceSchema for SchemaBuilder {
    fn extend_service(self) -> Self {
        self.attribute("name", AttributeSpec::required(DataType::String))
            .attribute("region", AttributeSpec::optional(DataType::String))
            .attribute("dependencies", AttributeSpec::optional(DataType::List).internal())
            .attribute("environment", AttributeSpec::optional(DataType::Map).internal())
            .attribute("links", AttributeSpec::optional(DataType::List).internal())
    }

    fn extend_provisionable(self) -> Self {
        self.attribute("size", AttributeSpec::required(DataType::String))
            .attribute("storage", AttributeSpec::required(DataType::Integer))
            .attribute("port", AttributeSpec::optional(DataType::Integer))
            .attribute("software", AttributeSpec::optional(DataType::String))
            .attribute("credentials", AttributeSpec::optional(DataType::Map))
            .attribute("root_credentials", AttributeSpec::optional(DataType::Map))
    }

    fn extend_managed(self) -> Self {
        self.attribute(
            "managed",
            AttributeSpec::optional(DataType::Boolean).with_default(true),
        )
        .attribute("credentials", AttributeSpec::optional(DataType::Map))
        .attribute("root_credentials", AttributeSpec::optional(DataType::Map))
    }
}
