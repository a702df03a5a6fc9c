//! Collection of every deployable of a project stage.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::config::{Capabilities, ProjectConfig};
use crate::error::{ConfigError, DeployableCategory, DeployableError, Result};
use crate::params::{Params, get_str};

use super::{Deployable, DeployableFactory, UtilityKind};

/// The desired deployables of one project stage.
#[derive(Debug, Clone, Default)]
pub struct DeployableSet {
    deployables: Vec<Deployable>,
}

impl DeployableSet {
    /// Collects services, their dependencies and utilities from a project.
    ///
    /// # Errors
    ///
    /// Returns the first lookup or validation error, or a duplicate-name
    /// error when two services resolve to the same identity.
    pub fn collect(project: &ProjectConfig, capabilities: &Capabilities) -> Result<Self> {
        let factory = DeployableFactory::new(capabilities);

        let services = collect_services(project, &factory)?;
        let dependencies = collect_dependencies(&services, &factory)?;
        let utilities = collect_utilities(project, &services, &dependencies, &factory)?;

        info!(
            "Collected {} services, {} dependencies, {} utilities for stage '{}'",
            services.len(),
            dependencies.len(),
            utilities.len(),
            project.stage
        );

        let mut deployables = services;
        deployables.extend(dependencies);
        deployables.extend(utilities);
        Ok(Self { deployables })
    }

    /// Returns the number of deployables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.deployables.len()
    }

    /// Returns whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deployables.is_empty()
    }

    /// Iterates over the deployables.
    pub fn iter(&self) -> impl Iterator<Item = &Deployable> {
        self.deployables.iter()
    }

    /// Finds a deployable by identity.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Deployable> {
        self.deployables.iter().find(|d| d.deployable_id() == id)
    }

    /// Returns the groups that have deployables.
    #[must_use]
    pub fn groups(&self) -> BTreeSet<String> {
        self.deployables
            .iter()
            .map(|d| d.group().to_string())
            .collect()
    }

    /// Returns copies of the deployables of one group.
    #[must_use]
    pub fn for_group(&self, group: &str) -> Vec<Deployable> {
        self.deployables
            .iter()
            .filter(|d| d.group() == group)
            .cloned()
            .collect()
    }

    /// Returns the deployables grouped by provisioning group.
    #[must_use]
    pub fn by_group(&self) -> BTreeMap<&str, Vec<&Deployable>> {
        let mut groups: BTreeMap<&str, Vec<&Deployable>> = BTreeMap::new();
        for deployable in &self.deployables {
            groups.entry(deployable.group()).or_default().push(deployable);
        }
        groups
    }
}

impl From<Vec<Deployable>> for DeployableSet {
    fn from(deployables: Vec<Deployable>) -> Self {
        Self { deployables }
    }
}

/// Splits a raw entry into its kind and remaining attributes.
///
/// `type` is accepted as an alias of `kind`.
fn split_kind(entry: &Params, category: DeployableCategory) -> Result<(String, Params)> {
    let mut attributes = entry.clone();
    let kind = attributes
        .remove("type")
        .or_else(|| attributes.remove("kind"))
        .and_then(|kind| kind.as_str().map(str::to_string))
        .filter(|kind| !kind.is_empty())
        .ok_or(DeployableError::MissingKind { category })?;
    Ok((kind, attributes))
}

fn collect_services(project: &ProjectConfig, factory: &DeployableFactory<'_>) -> Result<Vec<Deployable>> {
    let mut services: Vec<Deployable> = Vec::with_capacity(project.services.len());

    for entry in &project.services {
        let (kind, mut attributes) = split_kind(entry, DeployableCategory::Service)?;

        if let Some(region) = &project.region {
            attributes
                .entry("region")
                .or_insert_with(|| Value::from(region.as_str()));
        }
        let provider = get_str(&attributes, "provider")
            .map(str::to_string)
            .or_else(|| project.provider.clone());

        let service = factory.service(&kind, provider.as_deref(), &attributes)?;
        if services
            .iter()
            .any(|s| s.deployable_id() == service.deployable_id())
        {
            return Err(ConfigError::DuplicateName {
                resource_type: "service".to_string(),
                name: service.name().unwrap_or_default().to_string(),
            }
            .into());
        }

        debug!("Collected service {}", service.deployable_id());
        services.push(service);
    }

    Ok(services)
}

fn collect_dependencies(
    services: &[Deployable],
    factory: &DeployableFactory<'_>,
) -> Result<Vec<Deployable>> {
    let mut dependencies: Vec<Deployable> = Vec::new();

    for service in services {
        let Some(Value::Array(declared)) = service.attribute("dependencies") else {
            continue;
        };

        for item in declared {
            let entry = match item {
                Value::String(kind) => {
                    let mut entry = Params::new();
                    entry.insert("kind".to_string(), kind.as_str().into());
                    entry
                }
                Value::Object(map) => map.clone(),
                _ => {
                    return Err(DeployableError::MissingKind {
                        category: DeployableCategory::Dependency,
                    }
                    .into());
                }
            };
            let (kind, attributes) = split_kind(&entry, DeployableCategory::Dependency)?;

            let dependency = factory.dependency(&kind, service.kind(), &attributes)?;
            if dependencies
                .iter()
                .all(|d| d.deployable_id() != dependency.deployable_id())
            {
                debug!("Collected dependency {}", dependency.deployable_id());
                dependencies.push(dependency);
            }
        }
    }

    Ok(dependencies)
}

fn collect_utilities(
    project: &ProjectConfig,
    services: &[Deployable],
    dependencies: &[Deployable],
    factory: &DeployableFactory<'_>,
) -> Result<Vec<Deployable>> {
    let capabilities = factory.capabilities();
    let provider = project.provider.as_deref();
    let mut utilities: Vec<Deployable> = Vec::new();

    for kind in UtilityKind::ALL {
        if !capabilities.utility_available(kind.as_str(), provider) {
            continue;
        }

        for entry in kind.gather_entries(project, services, dependencies, capabilities)? {
            let utility =
                factory.utility(kind, provider, &entry.attributes, entry.host_groups, entry.parent)?;
            if utilities
                .iter()
                .all(|u| u.deployable_id() != utility.deployable_id())
            {
                utilities.push(utility);
            }
        }
    }

    Ok(utilities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use crate::error::StackplanError;

    const PROJECT: &str = r"
framework: rails
repository: git@github.com:acme/shop.git
provider: aws
region: eu-central-1

production:
  domain: shop.example.com
  services:
    - type: application
      name: shop-app
      size: t2.medium
      storage: 30
      nodes: 2
      dependencies:
        - nginx
        - type: ruby
          version: 2.7
    - type: worker
      name: shop-worker
      size: t2.small
      storage: 20
      dependencies: [ruby]
    - type: mysql
      name: shop-db
      size: db.t2.micro
      storage: 100
  environment:
    RAILS_ENV: production

duplicate:
  services:
    - type: worker
      name: jobs
      size: t2.small
      storage: 20
    - type: worker
      name: jobs
      size: t2.large
      storage: 20
";

    fn collect(stage: &str) -> Result<DeployableSet> {
        let project = ConfigParser::new()
            .parse_project(PROJECT, stage, None)
            .unwrap();
        DeployableSet::collect(&project, &Capabilities::builtin().unwrap())
    }

    #[test]
    fn test_collects_every_category() {
        let set = collect("production").unwrap();
        let groups = set.groups();

        for group in [
            "instances",
            "databases",
            "nginx",
            "ruby",
            "environment",
            "routing",
            "prerequisites",
            "prepare",
            "project",
            "essentials",
        ] {
            assert!(groups.contains(group), "missing group {group}");
        }
        assert!(!groups.contains("ssl"));
    }

    #[test]
    fn test_services_inherit_project_region() {
        let set = collect("production").unwrap();
        let app = set.get("service-application-shop-app").unwrap();
        assert_eq!(app.attribute("region"), Some(&Value::from("eu-central-1")));
    }

    #[test]
    fn test_dependencies_are_deduplicated() {
        let set = collect("production").unwrap();
        let ruby: Vec<&Deployable> = set.iter().filter(|d| d.kind() == "ruby").collect();

        assert_eq!(ruby.len(), 2);
        let app_ruby = set.get("dependency-application-ruby").unwrap();
        assert_eq!(app_ruby.attribute("version"), Some(&Value::from("2.7")));
        assert!(set.get("dependency-worker-ruby").is_some());
    }

    #[test]
    fn test_essentials_list_runtimes() {
        let set = collect("production").unwrap();
        let essentials = set.get("utility-essentials").unwrap();
        assert_eq!(
            essentials.attribute("runtimes"),
            Some(&serde_json::json!(["nginx-1.16", "ruby-2.6", "ruby-2.7"]))
        );
    }

    #[test]
    fn test_by_group_partitions_everything() {
        let set = collect("production").unwrap();
        let total: usize = set.by_group().values().map(Vec::len).sum();
        assert_eq!(total, set.len());
        assert_eq!(set.for_group("instances").len(), 2);
        assert_eq!(set.for_group("databases").len(), 1);
    }

    #[test]
    fn test_duplicate_service_names_are_rejected() {
        let result = collect("duplicate");
        assert!(matches!(
            result,
            Err(StackplanError::Config(ConfigError::DuplicateName { .. }))
        ));
    }

    #[test]
    fn test_missing_kind() {
        let mut entry = Params::new();
        entry.insert("name".to_string(), Value::from("anonymous"));
        let result = split_kind(&entry, DeployableCategory::Service);
        assert!(result.is_err());
    }
}
