//! Utilities.
//!
//! Utilities are cross-cutting deployables derived from the project as a
//! whole rather than declared one by one: environment variables, config
//! files, certificates, routing targets, schedules and so on. Each kind knows
//! how to gather its entries from the project and how to identify an entry.

use serde_json::{Value, json};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::config::{Capabilities, ConfigHasher, ProjectConfig};
use crate::error::{DeployableCategory, DeployableError, PlanError, Result};
use crate::params::{Params, display_value, get_str, is_truthy};
use crate::state::State;

use super::Deployable;

/// Kind of a utility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UtilityKind {
    /// Provider-level prerequisites (networks, keys, zones).
    Prerequisites,
    /// TLS certificates.
    Ssl,
    /// Base packages and language runtimes.
    Essentials,
    /// Configuration files copied onto hosts.
    ConfigFiles,
    /// Environment variables.
    Environment,
    /// Scheduled commands.
    JobSchedules,
    /// Load balancer routing.
    Routing,
    /// Deployment preparation.
    Prepare,
    /// Application deployment.
    Project,
    /// Deployment notifications.
    Notifications,
}

/// One entry gathered from the project.
#[derive(Debug, Clone)]
pub struct UtilityEntry<'a> {
    /// Raw attributes of the entry.
    pub attributes: Params,
    /// Host groups targeted, if not the utility's default.
    pub host_groups: Option<Vec<String>>,
    /// Deployable the entry was derived from.
    pub parent: Option<&'a Deployable>,
}

impl<'a> UtilityEntry<'a> {
    fn new(attributes: Params) -> Self {
        Self {
            attributes,
            host_groups: None,
            parent: None,
        }
    }

    fn with_parent(mut self, parent: &'a Deployable) -> Self {
        self.parent = Some(parent);
        self
    }

    fn with_host_groups(mut self, host_groups: Vec<String>) -> Self {
        self.host_groups = Some(host_groups);
        self
    }
}

impl UtilityKind {
    /// All utility kinds, in collection order.
    pub const ALL: [Self; 10] = [
        Self::Prerequisites,
        Self::Ssl,
        Self::Essentials,
        Self::ConfigFiles,
        Self::Environment,
        Self::JobSchedules,
        Self::Routing,
        Self::Prepare,
        Self::Project,
        Self::Notifications,
    ];

    /// Returns the kind name used in tables and identities.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Prerequisites => "prerequisites",
            Self::Ssl => "ssl",
            Self::Essentials => "essentials",
            Self::ConfigFiles => "configfiles",
            Self::Environment => "environment",
            Self::JobSchedules => "jobschedules",
            Self::Routing => "routing",
            Self::Prepare => "prepare",
            Self::Project => "project",
            Self::Notifications => "notifications",
        }
    }

    /// Derives the identity of an entry from its defining attributes.
    #[must_use]
    pub fn identity(
        self,
        attributes: &Params,
        parent: Option<&super::ParentRef>,
        hasher: &ConfigHasher,
    ) -> String {
        let keys: &[&str] = match self {
            Self::Prerequisites | Self::Essentials | Self::Prepare | Self::Project => {
                return format!("utility-{}", self.as_str());
            }
            Self::Ssl => &["domains", "is_cdn_certificate"],
            Self::ConfigFiles => &["source", "target"],
            Self::Environment => &["export"],
            Self::JobSchedules => &["command", "frequency"],
            Self::Routing => &["domain", "target_port"],
            Self::Notifications => &["channel"],
        };

        let mut defining = attributes.clone();
        if let Some(parent) = parent {
            defining.insert("parent".to_string(), parent.id.as_str().into());
        }
        let mut keys = keys.to_vec();
        keys.push("parent");

        format!(
            "utility-{}-{}",
            self.as_str(),
            hasher.hash_attributes(&defining, &keys)
        )
    }

    /// Gathers the entries of this utility from the project.
    ///
    /// # Errors
    ///
    /// Returns an error if an export name template cannot be rendered.
    pub fn gather_entries<'a>(
        self,
        project: &ProjectConfig,
        services: &'a [Deployable],
        dependencies: &[Deployable],
        capabilities: &Capabilities,
    ) -> Result<Vec<UtilityEntry<'a>>> {
        let entries = match self {
            Self::Prerequisites => vec![UtilityEntry::new(object(json!({
                "domain": project.domain,
                "region": project.region,
                "repository": project.repository,
            })))],
            Self::Ssl => gather_ssl(project, services),
            Self::Essentials => vec![UtilityEntry::new(object(json!({
                "framework": project.framework,
                "runtimes": runtimes(dependencies),
            })))],
            Self::ConfigFiles => gather_configfiles(project),
            Self::Environment => gather_environment(project, services, capabilities)?,
            Self::JobSchedules => project
                .jobschedules
                .iter()
                .map(|job| UtilityEntry::new(job.clone()))
                .collect(),
            Self::Routing => gather_routing(project, services, capabilities),
            Self::Prepare => project
                .repository
                .as_ref()
                .map(|repository| {
                    UtilityEntry::new(object(json!({
                        "repository": repository,
                        "branch": project.branch,
                    })))
                })
                .into_iter()
                .collect(),
            Self::Project => match (&project.framework, &project.repository) {
                (Some(framework), Some(repository)) => vec![UtilityEntry::new(object(json!({
                    "framework": framework,
                    "repository": repository,
                    "documentroot": project.documentroot,
                    "statics": project.statics,
                    "pipeline": project.pipeline,
                })))],
                _ => Vec::new(),
            },
            Self::Notifications => project
                .notifications
                .iter()
                .map(|notification| {
                    let mut attributes = notification.clone();
                    if let Some(channel) = attributes.remove("type") {
                        attributes.insert("channel".to_string(), channel);
                    }
                    UtilityEntry::new(attributes).with_host_groups(Vec::new())
                })
                .collect(),
        };

        debug!("Gathered {} {} entries", entries.len(), self);
        Ok(entries)
    }
}

impl fmt::Display for UtilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for UtilityKind {
    type Err = DeployableError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| DeployableError::not_available(DeployableCategory::Utility, s, None))
    }
}

fn object(value: Value) -> Params {
    match value {
        Value::Object(map) => map,
        _ => Params::new(),
    }
}

fn runtimes(dependencies: &[Deployable]) -> Vec<String> {
    let mut runtimes: Vec<String> = dependencies
        .iter()
        .filter_map(|d| {
            d.attribute("version")
                .map(|version| format!("{}-{}", d.kind(), display_value(version)))
        })
        .collect();
    runtimes.sort();
    runtimes.dedup();
    runtimes
}

fn gather_ssl<'a>(project: &ProjectConfig, services: &'a [Deployable]) -> Vec<UtilityEntry<'a>> {
    let mut entries = Vec::new();

    if let Some(ssl) = project.ssl.as_ref().filter(|ssl| !ssl.domains.is_empty()) {
        entries.push(UtilityEntry::new(object(json!({
            "domains": ssl.domains,
            "is_cdn_certificate": false,
            "region": project.region,
        }))));
    }

    // CDN certificates must live in the provider's global region.
    for cdn in services.iter().filter(|s| s.kind() == "cdn") {
        if let Some(domains) = cdn.attribute("domains").filter(|d| is_truthy(d)) {
            entries.push(
                UtilityEntry::new(object(json!({
                    "domains": domains,
                    "is_cdn_certificate": true,
                    "region": "us-east-1",
                })))
                .with_parent(cdn)
                .with_host_groups(Vec::new()),
            );
        }
    }

    entries
}

fn gather_configfiles<'a>(project: &ProjectConfig) -> Vec<UtilityEntry<'a>> {
    let hasher = ConfigHasher::new();

    project
        .configfiles
        .iter()
        .map(|file| {
            let filehash = project.root.as_ref().and_then(|root| {
                let path = root.join(&file.source);
                match hasher.hash_file(&path) {
                    Ok(hash) => Some(hash),
                    Err(e) => {
                        warn!("Cannot hash config file {}: {e}", path.display());
                        None
                    }
                }
            });

            UtilityEntry::new(object(json!({
                "source": file.source,
                "target": file.target,
                "filehash": filehash,
            })))
        })
        .collect()
}

fn gather_routing<'a>(
    project: &ProjectConfig,
    services: &'a [Deployable],
    capabilities: &Capabilities,
) -> Vec<UtilityEntry<'a>> {
    services
        .iter()
        .filter(|s| capabilities.services.load_balanced.contains(s.kind()))
        .map(|service| {
            UtilityEntry::new(object(json!({
                "domain": project.domain,
                "target_port": service.attribute("port"),
            })))
            .with_parent(service)
            .with_host_groups(Vec::new())
        })
        .collect()
}

fn gather_environment<'a>(
    project: &ProjectConfig,
    services: &'a [Deployable],
    capabilities: &Capabilities,
) -> Result<Vec<UtilityEntry<'a>>> {
    let mut entries: Vec<UtilityEntry<'a>> = project
        .environment
        .iter()
        .map(|(export, value)| {
            UtilityEntry::new(object(json!({
                "export": export,
                "value": value,
                "raw": display_value(value),
            })))
        })
        .collect();

    for service in services {
        let software = service
            .attribute("software")
            .and_then(Value::as_str)
            .unwrap_or_else(|| service.kind());

        let mut variables: Params = capabilities
            .default_environment
            .get(software)
            .map(|defaults| {
                defaults
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
                    .collect()
            })
            .unwrap_or_default();
        if let Some(Value::Object(overrides)) = service.attribute("environment") {
            variables.extend(overrides.clone());
        }

        let nodes = if service.nodes_expandable() {
            service.nodes()
        } else {
            1
        };

        for (export, raw) in &variables {
            let raw = display_value(raw);
            if is_indexed(export) {
                for index in 1..=nodes {
                    let context = object(json!({ "index": index }));
                    let rendered = render(export, &context, export)?;
                    entries.push(
                        UtilityEntry::new(object(json!({
                            "export": rendered,
                            "value": raw,
                            "raw": raw,
                            "index": index,
                        })))
                        .with_parent(service),
                    );
                }
            } else {
                entries.push(
                    UtilityEntry::new(object(json!({
                        "export": export,
                        "value": raw,
                        "raw": raw,
                    })))
                    .with_parent(service),
                );
            }
        }
    }

    Ok(entries)
}

fn is_indexed(template: &str) -> bool {
    template.contains("{{ index }}") || template.contains("{{index}}")
}

/// Renders a template against a context.
fn render(template: &str, context: &Params, export: &str) -> Result<String> {
    if !template.contains("{{") && !template.contains("{%") {
        return Ok(template.to_string());
    }

    let template_error = |message: String| PlanError::Template {
        export: export.to_string(),
        message,
    };

    let context = tera::Context::from_serialize(context).map_err(|e| template_error(e.to_string()))?;
    let rendered = tera::Tera::one_off(template, &context, false)
        .map_err(|e| template_error(e.to_string()))?;
    Ok(rendered)
}

/// Refreshes a utility entry from already provisioned resources.
pub(super) fn process_state(kind: UtilityKind, deployable: &mut Deployable, state: &State) -> Result<()> {
    match kind {
        UtilityKind::Environment => refresh_environment(deployable, state),
        UtilityKind::Routing => refresh_routing(deployable, state),
        _ => Ok(()),
    }
}

fn refresh_environment(deployable: &mut Deployable, state: &State) -> Result<()> {
    let Some(parent) = deployable.parent().cloned() else {
        return Ok(());
    };
    let Some(resource) = state.unique_resource(&parent.group, &parent.id)? else {
        debug!("Parent {} not provisioned yet, keeping raw value", parent.id);
        return Ok(());
    };

    let mut context = resource.provision_params.clone();
    context.extend(resource.output.clone());
    context.remove("nodes");

    if let Some(index) = deployable.attribute("index").and_then(Value::as_u64) {
        context.insert("index".to_string(), index.into());
        let node = resource
            .node_list()
            .into_iter()
            .find(|node| node.node_index.and_then(|i| u64::try_from(i).ok()) == Some(index));
        if let Some(node) = node {
            context.extend(node.output);
        }
    }

    let export = get_str(deployable.attributes(), "export")
        .unwrap_or_default()
        .to_string();
    let raw = get_str(deployable.attributes(), "raw")
        .unwrap_or_default()
        .to_string();

    let value = render(&raw, &context, &export)?;
    deployable.set_attribute("value", Value::String(value));
    Ok(())
}

fn refresh_routing(deployable: &mut Deployable, state: &State) -> Result<()> {
    let Some(parent) = deployable.parent().cloned() else {
        return Ok(());
    };

    let targets: Vec<Value> = state
        .find_resources(&parent.group, &parent.id)
        .into_iter()
        .flat_map(|resource| {
            let has_nodes = resource
                .output
                .get("nodes")
                .and_then(Value::as_array)
                .is_some_and(|nodes| !nodes.is_empty());
            if has_nodes {
                resource
                    .node_list()
                    .into_iter()
                    .filter_map(|node| node.output.get("resource_id").cloned())
                    .collect::<Vec<_>>()
            } else {
                resource.output.get("resource_id").cloned().into_iter().collect()
            }
        })
        .collect();

    if !targets.is_empty() {
        deployable.set_attribute("target_instances", Value::Array(targets));
    }
    Ok(())
}
