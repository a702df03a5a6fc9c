//! Project configuration.
//!
//! A project file holds attributes shared by every stage at its root and one
//! branch per stage (`production`, `staging`, ...) holding the rest:
//!
//! ```yaml
//! framework: rails
//! repository: git@github.com:acme/shop.git
//! provider: aws
//!
//! production:
//!   domain: shop.example.com
//!   services:
//!     - type: application
//!       name: shop-app
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_yaml::Mapping;
use std::path::PathBuf;

use crate::error::{ConfigError, Result};
use crate::params::Params;

/// Attributes read from the root of the project file.
pub const ROOT_ATTRIBUTES: &[&str] = &[
    "framework",
    "repository",
    "provider",
    "region",
    "documentroot",
    "notifications",
];

/// Desired configuration of one project stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Stage this configuration was read for.
    #[serde(skip)]
    pub stage: String,

    /// Directory holding the project file.
    #[serde(skip)]
    pub root: Option<PathBuf>,

    /// Application framework.
    #[serde(default)]
    pub framework: Option<String>,

    /// Source repository.
    #[serde(default)]
    pub repository: Option<String>,

    /// Branch deployed for the stage.
    #[serde(default)]
    pub branch: Option<String>,

    /// Cloud provider managing services.
    #[serde(default)]
    pub provider: Option<String>,

    /// Provider region.
    #[serde(default)]
    pub region: Option<String>,

    /// Public domain of the stage.
    #[serde(default)]
    pub domain: Option<String>,

    /// Document root of the application.
    #[serde(default)]
    pub documentroot: Option<String>,

    /// Services as flat attribute maps.
    #[serde(default)]
    pub services: Vec<Params>,

    /// Global environment variables.
    #[serde(default)]
    pub environment: Params,

    /// Configuration files copied onto hosts.
    #[serde(default)]
    pub configfiles: Vec<ConfigFileEntry>,

    /// Scheduled commands.
    #[serde(default)]
    pub jobschedules: Vec<Params>,

    /// Notification channels.
    #[serde(default)]
    pub notifications: Vec<Params>,

    /// Certificate settings.
    #[serde(default)]
    pub ssl: Option<SslConfig>,

    /// Build pipeline settings.
    #[serde(default)]
    pub pipeline: Params,

    /// Static asset directories.
    #[serde(default)]
    pub statics: Vec<Value>,
}

/// A configuration file copied onto hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFileEntry {
    /// Path relative to the project root.
    pub source: String,
    /// Destination path on the host.
    pub target: String,
}

/// Certificate settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SslConfig {
    /// Domains covered by the certificate.
    #[serde(default)]
    pub domains: Vec<String>,
}

impl ProjectConfig {
    /// Builds the configuration of one stage from a parsed project document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not a mapping, the stage is not
    /// defined, or the merged attributes do not deserialize.
    pub fn from_document(document: &serde_yaml::Value, stage: &str) -> Result<Self> {
        let Some(root) = document.as_mapping() else {
            return Err(ConfigError::parse("project file must be a mapping", None).into());
        };

        let Some(branch) = root.get(stage).and_then(serde_yaml::Value::as_mapping) else {
            return Err(ConfigError::UnknownStage {
                stage: stage.to_string(),
            }
            .into());
        };

        let mut merged = Mapping::new();
        for key in ROOT_ATTRIBUTES {
            if let Some(value) = root.get(*key) {
                merged.insert(serde_yaml::Value::from(*key), value.clone());
            }
        }
        for (key, value) in branch {
            merged.insert(key.clone(), value.clone());
        }

        let mut config: Self = serde_yaml::from_value(serde_yaml::Value::Mapping(merged))
            .map_err(|e| ConfigError::parse(format!("stage '{stage}': {e}"), None))?;
        config.stage = stage.to_string();
        Ok(config)
    }

    /// Lists the stages defined in a project document.
    #[must_use]
    pub fn stages(document: &serde_yaml::Value) -> Vec<String> {
        document
            .as_mapping()
            .map(|root| {
                root.iter()
                    .filter(|(_, value)| value.is_mapping())
                    .filter_map(|(key, _)| key.as_str())
                    .filter(|key| !ROOT_ATTRIBUTES.contains(key))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}
