//! Configuration parser for project files and capability tables.
//!
//! This module handles loading the project file for a stage, the capability
//! tables and `.env` files, and applies `STACKPLAN_*` environment overrides.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{ConfigError, Result};

use super::capabilities::Capabilities;
use super::project::ProjectConfig;

/// Prefix of environment variables overriding project attributes.
pub const ENV_PREFIX: &str = "STACKPLAN_";

/// Configuration parser for loading project configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads the configuration of a stage from a project file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or does not
    /// define the stage.
    pub fn load_project(&self, path: impl AsRef<Path>, stage: &str) -> Result<ProjectConfig> {
        let path = path.as_ref();
        info!("Loading project configuration from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }
            .into());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::parse(
                format!("Failed to read file: {e}"),
                Some(path.display().to_string()),
            )
        })?;

        let mut config = self.parse_project(&content, stage, Some(path))?;
        if config.root.is_none() {
            config.root = path.parent().map(Path::to_path_buf);
        }
        Ok(config)
    }

    /// Parses the configuration of a stage from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid or does not define the stage.
    pub fn parse_project(
        &self,
        content: &str,
        stage: &str,
        source: Option<&Path>,
    ) -> Result<ProjectConfig> {
        debug!("Parsing project configuration for stage: {stage}");

        let document: serde_yaml::Value = serde_yaml::from_str(content).map_err(|e| {
            ConfigError::parse(
                format!("YAML parse error: {e}"),
                source.map(|p| p.display().to_string()),
            )
        })?;

        let mut config = ProjectConfig::from_document(&document, stage)?;
        config.root.clone_from(&self.base_path);

        debug!(
            "Parsed stage '{}' with {} services",
            config.stage,
            config.services.len()
        );
        Ok(config)
    }

    /// Loads a project stage and applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>, stage: &str) -> Result<ProjectConfig> {
        let mut config = self.load_project(path, stage)?;
        Self::apply_env_overrides(&mut config, |name| std::env::var(name).ok());
        Ok(config)
    }

    /// Loads capability tables from a file, or the built-in tables.
    ///
    /// # Errors
    ///
    /// Returns an error if the tables cannot be read, parsed or are inconsistent.
    pub fn load_capabilities(&self, path: Option<&Path>) -> Result<Capabilities> {
        match path {
            Some(path) => {
                info!("Loading capability tables from: {}", path.display());
                Capabilities::load(self.resolve(path))
            }
            None => {
                debug!("Using built-in capability tables");
                Capabilities::builtin()
            }
        }
    }

    /// Applies environment overrides to the configuration.
    ///
    /// Variables are looked up as `STACKPLAN_<ATTRIBUTE>`.
    pub fn apply_env_overrides(
        config: &mut ProjectConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(provider) = var("PROVIDER") {
            debug!("Overriding provider from environment");
            config.provider = Some(provider);
        }

        if let Some(region) = var("REGION") {
            debug!("Overriding region from environment");
            config.region = Some(region);
        }

        if let Some(domain) = var("DOMAIN") {
            debug!("Overriding domain from environment");
            config.domain = Some(domain);
        }

        if let Some(branch) = var("BRANCH") {
            debug!("Overriding branch from environment");
            config.branch = Some(branch);
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self.resolve(Path::new(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                ConfigError::parse(
                    format!("Failed to load .env file: {e}"),
                    Some(env_path.display().to_string()),
                )
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_path {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

/// Default project file names to search for.
pub const DEFAULT_PROJECT_FILES: &[&str] = &[
    "stackplan.yml",
    "stackplan.yaml",
    ".stackplan/config.yml",
];

/// Finds the project file in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no project file is found.
pub fn find_project_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_PROJECT_FILES {
            let candidate = current.join(filename);
            if candidate.exists() {
                info!("Found project file: {}", candidate.display());
                return Ok(candidate);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(ConfigError::FileNotFound {
        path: start.join(DEFAULT_PROJECT_FILES[0]),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    const PROJECT: &str = r"
framework: django
provider: aws
production:
  domain: example.com
  services:
    - type: application
      name: web
";

    #[test]
    fn test_parse_project_stage() {
        let parser = ConfigParser::new().with_base_path("/srv/project");
        let config = parser.parse_project(PROJECT, "production", None).unwrap();

        assert_eq!(config.framework.as_deref(), Some("django"));
        assert_eq!(config.root, Some(PathBuf::from("/srv/project")));
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let parser = ConfigParser::new();
        let result = parser.parse_project("production: [unclosed", "production", None);
        assert!(result.is_err());
    }

    #[test]
    fn test_env_overrides() {
        let parser = ConfigParser::new();
        let mut config = parser.parse_project(PROJECT, "production", None).unwrap();

        let vars: HashMap<&str, &str> = [
            ("STACKPLAN_REGION", "us-east-1"),
            ("STACKPLAN_DOMAIN", "staging.example.com"),
        ]
        .into_iter()
        .collect();
        ConfigParser::apply_env_overrides(&mut config, |name| {
            vars.get(name).map(|v| (*v).to_string())
        });

        assert_eq!(config.region.as_deref(), Some("us-east-1"));
        assert_eq!(config.domain.as_deref(), Some("staging.example.com"));
        assert_eq!(config.provider.as_deref(), Some("aws"));
    }

    #[test]
    fn test_load_project_sets_root() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stackplan.yml");
        std::fs::write(&path, PROJECT).unwrap();

        let config = ConfigParser::new().load_project(&path, "production").unwrap();
        assert_eq!(config.root.as_deref(), Some(dir.path()));
    }

    #[test]
    fn test_find_project_file_walks_parents() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("app").join("src");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("stackplan.yml"), PROJECT).unwrap();

        let found = find_project_file(&nested).unwrap();
        assert_eq!(found, dir.path().join("stackplan.yml"));
    }

    #[test]
    fn test_builtin_capabilities_without_path() {
        let capabilities = ConfigParser::new().load_capabilities(None).unwrap();
        assert!(capabilities.providers.contains(&"aws".to_string()));
    }
}
