//! Configuration for stackplan.
//!
//! This module handles the capability tables, project files for each stage,
//! environment overrides and content hashing.

mod capabilities;
mod hash;
mod parser;
mod project;

pub use capabilities::{
    AttributeTable, Capabilities, CredentialTable, DependencyTable, GroupTable, ServiceTable,
    StandaloneTable, UtilityTable, VersionTable,
};
pub use hash::ConfigHasher;
pub use parser::{ConfigParser, DEFAULT_PROJECT_FILES, ENV_PREFIX, find_project_file};
pub use project::{ConfigFileEntry, ProjectConfig, ROOT_ATTRIBUTES, SslConfig};
