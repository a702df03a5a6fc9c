//! Error types for the stackplan reconciliation engine.
//!
//! Errors are layered by concern: configuration loading, deployable
//! construction and validation, state persistence, planning and the
//! group-by-group reconciliation driver.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for stackplan.
#[derive(Debug, Error)]
pub enum StackplanError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Deployable construction errors.
    #[error("Deployable error: {0}")]
    Deployable(#[from] DeployableError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Reconciliation errors.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// The project file has no branch for the requested stage.
    #[error("Stage '{stage}' is not defined in the project configuration")]
    UnknownStage {
        /// The requested stage.
        stage: String,
    },

    /// The capability tables are inconsistent.
    #[error("Invalid capability tables: {message}")]
    InvalidCapabilities {
        /// Description of the inconsistency.
        message: String,
    },

    /// Two entries resolve to the same deployable.
    #[error("Duplicate {resource_type} name: {name}")]
    DuplicateName {
        /// Type of entry (service, dependency).
        resource_type: String,
        /// The duplicated name.
        name: String,
    },

    /// Circular dependency detected between groups.
    #[error("Circular dependency detected: {cycle}")]
    CircularDependency {
        /// Description of the cycle.
        cycle: String,
    },
}

/// Category of a deployable, used in lookup errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployableCategory {
    /// A service.
    Service,
    /// A software dependency attached to a service.
    Dependency,
    /// A cross-cutting utility.
    Utility,
}

impl fmt::Display for DeployableCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service => write!(f, "service"),
            Self::Dependency => write!(f, "dependency"),
            Self::Utility => write!(f, "utility"),
        }
    }
}

/// Errors raised while building deployables from configuration.
#[derive(Debug, Error)]
pub enum DeployableError {
    /// One or more attributes failed validation.
    #[error("Invalid {kind} attributes: {}", format_violations(.violations))]
    Validation {
        /// Kind of the deployable being validated.
        kind: String,
        /// Violated attributes mapped to their messages.
        violations: BTreeMap<String, String>,
    },

    /// No variant can be resolved for the kind.
    #[error("{category} '{kind}' is not available{}", provider_suffix(.provider.as_deref()))]
    NotAvailable {
        /// Category that was looked up.
        category: DeployableCategory,
        /// The requested kind.
        kind: String,
        /// The requested provider, if any.
        provider: Option<String>,
    },

    /// The kind has no provisioning group.
    #[error("Deployable kind '{kind}' is not mapped to any group")]
    UnmappedKind {
        /// The unmapped kind.
        kind: String,
    },

    /// An entry in the project file has no kind.
    #[error("Missing kind for {category} entry")]
    MissingKind {
        /// Category of the entry.
        category: DeployableCategory,
    },
}

fn format_violations(violations: &BTreeMap<String, String>) -> String {
    violations
        .iter()
        .map(|(attribute, message)| format!("{attribute}: {message}"))
        .collect::<Vec<_>>()
        .join("; ")
}

fn provider_suffix(provider: Option<&str>) -> String {
    provider.map_or_else(String::new, |p| format!(" for provider '{p}'"))
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// The state document could not be written.
    #[error("Failed to write state: {message}")]
    WriteFailed {
        /// Description of the write failure.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected at most {expected}, found {found}")]
    VersionMismatch {
        /// Highest supported state version.
        expected: u32,
        /// Found state version.
        found: u32,
    },

    /// More than one resource where exactly one is expected.
    #[error("Expected a single resource in group '{group}', found {found}")]
    Inconsistent {
        /// Group that was looked up.
        group: String,
        /// Number of resources found.
        found: usize,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// An environment template could not be rendered.
    #[error("Failed to render template for '{export}': {message}")]
    Template {
        /// Export name of the entry being rendered.
        export: String,
        /// Description of the rendering failure.
        message: String,
    },
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The executor failed to apply a group's changeset.
    #[error("Failed to apply changes for group '{group}': {reason}")]
    GroupFailed {
        /// Group being applied.
        group: String,
        /// Reason for failure.
        reason: String,
    },

    /// The executor reported facts for a different group.
    #[error("Executor returned facts for '{found}' while applying '{expected}'")]
    UnexpectedFacts {
        /// Group being applied.
        expected: String,
        /// Group named in the facts.
        found: String,
    },
}

/// Result type alias for stackplan operations.
pub type Result<T> = std::result::Result<T, StackplanError>;

impl StackplanError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if the error was caused by invalid user input rather than
    /// by the environment.
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Deployable(_))
    }
}

impl ConfigError {
    /// Creates a parse error for the given location.
    #[must_use]
    pub fn parse(message: impl Into<String>, location: Option<String>) -> Self {
        Self::ParseError {
            message: message.into(),
            location,
        }
    }
}

impl DeployableError {
    /// Creates a lookup error for a kind with no resolvable variant.
    #[must_use]
    pub fn not_available(
        category: DeployableCategory,
        kind: impl Into<String>,
        provider: Option<&str>,
    ) -> Self {
        Self::NotAvailable {
            category,
            kind: kind.into(),
            provider: provider.map(str::to_string),
        }
    }
}

impl StateError {
    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Creates a corruption error with the given message.
    #[must_use]
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates a write error with the given message.
    #[must_use]
    pub fn write_failed(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }
}
