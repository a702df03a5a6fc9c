//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::planner::ChangeCategory;

/// stackplan - Declarative reconciliation planner for application stacks.
#[derive(Parser, Debug)]
#[command(name = "stackplan")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the project file (searched upwards from the current directory by default).
    #[arg(short, long, global = true, env = "STACKPLAN_PROJECT")]
    pub project: Option<PathBuf>,

    /// Path to a capability table replacing the built-in one.
    #[arg(long, global = true, env = "STACKPLAN_CAPABILITIES")]
    pub capabilities: Option<PathBuf>,

    /// Path to the state file.
    #[arg(long, global = true, env = "STACKPLAN_STATE")]
    pub state: Option<PathBuf>,

    /// Stage to operate on.
    #[arg(short, long, global = true, env = "STACKPLAN_STAGE", default_value = "production")]
    pub stage: String,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Log format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the project file and list the deployables it declares.
    Validate,

    /// Compute the changeset of every group without executing it.
    Plan {
        /// Only plan these groups.
        #[arg(short, long, value_delimiter = ',')]
        group: Vec<String>,

        /// Only report these change categories (provisions, modifications, terminations).
        #[arg(short, long, value_delimiter = ',')]
        entries: Vec<ChangeCategory>,

        /// Show every resource of each changeset.
        #[arg(short, long)]
        detailed: bool,
    },

    /// Record facts reported by an executor into the state.
    ApplyFacts {
        /// JSON file holding one facts object or a list of them.
        file: PathBuf,
    },

    /// Mark every resource of a group for modification on the next run.
    Touch {
        /// Provisioning group.
        group: String,
    },

    /// Mark every resource of a group for replacement on the next run.
    Taint {
        /// Provisioning group.
        group: String,
    },

    /// Inspect the recorded state.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// State inspection subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show the resources recorded for the stage.
    Show {
        /// Only show this group.
        #[arg(short, long)]
        group: Option<String>,
    },

    /// List the groups recorded for the stage.
    Groups,
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// Log format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable log lines.
    #[default]
    Text,
    /// One JSON object per log event.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_plan_arguments() {
        let cli = Cli::try_parse_from([
            "stackplan",
            "--stage",
            "staging",
            "plan",
            "--group",
            "instances,databases",
            "--entries",
            "Provisions,terminations",
        ])
        .unwrap();

        assert_eq!(cli.stage, "staging");
        let Commands::Plan { group, entries, detailed } = cli.command else {
            panic!("expected plan");
        };
        assert_eq!(group, vec!["instances", "databases"]);
        assert_eq!(entries, vec![ChangeCategory::Provisions, ChangeCategory::Terminations]);
        assert!(!detailed);
    }

    #[test]
    fn test_unknown_entry_is_rejected() {
        let result = Cli::try_parse_from(["stackplan", "plan", "--entries", "upgrades"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_state_subcommands() {
        let cli = Cli::try_parse_from(["stackplan", "--output", "json", "state", "show", "-g", "instances"])
            .unwrap();
        assert!(matches!(cli.output, OutputFormat::Json));
        assert!(matches!(
            cli.command,
            Commands::State { command: StateCommands::Show { group: Some(ref g) } } if g == "instances"
        ));
    }
}
