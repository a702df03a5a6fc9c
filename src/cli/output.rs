//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde_json::{Map, Value, json};
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::ProjectConfig;
use crate::deployable::DeployableSet;
use crate::params::display_value;
use crate::planner::{ChangeCategory, Changeset};
use crate::reconciler::ReconciliationResult;
use crate::state::{Resource, State};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Deployable row for table display.
#[derive(Tabled)]
struct DeployableRow {
    #[tabled(rename = "Group")]
    group: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Identity")]
    id: String,
    #[tabled(rename = "Provider")]
    provider: String,
    #[tabled(rename = "Nodes")]
    nodes: usize,
}

/// Changeset entry row for table display.
#[derive(Tabled)]
struct ChangeRow {
    #[tabled(rename = "Group")]
    group: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Node")]
    node: String,
}

/// Recorded resource row for table display.
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Group")]
    group: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Reference")]
    reference: String,
    #[tabled(rename = "Flags")]
    flags: String,
    #[tabled(rename = "Created")]
    created: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats the deployables collected from a project stage.
    #[must_use]
    pub fn format_validation(&self, project: &ProjectConfig, set: &DeployableSet) -> String {
        match self.format {
            OutputFormat::Json => {
                let deployables: Vec<Value> = set
                    .iter()
                    .map(|d| {
                        json!({
                            "id": d.deployable_id(),
                            "kind": d.kind(),
                            "group": d.group(),
                            "provider": d.provider(),
                            "nodes": d.nodes(),
                            "params": d.provision_params(),
                        })
                    })
                    .collect();
                let document = json!({ "stage": project.stage, "deployables": deployables });
                serde_json::to_string_pretty(&document).unwrap_or_default()
            }
            OutputFormat::Text => Self::format_validation_text(project, set),
        }
    }

    fn format_validation_text(project: &ProjectConfig, set: &DeployableSet) -> String {
        let mut output = String::new();

        let _ = writeln!(
            output,
            "{} Stage '{}' is valid: {} deployables\n",
            "✓".green(),
            project.stage,
            set.len()
        );

        let rows: Vec<DeployableRow> = set
            .by_group()
            .into_iter()
            .flat_map(|(group, deployables)| {
                deployables.into_iter().map(move |d| DeployableRow {
                    group: group.to_string(),
                    kind: d.kind().to_string(),
                    id: Self::truncate(d.deployable_id(), 48),
                    provider: d.provider().unwrap_or("-").to_string(),
                    nodes: d.nodes(),
                })
            })
            .collect();

        if !rows.is_empty() {
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        output
    }

    /// Formats a planning result.
    ///
    /// In JSON, each group maps to its changeset, or `{}` when there is
    /// nothing to do.
    #[must_use]
    pub fn format_plan(&self, result: &ReconciliationResult, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => {
                let groups: Map<String, Value> = result
                    .groups
                    .iter()
                    .map(|report| {
                        let value = Changeset::to_json(report.changeset.as_ref()).unwrap_or_default();
                        (report.group.clone(), value)
                    })
                    .collect();
                let document = json!({
                    "stage": result.stage,
                    "updated_groups": result.updated_groups,
                    "groups": groups,
                });
                serde_json::to_string_pretty(&document).unwrap_or_default()
            }
            OutputFormat::Text => Self::format_plan_text(result, detailed),
        }
    }

    fn format_plan_text(result: &ReconciliationResult, detailed: bool) -> String {
        if !result.has_changes() {
            return format!(
                "{} No changes required, stage '{}' is up to date.\n",
                "✓".green(),
                result.stage
            );
        }

        let mut output = String::new();
        let _ = writeln!(output, "\nPlan for stage '{}'\n", result.stage);

        let mut rows = Vec::new();
        for report in &result.groups {
            let Some(changeset) = &report.changeset else {
                continue;
            };
            for category in ChangeCategory::ALL {
                rows.extend(changeset.category(category).iter().map(|resource| {
                    Self::change_row(&report.group, &Self::format_category(category), resource)
                }));
            }
            if detailed {
                rows.extend(changeset.unchanged.iter().map(|resource| {
                    Self::change_row(&report.group, &"unchanged".dimmed().to_string(), resource)
                }));
            }
        }

        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        if detailed {
            for report in &result.groups {
                let Some(changeset) = &report.changeset else {
                    continue;
                };
                for resource in changeset.category(ChangeCategory::Modifications) {
                    let _ = writeln!(output, "\n{} {}", "~".yellow(), resource.id);
                    for (key, value) in &resource.provision_params {
                        let _ = writeln!(output, "    {key}: {}", display_value(value));
                    }
                }
            }
        }

        let _ = write!(
            output,
            "\nPlan: {} to provision, {} to modify, {} to terminate\n",
            result.provisioned.to_string().green(),
            result.modified.to_string().yellow(),
            result.terminated.to_string().red()
        );
        let _ = writeln!(output, "Updated groups: {}", result.updated_groups.join(", "));

        output
    }

    fn change_row(group: &str, action: &str, resource: &Resource) -> ChangeRow {
        ChangeRow {
            group: group.to_string(),
            action: action.to_string(),
            resource: Self::truncate(&resource.id, 48),
            node: resource
                .node_index
                .map_or_else(|| "-".to_string(), |index| index.to_string()),
        }
    }

    fn format_category(category: ChangeCategory) -> String {
        match category {
            ChangeCategory::Provisions => "+ provision".green().to_string(),
            ChangeCategory::Modifications => "~ modify".yellow().to_string(),
            ChangeCategory::Terminations => "- terminate".red().to_string(),
        }
    }

    /// Formats the resources recorded for the stage.
    #[must_use]
    pub fn format_state(&self, state: &State, group: Option<&str>) -> String {
        let groups: Vec<String> = state
            .groups()
            .into_iter()
            .filter(|g| group.is_none_or(|selected| selected == g))
            .collect();

        match self.format {
            OutputFormat::Json => {
                let document: Map<String, Value> = groups
                    .iter()
                    .map(|g| {
                        let resources = state.get_resources(g).into_resources();
                        (g.clone(), serde_json::to_value(resources).unwrap_or_default())
                    })
                    .collect();
                serde_json::to_string_pretty(&document).unwrap_or_default()
            }
            OutputFormat::Text => {
                let rows: Vec<ResourceRow> = groups
                    .iter()
                    .flat_map(|g| state.get_resources(g).into_resources())
                    .map(|resource| Self::resource_row(&resource))
                    .collect();

                if rows.is_empty() {
                    return format!("No resources recorded for stage '{}'.\n", state.stage());
                }

                let mut output = format!("\nState of stage '{}'\n\n", state.stage());
                output.push_str(&Table::new(rows).to_string());
                output.push('\n');
                output
            }
        }
    }

    fn resource_row(resource: &Resource) -> ResourceRow {
        let mut flags = Vec::new();
        if resource.tainted {
            flags.push("tainted".red().to_string());
        }
        if resource.touched {
            flags.push("touched".yellow().to_string());
        }

        ResourceRow {
            group: resource.group.clone(),
            resource: Self::truncate(&resource.id, 48),
            reference: resource
                .reference
                .as_deref()
                .map_or_else(|| "-".to_string(), |reference| Self::truncate(reference, 12)),
            flags: flags.join(" "),
            created: resource.created_at.format("%Y-%m-%d %H:%M").to_string(),
        }
    }

    /// Formats the groups recorded for the stage.
    #[must_use]
    pub fn format_groups(&self, state: &State) -> String {
        let groups = state.groups();
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&groups).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();
                for group in &groups {
                    let count = state.get_resources(group).len();
                    let _ = writeln!(output, "{group} ({count} resources)");
                }
                output
            }
        }
    }

    /// Formats the outcome of flagging a group's resources.
    #[must_use]
    pub fn format_flagged(&self, group: &str, flag: &str, count: usize) -> String {
        match self.format {
            OutputFormat::Json => {
                json!({ "group": group, "flag": flag, "resources": count }).to_string()
            }
            OutputFormat::Text if count == 0 => {
                format!("{} No resources recorded in group '{group}'.\n", "!".yellow())
            }
            OutputFormat::Text => format!("{} Marked {count} resources of '{group}' as {flag}.\n", "✓".green()),
        }
    }

    /// Formats the groups updated from executor facts.
    #[must_use]
    pub fn format_facts(&self, groups: &[String]) -> String {
        match self.format {
            OutputFormat::Json => json!({ "updated_groups": groups }).to_string(),
            OutputFormat::Text => format!("{} Recorded facts for: {}\n", "✓".green(), groups.join(", ")),
        }
    }

    fn truncate(s: &str, max: usize) -> String {
        if s.chars().count() <= max {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::GroupReport;
    use crate::state::StateDocument;

    fn result(changeset: Option<Changeset>) -> ReconciliationResult {
        serde_json::from_value(json!({
            "stage": "production",
            "groups": [{ "group": "instances", "changeset": changeset, "executed": false }],
            "updated_groups": if changeset.is_some() { vec!["instances"] } else { vec![] },
            "provisioned": changeset.as_ref().map_or(0, |c| c.category(ChangeCategory::Provisions).len()),
            "modified": 0,
            "terminated": 0,
            "unchanged": 0,
        }))
        .unwrap()
    }

    #[test]
    fn test_truncate() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(OutputFormatter::truncate("a-rather-long-name", 10), "a-rathe...");
    }

    #[test]
    fn test_no_action_renders_empty_object() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let output: Value = serde_json::from_str(&formatter.format_plan(&result(None), false)).unwrap();

        assert_eq!(output["groups"]["instances"], json!({}));
        assert_eq!(output["updated_groups"], json!([]));
    }

    #[test]
    fn test_plan_json_lists_changes() {
        let changeset = Changeset {
            provisions: vec![Resource::new("app-1", "instances", Default::default())],
            modifications: Vec::new(),
            terminations: Vec::new(),
            unchanged: Vec::new(),
            has_changes: true,
        };
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let output: Value =
            serde_json::from_str(&formatter.format_plan(&result(Some(changeset)), false)).unwrap();

        assert_eq!(output["groups"]["instances"]["provisions"][0]["id"], "app-1");
        assert_eq!(output["groups"]["instances"]["has_changes"], true);
    }

    #[test]
    fn test_plan_text_up_to_date() {
        let formatter = OutputFormatter::new(OutputFormat::Text);
        let output = formatter.format_plan(&result(None), true);
        assert!(output.contains("up to date"));
    }

    #[test]
    fn test_state_text_empty() {
        let state = State::new(StateDocument::default(), "production");
        let formatter = OutputFormatter::new(OutputFormat::Text);
        assert!(formatter.format_state(&state, None).contains("No resources recorded"));
    }

    #[test]
    fn test_report_is_deserializable() {
        let report: GroupReport =
            serde_json::from_value(json!({ "group": "databases", "changeset": null, "executed": true })).unwrap();
        assert!(report.changeset.is_none());
    }
}
