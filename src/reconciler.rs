//! Group-by-group reconciliation.
//!
//! The [`Reconciler`] walks the provisioning groups in dependency order,
//! plans each one against the recorded state, hands the changes to a
//! [`ChangesetExecutor`] and commits the reported facts before moving on.
//! A failing group leaves every group committed before it persisted.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, info};

use crate::config::Capabilities;
use crate::deployable::{Deployable, DeployableSet};
use crate::error::{ReconcileError, Result};
use crate::planner::{ChangeCategory, Changeset, ChangesetExecutor, EntrySet, GroupGraph, GroupPlan, Provisioner};
use crate::state::{ResourcePatch, State, StateStore};

/// Planning outcome of one group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupReport {
    /// Provisioning group.
    pub group: String,
    /// Planned changes, `None` when there is nothing to do.
    pub changeset: Option<Changeset>,
    /// Whether the group was handed to the executor.
    pub executed: bool,
}

/// Result of a reconciliation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationResult {
    /// Stage reconciled.
    pub stage: String,
    /// Reports in execution order.
    pub groups: Vec<GroupReport>,
    /// Groups that changed.
    pub updated_groups: Vec<String>,
    /// Number of resources provisioned.
    pub provisioned: usize,
    /// Number of resources modified.
    pub modified: usize,
    /// Number of resources terminated.
    pub terminated: usize,
    /// Number of resources left unchanged.
    pub unchanged: usize,
}

impl ReconciliationResult {
    fn new(stage: &str, groups: Vec<GroupReport>) -> Self {
        let count = |category: ChangeCategory| -> usize {
            groups
                .iter()
                .filter_map(|report| report.changeset.as_ref())
                .map(|changeset| changeset.category(category).len())
                .sum()
        };

        Self {
            stage: stage.to_string(),
            provisioned: count(ChangeCategory::Provisions),
            modified: count(ChangeCategory::Modifications),
            terminated: count(ChangeCategory::Terminations),
            unchanged: groups
                .iter()
                .filter_map(|report| report.changeset.as_ref())
                .map(|changeset| changeset.unchanged.len())
                .sum(),
            updated_groups: groups
                .iter()
                .filter(|report| report.changeset.is_some())
                .map(|report| report.group.clone())
                .collect(),
            groups,
        }
    }

    /// Returns whether any group changed.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.updated_groups.is_empty()
    }
}

/// Drives planning and execution across groups.
pub struct Reconciler<'a, S: StateStore> {
    capabilities: &'a Capabilities,
    store: &'a S,
    stage: String,
    graph: GroupGraph,
    entries: EntrySet,
    groups: Option<BTreeSet<String>>,
}

impl<'a, S: StateStore> Reconciler<'a, S> {
    /// Creates a reconciler for a stage.
    #[must_use]
    pub fn new(capabilities: &'a Capabilities, store: &'a S, stage: impl Into<String>) -> Self {
        Self {
            capabilities,
            store,
            stage: stage.into(),
            graph: GroupGraph::from_capabilities(capabilities),
            entries: EntrySet::new(),
            groups: None,
        }
    }

    /// Restricts the change categories reported.
    #[must_use]
    pub fn with_entries(mut self, entries: EntrySet) -> Self {
        self.entries = entries;
        self
    }

    /// Restricts reconciliation to some groups.
    #[must_use]
    pub fn with_groups(mut self, groups: impl IntoIterator<Item = String>) -> Self {
        self.groups = Some(groups.into_iter().collect());
        self
    }

    async fn load_state(&self) -> Result<State> {
        let state = State::load(self.store, &self.stage).await?;
        Ok(state.with_preserved_keys(self.capabilities.preserved_output_keys.iter().cloned()))
    }

    /// Returns the groups to visit, in dependency order.
    fn ordered_groups(&self, set: &DeployableSet, state: &State) -> Result<Vec<String>> {
        let mut groups = set.groups();
        groups.extend(state.groups());
        if let Some(selected) = &self.groups {
            groups.retain(|group| selected.contains(group));
        }
        self.graph.order(groups.iter().map(String::as_str))
    }

    /// Plans one group against the current state.
    fn plan_group(
        &self,
        set: &DeployableSet,
        state: &State,
        group: &str,
        updated: &BTreeSet<String>,
    ) -> Result<(Vec<Deployable>, Option<Changeset>)> {
        let mut deployables = set.for_group(group);
        for deployable in &mut deployables {
            deployable.process_state(state)?;
        }

        let resources = state.get_resources(group);
        let changeset = Provisioner::new(self.capabilities).changes(
            &deployables,
            &resources,
            updated,
            &self.entries,
        );
        Ok((deployables, changeset))
    }

    /// Plans every group without executing anything.
    ///
    /// Groups planned with changes count as updated for the groups after
    /// them, as they would during a real run.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be loaded, the groups form a
    /// cycle or a deployable cannot be refreshed from state.
    pub async fn plan(&self, set: &DeployableSet) -> Result<ReconciliationResult> {
        let state = self.load_state().await?;
        let mut updated = BTreeSet::new();
        let mut reports = Vec::new();

        for group in self.ordered_groups(set, &state)? {
            let (_, changeset) = self.plan_group(set, &state, &group, &updated)?;
            if changeset.is_some() {
                updated.insert(group.clone());
            }
            reports.push(GroupReport {
                group,
                changeset,
                executed: false,
            });
        }

        Ok(ReconciliationResult::new(&self.stage, reports))
    }

    /// Reconciles every group, executing and committing one at a time.
    ///
    /// # Errors
    ///
    /// Returns an error as soon as a group fails to plan, execute or
    /// commit. Groups committed before the failure stay persisted.
    pub async fn reconcile<E>(&self, set: &DeployableSet, executor: &E) -> Result<ReconciliationResult>
    where
        E: ChangesetExecutor + ?Sized,
    {
        info!("Starting reconciliation for stage '{}'", self.stage);

        let mut state = self.load_state().await?;
        let mut updated = BTreeSet::new();
        let mut reports = Vec::new();

        for group in self.ordered_groups(set, &state)? {
            let (deployables, changeset) = self.plan_group(set, &state, &group, &updated)?;

            let changeset = match changeset {
                Some(changeset) => {
                    updated.insert(group.clone());
                    self.touch_dependants(&mut state, &group).await?;
                    Some(changeset)
                }
                None if self.capabilities.is_omnipresent(&group) && !deployables.is_empty() => {
                    debug!("Group '{group}' is omnipresent, executing without changes");
                    None
                }
                None => {
                    debug!("Group '{group}' is up to date");
                    reports.push(GroupReport {
                        group,
                        changeset: None,
                        executed: false,
                    });
                    continue;
                }
            };

            let plan = GroupPlan {
                stage: self.stage.clone(),
                group: group.clone(),
                changeset: changeset.clone().unwrap_or_else(|| Changeset {
                    unchanged: state.get_resources(&group).into_resources(),
                    ..Changeset::default()
                }),
                host_groups: host_groups(&deployables),
            };

            info!("Applying {} changes to group '{group}'", plan.changeset.change_count());
            let facts = executor.execute(&plan).await.map_err(|e| {
                error!("Group '{group}' failed: {e}");
                ReconcileError::GroupFailed {
                    group: group.clone(),
                    reason: e.to_string(),
                }
            })?;

            if facts.group != group {
                return Err(ReconcileError::UnexpectedFacts {
                    expected: group,
                    found: facts.group,
                }
                .into());
            }

            state.apply_facts(facts);
            state.save(self.store).await?;

            reports.push(GroupReport {
                group,
                changeset,
                executed: true,
            });
        }

        let result = ReconciliationResult::new(&self.stage, reports);
        info!(
            "Reconciliation finished: {} provisioned, {} modified, {} terminated",
            result.provisioned, result.modified, result.terminated
        );
        Ok(result)
    }

    /// Marks the resources of groups depending on a changed group, and
    /// persists the marks before the group is executed.
    async fn touch_dependants(&self, state: &mut State, group: &str) -> Result<()> {
        let mut touched = 0;
        for dependant in self.graph.dependants(group) {
            touched += state.merge_group_resource_attributes(dependant, &ResourcePatch::touch());
        }

        if touched > 0 {
            debug!("Touched {touched} resources depending on '{group}'");
            state.save(self.store).await?;
        }
        Ok(())
    }
}

/// Host groups of each deployable.
fn host_groups(deployables: &[Deployable]) -> BTreeMap<String, Vec<String>> {
    deployables
        .iter()
        .map(|d| (d.deployable_id().to_string(), d.host_groups().to_vec()))
        .collect()
}

impl std::fmt::Display for ReconciliationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Reconciliation of stage '{}':", self.stage)?;
        writeln!(f, "  Provisioned: {}", self.provisioned)?;
        writeln!(f, "  Modified: {}", self.modified)?;
        writeln!(f, "  Terminated: {}", self.terminated)?;
        writeln!(f, "  Unchanged: {}", self.unchanged)?;

        if !self.updated_groups.is_empty() {
            writeln!(f, "  Updated groups: {}", self.updated_groups.join(", "))?;
        }
        Ok(())
    }
}
