//! Group dependency graph.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::Capabilities;
use crate::error::{ConfigError, Result};

/// Dependencies between provisioning groups.
#[derive(Debug, Clone, Default)]
pub struct GroupGraph {
    depends_on: BTreeMap<String, BTreeSet<String>>,
}

impl GroupGraph {
    /// Builds the graph declared in the capability tables.
    #[must_use]
    pub fn from_capabilities(capabilities: &Capabilities) -> Self {
        let depends_on = capabilities
            .groups
            .depends_on
            .iter()
            .map(|(group, deps)| (group.clone(), deps.iter().cloned().collect()))
            .collect();
        Self { depends_on }
    }

    /// Adds an edge: `group` converges after `dependency`.
    pub fn add_dependency(&mut self, group: &str, dependency: &str) {
        self.depends_on
            .entry(group.to_string())
            .or_default()
            .insert(dependency.to_string());
    }

    /// Returns the groups a group depends on directly.
    #[must_use]
    pub fn dependencies(&self, group: &str) -> BTreeSet<&str> {
        self.depends_on
            .get(group)
            .map(|deps| deps.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Returns the groups that depend directly on a group.
    #[must_use]
    pub fn dependants(&self, group: &str) -> BTreeSet<&str> {
        self.depends_on
            .iter()
            .filter(|(_, deps)| deps.contains(group))
            .map(|(dependant, _)| dependant.as_str())
            .collect()
    }

    /// Orders groups so that each comes after the groups it depends on.
    ///
    /// Dependencies outside `groups` are ignored. Ties are broken by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the groups form a cycle.
    pub fn order<'g>(&self, groups: impl IntoIterator<Item = &'g str>) -> Result<Vec<String>> {
        let selected: BTreeSet<&str> = groups.into_iter().collect();

        let mut pending: BTreeMap<&str, usize> = selected
            .iter()
            .map(|group| {
                let count = self
                    .dependencies(group)
                    .iter()
                    .filter(|dep| selected.contains(*dep) && *dep != group)
                    .count();
                (*group, count)
            })
            .collect();

        let mut ready: BTreeSet<&str> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(group, _)| *group)
            .collect();
        let mut ordered: Vec<String> = Vec::with_capacity(selected.len());

        while let Some(group) = ready.pop_first() {
            pending.remove(group);
            ordered.push(group.to_string());

            for dependant in self.dependants(group) {
                if let Some(count) = pending.get_mut(dependant) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(dependant);
                    }
                }
            }
        }

        if pending.is_empty() {
            Ok(ordered)
        } else {
            let cycle = pending.keys().copied().collect::<Vec<_>>().join(", ");
            Err(ConfigError::CircularDependency { cycle }.into())
        }
    }
}
