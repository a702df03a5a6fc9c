//! Changesets handed to the executor.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::state::Resource;

/// A category of change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeCategory {
    /// Resources to create.
    Provisions,
    /// Resources to update in place.
    Modifications,
    /// Resources to destroy.
    Terminations,
}

/// Categories requested from the planner. Empty means all of them.
pub type EntrySet = BTreeSet<ChangeCategory>;

impl ChangeCategory {
    /// Every category.
    pub const ALL: [Self; 3] = [Self::Provisions, Self::Modifications, Self::Terminations];

    /// Returns the category name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Provisions => "provisions",
            Self::Modifications => "modifications",
            Self::Terminations => "terminations",
        }
    }
}

impl fmt::Display for ChangeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ChangeCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == s.to_lowercase())
            .ok_or_else(|| {
                format!("unknown change category '{s}' (expected provisions, modifications or terminations)")
            })
    }
}

/// The changes planned for one group.
///
/// Categories that were not requested are kept as empty lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Changeset {
    /// Resources to create.
    #[serde(default)]
    pub provisions: Vec<Resource>,
    /// Resources to update in place.
    #[serde(default)]
    pub modifications: Vec<Resource>,
    /// Resources to destroy.
    #[serde(default)]
    pub terminations: Vec<Resource>,
    /// Resources left as they are.
    #[serde(default)]
    pub unchanged: Vec<Resource>,
    /// Whether any requested category has entries.
    #[serde(default)]
    pub has_changes: bool,
}

impl Changeset {
    /// Returns the entries of a category, empty when not requested.
    #[must_use]
    pub fn category(&self, category: ChangeCategory) -> &[Resource] {
        match category {
            ChangeCategory::Provisions => &self.provisions,
            ChangeCategory::Modifications => &self.modifications,
            ChangeCategory::Terminations => &self.terminations,
        }
    }

    /// Returns the number of changed entries across requested categories.
    #[must_use]
    pub fn change_count(&self) -> usize {
        ChangeCategory::ALL
            .iter()
            .map(|category| self.category(*category).len())
            .sum()
    }

    /// Empties the categories that were not requested.
    ///
    /// Returns `None` when none of the requested ones has entries.
    #[must_use]
    pub fn restrict(mut self, entries: &EntrySet) -> Option<Self> {
        let requested = |category: ChangeCategory| entries.is_empty() || entries.contains(&category);

        if !requested(ChangeCategory::Provisions) {
            self.provisions.clear();
        }
        if !requested(ChangeCategory::Modifications) {
            self.modifications.clear();
        }
        if !requested(ChangeCategory::Terminations) {
            self.terminations.clear();
        }

        self.has_changes = self.change_count() > 0;
        self.has_changes.then_some(self)
    }

    /// Renders a planning result, `{}` standing for no action.
    ///
    /// # Errors
    ///
    /// Returns an error if a resource cannot be serialized.
    pub fn to_json(changeset: Option<&Self>) -> serde_json::Result<Value> {
        changeset.map_or_else(
            || Ok(Value::Object(serde_json::Map::new())),
            serde_json::to_value,
        )
    }
}
