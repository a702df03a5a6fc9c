//! Planning module.
//!
//! This module compares desired deployables with recorded resources and
//! produces changesets, orders groups by their dependencies and defines the
//! seam through which changesets are executed.

mod changeset;
mod diff;
mod executor;
mod graph;
mod provisioner;

pub use changeset::{ChangeCategory, Changeset, EntrySet};
pub use diff::{ParamChange, ParamDiff, VOLATILE_KEYS, diff_params, requires_replacement, without_ignored};
#[cfg(test)]
pub use executor::MockChangesetExecutor;
pub use executor::{ChangesetExecutor, GroupPlan};
pub use graph::GroupGraph;
pub use provisioner::{PlanOutcome, Provisioner};
