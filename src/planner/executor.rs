//! Executor seam.
//!
//! Applying a changeset (running playbooks, calling provider APIs) happens
//! outside this crate. The reconciler hands each group's plan to a
//! [`ChangesetExecutor`] and records the facts it reports back.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::state::Facts;

use super::changeset::Changeset;

/// The work handed to the executor for one group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupPlan {
    /// Stage being reconciled.
    pub stage: String,
    /// Provisioning group.
    pub group: String,
    /// Changes to apply. Empty for omnipresent groups without changes.
    pub changeset: Changeset,
    /// Host groups targeted, keyed by deployable identity.
    pub host_groups: BTreeMap<String, Vec<String>>,
}

impl GroupPlan {
    /// Returns whether the plan carries no change.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        !self.changeset.has_changes
    }
}

/// Applies group plans and reports the resulting resources.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChangesetExecutor: Send + Sync {
    /// Applies a group's changeset.
    ///
    /// The returned facts list every resource of the group after execution;
    /// terminated resources are absent.
    async fn execute(&self, plan: &GroupPlan) -> Result<Facts>;
}
