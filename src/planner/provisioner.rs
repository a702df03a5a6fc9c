//! Planning algorithm.
//!
//! The [`Provisioner`] compares the desired deployables of a group with the
//! recorded resources and decides what to provision, modify and terminate.
//! It never mutates its input: the recorded list is cloned into a working
//! list which is returned alongside the changeset.

use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::config::Capabilities;
use crate::deployable::Deployable;
use crate::params::is_truthy;
use crate::state::{Resource, ResourceList};

use super::changeset::{Changeset, EntrySet};
use super::diff::{requires_replacement, without_ignored};

/// Result of planning one group.
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    /// The changes to apply, `None` when there is nothing to do.
    pub changeset: Option<Changeset>,
    /// The working list the changeset was derived from.
    pub resources: ResourceList,
}

/// Computes changesets from desired deployables and recorded resources.
#[derive(Debug, Clone, Copy)]
pub struct Provisioner<'a> {
    capabilities: &'a Capabilities,
}

impl<'a> Provisioner<'a> {
    /// Creates a provisioner using the given capability tables.
    #[must_use]
    pub const fn new(capabilities: &'a Capabilities) -> Self {
        Self { capabilities }
    }

    /// Computes the changes for a group.
    ///
    /// `updated` lists the groups changed earlier in the same pass, and
    /// `entries` the categories to report (empty for all).
    #[must_use]
    pub fn changes(
        &self,
        deployables: &[Deployable],
        resources: &ResourceList,
        updated: &BTreeSet<String>,
        entries: &EntrySet,
    ) -> Option<Changeset> {
        self.plan(deployables, resources, updated, entries).changeset
    }

    /// Computes the changes for a group and returns the working list.
    #[must_use]
    pub fn plan(
        &self,
        deployables: &[Deployable],
        resources: &ResourceList,
        updated: &BTreeSet<String>,
        entries: &EntrySet,
    ) -> PlanOutcome {
        let mut working = resources.clone();
        working.modify_touched_resources();
        working.terminate_unused_resources(deployables);

        for deployable in deployables {
            let dependencies_modified = deployable.depends_on().iter().any(|g| updated.contains(g));
            let regenerate = self.should_regenerate_credentials(deployable, &working);
            if dependencies_modified {
                debug!("{} depends on a changed group", deployable.deployable_id());
            }
            if regenerate {
                info!("Regenerating credentials for {}", deployable.deployable_id());
            }
            let force = dependencies_modified || regenerate;

            if deployable.nodes_expandable() {
                Self::process_nodes(deployable, &mut working, force);
            } else {
                Self::process_single(deployable, &mut working, force);
            }
        }

        let changeset = working.serialize().restrict(entries);
        PlanOutcome {
            changeset,
            resources: working,
        }
    }

    /// Whether a recorded resource of the deployable lacks credentials.
    fn should_regenerate_credentials(&self, deployable: &Deployable, resources: &ResourceList) -> bool {
        let keys = self
            .capabilities
            .credential_keys(deployable.group(), deployable.provider());
        if keys.is_empty() {
            return false;
        }

        resources.find(deployable).iter().any(|resource| {
            keys.iter().any(|key| {
                resource
                    .output
                    .get(key)
                    .is_some_and(|value| !is_truthy(value))
            })
        })
    }

    fn process_single(deployable: &Deployable, resources: &mut ResourceList, force: bool) {
        let found: Vec<Resource> = resources.find(deployable).into_iter().cloned().collect();
        if found.is_empty() {
            resources.provision(deployable);
            return;
        }

        let desired = deployable.as_resource();
        for current in &found {
            Self::reconcile(deployable, current, &desired, resources, force);
        }
    }

    fn process_nodes(deployable: &Deployable, resources: &mut ResourceList, force: bool) {
        let desired_count = deployable.nodes();
        let mut existing: Vec<Resource> = resources
            .find(deployable)
            .into_iter()
            .flat_map(Resource::node_list)
            .collect();
        existing.sort_by_key(|node| node.node_index);
        resources.reset(deployable.deployable_id(), existing.clone());

        for node in existing
            .iter()
            .rev()
            .filter(|node| node.node_index.is_some_and(|index| index > desired_count))
        {
            resources.terminate_resource(node.clone());
        }

        for desired in deployable.as_node_resources() {
            match existing.iter().find(|node| node.node_index == desired.node_index) {
                Some(current) => Self::reconcile(deployable, current, &desired, resources, force),
                None => resources.provision_resource(desired),
            }
        }
    }

    /// Schedules the changes needed to move a recorded resource to the
    /// desired one.
    fn reconcile(
        deployable: &Deployable,
        current: &Resource,
        desired: &Resource,
        resources: &mut ResourceList,
        force: bool,
    ) {
        let diff = without_ignored(
            current.diff_params(&desired.provision_params),
            deployable.diff_ignored_keys(),
        );

        if current.tainted || requires_replacement(&diff, deployable.replacement_triggers()) {
            debug!(
                "Replacing {} (tainted: {}, changed: {:?})",
                current.id,
                current.tainted,
                diff.keys().collect::<Vec<_>>()
            );
            resources.terminate_resource(current.clone());
            let mut replacement = desired.clone();
            replacement.node_index = current.node_index;
            resources.provision_resource(replacement);
        } else if force || current.touched || !diff.is_empty() {
            resources.modify_resource(current.superseded_by(desired));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployable::fixtures::{application, capabilities, managed_mysql, params, service};
    use crate::deployable::{Deployable, DeployableFactory};
    use crate::planner::ChangeCategory;
    use serde_json::json;

    fn none() -> BTreeSet<String> {
        BTreeSet::new()
    }

    fn all() -> EntrySet {
        EntrySet::new()
    }

    fn nginx(capabilities: &Capabilities, version: &str) -> Deployable {
        DeployableFactory::new(capabilities)
            .dependency("nginx", "application", &params(json!({"version": version})))
            .unwrap()
    }

    fn recorded_nodes(app: &Deployable, count: usize) -> Resource {
        let mut resource = app.as_resource();
        let nodes: Vec<serde_json::Value> = (1..=count)
            .map(|i| json!({"name": format!("application-server-{i}"), "resource_id": format!("i-{i}")}))
            .collect();
        resource.output.insert("nodes".to_string(), json!(nodes));
        resource
    }

    #[test]
    fn test_provisions_missing_resource() {
        let capabilities = capabilities();
        let provisioner = Provisioner::new(&capabilities);
        let nginx = nginx(&capabilities, "1.16");

        let changes = provisioner
            .changes(std::slice::from_ref(&nginx), &ResourceList::default(), &none(), &all())
            .unwrap();

        assert!(changes.has_changes);
        assert_eq!(changes.category(ChangeCategory::Provisions).len(), 1);
        assert_eq!(changes.category(ChangeCategory::Provisions)[0].id, nginx.deployable_id());
        assert!(changes.category(ChangeCategory::Modifications).is_empty());
        assert!(changes.unchanged.is_empty());
    }

    #[test]
    fn test_matching_params_need_no_action() {
        let capabilities = capabilities();
        let provisioner = Provisioner::new(&capabilities);
        let nginx = nginx(&capabilities, "1.16");
        let list = ResourceList::new(vec![nginx.as_resource()]);

        assert!(provisioner
            .changes(std::slice::from_ref(&nginx), &list, &none(), &all())
            .is_none());
    }

    #[test]
    fn test_planning_is_idempotent_and_pure() {
        let capabilities = capabilities();
        let provisioner = Provisioner::new(&capabilities);
        let old = nginx(&capabilities, "1.14");
        let new = nginx(&capabilities, "1.16");
        let list = ResourceList::new(vec![old.as_resource()]);
        let snapshot = list.clone();

        let first = provisioner.changes(std::slice::from_ref(&new), &list, &none(), &all());
        let second = provisioner.changes(std::slice::from_ref(&new), &list, &none(), &all());

        assert_eq!(first, second);
        assert_eq!(list, snapshot);
    }

    #[test]
    fn test_upgrade_modifies_in_place() {
        let capabilities = capabilities();
        let provisioner = Provisioner::new(&capabilities);
        let old = nginx(&capabilities, "1.14");
        let new = nginx(&capabilities, "1.16");
        let list = ResourceList::new(vec![old.as_resource()]);

        let changes = provisioner
            .changes(std::slice::from_ref(&new), &list, &none(), &all())
            .unwrap();

        let modifications = changes.category(ChangeCategory::Modifications);
        assert_eq!(modifications.len(), 1);
        assert_eq!(modifications[0].provision_params["version"], json!("1.16"));
        assert!(changes.category(ChangeCategory::Provisions).is_empty());
        assert!(changes.category(ChangeCategory::Terminations).is_empty());
        assert!(changes.unchanged.is_empty());
    }

    #[test]
    fn test_changed_dependency_group_forces_modification() {
        let capabilities = capabilities();
        let provisioner = Provisioner::new(&capabilities);
        let nginx = nginx(&capabilities, "1.16");
        let list = ResourceList::new(vec![nginx.as_resource()]);

        let updated: BTreeSet<String> = nginx.depends_on().iter().cloned().collect();
        assert!(!updated.is_empty());

        let changes = provisioner
            .changes(std::slice::from_ref(&nginx), &list, &updated, &all())
            .unwrap();
        assert_eq!(changes.category(ChangeCategory::Modifications).len(), 1);
        assert!(changes.unchanged.is_empty());
    }

    #[test]
    fn test_changed_dependency_group_provisions_missing() {
        let capabilities = capabilities();
        let provisioner = Provisioner::new(&capabilities);
        let nginx = nginx(&capabilities, "1.16");
        let updated: BTreeSet<String> = nginx.depends_on().iter().cloned().collect();

        let changes = provisioner
            .changes(std::slice::from_ref(&nginx), &ResourceList::default(), &updated, &all())
            .unwrap();
        assert_eq!(changes.category(ChangeCategory::Provisions).len(), 1);
        assert!(changes.category(ChangeCategory::Modifications).is_empty());
    }

    #[test]
    fn test_exempt_group_is_modified_not_replaced() {
        let capabilities = capabilities();
        let provisioner = Provisioner::new(&capabilities);
        let recorded = managed_mysql(&capabilities, "db.t2.micro").as_resource();
        let resized = service(
            &capabilities,
            "mysql",
            Some("aws"),
            json!({"name": "mysql-database", "size": "db.m5.large", "storage": 50, "version": "8.0"}),
        );

        let changes = provisioner
            .changes(std::slice::from_ref(&resized), &ResourceList::new(vec![recorded]), &none(), &all())
            .unwrap();
        assert_eq!(changes.category(ChangeCategory::Modifications).len(), 1);
        assert!(changes.category(ChangeCategory::Terminations).is_empty());
        assert!(changes.category(ChangeCategory::Provisions).is_empty());
    }

    #[test]
    fn test_trigger_change_replaces() {
        let capabilities = capabilities();
        let provisioner = Provisioner::new(&capabilities);
        let redis = |version: &str| {
            service(
                &capabilities,
                "redis",
                Some("aws"),
                json!({"name": "cache", "size": "cache.t2.micro", "version": version}),
            )
        };
        let list = ResourceList::new(vec![redis("4.0").as_resource()]);
        let upgraded = redis("5.0");

        let changes = provisioner
            .changes(std::slice::from_ref(&upgraded), &list, &none(), &all())
            .unwrap();

        assert_eq!(changes.category(ChangeCategory::Terminations).len(), 1);
        let provisions = changes.category(ChangeCategory::Provisions);
        assert_eq!(provisions.len(), 1);
        assert_eq!(provisions[0].provision_params["version"], json!("5.0"));
        assert!(changes.category(ChangeCategory::Modifications).is_empty());
        assert!(changes.unchanged.is_empty());
    }

    #[test]
    fn test_replacement_supersedes_forced_modification() {
        let capabilities = capabilities();
        let provisioner = Provisioner::new(&capabilities);
        let old = service(
            &capabilities,
            "redis",
            Some("aws"),
            json!({"name": "cache", "size": "cache.t2.micro", "version": "4.0"}),
        );
        let new = service(
            &capabilities,
            "redis",
            Some("aws"),
            json!({"name": "cache", "size": "cache.t2.small", "version": "5.0"}),
        );
        let mut recorded = old.as_resource();
        recorded.touch();
        let updated: BTreeSet<String> = new.depends_on().iter().cloned().collect();

        let changes = provisioner
            .changes(std::slice::from_ref(&new), &ResourceList::new(vec![recorded]), &updated, &all())
            .unwrap();
        assert!(changes.category(ChangeCategory::Modifications).is_empty());
        assert_eq!(changes.category(ChangeCategory::Terminations).len(), 1);
        assert_eq!(changes.category(ChangeCategory::Provisions).len(), 1);
    }

    #[test]
    fn test_tainted_resource_is_replaced() {
        let capabilities = capabilities();
        let provisioner = Provisioner::new(&capabilities);
        let nginx = nginx(&capabilities, "1.16");
        let mut recorded = nginx.as_resource();
        recorded.taint();

        let changes = provisioner
            .changes(std::slice::from_ref(&nginx), &ResourceList::new(vec![recorded]), &none(), &all())
            .unwrap();
        assert_eq!(changes.category(ChangeCategory::Terminations).len(), 1);
        assert_eq!(changes.category(ChangeCategory::Provisions).len(), 1);
    }

    #[test]
    fn test_touched_resource_is_modified() {
        let capabilities = capabilities();
        let provisioner = Provisioner::new(&capabilities);
        let mysql = managed_mysql(&capabilities, "db.t2.micro");
        let mut list = ResourceList::new(vec![mysql.as_resource()]);

        let changes = provisioner.changes(std::slice::from_ref(&mysql), &list, &none(), &all());
        assert!(changes.is_none());

        let mut touched = mysql.as_resource();
        touched.touch();
        list = ResourceList::new(vec![touched]);

        let changes = provisioner
            .changes(std::slice::from_ref(&mysql), &list, &none(), &all())
            .unwrap();
        let modifications = changes.category(ChangeCategory::Modifications);
        assert_eq!(modifications.len(), 1);
        assert_eq!(modifications[0].id, mysql.deployable_id());
        assert!(changes.unchanged.is_empty());
    }

    #[test]
    fn test_orphans_are_terminated() {
        let capabilities = capabilities();
        let provisioner = Provisioner::new(&capabilities);
        let mysql = managed_mysql(&capabilities, "db.t2.micro");
        let orphans = vec![
            Resource::new("service-mysql-legacy", "databases", crate::params::Params::new()),
            Resource::new("service-postgresql-reports", "databases", crate::params::Params::new()),
        ];
        let mut recorded = vec![mysql.as_resource()];
        recorded.extend(orphans);
        let list = ResourceList::new(recorded);

        let outcome = provisioner.plan(std::slice::from_ref(&mysql), &list, &none(), &all());
        let changes = outcome.changeset.unwrap();

        assert_eq!(outcome.resources.len(), 3);
        assert_eq!(changes.category(ChangeCategory::Terminations).len(), 2);
        assert_eq!(changes.unchanged.len(), 1);
        assert_eq!(changes.unchanged[0].id, mysql.deployable_id());
        assert!(changes.category(ChangeCategory::Provisions).is_empty());
        assert!(changes.category(ChangeCategory::Modifications).is_empty());
    }

    #[test]
    fn test_category_filtering() {
        let capabilities = capabilities();
        let provisioner = Provisioner::new(&capabilities);
        let mysql = managed_mysql(&capabilities, "db.t2.micro");
        let orphan = Resource::new("service-mysql-legacy", "databases", crate::params::Params::new());
        let list = ResourceList::new(vec![mysql.as_resource(), orphan]);

        let provisions: EntrySet = [ChangeCategory::Provisions].into();
        assert!(provisioner
            .changes(std::slice::from_ref(&mysql), &list, &none(), &provisions)
            .is_none());

        let terminations: EntrySet = [ChangeCategory::Terminations].into();
        let changes = provisioner
            .changes(std::slice::from_ref(&mysql), &list, &none(), &terminations)
            .unwrap();
        assert!(changes.provisions.is_empty());
        assert!(changes.modifications.is_empty());
        assert_eq!(changes.category(ChangeCategory::Terminations).len(), 1);
    }

    #[test]
    fn test_credentials_are_regenerated_when_missing() {
        let capabilities = capabilities();
        let provisioner = Provisioner::new(&capabilities);
        let mailer = service(&capabilities, "mailer", Some("aws"), json!({"name": "mail", "domain": "example.com"}));

        let mut recorded = mailer.as_resource();
        recorded.output = params(json!({"smtp_username": "AKIA", "smtp_password": ""}));
        let changes = provisioner
            .changes(std::slice::from_ref(&mailer), &ResourceList::new(vec![recorded]), &none(), &all())
            .unwrap();
        assert_eq!(changes.category(ChangeCategory::Modifications).len(), 1);

        let mut complete = mailer.as_resource();
        complete.output = params(json!({"smtp_username": "AKIA", "smtp_password": "secret"}));
        assert!(provisioner
            .changes(std::slice::from_ref(&mailer), &ResourceList::new(vec![complete]), &none(), &all())
            .is_none());
    }

    #[test]
    fn test_nodes_are_provisioned_from_scratch() {
        let capabilities = capabilities();
        let provisioner = Provisioner::new(&capabilities);
        let app = application(&capabilities, 3);

        let changes = provisioner
            .changes(std::slice::from_ref(&app), &ResourceList::default(), &none(), &all())
            .unwrap();
        let names: BTreeSet<&str> = changes
            .category(ChangeCategory::Provisions)
            .iter()
            .filter_map(Resource::name)
            .collect();
        assert_eq!(
            names,
            ["application-server-1", "application-server-2", "application-server-3"].into()
        );
        assert!(changes.unchanged.is_empty());
    }

    #[test]
    fn test_unchanged_nodes_need_no_action() {
        let capabilities = capabilities();
        let provisioner = Provisioner::new(&capabilities);
        let app = application(&capabilities, 3);
        let list = ResourceList::new(vec![recorded_nodes(&app, 3)]);

        assert!(provisioner
            .changes(std::slice::from_ref(&app), &list, &none(), &all())
            .is_none());
    }

    #[test]
    fn test_growing_nodes_provisions_new_indexes() {
        let capabilities = capabilities();
        let provisioner = Provisioner::new(&capabilities);
        let recorded = recorded_nodes(&application(&capabilities, 3), 3);
        let grown = application(&capabilities, 5);

        let changes = provisioner
            .changes(std::slice::from_ref(&grown), &ResourceList::new(vec![recorded]), &none(), &all())
            .unwrap();

        let names: Vec<&str> = changes
            .category(ChangeCategory::Provisions)
            .iter()
            .filter_map(Resource::name)
            .collect();
        assert_eq!(names, vec!["application-server-4", "application-server-5"]);
        assert!(changes.category(ChangeCategory::Terminations).is_empty());
        assert!(changes.category(ChangeCategory::Modifications).is_empty());
        assert_eq!(changes.unchanged.len(), 3);
    }

    #[test]
    fn test_shrinking_nodes_terminates_highest_indexes() {
        let capabilities = capabilities();
        let provisioner = Provisioner::new(&capabilities);
        let recorded = recorded_nodes(&application(&capabilities, 3), 3);
        let shrunk = application(&capabilities, 1);

        let changes = provisioner
            .changes(std::slice::from_ref(&shrunk), &ResourceList::new(vec![recorded]), &none(), &all())
            .unwrap();

        let terminated: Vec<Option<usize>> = changes
            .category(ChangeCategory::Terminations)
            .iter()
            .map(|r| r.node_index)
            .collect();
        assert_eq!(terminated, vec![Some(3), Some(2)]);
        assert!(changes.category(ChangeCategory::Provisions).is_empty());
        assert!(changes.category(ChangeCategory::Modifications).is_empty());
        assert_eq!(changes.unchanged.len(), 1);
        assert_eq!(changes.unchanged[0].output["resource_id"], json!("i-1"));
    }

    #[test]
    fn test_zero_nodes_keeps_the_first_node() {
        let capabilities = capabilities();
        let provisioner = Provisioner::new(&capabilities);
        let recorded = recorded_nodes(&application(&capabilities, 2), 2);
        let emptied = application(&capabilities, 0);

        let changes = provisioner
            .changes(std::slice::from_ref(&emptied), &ResourceList::new(vec![recorded]), &none(), &all())
            .unwrap();

        let terminated: Vec<Option<usize>> = changes
            .category(ChangeCategory::Terminations)
            .iter()
            .map(|r| r.node_index)
            .collect();
        assert_eq!(terminated, vec![Some(2)]);
        assert!(changes.category(ChangeCategory::Provisions).is_empty());
        assert_eq!(changes.unchanged.len(), 1);
        assert_eq!(changes.unchanged[0].node_index, Some(1));
    }

    #[test]
    fn test_node_storage_change_replaces_every_node() {
        let capabilities = capabilities();
        let provisioner = Provisioner::new(&capabilities);
        let recorded = recorded_nodes(&application(&capabilities, 2), 2);
        let resized = service(
            &capabilities,
            "application",
            Some("aws"),
            json!({"name": "application-server", "size": "t2.micro", "storage": 40, "nodes": 2}),
        );

        let changes = provisioner
            .changes(std::slice::from_ref(&resized), &ResourceList::new(vec![recorded]), &none(), &all())
            .unwrap();
        assert_eq!(changes.category(ChangeCategory::Terminations).len(), 2);
        assert_eq!(changes.category(ChangeCategory::Provisions).len(), 2);
    }

    #[test]
    fn test_touched_nodes_are_modified() {
        let capabilities = capabilities();
        let provisioner = Provisioner::new(&capabilities);
        let app = application(&capabilities, 2);
        let mut recorded = recorded_nodes(&app, 2);
        recorded.touch();

        let changes = provisioner
            .changes(std::slice::from_ref(&app), &ResourceList::new(vec![recorded]), &none(), &all())
            .unwrap();
        let modifications = changes.category(ChangeCategory::Modifications);
        assert_eq!(modifications.len(), 2);
        assert!(modifications.iter().all(|r| r.node_index.is_some()));
        assert_eq!(modifications[1].output["resource_id"], json!("i-2"));
    }
}
