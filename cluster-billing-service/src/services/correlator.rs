//! Identity correlation: users to projects, projects to namespaces.
//!
//! The result of [`correlate`] is rebuilt from a fresh [`FleetSnapshot`] on
//! every run and never mutated afterwards. All collections are ordered sets,
//! so the outcome does not depend on the order the fleet API lists things in.

use crate::models::{
    strip_cluster_prefix, FleetNamespace, FleetSnapshot, ProjectId, UnbilledProject,
    UnresolvedNamespace, UnresolvedReason,
};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default)]
pub struct Correlation {
    user_projects: BTreeMap<String, BTreeSet<ProjectId>>,
    project_namespaces: BTreeMap<ProjectId, BTreeSet<String>>,
    unresolved: Vec<UnresolvedNamespace>,
    failed_clusters: BTreeMap<String, String>,
}

/// Build both mappings from one fleet snapshot.
pub fn correlate(snapshot: &FleetSnapshot) -> Correlation {
    let mut user_projects: BTreeMap<String, BTreeSet<ProjectId>> = snapshot
        .users
        .iter()
        .map(|user| (user.id.clone(), BTreeSet::new()))
        .collect();
    for binding in &snapshot.bindings {
        user_projects
            .entry(binding.user_id.clone())
            .or_default()
            .insert(binding.project_id.clone());
    }

    let mut project_namespaces: BTreeMap<ProjectId, BTreeSet<String>> = snapshot
        .projects
        .iter()
        .map(|project| (project.id.clone(), BTreeSet::new()))
        .collect();

    // A namespace name is attributed once per cluster, however many times
    // the listing repeats it.
    let mut listings: BTreeMap<(&str, &str), Vec<Result<ProjectId, UnresolvedNamespace>>> = BTreeMap::new();
    for (cluster_id, namespaces) in &snapshot.cluster_namespaces {
        for namespace in namespaces {
            listings
                .entry((cluster_id.as_str(), namespace.name.as_str()))
                .or_default()
                .push(resolve_namespace(cluster_id, namespace, &project_namespaces));
        }
    }

    let mut unresolved = Vec::new();
    for ((cluster_id, name), outcomes) in listings {
        match attribute(cluster_id, name, outcomes) {
            Ok(project_id) => {
                if let Some(set) = project_namespaces.get_mut(&project_id) {
                    set.insert(name.to_string());
                }
            }
            Err(items) => unresolved.extend(items),
        }
    }
    unresolved.sort_by(|a, b| {
        (a.cluster_id.as_str(), a.namespace.as_str()).cmp(&(b.cluster_id.as_str(), b.namespace.as_str()))
    });
    unresolved.dedup();

    Correlation {
        user_projects,
        project_namespaces,
        unresolved,
        failed_clusters: snapshot.failed_clusters.clone(),
    }
}

/// Settle every listing of one namespace name into a single project, or
/// the reasons it has none. Listings that disagree attribute it nowhere.
fn attribute(
    cluster_id: &str,
    name: &str,
    outcomes: Vec<Result<ProjectId, UnresolvedNamespace>>,
) -> Result<ProjectId, Vec<UnresolvedNamespace>> {
    let mut projects: Vec<ProjectId> = outcomes.iter().filter_map(|o| o.as_ref().ok().cloned()).collect();
    projects.sort();
    projects.dedup();
    let failures = outcomes.iter().filter(|o| o.is_err()).count();

    if projects.is_empty() {
        return Err(outcomes.into_iter().filter_map(Result::err).collect());
    }
    if projects.len() == 1 && failures == 0 {
        return Ok(projects.remove(0));
    }

    let labels: BTreeSet<String> = outcomes
        .iter()
        .map(|o| match o {
            Ok(project_id) => project_id.bare().to_string(),
            Err(item) => item.label.clone().unwrap_or_default(),
        })
        .collect();
    Err(vec![UnresolvedNamespace {
        cluster_id: cluster_id.to_string(),
        namespace: name.to_string(),
        label: Some(labels.into_iter().collect::<Vec<_>>().join(",")),
        reason: UnresolvedReason::ConflictingLabels,
    }])
}

/// Attribute one namespace through its project label.
///
/// The label may hold either a bare project id or a composite one; the
/// namespace's own cluster always supplies the cluster part.
pub fn resolve_namespace<V>(
    cluster_id: &str,
    namespace: &FleetNamespace,
    known_projects: &BTreeMap<ProjectId, V>,
) -> Result<ProjectId, UnresolvedNamespace> {
    let unresolved = |reason| UnresolvedNamespace {
        cluster_id: cluster_id.to_string(),
        namespace: namespace.name.clone(),
        label: namespace.project_label.clone(),
        reason,
    };

    let label = namespace
        .project_label
        .as_deref()
        .ok_or_else(|| unresolved(UnresolvedReason::MissingLabel))?;
    let bare = strip_cluster_prefix(label.trim());
    if bare.is_empty() {
        return Err(unresolved(UnresolvedReason::EmptyLabel));
    }

    let project_id =
        ProjectId::compose(cluster_id, bare).map_err(|_| unresolved(UnresolvedReason::UnknownProject))?;
    if !known_projects.contains_key(&project_id) {
        return Err(unresolved(UnresolvedReason::UnknownProject));
    }
    Ok(project_id)
}

impl Correlation {
    pub fn user_projects(&self) -> &BTreeMap<String, BTreeSet<ProjectId>> {
        &self.user_projects
    }

    pub fn project_namespaces(&self) -> &BTreeMap<ProjectId, BTreeSet<String>> {
        &self.project_namespaces
    }

    /// Projects a user is bound to; empty for unknown users.
    pub fn projects_of(&self, user_id: &str) -> BTreeSet<ProjectId> {
        self.user_projects.get(user_id).cloned().unwrap_or_default()
    }

    /// Namespaces of a project, or `None` when the fleet does not list it.
    pub fn namespaces_of(&self, project_id: &ProjectId) -> Option<&BTreeSet<String>> {
        self.project_namespaces.get(project_id)
    }

    pub fn unresolved(&self) -> &[UnresolvedNamespace] {
        &self.unresolved
    }

    /// Failure message for a cluster whose namespaces could not be listed.
    pub fn cluster_failure(&self, cluster_id: &str) -> Option<&str> {
        self.failed_clusters.get(cluster_id).map(String::as_str)
    }

    pub fn users_of(&self, project_id: &ProjectId) -> Vec<String> {
        self.user_projects
            .iter()
            .filter(|(_, projects)| projects.contains(project_id))
            .map(|(user, _)| user.clone())
            .collect()
    }

    /// Projects with namespaces that none of `billed` refers to.
    pub fn unbilled_projects(&self, billed: &BTreeSet<ProjectId>) -> Vec<UnbilledProject> {
        self.project_namespaces
            .iter()
            .filter(|(project_id, namespaces)| !namespaces.is_empty() && !billed.contains(*project_id))
            .map(|(project_id, namespaces)| UnbilledProject {
                project_id: project_id.clone(),
                namespaces: namespaces.iter().cloned().collect(),
                users: self.users_of(project_id),
            })
            .collect()
    }
}
