//! Fleet-management identities as seen by a billing run.

use super::ProjectId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Namespace label naming the owning project.
pub const PROJECT_LABEL: &str = "field.cattle.io/projectId";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetUser {
    pub id: String,
    pub username: Option<String>,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetProject {
    pub id: ProjectId,
    pub name: String,
}

impl FleetProject {
    pub fn cluster_id(&self) -> &str {
        self.id.cluster_id()
    }
}

/// Grants a user access to a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleBinding {
    pub user_id: String,
    pub project_id: ProjectId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetNamespace {
    pub name: String,
    /// Raw value of [`PROJECT_LABEL`], if present.
    pub project_label: Option<String>,
}

/// Everything fetched from the fleet-management API for one run.
#[derive(Debug, Clone, Default)]
pub struct FleetSnapshot {
    pub users: Vec<FleetUser>,
    pub projects: Vec<FleetProject>,
    pub bindings: Vec<RoleBinding>,
    /// Namespaces per cluster id, for clusters that could be listed.
    pub cluster_namespaces: BTreeMap<String, Vec<FleetNamespace>>,
    /// Clusters whose namespace listing failed, with the failure message.
    pub failed_clusters: BTreeMap<String, String>,
}
