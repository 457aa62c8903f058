//! Composite fleet identifiers.
//!
//! Fleet projects are addressed as `"<cluster>:<project>"`. Only the first
//! separator is significant: `"c1:p1:x"` belongs to cluster `c1` with the
//! bare project id `p1:x`.

use crate::error::BillingError;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const COMPOSITE_SEPARATOR: char = ':';

/// Split a composite id on its first separator.
///
/// Returns `None` when there is no separator or either side is empty.
pub fn split_composite(id: &str) -> Option<(&str, &str)> {
    let (cluster, project) = id.split_once(COMPOSITE_SEPARATOR)?;
    if cluster.is_empty() || project.is_empty() {
        return None;
    }
    Some((cluster, project))
}

/// Drop the cluster part of a composite id. Ids without a separator are
/// returned unchanged.
pub fn strip_cluster_prefix(id: &str) -> &str {
    match id.split_once(COMPOSITE_SEPARATOR) {
        Some((_, rest)) => rest,
        None => id,
    }
}

/// Parsed `"<cluster>:<project>"` identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectId {
    cluster_id: String,
    project: String,
}

impl ProjectId {
    pub fn parse(id: &str) -> Result<Self, BillingError> {
        let (cluster, project) = split_composite(id).ok_or_else(|| {
            BillingError::InvalidInput(format!(
                "project id '{}' is not of the form <cluster>:<project>",
                id
            ))
        })?;
        Ok(Self {
            cluster_id: cluster.to_string(),
            project: project.to_string(),
        })
    }

    pub fn compose(cluster_id: &str, bare: &str) -> Result<Self, BillingError> {
        if cluster_id.is_empty() || cluster_id.contains(COMPOSITE_SEPARATOR) {
            return Err(BillingError::InvalidInput(format!(
                "invalid cluster id '{}'",
                cluster_id
            )));
        }
        if bare.is_empty() {
            return Err(BillingError::InvalidInput(format!(
                "empty project id in cluster '{}'",
                cluster_id
            )));
        }
        Ok(Self {
            cluster_id: cluster_id.to_string(),
            project: bare.to_string(),
        })
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    /// Project id without the cluster prefix.
    pub fn bare(&self) -> &str {
        &self.project
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.cluster_id, COMPOSITE_SEPARATOR, self.project)
    }
}

impl TryFrom<String> for ProjectId {
    type Error = BillingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ProjectId::parse(&value)
    }
}

impl From<ProjectId> for String {
    fn from(id: ProjectId) -> Self {
        id.to_string()
    }
}
