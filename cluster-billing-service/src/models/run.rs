//! Billing run records.

use super::{BillingWindow, ProjectId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Billing run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    CompletedWithFailures,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::CompletedWithFailures => "completed_with_failures",
            RunStatus::Failed => "failed",
        }
    }

    /// Status for a run given how many units succeeded and failed.
    pub fn from_counts(succeeded: u32, failed: u32) -> Self {
        match (succeeded, failed) {
            (_, 0) => RunStatus::Completed,
            (0, _) => RunStatus::Failed,
            _ => RunStatus::CompletedWithFailures,
        }
    }
}

/// Why a namespace could not be attributed to a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedReason {
    MissingLabel,
    EmptyLabel,
    UnknownProject,
    /// Listed more than once with labels that disagree.
    ConflictingLabels,
}

impl UnresolvedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnresolvedReason::MissingLabel => "missing_label",
            UnresolvedReason::EmptyLabel => "empty_label",
            UnresolvedReason::UnknownProject => "unknown_project",
            UnresolvedReason::ConflictingLabels => "conflicting_labels",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnresolvedNamespace {
    pub cluster_id: String,
    pub namespace: String,
    pub label: Option<String>,
    pub reason: UnresolvedReason,
}

/// A project, namespace, or account that could not be billed in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitFailure {
    pub unit: String,
    pub kind: String,
    pub message: String,
}

/// Project owning namespaces that no billing account references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnbilledProject {
    pub project_id: ProjectId,
    pub namespaces: Vec<String>,
    /// Users bound to the project, candidates for owning an account.
    pub users: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    #[serde(with = "super::uuid_string")]
    pub run_id: Uuid,
    pub window: BillingWindow,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub status: RunStatus,
    pub accounts_processed: u32,
    pub bills_created: u32,
    pub already_billed: u32,
    pub total_amount: Decimal,
    pub failures: Vec<UnitFailure>,
    pub unresolved_namespaces: Vec<UnresolvedNamespace>,
    pub unbilled_projects: Vec<UnbilledProject>,
}
