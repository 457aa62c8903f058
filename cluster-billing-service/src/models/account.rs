//! Billing accounts and their bill history.

use super::ProjectId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Commercial plan of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountType {
    PayPerUse,
    Starter,
    Pro,
    Elite,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PayPerUse => "PayPerUse",
            Self::Starter => "Starter",
            Self::Pro => "Pro",
            Self::Elite => "Elite",
        }
    }
}

impl std::fmt::Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Person allowed to manage an account's billing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminDetails {
    #[serde(with = "super::uuid_string")]
    pub uuid: Uuid,
    pub email: String,
    pub phone_number: String,
    pub name: String,
}

/// Legal entity details. `tax_id` is stored only; no tax is computed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    pub is_company: bool,
    pub tax_id: String,
    pub name: String,
}

/// Reference to a fleet project billed to an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRef {
    pub project_id: ProjectId,
    pub state: String,
    pub created_at: DateTime<Utc>,
}

/// One immutable charge for a project over a billing period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillFile {
    /// End of the billed period.
    pub billing_date: DateTime<Utc>,
    pub project_id: ProjectId,
    pub document_ref: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingAccount {
    #[serde(with = "super::uuid_string")]
    pub uuid: Uuid,
    pub billing_admins: Vec<AdminDetails>,
    pub account_type: AccountType,
    pub billing_start_date: DateTime<Utc>,
    pub balance: Decimal,
    /// Ordered by `billing_date`.
    pub history: Vec<BillFile>,
    pub is_active: bool,
    pub company: Company,
    pub projects: Vec<ProjectRef>,
    /// Optimistic concurrency revision, bumped on every write.
    #[serde(default)]
    pub version: i64,
}

impl BillingAccount {
    /// Open a new active account with an empty ledger.
    pub fn open(input: CreateBillingAccount, now: DateTime<Utc>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            billing_admins: input.billing_admins,
            account_type: input.account_type,
            billing_start_date: now,
            balance: Decimal::ZERO,
            history: Vec::new(),
            is_active: true,
            company: input.company,
            projects: input.projects,
            version: 0,
        }
    }

    pub fn owns_project(&self, project_id: &ProjectId) -> bool {
        self.projects.iter().any(|p| &p.project_id == project_id)
    }

    /// Bill already recorded for `project_id` at `billing_date`, if any.
    pub fn bill_for(&self, project_id: &ProjectId, billing_date: DateTime<Utc>) -> Option<&BillFile> {
        self.history
            .iter()
            .find(|bill| &bill.project_id == project_id && bill.billing_date == billing_date)
    }
}

/// Input for opening a billing account.
#[derive(Debug, Clone)]
pub struct CreateBillingAccount {
    pub billing_admins: Vec<AdminDetails>,
    pub account_type: AccountType,
    pub company: Company,
    pub projects: Vec<ProjectRef>,
}
