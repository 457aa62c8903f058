//! Persistence seams for billing accounts and run summaries.

use crate::error::BillingError;
use crate::models::{BillingAccount, RunSummary};
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Store a new account. An existing uuid is a [`BillingError::Conflict`];
    /// a project already owned by any other account, active or not, is a
    /// [`BillingError::ProjectClaimed`].
    async fn create(&self, account: &BillingAccount) -> Result<(), BillingError>;

    async fn get(&self, uuid: Uuid) -> Result<Option<BillingAccount>, BillingError>;

    async fn list_active(&self) -> Result<Vec<BillingAccount>, BillingError>;

    /// Replace the stored account if its version is still `expected_version`.
    ///
    /// Returns the stored copy with its bumped version, or
    /// [`BillingError::Conflict`] when another writer got there first.
    async fn save_accrual(
        &self,
        account: &BillingAccount,
        expected_version: i64,
    ) -> Result<BillingAccount, BillingError>;

    /// Mark the account inactive. Returns `None` for unknown accounts.
    async fn deactivate(&self, uuid: Uuid) -> Result<Option<BillingAccount>, BillingError>;

    async fn health_check(&self) -> Result<(), BillingError>;
}

#[async_trait]
pub trait RunRepository: Send + Sync {
    async fn save_run(&self, summary: &RunSummary) -> Result<(), BillingError>;

    async fn get_run(&self, run_id: Uuid) -> Result<Option<RunSummary>, BillingError>;
}
