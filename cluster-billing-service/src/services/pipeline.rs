//! Billing pipeline: one run from fleet snapshot to persisted bills.

use crate::error::{BillingError, Upstream};
use crate::models::{
    BillFile, BillingAccount, BillingWindow, Metrics, ProjectId, ResourcePricing, RunStatus,
    RunSummary, UnitFailure,
};
use crate::services::collector::UsageCollector;
use crate::services::correlator::{correlate, Correlation};
use crate::services::engine::{accrue, BillDocuments};
use crate::services::fleet::{fetch_snapshot, FleetSource};
use crate::services::metrics::{
    record_accrual, record_billing_run, record_unit_failure, record_unresolved_namespaces,
};
use crate::services::pricing::PricingTable;
use crate::services::repository::{AccountRepository, RunRepository};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use service_core::retry::RetryConfig;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Concurrency and retry limits of a run.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub cluster_concurrency: usize,
    pub account_concurrency: usize,
    pub namespace_concurrency: usize,
    /// Attempts at a versioned account write before giving up.
    pub max_accrual_attempts: u32,
    pub retry: RetryConfig,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            cluster_concurrency: 4,
            account_concurrency: 8,
            namespace_concurrency: 8,
            max_accrual_attempts: 3,
            retry: RetryConfig::default(),
        }
    }
}

/// Collaborators a pipeline is built from.
pub struct PipelineDeps {
    pub fleet: Arc<dyn FleetSource>,
    pub collector: UsageCollector,
    pub pricing: Arc<dyn PricingTable>,
    pub accounts: Arc<dyn AccountRepository>,
    pub runs: Arc<dyn RunRepository>,
    pub documents: BillDocuments,
}

pub struct BillingPipeline {
    fleet: Arc<dyn FleetSource>,
    collector: UsageCollector,
    pricing: Arc<dyn PricingTable>,
    accounts: Arc<dyn AccountRepository>,
    runs: Arc<dyn RunRepository>,
    documents: BillDocuments,
    settings: PipelineSettings,
}

/// What happened to one account's projects.
#[derive(Debug, Default)]
struct AccountOutcome {
    bills_created: u32,
    already_billed: u32,
    amount: Decimal,
    failures: Vec<UnitFailure>,
}

impl AccountOutcome {
    fn fail(&mut self, unit: String, err: &BillingError) {
        record_unit_failure(err.kind());
        self.failures.push(UnitFailure {
            unit,
            kind: err.kind().to_string(),
            message: err.to_string(),
        });
    }
}

impl BillingPipeline {
    pub fn new(deps: PipelineDeps, settings: PipelineSettings) -> Self {
        Self {
            fleet: deps.fleet,
            collector: deps.collector,
            pricing: deps.pricing,
            accounts: deps.accounts,
            runs: deps.runs,
            documents: deps.documents,
            settings,
        }
    }

    /// Bill every active account for `window`.
    ///
    /// Fleet listings other than per-cluster namespaces are required; if they
    /// fail, a failed summary is stored and the error returned. Everything
    /// after that is isolated per project: a failure skips that project's
    /// accrual and is reported in the summary.
    #[instrument(skip(self, window, cancel), fields(window = %window.to_query_param()))]
    pub async fn run(&self, window: BillingWindow, cancel: &CancellationToken) -> Result<RunSummary, BillingError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let pricing = self.pricing.rate();
        info!(run_id = %run_id, "Starting billing run");

        let snapshot = match fetch_snapshot(
            self.fleet.as_ref(),
            &self.settings.retry,
            self.settings.cluster_concurrency,
        )
        .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => return Err(self.abort(run_id, window, started_at, "fleet", e).await),
        };

        let correlation = correlate(&snapshot);
        for unresolved in correlation.unresolved() {
            warn!(
                cluster_id = %unresolved.cluster_id,
                namespace = %unresolved.namespace,
                label = ?unresolved.label,
                reason = unresolved.reason.as_str(),
                "Namespace not attributed to any project"
            );
        }
        record_unresolved_namespaces(correlation.unresolved().len());

        let accounts = match self.accounts.list_active().await {
            Ok(accounts) => accounts,
            Err(e) => return Err(self.abort(run_id, window, started_at, "accounts", e).await),
        };
        let mut owners: BTreeMap<ProjectId, BTreeSet<Uuid>> = BTreeMap::new();
        for account in &accounts {
            for project in &account.projects {
                owners.entry(project.project_id.clone()).or_default().insert(account.uuid);
            }
        }
        let billed: BTreeSet<ProjectId> = owners.keys().cloned().collect();
        // A project claimed by several accounts is charged to none of them.
        let contested: BTreeMap<ProjectId, Vec<Uuid>> = owners
            .into_iter()
            .filter(|(_, claimants)| claimants.len() > 1)
            .map(|(project_id, claimants)| (project_id, claimants.into_iter().collect()))
            .collect();
        for (project_id, claimants) in &contested {
            warn!(project_id = %project_id, accounts = ?claimants, "Project owned by more than one active account");
        }

        let accounts_processed = accounts.len() as u32;
        let outcomes: Vec<AccountOutcome> = stream::iter(accounts)
            .map(|account| self.bill_account(account, &correlation, &contested, &pricing, &window, cancel))
            .buffer_unordered(self.settings.account_concurrency.max(1))
            .collect()
            .await;

        let mut summary = empty_summary(run_id, window, started_at);
        summary.accounts_processed = accounts_processed;
        summary.unresolved_namespaces = correlation.unresolved().to_vec();
        summary.unbilled_projects = correlation.unbilled_projects(&billed);
        for outcome in outcomes {
            summary.bills_created += outcome.bills_created;
            summary.already_billed += outcome.already_billed;
            summary.total_amount += outcome.amount;
            summary.failures.extend(outcome.failures);
        }
        summary.failures.sort_by(|a, b| a.unit.cmp(&b.unit));

        let succeeded = summary.bills_created + summary.already_billed;
        summary.status = RunStatus::from_counts(succeeded, summary.failures.len() as u32);
        summary.completed_at = Utc::now();

        info!(
            run_id = %run_id,
            status = summary.status.as_str(),
            accounts = summary.accounts_processed,
            bills_created = summary.bills_created,
            already_billed = summary.already_billed,
            failures = summary.failures.len(),
            total_amount = %summary.total_amount,
            "Billing run finished"
        );

        Ok(self.finish(summary).await)
    }

    /// Record a run that could not get past its shared inputs.
    async fn abort(
        &self,
        run_id: Uuid,
        window: BillingWindow,
        started_at: DateTime<Utc>,
        unit: &str,
        err: BillingError,
    ) -> BillingError {
        error!(run_id = %run_id, unit, error = %err, "Billing run aborted");
        record_unit_failure(err.kind());
        let mut summary = empty_summary(run_id, window, started_at);
        summary.failures.push(UnitFailure {
            unit: unit.to_string(),
            kind: err.kind().to_string(),
            message: err.to_string(),
        });
        self.finish(summary).await;
        err
    }

    async fn finish(&self, summary: RunSummary) -> RunSummary {
        record_billing_run(summary.status.as_str());
        if let Err(e) = self.runs.save_run(&summary).await {
            error!(run_id = %summary.run_id, error = %e, "Failed to persist run summary");
        }
        summary
    }

    /// Bill one account's projects in order. The account is owned by this
    /// task for the whole run.
    async fn bill_account(
        &self,
        mut account: BillingAccount,
        correlation: &Correlation,
        contested: &BTreeMap<ProjectId, Vec<Uuid>>,
        pricing: &ResourcePricing,
        window: &BillingWindow,
        cancel: &CancellationToken,
    ) -> AccountOutcome {
        let mut outcome = AccountOutcome::default();
        let projects: Vec<ProjectId> = account
            .projects
            .iter()
            .map(|p| p.project_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        for project_id in projects {
            let unit = format!("account {} project {}", account.uuid, project_id);
            if cancel.is_cancelled() {
                outcome.fail(unit, &BillingError::Cancelled);
                continue;
            }
            if let Some(claimants) = contested.get(&project_id) {
                let err = BillingError::ProjectClaimed {
                    project_id: project_id.to_string(),
                    owners: claimants.clone(),
                };
                outcome.fail(unit, &err);
                continue;
            }
            if let Some(reason) = correlation.cluster_failure(project_id.cluster_id()) {
                let err = BillingError::SourceUnavailable {
                    upstream: Upstream::FleetManagement,
                    context: format!("listing namespaces of cluster {}", project_id.cluster_id()),
                    message: reason.to_string(),
                };
                outcome.fail(unit, &err);
                continue;
            }
            let Some(namespaces) = correlation.namespaces_of(&project_id) else {
                let err = BillingError::InvalidInput(format!(
                    "project {} is not listed by the fleet-management API",
                    project_id
                ));
                warn!(account = %account.uuid, project_id = %project_id, "Billed project no longer exists");
                outcome.fail(unit, &err);
                continue;
            };

            let metrics = match self.project_usage(&project_id, namespaces, window, cancel).await {
                Ok(metrics) => metrics,
                Err(failures) => {
                    warn!(
                        account = %account.uuid,
                        project_id = %project_id,
                        failed_namespaces = failures.len(),
                        "Usage incomplete, project not billed this run"
                    );
                    outcome.failures.extend(failures);
                    continue;
                }
            };

            match self
                .accrue_and_store(&mut account, &project_id, &metrics, pricing, window)
                .await
            {
                Ok(Some(bill)) => {
                    record_accrual("charged", bill.amount.to_f64().unwrap_or_default());
                    outcome.bills_created += 1;
                    outcome.amount += bill.amount;
                }
                Ok(None) => {
                    record_accrual("already_billed", 0.0);
                    outcome.already_billed += 1;
                }
                Err(e) => {
                    warn!(account = %account.uuid, project_id = %project_id, error = %e, "Accrual failed");
                    outcome.fail(unit, &e);
                }
            }
        }

        outcome
    }

    /// Sum usage over a project's namespaces. Any namespace failure fails
    /// the whole project so it is never billed for partial usage.
    async fn project_usage(
        &self,
        project_id: &ProjectId,
        namespaces: &BTreeSet<String>,
        window: &BillingWindow,
        cancel: &CancellationToken,
    ) -> Result<Metrics, Vec<UnitFailure>> {
        let results: Vec<(String, Result<Metrics, BillingError>)> = stream::iter(namespaces.iter().cloned())
            .map(|namespace| async move {
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(BillingError::Cancelled),
                    result = self.collector.usage(&namespace, window) => result,
                };
                (namespace, result)
            })
            .buffer_unordered(self.settings.namespace_concurrency.max(1))
            .collect()
            .await;

        let mut total = Metrics::default();
        let mut failures = Vec::new();
        for (namespace, result) in results {
            match result {
                Ok(metrics) => total += metrics,
                Err(e) => {
                    record_unit_failure(e.kind());
                    failures.push(UnitFailure {
                        unit: format!("project {} namespace {}", project_id, namespace),
                        kind: e.kind().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(total)
        } else {
            failures.sort_by(|a, b| a.unit.cmp(&b.unit));
            Err(failures)
        }
    }

    /// Accrue and persist with optimistic concurrency. On a version conflict
    /// the account is reloaded and the accrual recomputed, so a concurrent
    /// run that billed the same period is seen as already billed.
    ///
    /// Returns the new bill, or `None` when the period was billed before.
    async fn accrue_and_store(
        &self,
        account: &mut BillingAccount,
        project_id: &ProjectId,
        metrics: &Metrics,
        pricing: &ResourcePricing,
        window: &BillingWindow,
    ) -> Result<Option<BillFile>, BillingError> {
        let attempts = self.settings.max_accrual_attempts.max(1);
        for attempt in 1..=attempts {
            let accrual = accrue(account, project_id, metrics, pricing, window, &self.documents)?;
            let (updated, bill) = match accrual.into_fresh_charge(account.uuid) {
                Ok(charge) => charge,
                Err(BillingError::AlreadyBilled { billing_date, .. }) => {
                    info!(
                        account = %account.uuid,
                        project_id = %project_id,
                        billing_date = %billing_date,
                        "Period already billed, skipping"
                    );
                    return Ok(None);
                }
                Err(e) => return Err(e),
            };
            match self.accounts.save_accrual(&updated, account.version).await {
                Ok(stored) => {
                    *account = stored;
                    return Ok(Some(bill));
                }
                Err(BillingError::Conflict(uuid)) if attempt < attempts => {
                    warn!(account = %uuid, attempt, "Concurrent account update, reloading");
                    *account = self
                        .accounts
                        .get(uuid)
                        .await?
                        .ok_or(BillingError::AccountNotFound(uuid))?;
                }
                Err(e) => return Err(e),
            }
        }
        Err(BillingError::Conflict(account.uuid))
    }
}

fn empty_summary(run_id: Uuid, window: BillingWindow, started_at: DateTime<Utc>) -> RunSummary {
    RunSummary {
        run_id,
        window,
        started_at,
        completed_at: Utc::now(),
        status: RunStatus::Failed,
        accounts_processed: 0,
        bills_created: 0,
        already_billed: 0,
        total_amount: Decimal::ZERO,
        failures: Vec::new(),
        unresolved_namespaces: Vec::new(),
        unbilled_projects: Vec::new(),
    }
}
