//! Test helpers for cluster-billing-service integration tests.
//!
//! In-memory implementations of the collaborator traits so the pipeline and
//! router can be exercised without a fleet, a cost API or MongoDB.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use cluster_billing_service::error::{BillingError, Upstream};
use cluster_billing_service::models::{
    AccountType, BillingAccount, BillingWindow, Company, CreateBillingAccount, FleetNamespace,
    FleetProject, FleetUser, ProjectId, ProjectRef, ResourcePricing, RoleBinding, RunSummary,
};
use cluster_billing_service::services::cost::{Allocation, AllocationResponse};
use cluster_billing_service::services::{
    AccountRepository, BillDocuments, BillingPipeline, CostSource, FleetSource, PipelineDeps,
    PipelineSettings, RunRepository, StaticPricingTable, UsageCollector,
};
use cluster_billing_service::startup::AppState;
use rust_decimal::Decimal;
use service_core::retry::RetryConfig;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const DOCUMENT_BASE_URL: &str = "https://bills.test";

pub fn pid(s: &str) -> ProjectId {
    ProjectId::parse(s).expect("valid project id")
}

pub fn january() -> BillingWindow {
    BillingWindow::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
    )
    .unwrap()
}

pub fn pricing() -> ResourcePricing {
    ResourcePricing::new(
        Decimal::from_str("0.04").unwrap(),
        Decimal::from_str("0.00006").unwrap(),
    )
    .unwrap()
}

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

pub fn account_for(projects: &[&str]) -> BillingAccount {
    BillingAccount::open(
        CreateBillingAccount {
            billing_admins: vec![],
            account_type: AccountType::PayPerUse,
            company: Company::default(),
            projects: projects
                .iter()
                .map(|p| ProjectRef {
                    project_id: pid(p),
                    state: "active".to_string(),
                    created_at: Utc::now(),
                })
                .collect(),
        },
        Utc::now(),
    )
}

/// Fleet with fixed listings; clusters map to namespaces or a failure.
#[derive(Default)]
pub struct FakeFleet {
    pub users: Vec<FleetUser>,
    pub projects: Vec<FleetProject>,
    pub bindings: Vec<RoleBinding>,
    pub clusters: BTreeMap<String, Result<Vec<FleetNamespace>, String>>,
    pub fail_users: bool,
}

impl FakeFleet {
    pub fn with_project(mut self, project: &str, namespaces: &[&str]) -> Self {
        let id = pid(project);
        let cluster = id.cluster_id().to_string();
        self.projects.push(FleetProject {
            id: id.clone(),
            name: id.bare().to_string(),
        });
        let entry = self.clusters.entry(cluster).or_insert_with(|| Ok(Vec::new()));
        if let Ok(list) = entry {
            list.extend(namespaces.iter().map(|ns| FleetNamespace {
                name: ns.to_string(),
                project_label: Some(id.bare().to_string()),
            }));
        }
        self
    }

    pub fn with_user(mut self, user: &str, projects: &[&str]) -> Self {
        self.users.push(FleetUser {
            id: user.to_string(),
            username: Some(user.to_string()),
            enabled: true,
        });
        self.bindings.extend(projects.iter().map(|p| RoleBinding {
            user_id: user.to_string(),
            project_id: pid(p),
        }));
        self
    }

    pub fn with_unlabelled_namespace(mut self, cluster: &str, namespace: &str) -> Self {
        let entry = self
            .clusters
            .entry(cluster.to_string())
            .or_insert_with(|| Ok(Vec::new()));
        if let Ok(list) = entry {
            list.push(FleetNamespace {
                name: namespace.to_string(),
                project_label: None,
            });
        }
        self
    }

    pub fn with_failed_cluster(mut self, cluster: &str) -> Self {
        self.clusters
            .insert(cluster.to_string(), Err("connection refused".to_string()));
        self
    }
}

#[async_trait]
impl FleetSource for FakeFleet {
    async fn list_users(&self) -> Result<Vec<FleetUser>, BillingError> {
        if self.fail_users {
            return Err(BillingError::malformed(Upstream::FleetManagement, "listing /v3/users", "bad page"));
        }
        Ok(self.users.clone())
    }

    async fn list_projects(&self) -> Result<Vec<FleetProject>, BillingError> {
        Ok(self.projects.clone())
    }

    async fn list_role_bindings(&self) -> Result<Vec<RoleBinding>, BillingError> {
        Ok(self.bindings.clone())
    }

    async fn list_clusters(&self) -> Result<Vec<String>, BillingError> {
        Ok(self.clusters.keys().cloned().collect())
    }

    async fn list_namespaces(&self, cluster_id: &str) -> Result<Vec<FleetNamespace>, BillingError> {
        match self.clusters.get(cluster_id) {
            Some(Ok(namespaces)) => Ok(namespaces.clone()),
            Some(Err(message)) => Err(BillingError::unavailable(
                Upstream::FleetManagement,
                format!("listing namespaces of cluster {}", cluster_id),
                message,
            )),
            None => Ok(Vec::new()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum FakeUsage {
    Usage { cpu_core_hours: f64, ram_byte_hours: f64 },
    Unavailable,
    MissingBucket,
    /// Never answers.
    Hang,
}

/// Cost source answering per namespace; unknown namespaces are unavailable.
#[derive(Default)]
pub struct FakeCost {
    pub usage: HashMap<String, FakeUsage>,
    pub calls: AtomicUsize,
}

impl FakeCost {
    pub fn with(mut self, namespace: &str, cpu_core_hours: f64, ram_byte_hours: f64) -> Self {
        self.usage.insert(
            namespace.to_string(),
            FakeUsage::Usage {
                cpu_core_hours,
                ram_byte_hours,
            },
        );
        self
    }

    pub fn with_outcome(mut self, namespace: &str, outcome: FakeUsage) -> Self {
        self.usage.insert(namespace.to_string(), outcome);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CostSource for FakeCost {
    async fn allocation(&self, namespace: &str, _window: &BillingWindow) -> Result<AllocationResponse, BillingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(FakeUsage::Hang) = self.usage.get(namespace) {
            std::future::pending::<()>().await;
        }
        let mut set = BTreeMap::new();
        set.insert(
            "__idle__".to_string(),
            Allocation {
                cpu_core_hours: 1000.0,
                ram_byte_hours: 1e12,
                ..Default::default()
            },
        );
        match self.usage.get(namespace).copied().unwrap_or(FakeUsage::Unavailable) {
            FakeUsage::Usage {
                cpu_core_hours,
                ram_byte_hours,
            } => {
                set.insert(
                    namespace.to_string(),
                    Allocation {
                        name: Some(namespace.to_string()),
                        cpu_core_hours,
                        ram_byte_hours,
                        ..Default::default()
                    },
                );
            }
            FakeUsage::MissingBucket | FakeUsage::Hang => {}
            FakeUsage::Unavailable => {
                return Err(BillingError::unavailable(
                    Upstream::CostMetrics,
                    format!("querying allocation of namespace {}", namespace),
                    "HTTP 503",
                ))
            }
        }
        Ok(AllocationResponse {
            code: 200,
            message: None,
            data: Some(vec![set]),
        })
    }
}

/// Versioned in-memory account store.
#[derive(Default)]
pub struct InMemoryAccounts {
    pub accounts: Mutex<HashMap<Uuid, BillingAccount>>,
    /// Number of upcoming `save_accrual` calls to fail with a conflict.
    pub conflicts: AtomicUsize,
    pub saves: AtomicUsize,
}

impl InMemoryAccounts {
    pub fn with(accounts: Vec<BillingAccount>) -> Self {
        let store = Self::default();
        {
            let mut map = store.accounts.lock().unwrap();
            for account in accounts {
                map.insert(account.uuid, account);
            }
        }
        store
    }

    pub fn snapshot(&self, uuid: Uuid) -> BillingAccount {
        self.accounts.lock().unwrap().get(&uuid).cloned().expect("account exists")
    }
}

#[async_trait]
impl AccountRepository for InMemoryAccounts {
    async fn create(&self, account: &BillingAccount) -> Result<(), BillingError> {
        let mut map = self.accounts.lock().unwrap();
        if map.contains_key(&account.uuid) {
            return Err(BillingError::Conflict(account.uuid));
        }
        for project in &account.projects {
            if let Some(owner) = map.values().find(|a| a.owns_project(&project.project_id)) {
                return Err(BillingError::ProjectClaimed {
                    project_id: project.project_id.to_string(),
                    owners: vec![owner.uuid],
                });
            }
        }
        map.insert(account.uuid, account.clone());
        Ok(())
    }

    async fn get(&self, uuid: Uuid) -> Result<Option<BillingAccount>, BillingError> {
        Ok(self.accounts.lock().unwrap().get(&uuid).cloned())
    }

    async fn list_active(&self) -> Result<Vec<BillingAccount>, BillingError> {
        let mut accounts: Vec<_> = self
            .accounts
            .lock()
            .unwrap()
            .values()
            .filter(|a| a.is_active)
            .cloned()
            .collect();
        accounts.sort_by_key(|a| a.uuid);
        Ok(accounts)
    }

    async fn save_accrual(&self, account: &BillingAccount, expected_version: i64) -> Result<BillingAccount, BillingError> {
        if self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(BillingError::Conflict(account.uuid));
        }
        let mut map = self.accounts.lock().unwrap();
        let stored = map
            .get_mut(&account.uuid)
            .ok_or(BillingError::AccountNotFound(account.uuid))?;
        if stored.version != expected_version {
            return Err(BillingError::Conflict(account.uuid));
        }
        let mut updated = account.clone();
        updated.version = expected_version + 1;
        *stored = updated.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(updated)
    }

    async fn deactivate(&self, uuid: Uuid) -> Result<Option<BillingAccount>, BillingError> {
        let mut map = self.accounts.lock().unwrap();
        Ok(map.get_mut(&uuid).map(|account| {
            account.is_active = false;
            account.version += 1;
            account.clone()
        }))
    }

    async fn health_check(&self) -> Result<(), BillingError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryRuns {
    pub runs: Mutex<HashMap<Uuid, RunSummary>>,
}

#[async_trait]
impl RunRepository for InMemoryRuns {
    async fn save_run(&self, summary: &RunSummary) -> Result<(), BillingError> {
        self.runs.lock().unwrap().insert(summary.run_id, summary.clone());
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<RunSummary>, BillingError> {
        Ok(self.runs.lock().unwrap().get(&run_id).cloned())
    }
}

pub fn no_wait_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 2,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        backoff_multiplier: 2.0,
        add_jitter: false,
    }
}

/// Everything a pipeline test needs to inspect afterwards.
pub struct Harness {
    pub pipeline: Arc<BillingPipeline>,
    pub cost: Arc<FakeCost>,
    pub accounts: Arc<InMemoryAccounts>,
    pub runs: Arc<InMemoryRuns>,
}

impl Harness {
    pub fn new(fleet: FakeFleet, cost: FakeCost, accounts: Vec<BillingAccount>) -> Self {
        let cost = Arc::new(cost);
        Self::assemble(fleet, cost.clone(), cost, Duration::from_secs(5), accounts)
    }

    /// Pipeline reading usage from `source`, bounding each call by `call_timeout`.
    /// The `cost` handle then records nothing.
    pub fn with_cost_source(
        fleet: FakeFleet,
        source: Arc<dyn CostSource>,
        call_timeout: Duration,
        accounts: Vec<BillingAccount>,
    ) -> Self {
        Self::assemble(fleet, source, Arc::new(FakeCost::default()), call_timeout, accounts)
    }

    fn assemble(
        fleet: FakeFleet,
        source: Arc<dyn CostSource>,
        cost: Arc<FakeCost>,
        call_timeout: Duration,
        accounts: Vec<BillingAccount>,
    ) -> Self {
        let accounts = Arc::new(InMemoryAccounts::with(accounts));
        let runs = Arc::new(InMemoryRuns::default());

        let pipeline = BillingPipeline::new(
            PipelineDeps {
                fleet: Arc::new(fleet),
                collector: UsageCollector::new(source, no_wait_retry(), call_timeout),
                pricing: Arc::new(StaticPricingTable::new(pricing())),
                accounts: accounts.clone(),
                runs: runs.clone(),
                documents: BillDocuments::new(DOCUMENT_BASE_URL),
            },
            PipelineSettings {
                retry: no_wait_retry(),
                ..PipelineSettings::default()
            },
        );

        Self {
            pipeline: Arc::new(pipeline),
            cost,
            accounts,
            runs,
        }
    }

    pub async fn run(&self, window: BillingWindow) -> Result<RunSummary, BillingError> {
        self.pipeline.run(window, &CancellationToken::new()).await
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            accounts: self.accounts.clone(),
            runs: self.runs.clone(),
            pipeline: self.pipeline.clone(),
            shutdown: CancellationToken::new(),
        }
    }
}
