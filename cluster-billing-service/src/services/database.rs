//! MongoDB storage for billing accounts and run summaries.

use crate::error::BillingError;
use crate::models::{BillingAccount, RunSummary};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::repository::{AccountRepository, RunRepository};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    bson::doc,
    error::{ErrorKind, WriteFailure},
    options::{FindOneAndUpdateOptions, IndexOptions, ReturnDocument},
    Client as MongoClient, Collection, Database, IndexModel,
};
use tracing::instrument;
use uuid::Uuid;

const ACCOUNTS_COLLECTION: &str = "billing_accounts";
const RUNS_COLLECTION: &str = "billing_runs";
const PROJECTS_INDEX: &str = "account_projects";

#[derive(Clone)]
pub struct MongoDb {
    client: MongoClient,
    db: Database,
}

impl MongoDb {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, BillingError> {
        tracing::info!(database = %database, "Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to MongoDB");
            BillingError::from(e)
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Connected to MongoDB database");
        Ok(Self { client, db })
    }

    pub async fn initialize_indexes(&self) -> Result<(), BillingError> {
        tracing::info!("Creating MongoDB indexes for cluster-billing-service");

        let indexes = [
            (
                self.accounts(),
                doc! { "uuid": 1 },
                IndexOptions::builder()
                    .name("account_uuid".to_string())
                    .unique(true)
                    .build(),
            ),
            (
                self.accounts(),
                doc! { "isActive": 1 },
                IndexOptions::builder().name("active_accounts".to_string()).build(),
            ),
            (
                self.accounts(),
                doc! { "projects.projectId": 1 },
                // Unique across accounts; accounts without projects are not indexed.
                IndexOptions::builder()
                    .name(PROJECTS_INDEX.to_string())
                    .unique(true)
                    .partial_filter_expression(doc! { "projects.projectId": { "$exists": true } })
                    .build(),
            ),
        ];

        for (collection, keys, options) in indexes {
            let name = options.name.clone().unwrap_or_default();
            let index = IndexModel::builder().keys(keys).options(options).build();
            collection.create_index(index, None).await.map_err(|e| {
                tracing::error!(index = %name, error = %e, "Failed to create index on billing_accounts");
                BillingError::from(e)
            })?;
            tracing::info!(index = %name, "Created index on billing_accounts");
        }

        let run_index = IndexModel::builder()
            .keys(doc! { "runId": 1 })
            .options(
                IndexOptions::builder()
                    .name("run_id".to_string())
                    .unique(true)
                    .build(),
            )
            .build();
        self.runs().create_index(run_index, None).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to create index on billing_runs");
            BillingError::from(e)
        })?;
        tracing::info!("Created index on billing_runs.runId");

        Ok(())
    }

    pub fn accounts(&self) -> Collection<BillingAccount> {
        self.db.collection(ACCOUNTS_COLLECTION)
    }

    pub fn runs(&self) -> Collection<RunSummary> {
        self.db.collection(RUNS_COLLECTION)
    }
}

/// Message of a duplicate-key write error, which names the violated index.
fn duplicate_key_message(err: &mongodb::error::Error) -> Option<&str> {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == 11000 => {
            Some(write_error.message.as_str())
        }
        _ => None,
    }
}

#[async_trait]
impl AccountRepository for MongoDb {
    #[instrument(skip(self, account), fields(account = %account.uuid))]
    async fn create(&self, account: &BillingAccount) -> Result<(), BillingError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["create_account"])
            .start_timer();
        let project_ids: Vec<String> = account
            .projects
            .iter()
            .map(|p| p.project_id.to_string())
            .collect();

        if !project_ids.is_empty() {
            let owner = self
                .accounts()
                .find_one(doc! { "projects.projectId": { "$in": project_ids.clone() } }, None)
                .await?;
            if let Some(owner) = owner {
                let claimed = owner
                    .projects
                    .iter()
                    .map(|p| p.project_id.to_string())
                    .find(|id| project_ids.contains(id))
                    .unwrap_or_default();
                return Err(BillingError::ProjectClaimed {
                    project_id: claimed,
                    owners: vec![owner.uuid],
                });
            }
        }

        match self.accounts().insert_one(account, None).await {
            Ok(_) => Ok(()),
            Err(e) => match duplicate_key_message(&e) {
                // Lost a race with a concurrent create claiming the same project.
                Some(message) if message.contains(PROJECTS_INDEX) => Err(BillingError::ProjectClaimed {
                    project_id: project_ids.join(","),
                    owners: Vec::new(),
                }),
                Some(_) => Err(BillingError::Conflict(account.uuid)),
                None => Err(e.into()),
            },
        }
    }

    #[instrument(skip(self))]
    async fn get(&self, uuid: Uuid) -> Result<Option<BillingAccount>, BillingError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["get_account"])
            .start_timer();
        Ok(self
            .accounts()
            .find_one(doc! { "uuid": uuid.to_string() }, None)
            .await?)
    }

    #[instrument(skip(self))]
    async fn list_active(&self) -> Result<Vec<BillingAccount>, BillingError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["list_active_accounts"])
            .start_timer();
        let cursor = self.accounts().find(doc! { "isActive": true }, None).await?;
        Ok(cursor.try_collect().await?)
    }

    #[instrument(skip(self, account), fields(account = %account.uuid))]
    async fn save_accrual(
        &self,
        account: &BillingAccount,
        expected_version: i64,
    ) -> Result<BillingAccount, BillingError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["save_accrual"])
            .start_timer();
        let mut stored = account.clone();
        stored.version = expected_version + 1;

        let result = self
            .accounts()
            .replace_one(
                doc! { "uuid": account.uuid.to_string(), "version": expected_version },
                &stored,
                None,
            )
            .await?;
        if result.matched_count == 0 {
            return Err(BillingError::Conflict(account.uuid));
        }
        Ok(stored)
    }

    #[instrument(skip(self))]
    async fn deactivate(&self, uuid: Uuid) -> Result<Option<BillingAccount>, BillingError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["deactivate_account"])
            .start_timer();
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        Ok(self
            .accounts()
            .find_one_and_update(
                doc! { "uuid": uuid.to_string() },
                doc! { "$set": { "isActive": false }, "$inc": { "version": 1_i64 } },
                options,
            )
            .await?)
    }

    async fn health_check(&self) -> Result<(), BillingError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "MongoDB health check failed");
                BillingError::from(e)
            })?;
        Ok(())
    }
}

#[async_trait]
impl RunRepository for MongoDb {
    #[instrument(skip(self, summary), fields(run_id = %summary.run_id))]
    async fn save_run(&self, summary: &RunSummary) -> Result<(), BillingError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["save_run"])
            .start_timer();
        self.runs().insert_one(summary, None).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_run(&self, run_id: Uuid) -> Result<Option<RunSummary>, BillingError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["get_run"])
            .start_timer();
        Ok(self
            .runs()
            .find_one(doc! { "runId": run_id.to_string() }, None)
            .await?)
    }
}
