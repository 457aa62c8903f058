//! Application startup and lifecycle management.

use crate::config::BillingConfig;
use crate::handlers::{
    create_billing_account, deactivate_billing_account, get_billing_account, get_billing_run,
    health_check, metrics_handler, readiness_check, run_billing,
};
use crate::services::{
    init_metrics, AccountRepository, BillDocuments, BillingPipeline, BillingScheduler,
    KubecostClient, MongoDb, PipelineDeps, PipelineSettings, RancherClient, RunRepository,
    StaticPricingTable, UsageCollector,
};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::{make_request_span, request_id_middleware};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub accounts: Arc<dyn AccountRepository>,
    pub runs: Arc<dyn RunRepository>,
    pub pipeline: Arc<BillingPipeline>,
    pub shutdown: CancellationToken,
}

/// Build the HTTP router over the given state.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .route("/billing-accounts", post(create_billing_account))
        .route("/billing-accounts/:id", get(get_billing_account))
        .route("/billing-accounts/:id/deactivate", post(deactivate_billing_account))
        .route("/billing-runs", post(run_billing))
        .route("/billing-runs/:id", get(get_billing_run))
        .layer(TraceLayer::new_for_http().make_span_with(make_request_span))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
    scheduler: Option<BillingScheduler>,
    shutdown: CancellationToken,
}

impl Application {
    /// Connect collaborators and bind the listener. Nothing remote is
    /// contacted before configuration has been validated.
    pub async fn build(config: BillingConfig) -> Result<Self, AppError> {
        init_metrics();

        let db = MongoDb::connect(config.database.uri.expose_secret(), &config.database.name).await?;
        db.initialize_indexes().await?;
        let db = Arc::new(db);

        let fleet = Arc::new(RancherClient::new(&config.fleet)?);
        let cost = Arc::new(KubecostClient::new(&config.cost)?);
        let collector = UsageCollector::new(cost, config.worker.retry.clone(), config.cost.request_timeout);

        let pipeline = Arc::new(BillingPipeline::new(
            PipelineDeps {
                fleet,
                collector,
                pricing: Arc::new(StaticPricingTable::new(config.pricing)),
                accounts: db.clone(),
                runs: db.clone(),
                documents: BillDocuments::new(config.documents.base_url.clone()),
            },
            PipelineSettings {
                cluster_concurrency: config.worker.cluster_concurrency,
                account_concurrency: config.worker.account_concurrency,
                namespace_concurrency: config.worker.namespace_concurrency,
                max_accrual_attempts: config.worker.max_accrual_attempts,
                retry: config.worker.retry.clone(),
            },
        ));

        let shutdown = CancellationToken::new();
        let scheduler = config.schedule.enabled.then(|| {
            BillingScheduler::new(pipeline.clone(), config.schedule.interval, shutdown.clone())
        });

        let state = AppState {
            accounts: db.clone(),
            runs: db,
            pipeline,
            shutdown: shutdown.clone(),
        };

        let address = config.common.bind_address();
        let listener = TcpListener::bind(&address).await.map_err(|e| {
            tracing::error!(error = %e, addr = %address, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port, scheduler = scheduler.is_some(), "Cluster billing service listener bound");

        Ok(Self {
            port,
            listener,
            router: build_router(state),
            scheduler,
            shutdown,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Token cancelled on shutdown; stops the scheduler and in-flight runs.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let scheduler = self.scheduler.map(BillingScheduler::start);

        tracing::info!(
            service = "cluster-billing-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );

        let shutdown = self.shutdown.clone();
        let result = axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;

        self.shutdown.cancel();
        if let Some(handle) = scheduler {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Billing scheduler task ended abnormally");
            }
        }

        result.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
