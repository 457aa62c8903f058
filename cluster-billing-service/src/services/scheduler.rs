//! Periodic billing of the previous calendar month.

use crate::models::BillingWindow;
use crate::services::pipeline::BillingPipeline;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Runs the pipeline on a fixed interval until shut down.
///
/// Every tick bills the month before the current one. Re-billing a month
/// that is already billed changes nothing, so the interval can be shorter
/// than a month.
pub struct BillingScheduler {
    pipeline: Arc<BillingPipeline>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl BillingScheduler {
    pub fn new(pipeline: Arc<BillingPipeline>, interval: Duration, shutdown: CancellationToken) -> Self {
        Self {
            pipeline,
            interval,
            shutdown,
        }
    }

    pub fn start(self) -> JoinHandle<()> {
        tracing::info!(interval_secs = self.interval.as_secs(), "Starting billing scheduler");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        tracing::info!("Billing scheduler shutting down");
                        break;
                    }
                    _ = ticker.tick() => self.tick().await,
                }
            }
        })
    }

    async fn tick(&self) {
        let window = match BillingWindow::previous_month(Utc::now()) {
            Ok(window) => window,
            Err(e) => {
                tracing::error!(error = %e, "Could not compute billing window");
                return;
            }
        };

        match self.pipeline.run(window, &self.shutdown).await {
            Ok(summary) => tracing::info!(
                run_id = %summary.run_id,
                status = summary.status.as_str(),
                "Scheduled billing run finished"
            ),
            Err(e) => tracing::error!(error = %e, "Scheduled billing run failed"),
        }
    }
}
