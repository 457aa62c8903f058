//! Usage collector: one namespace's metrics over a billing window.

use crate::error::{BillingError, Upstream};
use crate::models::{BillingWindow, Metrics};
use crate::services::cost::{AllocationResponse, CostSource};
use service_core::retry::{retry_call, RetryConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Bucket for capacity no workload used.
pub const IDLE_BUCKET: &str = "__idle__";
/// Bucket for usage that could not be attributed.
pub const UNALLOCATED_BUCKET: &str = "__unallocated__";

#[derive(Clone)]
pub struct UsageCollector {
    source: Arc<dyn CostSource>,
    retry: RetryConfig,
    call_timeout: Duration,
}

impl UsageCollector {
    pub fn new(source: Arc<dyn CostSource>, retry: RetryConfig, call_timeout: Duration) -> Self {
        Self {
            source,
            retry,
            call_timeout,
        }
    }

    /// Total usage of `namespace` within `window`.
    ///
    /// Unavailable sources are retried; malformed answers are not. Each
    /// attempt is bounded by the call timeout.
    #[instrument(skip(self, window), fields(window = %window.to_query_param()))]
    pub async fn usage(&self, namespace: &str, window: &BillingWindow) -> Result<Metrics, BillingError> {
        let namespace = namespace.trim();
        if namespace.is_empty() {
            return Err(BillingError::InvalidInput("namespace must not be empty".to_string()));
        }
        if namespace == IDLE_BUCKET || namespace == UNALLOCATED_BUCKET {
            return Err(BillingError::InvalidInput(format!(
                "{} is a reserved allocation bucket",
                namespace
            )));
        }

        let response = retry_call(&self.retry, "cost_allocation", || async move {
            match tokio::time::timeout(self.call_timeout, self.source.allocation(namespace, window)).await {
                Ok(result) => result,
                Err(_) => Err(BillingError::unavailable(
                    Upstream::CostMetrics,
                    format!("querying allocation of namespace {}", namespace),
                    format!("no answer within {:?}", self.call_timeout),
                )),
            }
        })
        .await?;

        select_namespace_bucket(namespace, &response)
    }
}

/// Pick the namespace's own bucket out of an accumulated allocation set.
///
/// A missing bucket is an error, never zero usage: the source was asked for
/// this namespace and must answer for it.
pub fn select_namespace_bucket(namespace: &str, response: &AllocationResponse) -> Result<Metrics, BillingError> {
    let context = format!("querying allocation of namespace {}", namespace);

    if response.code != 200 {
        return Err(BillingError::malformed(
            Upstream::CostMetrics,
            context,
            format!(
                "response code {}: {}",
                response.code,
                response.message.as_deref().unwrap_or("no message")
            ),
        ));
    }

    let sets = response
        .data
        .as_deref()
        .ok_or_else(|| BillingError::malformed(Upstream::CostMetrics, context.as_str(), "no allocation data"))?;
    let [set] = sets else {
        return Err(BillingError::malformed(
            Upstream::CostMetrics,
            context,
            format!("expected one accumulated allocation set, got {}", sets.len()),
        ));
    };

    let allocation = set.get(namespace).ok_or_else(|| {
        let buckets: Vec<&str> = set.keys().map(String::as_str).collect();
        BillingError::malformed(
            Upstream::CostMetrics,
            context.as_str(),
            format!("no bucket for the namespace among [{}]", buckets.join(", ")),
        )
    })?;

    let metrics = Metrics::from(allocation);
    metrics
        .validate()
        .map_err(|e| BillingError::malformed(Upstream::CostMetrics, context.as_str(), e))?;
    Ok(metrics)
}
