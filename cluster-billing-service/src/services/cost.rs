//! Cost-metrics API (Kubecost allocation model).

use crate::config::CostApiConfig;
use crate::error::{BillingError, Upstream};
use crate::models::{BillingWindow, Metrics};
use crate::services::upstream::fetch_json;
use async_trait::async_trait;
use serde::Deserialize;
use service_core::observability::TracedClientExt;
use std::collections::BTreeMap;
use tracing::instrument;

/// Allocation query result: `data` holds one map of buckets per step.
#[derive(Debug, Clone, Deserialize)]
pub struct AllocationResponse {
    pub code: u16,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<Vec<BTreeMap<String, Allocation>>>,
}

/// Usage totals of one allocation bucket.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    #[serde(default)]
    pub name: Option<String>,
    pub cpu_core_hours: f64,
    #[serde(default)]
    pub cpu_core_usage_average: f64,
    pub ram_byte_hours: f64,
    #[serde(default)]
    pub ram_byte_usage_average: f64,
    #[serde(default)]
    pub network_transfer_bytes: f64,
    #[serde(default)]
    pub network_receive_bytes: f64,
    #[serde(default)]
    pub pv_byte_hours: f64,
}

impl From<&Allocation> for Metrics {
    fn from(allocation: &Allocation) -> Self {
        Metrics {
            cpu_core_hours: allocation.cpu_core_hours,
            cpu_average_usage: allocation.cpu_core_usage_average,
            ram_byte_hours: allocation.ram_byte_hours,
            ram_average_usage: allocation.ram_byte_usage_average,
            network_transfer_bytes: allocation.network_transfer_bytes,
            network_receive_bytes: allocation.network_receive_bytes,
            pv_byte_hours: allocation.pv_byte_hours,
        }
    }
}

/// Raw access to namespace allocations.
#[async_trait]
pub trait CostSource: Send + Sync {
    async fn allocation(&self, namespace: &str, window: &BillingWindow) -> Result<AllocationResponse, BillingError>;
}

#[derive(Clone)]
pub struct KubecostClient {
    client: reqwest::Client,
    base_url: String,
}

impl KubecostClient {
    pub fn new(config: &CostApiConfig) -> Result<Self, BillingError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| BillingError::Config(format!("failed to build cost API client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl CostSource for KubecostClient {
    #[instrument(skip(self, window), fields(window = %window.to_query_param()))]
    async fn allocation(&self, namespace: &str, window: &BillingWindow) -> Result<AllocationResponse, BillingError> {
        let url = format!("{}/model/allocation", self.base_url);
        let window_param = window.to_query_param();
        let request = self.client.traced_get(&url).query(&[
            ("window", window_param.as_str()),
            ("accumulate", "true"),
            ("aggregate", "namespace"),
            ("filterNamespaces", namespace),
        ]);

        fetch_json(
            Upstream::CostMetrics,
            "allocation",
            &format!("querying allocation of namespace {}", namespace),
            request,
        )
        .await
    }
}
