//! Configuration module for cluster-billing-service.

use crate::models::ResourcePricing;
use rust_decimal::Decimal;
use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use service_core::retry::RetryConfig;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Default per-minute rates.
pub const DEFAULT_CPU_CORE_MINUTE: &str = "0.04";
pub const DEFAULT_RAM_BYTE_MINUTE: &str = "0.00006";

#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub fleet: FleetApiConfig,
    pub cost: CostApiConfig,
    pub pricing: ResourcePricing,
    pub documents: DocumentConfig,
    pub worker: WorkerConfig,
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub uri: Secret<String>,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct FleetApiConfig {
    pub url: String,
    pub bearer_token: Secret<String>,
    pub page_size: u32,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CostApiConfig {
    pub url: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DocumentConfig {
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub cluster_concurrency: usize,
    pub account_concurrency: usize,
    pub namespace_concurrency: usize,
    pub max_accrual_attempts: u32,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub interval: Duration,
}

impl BillingConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        Self::from_vars(common, |key| env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_vars<F>(common: core_config::Config, var: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            var(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| AppError::ConfigError(anyhow::anyhow!("{} is required", key)))
        };
        let or_default = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        let cost_default = if common.is_production() {
            "http://kubecost-cost-analyzer:9090"
        } else {
            "http://localhost:9090"
        };

        let cpu_rate: Decimal = parse(&var, "PRICING_CPU_CORE_MINUTE", DEFAULT_CPU_CORE_MINUTE)?;
        let ram_rate: Decimal = parse(&var, "PRICING_RAM_BYTE_MINUTE", DEFAULT_RAM_BYTE_MINUTE)?;
        let pricing = ResourcePricing::new(cpu_rate, ram_rate)
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("invalid pricing: {}", e)))?;

        let retry = RetryConfig {
            max_retries: parse(&var, "UPSTREAM_MAX_RETRIES", "3")?,
            initial_backoff: Duration::from_millis(parse(&var, "UPSTREAM_INITIAL_BACKOFF_MS", "200")?),
            max_backoff: Duration::from_millis(parse(&var, "UPSTREAM_MAX_BACKOFF_MS", "10000")?),
            ..RetryConfig::default()
        };

        Ok(Self {
            service_name: or_default("SERVICE_NAME", "cluster-billing-service"),
            log_level: or_default("LOG_LEVEL", "info"),
            otlp_endpoint: var("OTLP_ENDPOINT").filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                uri: Secret::new(required("MONGODB_URI")?),
                name: or_default("MONGODB_DATABASE", "cluster_billing"),
            },
            fleet: FleetApiConfig {
                url: required("RANCHER_API_URL")?,
                bearer_token: Secret::new(required("RANCHER_BEARER_TOKEN")?),
                page_size: parse(&var, "RANCHER_PAGE_SIZE", "100")?,
                request_timeout: Duration::from_secs(parse(&var, "RANCHER_TIMEOUT_SECS", "30")?),
            },
            cost: CostApiConfig {
                url: or_default("KUBECOST_URL", cost_default),
                request_timeout: Duration::from_secs(parse(&var, "KUBECOST_TIMEOUT_SECS", "60")?),
            },
            pricing,
            documents: DocumentConfig {
                base_url: or_default("BILL_DOCUMENT_BASE_URL", "https://bills.local/documents"),
            },
            worker: WorkerConfig {
                cluster_concurrency: parse(&var, "WORKER_CLUSTER_CONCURRENCY", "4")?,
                account_concurrency: parse(&var, "WORKER_ACCOUNT_CONCURRENCY", "8")?,
                namespace_concurrency: parse(&var, "WORKER_NAMESPACE_CONCURRENCY", "8")?,
                max_accrual_attempts: parse(&var, "WORKER_MAX_ACCRUAL_ATTEMPTS", "3")?,
                retry,
            },
            schedule: ScheduleConfig {
                enabled: parse(&var, "BILLING_SCHEDULE_ENABLED", "false")?,
                interval: Duration::from_secs(parse(&var, "BILLING_SCHEDULE_INTERVAL_SECS", "86400")?),
            },
            common,
        })
    }
}

fn parse<T, F>(var: &F, key: &str, default: &str) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = var(key).unwrap_or_else(|| default.to_string());
    raw.trim()
        .parse()
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!("{} has invalid value '{}': {}", key, raw, e)))
}
