//! Domain error taxonomy for billing runs.

use chrono::{DateTime, Utc};
use service_core::error::AppError;
use service_core::retry::Retryable;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Remote collaborator an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upstream {
    FleetManagement,
    CostMetrics,
}

impl Upstream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Upstream::FleetManagement => "fleet_management",
            Upstream::CostMetrics => "cost_metrics",
        }
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("{upstream} unavailable while {context}: {message}")]
    SourceUnavailable {
        upstream: Upstream,
        context: String,
        message: String,
    },

    #[error("malformed {upstream} response while {context}: {message}")]
    MalformedResponse {
        upstream: Upstream,
        context: String,
        message: String,
    },

    #[error("{upstream} rejected credentials while {context}")]
    Unauthorized { upstream: Upstream, context: String },

    #[error("billing account {0} is inactive")]
    AccountInactive(Uuid),

    #[error("billing account {0} not found")]
    AccountNotFound(Uuid),

    #[error("project {project_id} already billed on account {account} for period ending {billing_date}")]
    AlreadyBilled {
        account: Uuid,
        project_id: String,
        billing_date: DateTime<Utc>,
    },

    #[error("project {project_id} is owned by another billing account")]
    ProjectClaimed { project_id: String, owners: Vec<Uuid> },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("concurrent update of billing account {0}")]
    Conflict(Uuid),

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("run cancelled")]
    Cancelled,
}

impl BillingError {
    pub fn unavailable(upstream: Upstream, context: impl Into<String>, message: impl fmt::Display) -> Self {
        BillingError::SourceUnavailable {
            upstream,
            context: context.into(),
            message: message.to_string(),
        }
    }

    pub fn malformed(upstream: Upstream, context: impl Into<String>, message: impl fmt::Display) -> Self {
        BillingError::MalformedResponse {
            upstream,
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Stable label used in run summaries and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            BillingError::SourceUnavailable { .. } => "source_unavailable",
            BillingError::MalformedResponse { .. } => "malformed_response",
            BillingError::Unauthorized { .. } => "unauthorized",
            BillingError::AccountInactive(_) => "account_inactive",
            BillingError::AccountNotFound(_) => "account_not_found",
            BillingError::AlreadyBilled { .. } => "already_billed",
            BillingError::ProjectClaimed { .. } => "project_claimed",
            BillingError::InvalidInput(_) => "invalid_input",
            BillingError::Conflict(_) => "conflict",
            BillingError::Persistence(_) => "persistence",
            BillingError::Config(_) => "config",
            BillingError::Cancelled => "cancelled",
        }
    }
}

impl Retryable for BillingError {
    fn is_retryable(&self) -> bool {
        matches!(self, BillingError::SourceUnavailable { .. })
    }
}

impl From<mongodb::error::Error> for BillingError {
    fn from(err: mongodb::error::Error) -> Self {
        BillingError::Persistence(err.to_string())
    }
}

impl From<BillingError> for AppError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::SourceUnavailable { .. } | BillingError::Cancelled => {
                AppError::ServiceUnavailable(err.to_string())
            }
            BillingError::MalformedResponse { .. } | BillingError::Unauthorized { .. } => {
                AppError::BadGateway(err.to_string())
            }
            BillingError::AccountNotFound(_) => AppError::NotFound(anyhow::anyhow!(err)),
            BillingError::InvalidInput(_) => AppError::BadRequest(anyhow::anyhow!(err)),
            BillingError::AccountInactive(_)
            | BillingError::AlreadyBilled { .. }
            | BillingError::ProjectClaimed { .. }
            | BillingError::Conflict(_) => AppError::Conflict(anyhow::anyhow!(err)),
            BillingError::Persistence(_) => AppError::DatabaseError(anyhow::anyhow!(err)),
            BillingError::Config(_) => AppError::ConfigError(anyhow::anyhow!(err)),
        }
    }
}
