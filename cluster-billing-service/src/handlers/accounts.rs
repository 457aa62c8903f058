//! Billing account handlers.

use crate::dtos::CreateBillingAccountRequest;
use crate::models::BillingAccount;
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

/// Open a billing account with an empty ledger.
pub async fn create_billing_account(
    State(state): State<AppState>,
    Json(payload): Json<CreateBillingAccountRequest>,
) -> Result<(StatusCode, Json<BillingAccount>), AppError> {
    payload.validate()?;

    let now = Utc::now();
    let account = BillingAccount::open(payload.into_input(now)?, now);

    tracing::info!(
        account = %account.uuid,
        account_type = %account.account_type,
        projects = account.projects.len(),
        "Creating billing account"
    );

    state.accounts.create(&account).await?;

    Ok((StatusCode::CREATED, Json(account)))
}

pub async fn get_billing_account(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<BillingAccount>, AppError> {
    let account = state
        .accounts
        .get(account_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Billing account not found")))?;

    Ok(Json(account))
}

/// Stop accruing charges to an account. Repeating the call is harmless.
pub async fn deactivate_billing_account(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<BillingAccount>, AppError> {
    tracing::info!(account = %account_id, "Deactivating billing account");

    let account = state
        .accounts
        .deactivate(account_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Billing account not found")))?;

    Ok(Json(account))
}
