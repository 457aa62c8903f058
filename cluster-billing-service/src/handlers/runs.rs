//! Billing run handlers.

use crate::dtos::RunBillingRequest;
use crate::models::RunSummary;
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use service_core::error::AppError;
use uuid::Uuid;

/// Run the pipeline for the requested window and return its summary.
pub async fn run_billing(
    State(state): State<AppState>,
    Json(payload): Json<RunBillingRequest>,
) -> Result<Json<RunSummary>, AppError> {
    let window = payload.window(Utc::now())?;

    tracing::info!(window = %window.to_query_param(), "Billing run requested");

    let summary = state.pipeline.run(window, &state.shutdown).await?;
    Ok(Json(summary))
}

pub async fn get_billing_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<RunSummary>, AppError> {
    let summary = state
        .runs
        .get_run(run_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Billing run not found")))?;

    Ok(Json(summary))
}
