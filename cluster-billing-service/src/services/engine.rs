//! Billing engine: turns a project's usage into a charge on its account.
//!
//! [`accrue`] is pure. Persisting the returned account is the caller's job,
//! done through a versioned write so concurrent runs cannot double-charge.

use crate::error::BillingError;
use crate::models::{BillFile, BillingAccount, BillingWindow, Metrics, ProjectId, ResourcePricing};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use uuid::Uuid;

/// Resources that contribute to the amount.
pub const PRICED_RESOURCES: &[&str] = &["cpu", "ram"];

/// Resources collected and recorded but not charged for.
pub const UNPRICED_RESOURCES: &[&str] = &["network", "persistent_volume"];

const MINUTES_PER_HOUR: u32 = 60;

/// Builds the reference of the bill document rendered for each charge.
///
/// Rendering happens elsewhere; only the location is recorded here.
#[derive(Debug, Clone)]
pub struct BillDocuments {
    base_url: String,
}

impl BillDocuments {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn reference_for(&self, account: Uuid, project_id: &ProjectId, period: &BillingWindow) -> String {
        format!(
            "{}/{}/{}/{}.pdf",
            self.base_url,
            account,
            project_id,
            period.end().format("%Y-%m-%d")
        )
    }
}

/// Outcome of an accrual.
#[derive(Debug, Clone, PartialEq)]
pub enum Accrual {
    /// A new bill was appended; `account` is the updated ledger.
    Charged { account: BillingAccount, bill: BillFile },
    /// The period was billed before; nothing changed.
    AlreadyBilled { existing: BillFile },
}

impl Accrual {
    /// Treat a previously billed period as an error, for callers that
    /// expect a fresh charge.
    pub fn into_fresh_charge(self, account: Uuid) -> Result<(BillingAccount, BillFile), BillingError> {
        match self {
            Accrual::Charged { account, bill } => Ok((account, bill)),
            Accrual::AlreadyBilled { existing } => Err(BillingError::AlreadyBilled {
                account,
                project_id: existing.project_id.to_string(),
                billing_date: existing.billing_date,
            }),
        }
    }
}

/// Price usage at per-minute rates. Only CPU and RAM are charged.
pub fn amount_for(metrics: &Metrics, pricing: &ResourcePricing) -> Result<Decimal, BillingError> {
    let minutes = Decimal::from(MINUTES_PER_HOUR);
    let cpu = quantity("cpuCoreHours", metrics.cpu_core_hours)?;
    let ram = quantity("ramByteHours", metrics.ram_byte_hours)?;

    let overflow = || BillingError::InvalidInput("usage amount overflows".to_string());
    let cpu_cost = cpu
        .checked_mul(minutes)
        .and_then(|m| m.checked_mul(pricing.cpu_core_minute()))
        .ok_or_else(overflow)?;
    let ram_cost = ram
        .checked_mul(minutes)
        .and_then(|m| m.checked_mul(pricing.ram_byte_minute()))
        .ok_or_else(overflow)?;
    cpu_cost.checked_add(ram_cost).ok_or_else(overflow)
}

fn quantity(name: &str, value: f64) -> Result<Decimal, BillingError> {
    if !value.is_finite() || value < 0.0 {
        return Err(BillingError::InvalidInput(format!(
            "{} must be a non-negative number, got {}",
            name, value
        )));
    }
    Decimal::from_f64(value)
        .ok_or_else(|| BillingError::InvalidInput(format!("{} out of range: {}", name, value)))
}

/// Charge `project`'s usage over `period` to `account`.
///
/// Appends one bill dated at the end of the period and adds its amount to the
/// balance. Accruing the same project and period twice yields
/// [`Accrual::AlreadyBilled`] without touching the account.
pub fn accrue(
    account: &BillingAccount,
    project_id: &ProjectId,
    metrics: &Metrics,
    pricing: &ResourcePricing,
    period: &BillingWindow,
    documents: &BillDocuments,
) -> Result<Accrual, BillingError> {
    if !account.is_active {
        return Err(BillingError::AccountInactive(account.uuid));
    }
    if !account.owns_project(project_id) {
        return Err(BillingError::InvalidInput(format!(
            "project {} is not billed to account {}",
            project_id, account.uuid
        )));
    }

    let billing_date = period.end();
    if let Some(existing) = account.bill_for(project_id, billing_date) {
        return Ok(Accrual::AlreadyBilled {
            existing: existing.clone(),
        });
    }

    let amount = amount_for(metrics, pricing)?;
    tracing::debug!(
        account = %account.uuid,
        project_id = %project_id,
        amount = %amount,
        network_transfer_bytes = metrics.network_transfer_bytes,
        network_receive_bytes = metrics.network_receive_bytes,
        pv_byte_hours = metrics.pv_byte_hours,
        "Priced project usage; network and persistent volume usage are not charged"
    );

    let bill = BillFile {
        billing_date,
        project_id: project_id.clone(),
        document_ref: documents.reference_for(account.uuid, project_id, period),
        amount,
    };

    let mut updated = account.clone();
    let position = updated
        .history
        .partition_point(|existing| existing.billing_date <= billing_date);
    updated.history.insert(position, bill.clone());
    updated.balance += amount;

    Ok(Accrual::Charged {
        account: updated,
        bill,
    })
}
