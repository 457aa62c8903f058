//! Per-minute resource rates.

use crate::error::BillingError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Rates applied to usage; both strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePricing {
    cpu_core_minute: Decimal,
    ram_byte_minute: Decimal,
}

impl ResourcePricing {
    pub fn new(cpu_core_minute: Decimal, ram_byte_minute: Decimal) -> Result<Self, BillingError> {
        if cpu_core_minute <= Decimal::ZERO {
            return Err(BillingError::InvalidInput(format!(
                "cpu core-minute rate must be positive, got {}",
                cpu_core_minute
            )));
        }
        if ram_byte_minute <= Decimal::ZERO {
            return Err(BillingError::InvalidInput(format!(
                "ram byte-minute rate must be positive, got {}",
                ram_byte_minute
            )));
        }
        Ok(Self {
            cpu_core_minute,
            ram_byte_minute,
        })
    }

    pub fn cpu_core_minute(&self) -> Decimal {
        self.cpu_core_minute
    }

    pub fn ram_byte_minute(&self) -> Decimal {
        self.ram_byte_minute
    }
}
