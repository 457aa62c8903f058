//! Pricing table.

use crate::models::ResourcePricing;

/// Source of the rates a run prices usage with.
///
/// Read once at the start of each run, so a run never mixes rates.
pub trait PricingTable: Send + Sync {
    fn rate(&self) -> ResourcePricing;
}

/// Fixed rates taken from configuration.
#[derive(Debug, Clone)]
pub struct StaticPricingTable {
    pricing: ResourcePricing,
}

impl StaticPricingTable {
    pub fn new(pricing: ResourcePricing) -> Self {
        Self { pricing }
    }
}

impl PricingTable for StaticPricingTable {
    fn rate(&self) -> ResourcePricing {
        self.pricing
    }
}
