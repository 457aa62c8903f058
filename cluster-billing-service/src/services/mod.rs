//! Services module for cluster-billing-service.

pub mod collector;
pub mod correlator;
pub mod cost;
pub mod database;
pub mod engine;
pub mod fleet;
pub mod metrics;
pub mod pipeline;
pub mod pricing;
pub mod repository;
pub mod scheduler;
mod upstream;

pub use collector::UsageCollector;
pub use correlator::{correlate, Correlation};
pub use cost::{AllocationResponse, CostSource, KubecostClient};
pub use database::MongoDb;
pub use engine::{accrue, Accrual, BillDocuments, PRICED_RESOURCES, UNPRICED_RESOURCES};
pub use fleet::{fetch_snapshot, FleetSource, RancherClient};
pub use metrics::{get_metrics, init_metrics};
pub use pipeline::{BillingPipeline, PipelineDeps, PipelineSettings};
pub use pricing::{PricingTable, StaticPricingTable};
pub use repository::{AccountRepository, RunRepository};
pub use scheduler::BillingScheduler;
