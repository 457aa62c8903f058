//! Cluster billing service.
//!
//! Attributes Kubernetes namespace cost to billing accounts: fleet identities
//! are correlated to namespaces, namespace usage is collected from the cost
//! metrics API, priced, and accrued into per-account bill histories.

pub mod config;
pub mod dtos;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;

pub use error::BillingError;
