//! HTTP handlers for the administrative API.

pub mod accounts;
pub mod health;
pub mod runs;

pub use accounts::{create_billing_account, deactivate_billing_account, get_billing_account};
pub use health::{health_check, metrics_handler, readiness_check};
pub use runs::{get_billing_run, run_billing};
