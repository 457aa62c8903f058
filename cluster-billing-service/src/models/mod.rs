//! Domain models for cluster-billing-service.

mod account;
mod fleet;
mod ids;
mod pricing;
mod run;
mod usage;
pub(crate) mod uuid_string;

pub use account::{
    AccountType, AdminDetails, BillFile, BillingAccount, Company, CreateBillingAccount, ProjectRef,
};
pub use fleet::{FleetNamespace, FleetProject, FleetSnapshot, FleetUser, RoleBinding, PROJECT_LABEL};
pub use ids::{split_composite, strip_cluster_prefix, ProjectId, COMPOSITE_SEPARATOR};
pub use pricing::ResourcePricing;
pub use run::{
    RunStatus, RunSummary, UnbilledProject, UnitFailure, UnresolvedNamespace, UnresolvedReason,
};
pub use usage::{BillingWindow, Metrics};
