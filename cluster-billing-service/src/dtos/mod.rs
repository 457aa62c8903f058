//! Request bodies of the administrative API.

mod accounts;
mod runs;

pub use accounts::{AdminRequest, CompanyRequest, CreateBillingAccountRequest, ProjectRefRequest};
pub use runs::RunBillingRequest;
