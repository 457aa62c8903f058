//! service-core: Shared infrastructure for the cluster billing workspace.
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;
pub mod retry;

pub use axum;
pub use mongodb;
pub use tokio;
pub use tower_http;
pub use tracing;
pub use validator;
