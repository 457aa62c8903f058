//! Response handling shared by the fleet and cost-metrics clients.

use crate::error::{BillingError, Upstream};
use crate::services::metrics::UPSTREAM_REQUEST_DURATION;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use service_core::observability::TracedRequest;

/// Send a request and decode its JSON body, classifying failures.
///
/// Transport failures, timeouts, 429 and 5xx are transient; other non-2xx
/// statuses and undecodable bodies mean the API broke its contract.
pub(crate) async fn fetch_json<T: DeserializeOwned>(
    upstream: Upstream,
    operation: &str,
    context: &str,
    request: TracedRequest,
) -> Result<T, BillingError> {
    let timer = UPSTREAM_REQUEST_DURATION
        .with_label_values(&[upstream.as_str(), operation])
        .start_timer();
    let result = request.send().await;
    timer.observe_duration();

    let response = result.map_err(|e| BillingError::unavailable(upstream, context, e))?;
    let status = response.status();

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(BillingError::Unauthorized {
            upstream,
            context: context.to_string(),
        });
    }

    let body = response
        .text()
        .await
        .map_err(|e| BillingError::unavailable(upstream, context, e))?;

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(BillingError::unavailable(
            upstream,
            context,
            format!("HTTP {}: {}", status, truncate(&body)),
        ));
    }
    if !status.is_success() {
        return Err(BillingError::malformed(
            upstream,
            context,
            format!("HTTP {}: {}", status, truncate(&body)),
        ));
    }

    serde_json::from_str(&body).map_err(|e| BillingError::malformed(upstream, context, e))
}

fn truncate(body: &str) -> &str {
    const LIMIT: usize = 512;
    match body.char_indices().nth(LIMIT) {
        Some((index, _)) => &body[..index],
        None => body,
    }
}
