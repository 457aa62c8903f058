use crate::error::BillingError;
use crate::models::BillingWindow;
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Window to bill. Both bounds or neither; neither means the previous month.
#[derive(Debug, Default, Deserialize)]
pub struct RunBillingRequest {
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

impl RunBillingRequest {
    pub fn window(&self, now: DateTime<Utc>) -> Result<BillingWindow, BillingError> {
        match (self.start, self.end) {
            (Some(start), Some(end)) => BillingWindow::new(start, end),
            (None, None) => BillingWindow::previous_month(now),
            _ => Err(BillingError::InvalidInput(
                "start and end must be given together".to_string(),
            )),
        }
    }
}
