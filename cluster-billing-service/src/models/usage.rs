//! Usage quantities and billing windows.

use crate::error::BillingError;
use chrono::{DateTime, Datelike, NaiveDate, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// Resource usage of one namespace (or a sum of namespaces) over a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub cpu_core_hours: f64,
    pub cpu_average_usage: f64,
    pub ram_byte_hours: f64,
    pub ram_average_usage: f64,
    pub network_transfer_bytes: f64,
    pub network_receive_bytes: f64,
    pub pv_byte_hours: f64,
}

impl Metrics {
    fn fields(&self) -> [(&'static str, f64); 7] {
        [
            ("cpuCoreHours", self.cpu_core_hours),
            ("cpuAverageUsage", self.cpu_average_usage),
            ("ramByteHours", self.ram_byte_hours),
            ("ramAverageUsage", self.ram_average_usage),
            ("networkTransferBytes", self.network_transfer_bytes),
            ("networkReceiveBytes", self.network_receive_bytes),
            ("pvByteHours", self.pv_byte_hours),
        ]
    }

    /// Every quantity must be finite and non-negative.
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in self.fields() {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("{} is {}, expected a non-negative number", name, value));
            }
        }
        Ok(())
    }
}

impl Add for Metrics {
    type Output = Metrics;

    fn add(mut self, rhs: Metrics) -> Metrics {
        self += rhs;
        self
    }
}

impl AddAssign for Metrics {
    fn add_assign(&mut self, rhs: Metrics) {
        self.cpu_core_hours += rhs.cpu_core_hours;
        self.cpu_average_usage += rhs.cpu_average_usage;
        self.ram_byte_hours += rhs.ram_byte_hours;
        self.ram_average_usage += rhs.ram_average_usage;
        self.network_transfer_bytes += rhs.network_transfer_bytes;
        self.network_receive_bytes += rhs.network_receive_bytes;
        self.pv_byte_hours += rhs.pv_byte_hours;
    }
}

impl Sum for Metrics {
    fn sum<I: Iterator<Item = Metrics>>(iter: I) -> Metrics {
        iter.fold(Metrics::default(), Add::add)
    }
}

/// Half-open interval `[start, end)` usage is billed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WindowBounds")]
pub struct BillingWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Deserialize)]
struct WindowBounds {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TryFrom<WindowBounds> for BillingWindow {
    type Error = BillingError;

    fn try_from(bounds: WindowBounds) -> Result<Self, Self::Error> {
        BillingWindow::new(bounds.start, bounds.end)
    }
}

impl BillingWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, BillingError> {
        if end <= start {
            return Err(BillingError::InvalidInput(format!(
                "billing window end {} must be after start {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    /// The calendar month before the one containing `now`.
    pub fn previous_month(now: DateTime<Utc>) -> Result<Self, BillingError> {
        let end = month_start(now.year(), now.month())?;
        let (year, month) = if now.month() == 1 {
            (now.year() - 1, 12)
        } else {
            (now.year(), now.month() - 1)
        };
        let start = month_start(year, month)?;
        Self::new(start, end)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// `start,end` in RFC 3339, the form the cost metrics API accepts.
    pub fn to_query_param(&self) -> String {
        format!(
            "{},{}",
            self.start.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.end.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }
}

fn month_start(year: i32, month: u32) -> Result<DateTime<Utc>, BillingError> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| BillingError::InvalidInput(format!("invalid month {}-{}", year, month)))
}
