//! Billing-cycle relative date windows.
//!
//! A subscription's billing month starts on a fixed day of the month. All
//! windows are derived from that day and the current UTC date, clamping the
//! start day to the length of short months.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::Serialize;

/// Days subtracted from today for the daily figure. Cost data lags behind
/// real usage, so the most recent complete day is two days back.
pub const DAILY_LAG_DAYS: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BillingWindow {
    pub billing_start_day: u32,
    pub month_start: NaiveDate,
    pub month_end: NaiveDate,
    pub year_start: NaiveDate,
    pub year_end: NaiveDate,
    pub yesterday: NaiveDate,
    pub today: NaiveDate,
}

/// Length of a month, taken from the day before the next month's 1st.
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (ny, nm) = next_month(year, month);
    NaiveDate::from_ymd_opt(ny, nm, 1)
        .and_then(|first| first.pred_opt())
        .map_or(31, |last| last.day())
}

/// `day` of the given month, pulled back to the month's last day when the
/// month is too short.
fn clamped_date(year: i32, month: u32, day: u32) -> NaiveDate {
    let day = day.clamp(1, days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(NaiveDate::MIN)
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

fn prev_month(year: i32, month: u32) -> (i32, u32) {
    if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}

/// Compute the current billing month and billing year around `now`.
pub fn compute_window(billing_start_day: u32, now: DateTime<Utc>) -> BillingWindow {
    let start_day = billing_start_day.clamp(1, 31);
    let today = now.date_naive();

    let this_cycle = clamped_date(today.year(), today.month(), start_day);
    let month_start = if today >= this_cycle {
        this_cycle
    } else {
        let (y, m) = prev_month(today.year(), today.month());
        clamped_date(y, m, start_day)
    };

    let (ny, nm) = next_month(month_start.year(), month_start.month());
    let month_end = clamped_date(ny, nm, start_day) - Duration::days(1);

    let this_year = clamped_date(today.year(), 1, start_day);
    let year_start = if today >= this_year {
        this_year
    } else {
        clamped_date(today.year() - 1, 1, start_day)
    };
    let year_end = clamped_date(year_start.year() + 1, 1, start_day) - Duration::days(1);

    BillingWindow {
        billing_start_day: start_day,
        month_start,
        month_end,
        year_start,
        year_end,
        yesterday: today - Duration::days(DAILY_LAG_DAYS),
        today,
    }
}

impl BillingWindow {
    /// Days of the billing year elapsed up to and including today.
    pub fn year_days_elapsed(&self) -> i64 {
        (self.today - self.year_start).num_days() + 1
    }

    pub fn year_days_total(&self) -> i64 {
        (self.year_end - self.year_start).num_days() + 1
    }
}

/// Extrapolate year-to-date spend linearly over the whole billing year.
pub fn linear_year_forecast(ytd: f64, window: &BillingWindow) -> f64 {
    let elapsed = window.year_days_elapsed();
    if elapsed <= 0 {
        return ytd;
    }
    ytd / elapsed as f64 * window.year_days_total() as f64
}

/// Day of month of a billing period start date such as `2024-03-15` or
/// `2024-03-15T00:00:00Z`.
pub fn start_day_from_period(date: &str) -> Option<u32> {
    let head = date.get(..10)?;
    NaiveDate::parse_from_str(head, "%Y-%m-%d")
        .ok()
        .map(|d| d.day())
}
