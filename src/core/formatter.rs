use chrono::NaiveDate;

use crate::core::models::cost::CostFigure;

/// Returns "$1,425.20": thousands separators, two decimals, symbol prefix.
/// Negative amounts render as "-$12.00".
pub fn format_currency(value: f64, symbol: &str) -> String {
    if !value.is_finite() {
        return format!("{}0.00", symbol);
    }
    let cents = (value.abs() * 100.0).round() as u128;
    let whole = (cents / 100).to_string();
    let frac = cents % 100;

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if value < 0.0 && cents > 0 { "-" } else { "" };
    format!("{}{}{}.{:02}", sign, symbol, grouped, frac)
}

/// Returns "n/a" for figures that could not be fetched.
pub fn format_figure(figure: CostFigure, symbol: &str) -> String {
    match figure {
        CostFigure::Available(v) => format_currency(v, symbol),
        CostFigure::Unavailable => "n/a".to_string(),
    }
}

/// One decimal percentage, e.g. `66.7%`.
pub fn format_percent(value: f64) -> String {
    format!("{:.1}%", value)
}

/// API date format, `YYYY-MM-DD`.
pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Returns "February 15 to March 14".
pub fn format_period(start: NaiveDate, end: NaiveDate) -> String {
    format!("{} to {}", start.format("%B %-d"), end.format("%B %-d"))
}

/// Returns "08-Mar-2024", the daily report heading format.
pub fn format_day(date: NaiveDate) -> String {
    date.format("%d-%b-%Y").to_string()
}
