//! HTML rendering of a report run for email and webhook delivery.

use chrono::NaiveDate;
use handlebars::Handlebars;
use serde::Serialize;
use thiserror::Error;

use crate::core::formatter::{format_currency, format_day, format_figure, format_percent, format_period};
use crate::core::models::cost::{BreakdownEntry, CostFigure};
use crate::core::report::{share_percent, CostShares, ReportTotals, RunReport, SubscriptionReport};

const REPORT_TEMPLATE: &str = include_str!("../../templates/report.hbs");
const ERROR_TEMPLATE: &str = include_str!("../../templates/error.hbs");

#[derive(Error, Debug)]
pub enum HtmlError {
    #[error("Invalid template: {0}")]
    Template(#[from] handlebars::TemplateError),
    #[error("Failed to render: {0}")]
    Render(#[from] handlebars::RenderError),
}

#[derive(Serialize)]
struct SubscriptionView<'a> {
    name: &'a str,
    subscription_id: &'a str,
    period: Option<String>,
    daily: String,
    mtd: String,
    ytd: String,
    month_forecast: String,
    year_forecast: String,
    year_forecast_estimated: bool,
    /// Percentages of the totals, only with more than one subscription.
    mtd_share: Option<String>,
    ytd_share: Option<String>,
    month_forecast_share: Option<String>,
    year_forecast_share: Option<String>,
    breakdown: &'a [BreakdownEntry],
    error: Option<&'a str>,
}

#[derive(Serialize)]
struct BarView<'a> {
    name: &'a str,
    amount: String,
    percent: String,
    width: String,
}

#[derive(Serialize)]
struct DistributionView<'a> {
    label: &'static str,
    bars: Vec<BarView<'a>>,
}

#[derive(Serialize)]
struct TotalsView {
    daily: String,
    mtd: String,
    ytd: String,
    month_forecast: String,
    year_forecast: String,
}

#[derive(Serialize)]
struct ReportView<'a> {
    title: &'a str,
    generated_on: String,
    daily_date: String,
    subscriptions: Vec<SubscriptionView<'a>>,
    totals: Option<TotalsView>,
    distribution: Vec<DistributionView<'a>>,
    has_unavailable: bool,
}

#[derive(Serialize)]
struct ErrorView<'a> {
    title: &'a str,
    message: &'a str,
    generated_on: String,
}

fn long_date(date: NaiveDate) -> String {
    date.format("%B %d, %Y").to_string()
}

fn subscription_view<'a>(
    sub: &'a SubscriptionReport,
    shares: Option<CostShares>,
    symbol: &str,
) -> SubscriptionView<'a> {
    let share = |pick: fn(&CostShares) -> Option<f64>| shares.as_ref().and_then(pick).map(format_percent);
    SubscriptionView {
        name: &sub.name,
        subscription_id: &sub.subscription_id,
        period: sub.window.map(|w| format_period(w.month_start, w.month_end)),
        daily: format_figure(sub.daily, symbol),
        mtd: format_figure(sub.mtd, symbol),
        ytd: format_figure(sub.ytd, symbol),
        month_forecast: format_figure(sub.month_forecast, symbol),
        year_forecast: format_figure(sub.year_forecast, symbol),
        year_forecast_estimated: sub.year_forecast_estimated,
        mtd_share: share(|s| s.mtd),
        ytd_share: share(|s| s.ytd),
        month_forecast_share: share(|s| s.month_forecast),
        year_forecast_share: share(|s| s.year_forecast),
        breakdown: &sub.daily_breakdown,
        error: sub.error.as_deref(),
    }
}

/// One bar chart per summed figure. Subscriptions without the figure are
/// left out of its chart.
fn distribution<'a>(report: &'a RunReport, totals: &ReportTotals, symbol: &str) -> Vec<DistributionView<'a>> {
    let charts: [(&'static str, fn(&SubscriptionReport) -> CostFigure, f64); 4] = [
        ("Month to date", |s| s.mtd, totals.mtd),
        ("Month forecast", |s| s.month_forecast, totals.month_forecast),
        ("Year to date", |s| s.ytd, totals.ytd),
        ("Year forecast", |s| s.year_forecast, totals.year_forecast),
    ];
    charts
        .into_iter()
        .map(|(label, pick, total)| DistributionView {
            label,
            bars: report
                .subscriptions
                .iter()
                .filter_map(|sub| {
                    let figure = pick(sub);
                    let percent = share_percent(figure, total)?;
                    Some(BarView {
                        name: &sub.name,
                        amount: format_figure(figure, symbol),
                        percent: format_percent(percent),
                        width: format!("{:.1}", percent.clamp(0.0, 100.0)),
                    })
                })
                .collect(),
        })
        .collect()
}

/// Renders reports from the embedded templates.
pub struct HtmlRenderer {
    handlebars: Handlebars<'static>,
    currency_symbol: String,
}

impl HtmlRenderer {
    pub fn new(currency_symbol: &str) -> Result<Self, HtmlError> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        handlebars.register_template_string("report", REPORT_TEMPLATE)?;
        handlebars.register_template_string("error", ERROR_TEMPLATE)?;
        Ok(Self {
            handlebars,
            currency_symbol: currency_symbol.to_string(),
        })
    }

    /// Full report. A totals section is added when more than one
    /// subscription is present.
    pub fn render_report(&self, report: &RunReport, title: &str) -> Result<String, HtmlError> {
        let symbol = self.currency_symbol.as_str();
        let multiple = report.subscriptions.len() > 1;
        let sums = report.totals();
        let totals = multiple.then(|| TotalsView {
            daily: format_currency(sums.daily, symbol),
            mtd: format_currency(sums.mtd, symbol),
            ytd: format_currency(sums.ytd, symbol),
            month_forecast: format_currency(sums.month_forecast, symbol),
            year_forecast: format_currency(sums.year_forecast, symbol),
        });

        let view = ReportView {
            title,
            generated_on: long_date(report.generated_on),
            daily_date: format_day(report.daily_date),
            subscriptions: report
                .subscriptions
                .iter()
                .map(|s| subscription_view(s, multiple.then(|| s.shares(&sums)), symbol))
                .collect(),
            totals,
            distribution: if multiple {
                distribution(report, &sums, symbol)
            } else {
                Vec::new()
            },
            has_unavailable: report.subscriptions.iter().any(|s| s.has_unavailable()),
        };
        Ok(self.handlebars.render("report", &view)?)
    }

    /// Page sent in place of the report when the run aborts.
    pub fn render_error(&self, title: &str, message: &str, today: NaiveDate) -> Result<String, HtmlError> {
        let view = ErrorView {
            title,
            message,
            generated_on: long_date(today),
        };
        Ok(self.handlebars.render("error", &view)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::window::compute_window;
    use chrono::{TimeZone, Utc};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn subscription(name: &str) -> SubscriptionReport {
        let window = compute_window(15, Utc.with_ymd_and_hms(2024, 3, 20, 0, 0, 0).unwrap());
        SubscriptionReport {
            subscription_id: format!("{name}-id"),
            name: name.to_string(),
            window: Some(window),
            daily: CostFigure::Available(12.5),
            mtd: CostFigure::Available(1425.2),
            ytd: CostFigure::Available(9876.0),
            month_forecast: CostFigure::Available(3000.0),
            year_forecast: CostFigure::Available(40000.0),
            year_forecast_estimated: false,
            daily_breakdown: vec![BreakdownEntry {
                service_name: "Virtual Machines".into(),
                cost: 12.5,
                formatted_cost: "$12.50".into(),
                currency: "CAD".into(),
            }],
            currency: Some("CAD".into()),
            error: None,
        }
    }

    fn report(subs: Vec<SubscriptionReport>) -> RunReport {
        RunReport {
            generated_on: d(2024, 3, 20),
            daily_date: d(2024, 3, 18),
            subscriptions: subs,
        }
    }

    #[test]
    fn renders_figures_and_breakdown() {
        let renderer = HtmlRenderer::new("$").unwrap();
        let html = renderer
            .render_report(&report(vec![subscription("Production")]), "Azure Cost Report")
            .unwrap();
        assert!(html.contains("<h2>Production</h2>"));
        assert!(html.contains("March 15 to April 14"));
        assert!(html.contains("18-Mar-2024"));
        assert!(html.contains("March 20, 2024"));
        assert!(html.contains("$1,425.20"));
        assert!(html.contains("Virtual Machines"));
        assert!(html.contains("$12.50 CAD"));
        // Single subscription: no totals section.
        assert!(!html.contains("All subscriptions"));
        assert!(!html.contains("n/a"));
    }

    #[test]
    fn unavailable_figures_render_as_na() {
        let mut sub = subscription("Production");
        sub.ytd = CostFigure::Unavailable;
        sub.year_forecast_estimated = true;
        let html = HtmlRenderer::new("$")
            .unwrap()
            .render_report(&report(vec![sub]), "Azure Cost Report")
            .unwrap();
        assert!(html.contains(">n/a<"));
        assert!(html.contains("(estimated)"));
        assert!(html.contains("excluded from totals"));
    }

    #[test]
    fn totals_section_for_multiple_subscriptions() {
        let html = HtmlRenderer::new("$")
            .unwrap()
            .render_report(
                &report(vec![subscription("Production"), subscription("Staging")]),
                "Azure Cost Report",
            )
            .unwrap();
        assert!(html.contains("All subscriptions"));
        assert!(html.contains("$2,850.40"));
    }

    #[test]
    fn shares_of_totals_for_multiple_subscriptions() {
        let mut staging = subscription("Staging");
        staging.mtd = CostFigure::Available(712.6);
        staging.ytd = CostFigure::Unavailable;
        let html = HtmlRenderer::new("$")
            .unwrap()
            .render_report(
                &report(vec![subscription("Production"), staging]),
                "Azure Cost Report",
            )
            .unwrap();
        assert!(html.contains("(66.7%)"));
        assert!(html.contains("(33.3%)"));
        // Equal forecasts split evenly.
        assert!(html.contains("(50.0%)"));
        assert!(html.contains("Cost distribution"));
        assert!(html.contains("width: 66.7%"));
        // Staging has no YTD, so Production holds all of it.
        assert!(html.contains("(100.0%)"));
    }

    #[test]
    fn single_subscription_has_no_shares() {
        let html = HtmlRenderer::new("$")
            .unwrap()
            .render_report(&report(vec![subscription("Production")]), "Azure Cost Report")
            .unwrap();
        assert!(!html.contains("%)"));
        assert!(!html.contains("Cost distribution"));
    }

    #[test]
    fn zero_totals_give_zero_shares() {
        let mut a = subscription("Production");
        let mut b = subscription("Staging");
        for sub in [&mut a, &mut b] {
            sub.mtd = CostFigure::Available(0.0);
        }
        let html = HtmlRenderer::new("$")
            .unwrap()
            .render_report(&report(vec![a, b]), "Azure Cost Report")
            .unwrap();
        assert!(html.contains("(0.0%)"));
        assert!(!html.contains("NaN"));
    }

    #[test]
    fn names_are_escaped() {
        let html = HtmlRenderer::new("$")
            .unwrap()
            .render_report(&report(vec![subscription("R&D <lab>")]), "Azure Cost Report")
            .unwrap();
        assert!(html.contains("R&amp;D &lt;lab&gt;"));
    }

    #[test]
    fn degraded_subscription_shows_error() {
        let mut sub = subscription("Production");
        sub.error = Some("HTTP 500: boom".into());
        let html = HtmlRenderer::new("$")
            .unwrap()
            .render_report(&report(vec![sub]), "Azure Cost Report")
            .unwrap();
        assert!(html.contains("Report incomplete: HTTP 500: boom"));
    }

    #[test]
    fn error_page_contains_message() {
        let html = HtmlRenderer::new("$")
            .unwrap()
            .render_error("Azure Cost Report", "Authentication failed: HTTP 401", d(2024, 3, 20))
            .unwrap();
        assert!(html.contains("Authentication failed: HTTP 401"));
        assert!(html.contains("March 20, 2024"));
    }
}
