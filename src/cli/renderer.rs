use colored::{control, ColoredString, Colorize};

use crate::core::formatter::{format_currency, format_day, format_figure, format_period};
use crate::core::models::cost::CostFigure;
use crate::core::notify::Delivery;
use crate::core::report::{RunReport, SubscriptionReport};

/// Services listed under each subscription before the rest are folded.
const BREAKDOWN_LIMIT: usize = 5;

fn figure_cell(figure: CostFigure, symbol: &str) -> ColoredString {
    let text = format_figure(figure, symbol);
    match figure {
        CostFigure::Available(_) => text.normal(),
        CostFigure::Unavailable => text.red(),
    }
}

/// Render one subscription block.
///
/// Layout:
/// ```text
///  Production (sub-id)
///   Period    March 15 to April 14
///   Daily     $12.50
///   MTD       $1,425.20
///   Forecast  $3,000.00
///   YTD       $9,876.00
///   Year      $40,000.00
///   Top services
///     Virtual Machines  $10.00 CAD
/// ```
pub fn render_subscription(sub: &SubscriptionReport, symbol: &str, use_color: bool) -> String {
    control::set_override(use_color);

    let mut lines: Vec<String> = Vec::new();
    lines.push(format!(" {} ({})", sub.name.bold(), sub.subscription_id.dimmed()));

    if let Some(window) = &sub.window {
        lines.push(format!(
            "  {}    {}",
            "Period".cyan(),
            format_period(window.month_start, window.month_end)
        ));
    }

    let year_label = if sub.year_forecast_estimated {
        "Year*"
    } else {
        "Year"
    };
    let rows = [
        ("Daily", sub.daily),
        ("MTD", sub.mtd),
        ("Forecast", sub.month_forecast),
        ("YTD", sub.ytd),
        (year_label, sub.year_forecast),
    ];
    for (label, figure) in rows {
        lines.push(format!(
            "  {}  {}",
            format!("{:<8}", label).cyan(),
            figure_cell(figure, symbol)
        ));
    }

    if !sub.daily_breakdown.is_empty() {
        lines.push(format!("  {}", "Top services".cyan()));
        for entry in sub.daily_breakdown.iter().take(BREAKDOWN_LIMIT) {
            lines.push(format!(
                "    {}  {} {}",
                entry.service_name, entry.formatted_cost, entry.currency
            ));
        }
        let rest = sub.daily_breakdown.len().saturating_sub(BREAKDOWN_LIMIT);
        if rest > 0 {
            lines.push(format!("    {}", format!("and {} more", rest).dimmed()));
        }
    }

    if let Some(error) = &sub.error {
        lines.push(format!("  {}     {}", "Error".red(), error));
    }

    lines.join("\n")
}

/// Render the whole run: header, one block per subscription, totals.
pub fn render_report(report: &RunReport, symbol: &str, use_color: bool) -> String {
    control::set_override(use_color);

    let mut sections: Vec<String> = Vec::new();
    sections.push(format!(
        " {} (daily figures for {})",
        "Azure cost report".bold(),
        format_day(report.daily_date)
    ));

    for sub in &report.subscriptions {
        sections.push(render_subscription(sub, symbol, use_color));
    }

    if report.subscriptions.len() > 1 {
        let t = report.totals();
        let lines = [
            format!(" {}", "All subscriptions".bold()),
            format!("  {}  {}", format!("{:<8}", "Daily").cyan(), format_currency(t.daily, symbol)),
            format!("  {}  {}", format!("{:<8}", "MTD").cyan(), format_currency(t.mtd, symbol)),
            format!(
                "  {}  {}",
                format!("{:<8}", "Forecast").cyan(),
                format_currency(t.month_forecast, symbol)
            ),
            format!("  {}  {}", format!("{:<8}", "YTD").cyan(), format_currency(t.ytd, symbol)),
            format!(
                "  {}  {}",
                format!("{:<8}", "Year").cyan(),
                format_currency(t.year_forecast, symbol)
            ),
        ];
        sections.push(lines.join("\n"));
    }

    if report.subscriptions.iter().any(|s| s.has_unavailable()) {
        sections.push(format!(
            " {}",
            "n/a: figure could not be retrieved, excluded from totals".dimmed()
        ));
    }

    sections.join("\n\n")
}

/// One line per delivery channel.
pub fn render_deliveries(deliveries: &[Delivery], use_color: bool) -> String {
    control::set_override(use_color);

    deliveries
        .iter()
        .map(|d| {
            let channel = format!("{:?}", d.channel);
            match &d.error {
                None => format!(" {} {}", channel.cyan(), "sent".green()),
                Some(e) => format!(" {} {} {}", channel.cyan(), "failed:".red(), e),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
