//! One report run: token, then every subscription's figures.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::core::aggregate::{aggregate, detect_currency, total_cost};
use crate::core::api::BillingClient;
use crate::core::auth::TokenManager;
use crate::core::config::SubscriptionConfig;
use crate::core::error::{BillingError, BillingResult};
use crate::core::models::cost::{BreakdownEntry, CostFigure, CostQuery, CostResponse, Granularity};
use crate::core::window::{
    compute_window, linear_year_forecast, start_day_from_period, BillingWindow, DAILY_LAG_DAYS,
};

/// Billing start day used when neither config nor the billing API gives one.
const DEFAULT_BILLING_START_DAY: u32 = 1;

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionReport {
    pub subscription_id: String,
    pub name: String,
    pub window: Option<BillingWindow>,
    pub daily: CostFigure,
    pub mtd: CostFigure,
    pub ytd: CostFigure,
    pub month_forecast: CostFigure,
    pub year_forecast: CostFigure,
    /// The year forecast was extrapolated from YTD spend.
    pub year_forecast_estimated: bool,
    pub daily_breakdown: Vec<BreakdownEntry>,
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubscriptionReport {
    fn failed(subscription_id: &str, name: String, window: Option<BillingWindow>, error: String) -> Self {
        Self {
            subscription_id: subscription_id.to_string(),
            name,
            window,
            daily: CostFigure::Unavailable,
            mtd: CostFigure::Unavailable,
            ytd: CostFigure::Unavailable,
            month_forecast: CostFigure::Unavailable,
            year_forecast: CostFigure::Unavailable,
            year_forecast_estimated: false,
            daily_breakdown: Vec::new(),
            currency: None,
            error: Some(error),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }

    fn figures(&self) -> [CostFigure; 5] {
        [
            self.daily,
            self.mtd,
            self.ytd,
            self.month_forecast,
            self.year_forecast,
        ]
    }

    pub fn has_unavailable(&self) -> bool {
        self.figures().iter().any(|f| !f.is_available())
    }

    pub fn shares(&self, totals: &ReportTotals) -> CostShares {
        CostShares {
            mtd: share_percent(self.mtd, totals.mtd),
            ytd: share_percent(self.ytd, totals.ytd),
            month_forecast: share_percent(self.month_forecast, totals.month_forecast),
            year_forecast: share_percent(self.year_forecast, totals.year_forecast),
        }
    }
}

/// Sums of the available figures across subscriptions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ReportTotals {
    pub daily: f64,
    pub mtd: f64,
    pub ytd: f64,
    pub month_forecast: f64,
    pub year_forecast: f64,
}

/// A subscription's percentage of each summed figure. `None` where its own
/// figure is unavailable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CostShares {
    pub mtd: Option<f64>,
    pub ytd: Option<f64>,
    pub month_forecast: Option<f64>,
    pub year_forecast: Option<f64>,
}

/// Percentage of `total` that `figure` makes up. A total of zero or less
/// gives 0.
pub fn share_percent(figure: CostFigure, total: f64) -> Option<f64> {
    figure
        .amount()
        .map(|value| if total > 0.0 { value / total * 100.0 } else { 0.0 })
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub generated_on: NaiveDate,
    pub daily_date: NaiveDate,
    pub subscriptions: Vec<SubscriptionReport>,
}

impl RunReport {
    pub fn totals(&self) -> ReportTotals {
        let sum = |f: fn(&SubscriptionReport) -> CostFigure| -> f64 {
            self.subscriptions
                .iter()
                .filter_map(|s| f(s).amount())
                .sum()
        };
        ReportTotals {
            daily: sum(|s| s.daily),
            mtd: sum(|s| s.mtd),
            ytd: sum(|s| s.ytd),
            month_forecast: sum(|s| s.month_forecast),
            year_forecast: sum(|s| s.year_forecast),
        }
    }

    pub fn degraded_count(&self) -> usize {
        self.subscriptions.iter().filter(|s| s.is_degraded()).count()
    }
}

/// Pick the configured start day, else the day the latest billing period
/// began, else the 1st. Lookup failures are logged and fall through.
pub async fn resolve_billing_start_day(
    client: &BillingClient,
    token: &str,
    subscription: &SubscriptionConfig,
) -> u32 {
    if let Some(day) = subscription.billing_start_day {
        return day;
    }
    match client.billing_period_start(token, &subscription.id).await {
        Ok(Some(date)) => start_day_from_period(&date).unwrap_or_else(|| {
            tracing::warn!(subscription = %subscription.id, date = %date, "Unparseable billing period start");
            DEFAULT_BILLING_START_DAY
        }),
        Ok(None) => DEFAULT_BILLING_START_DAY,
        Err(e) => {
            tracing::warn!(subscription = %subscription.id, error = %e, "Billing period lookup failed");
            DEFAULT_BILLING_START_DAY
        }
    }
}

fn figure(subscription_id: &str, label: &str, result: &BillingResult<CostResponse>) -> CostFigure {
    match result {
        Ok(resp) => CostFigure::Available(total_cost(&resp.rows)),
        Err(e) => {
            tracing::error!(subscription = %subscription_id, query = label, error = %e, "Cost query failed");
            CostFigure::Unavailable
        }
    }
}

pub struct ReportRunner {
    tokens: Arc<TokenManager>,
    client: Arc<BillingClient>,
    subscriptions: Vec<SubscriptionConfig>,
    concurrency: usize,
    currency_symbol: String,
}

impl ReportRunner {
    pub fn new(
        tokens: Arc<TokenManager>,
        client: Arc<BillingClient>,
        subscriptions: Vec<SubscriptionConfig>,
        concurrency: usize,
        currency_symbol: &str,
    ) -> Self {
        Self {
            tokens,
            client,
            subscriptions,
            concurrency: concurrency.max(1),
            currency_symbol: currency_symbol.to_string(),
        }
    }

    /// Fetch every subscription's figures. Only a token failure aborts the
    /// run; anything else degrades the affected subscription.
    pub async fn run(&self, now: DateTime<Utc>) -> BillingResult<RunReport> {
        let token = self.tokens.get_token().await?;
        let token = token.as_str();

        tracing::info!(
            subscriptions = self.subscriptions.len(),
            concurrency = self.concurrency,
            "Starting cost report"
        );

        let subscriptions: Vec<SubscriptionReport> = stream::iter(self.subscriptions.iter())
            .map(move |sub| self.process(token, sub, now))
            .buffered(self.concurrency)
            .collect()
            .await;

        let today = now.date_naive();
        Ok(RunReport {
            generated_on: today,
            daily_date: today - chrono::Duration::days(DAILY_LAG_DAYS),
            subscriptions,
        })
    }

    async fn process(
        &self,
        token: &str,
        sub: &SubscriptionConfig,
        now: DateTime<Utc>,
    ) -> SubscriptionReport {
        let (name, start_day) = tokio::join!(
            self.display_name(token, &sub.id),
            resolve_billing_start_day(&self.client, token, sub)
        );
        let window = compute_window(start_day, now);
        tracing::debug!(
            subscription = %sub.id,
            month_start = %window.month_start,
            month_end = %window.month_end,
            year_start = %window.year_start,
            "Billing window"
        );

        let id = sub.id.as_str();
        let daily_q = CostQuery::actual(id, window.yesterday, window.yesterday);
        let mtd_q = CostQuery::actual(id, window.month_start, window.today);
        let ytd_q = CostQuery::actual(id, window.year_start, window.today)
            .with_granularity(Granularity::Monthly);
        let month_fc_q = CostQuery::forecast(id, window.month_start, window.month_end);
        let year_fc_q = CostQuery::forecast(id, window.year_start, window.year_end)
            .with_granularity(Granularity::Monthly);

        let (daily, mtd, ytd, month_fc, year_fc) = tokio::join!(
            self.client.fetch_cost(token, &daily_q),
            self.client.fetch_cost(token, &mtd_q),
            self.client.fetch_cost(token, &ytd_q),
            self.client.fetch_cost(token, &month_fc_q),
            self.client.fetch_cost(token, &year_fc_q),
        );

        let results = [&daily, &mtd, &ytd, &month_fc, &year_fc];
        if results.iter().all(|r| r.is_err()) {
            let error = first_error(&results);
            tracing::error!(subscription = %id, error = %error, "All cost queries failed");
            return SubscriptionReport::failed(id, name, Some(window), error);
        }

        let ytd_figure = figure(id, "ytd", &ytd);
        let mut year_forecast = figure(id, "year_forecast", &year_fc);
        let mut year_forecast_estimated = false;
        if let (CostFigure::Unavailable, Some(spent)) = (year_forecast, ytd_figure.amount()) {
            year_forecast = CostFigure::Available(linear_year_forecast(spent, &window));
            year_forecast_estimated = true;
            tracing::info!(subscription = %id, "Year forecast extrapolated from YTD");
        }

        let (daily_breakdown, currency) = match &daily {
            Ok(resp) => (
                aggregate(&resp.rows, &self.currency_symbol).breakdown,
                detect_currency(&resp.rows),
            ),
            Err(_) => (Vec::new(), None),
        };

        SubscriptionReport {
            subscription_id: id.to_string(),
            name,
            window: Some(window),
            daily: figure(id, "daily", &daily),
            mtd: figure(id, "mtd", &mtd),
            ytd: ytd_figure,
            month_forecast: figure(id, "month_forecast", &month_fc),
            year_forecast,
            year_forecast_estimated,
            daily_breakdown,
            currency,
            error: None,
        }
    }

    /// Display name, or the id when the lookup fails or returns nothing.
    async fn display_name(&self, token: &str, subscription_id: &str) -> String {
        match self.client.subscription_name(token, subscription_id).await {
            Ok(Some(name)) => name,
            Ok(None) => subscription_id.to_string(),
            Err(e) => {
                tracing::warn!(subscription = %subscription_id, error = %e, "Subscription name lookup failed");
                subscription_id.to_string()
            }
        }
    }
}

fn first_error(results: &[&BillingResult<CostResponse>]) -> String {
    results
        .iter()
        .find_map(|r| r.as_ref().err())
        .map(BillingError::to_string)
        .unwrap_or_default()
}
