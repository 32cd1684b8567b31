use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::error::{BillingError, BillingResult};
use crate::core::formatter::format_date;
use crate::core::models::cost::{CostMode, CostQuery, CostResponse, Granularity};
use crate::core::retry::{parse_retry_after, RetryPolicy, Sleeper, TokioSleeper};

const COST_API_VERSION: &str = "2021-10-01";
const SUBSCRIPTION_API_VERSION: &str = "2020-01-01";
const BILLING_PERIOD_API_VERSION: &str = "2018-03-01-preview";
/// Upper bound on `nextLink` pages followed for one query.
const MAX_PAGES: usize = 50;

#[derive(Deserialize)]
struct QueryResult {
    #[serde(default)]
    properties: CostResponse,
}

#[derive(Deserialize)]
struct SubscriptionResponse {
    #[serde(rename = "displayName")]
    display_name: Option<String>,
}

#[derive(Deserialize)]
struct BillingPeriodProperties {
    #[serde(rename = "billingPeriodStartDate")]
    billing_period_start_date: Option<String>,
}

#[derive(Deserialize)]
struct BillingPeriod {
    properties: Option<BillingPeriodProperties>,
}

#[derive(Deserialize)]
struct BillingPeriodList {
    #[serde(default)]
    value: Vec<BillingPeriod>,
}

/// Request body of a cost or forecast query.
pub fn query_body(query: &CostQuery) -> Value {
    let granularity = match query.granularity {
        Granularity::Daily => "Daily",
        Granularity::Monthly => "Monthly",
    };
    let mut body = json!({
        "type": "ActualCost",
        "timeframe": "Custom",
        "timePeriod": {
            "from": format_date(query.start_date),
            "to": format_date(query.end_date),
        },
        "dataset": {
            "granularity": granularity,
            "aggregation": {
                "totalCost": { "name": "Cost", "function": "Sum" }
            },
        },
    });

    match query.mode {
        CostMode::Actual => {
            body["dataset"]["grouping"] = json!([{ "type": "Dimension", "name": "ServiceName" }]);
        }
        CostMode::Forecast => {
            // Forecast totals then already include spend incurred so far.
            body["includeActualCost"] = json!(true);
            body["includeFreshPartialCost"] = json!(true);
        }
    }
    body
}

/// Client for the cost management, subscription and billing period
/// endpoints of the management API.
pub struct BillingClient {
    http: reqwest::Client,
    management_url: String,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl BillingClient {
    pub fn new(management_url: &str, timeout: Duration, retry: RetryPolicy) -> BillingResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            management_url: management_url.trim_end_matches('/').to_string(),
            retry,
            sleeper: Arc::new(TokioSleeper),
        })
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Run a cost or forecast query, retrying rate limits and transient
    /// failures per the client's policy. Paged results are followed through
    /// `nextLink` and merged into one response.
    pub async fn fetch_cost(&self, token: &str, query: &CostQuery) -> BillingResult<CostResponse> {
        let mut url = format!(
            "{}/subscriptions/{}/providers/Microsoft.CostManagement/{}?api-version={}",
            self.management_url,
            query.subscription_id,
            query.mode.endpoint(),
            COST_API_VERSION
        );
        let body = query_body(query);

        tracing::debug!(
            subscription = %query.subscription_id,
            mode = ?query.mode,
            from = %query.start_date,
            to = %query.end_date,
            "Querying cost"
        );

        let mut merged = CostResponse::default();
        for page in 1..=MAX_PAGES {
            let response = self
                .execute(&query.subscription_id, || {
                    self.http.post(&url).bearer_auth(token).json(&body)
                })
                .await?;
            let result: QueryResult = response.json().await?;
            let CostResponse {
                rows,
                columns,
                next_link,
            } = result.properties;

            if merged.columns.is_empty() {
                merged.columns = columns;
            }
            merged.rows.extend(rows);

            match next_link.filter(|link| !link.is_empty()) {
                Some(link) => {
                    tracing::debug!(subscription = %query.subscription_id, page, "Following next page");
                    url = self.resolve_link(&link);
                }
                None => return Ok(merged),
            }
        }

        Err(BillingError::TooManyPages { pages: MAX_PAGES })
    }

    /// `nextLink` is normally absolute; a bare path is joined to the
    /// management endpoint.
    fn resolve_link(&self, link: &str) -> String {
        if link.starts_with("http://") || link.starts_with("https://") {
            link.to_string()
        } else {
            format!("{}/{}", self.management_url, link.trim_start_matches('/'))
        }
    }

    /// Display name of a subscription, when the API reports one.
    pub async fn subscription_name(
        &self,
        token: &str,
        subscription_id: &str,
    ) -> BillingResult<Option<String>> {
        let url = format!(
            "{}/subscriptions/{}?api-version={}",
            self.management_url, subscription_id, SUBSCRIPTION_API_VERSION
        );
        let response = self
            .execute(subscription_id, || self.http.get(&url).bearer_auth(token))
            .await?;
        let data: SubscriptionResponse = response.json().await?;
        Ok(data.display_name.filter(|n| !n.is_empty()))
    }

    /// Start date of the most recent billing period, e.g. `2024-03-15`.
    pub async fn billing_period_start(
        &self,
        token: &str,
        subscription_id: &str,
    ) -> BillingResult<Option<String>> {
        let url = format!(
            "{}/subscriptions/{}/providers/Microsoft.Billing/billingPeriods?api-version={}",
            self.management_url, subscription_id, BILLING_PERIOD_API_VERSION
        );
        let response = self
            .execute(subscription_id, || self.http.get(&url).bearer_auth(token))
            .await?;
        let data: BillingPeriodList = response.json().await?;
        Ok(data
            .value
            .into_iter()
            .next()
            .and_then(|p| p.properties)
            .and_then(|p| p.billing_period_start_date))
    }

    async fn execute<F>(&self, subscription_id: &str, build: F) -> BillingResult<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let max_attempts = self.retry.max_attempts;
        let mut failures = 0u32;
        let mut attempt = 0u32;

        loop {
            let last_attempt = attempt + 1 >= max_attempts;

            let error = match build().send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) if resp.status() == StatusCode::TOO_MANY_REQUESTS => {
                    if last_attempt {
                        tracing::error!(
                            subscription = %subscription_id,
                            attempts = attempt + 1,
                            "Rate limit retries exhausted"
                        );
                        return Err(BillingError::RateLimitExceeded {
                            attempts: attempt + 1,
                        });
                    }
                    let delay = self
                        .retry
                        .rate_limit_delay(attempt, parse_retry_after(resp.headers()));
                    tracing::warn!(
                        subscription = %subscription_id,
                        attempt = attempt + 1,
                        max_attempts,
                        delay_secs = delay.as_secs_f64(),
                        "Rate limited, retrying"
                    );
                    self.sleeper.sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let body = resp.text().await.unwrap_or_default();
                    BillingError::Api { status, body }
                }
                Err(e) => BillingError::Transport(e),
            };

            failures += 1;
            if last_attempt || failures >= self.retry.max_error_attempts {
                return Err(error);
            }
            let delay = self.retry.backoff(attempt);
            tracing::warn!(
                subscription = %subscription_id,
                attempt = attempt + 1,
                delay_secs = delay.as_secs_f64(),
                error = %error,
                "Request failed, retrying"
            );
            self.sleeper.sleep(delay).await;
            attempt += 1;
        }
    }
}
