use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostMode {
    Actual,
    Forecast,
}

impl CostMode {
    /// Path segment of the cost management endpoint.
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::Actual => "query",
            Self::Forecast => "forecast",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Granularity {
    Daily,
    Monthly,
}

/// One cost API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CostQuery {
    pub subscription_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub mode: CostMode,
    pub granularity: Granularity,
}

impl CostQuery {
    pub fn actual(subscription_id: &str, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            subscription_id: subscription_id.to_string(),
            start_date,
            end_date,
            mode: CostMode::Actual,
            granularity: Granularity::Daily,
        }
    }

    pub fn forecast(subscription_id: &str, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            mode: CostMode::Forecast,
            ..Self::actual(subscription_id, start_date, end_date)
        }
    }

    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostColumn {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub column_type: String,
}

/// Row payload of a cost query: `[[cost, date, service, currency], ...]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostResponse {
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
    #[serde(default)]
    pub columns: Vec<CostColumn>,
    /// URL of the next page of rows, when the result is paged.
    #[serde(rename = "nextLink", default, skip_serializing_if = "Option::is_none")]
    pub next_link: Option<String>,
}

/// A typed view over one raw row.
#[derive(Debug, Clone, PartialEq)]
pub struct CostRow {
    pub cost: Option<f64>,
    pub date: String,
    pub service_name: String,
    pub currency: String,
}

/// Numeric value of a cost cell. Only JSON numbers count; strings, nulls
/// and nested values are `None`.
pub fn numeric_cost(value: &Value) -> Option<f64> {
    value.as_f64().filter(|v| v.is_finite())
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl CostRow {
    /// `None` for rows with fewer than four fields.
    pub fn from_raw(raw: &[Value]) -> Option<Self> {
        if raw.len() < 4 {
            return None;
        }
        Some(Self {
            cost: numeric_cost(&raw[0]),
            date: cell_text(&raw[1]),
            service_name: cell_text(&raw[2]),
            currency: cell_text(&raw[3]),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakdownEntry {
    pub service_name: String,
    pub cost: f64,
    pub formatted_cost: String,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateResult {
    pub total_cost: f64,
    pub breakdown: Vec<BreakdownEntry>,
}

/// Outcome of a single cost figure. A failed fetch is `Unavailable`, never
/// a silent zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", content = "amount", rename_all = "snake_case")]
pub enum CostFigure {
    Available(f64),
    Unavailable,
}

impl CostFigure {
    pub fn amount(&self) -> Option<f64> {
        match self {
            Self::Available(v) => Some(*v),
            Self::Unavailable => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserialize_cost_response() {
        let json = r#"{
            "columns": [
                { "name": "Cost", "type": "Number" },
                { "name": "UsageDate", "type": "Number" },
                { "name": "ServiceName", "type": "String" },
                { "name": "Currency", "type": "String" }
            ],
            "rows": [
                [12.5, 20240308, "Storage", "CAD"],
                [3.25, 20240308, "Bandwidth", "CAD"]
            ]
        }"#;
        let resp: CostResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.rows.len(), 2);
        assert_eq!(resp.columns[2].name, "ServiceName");
    }

    #[test]
    fn deserialize_empty_response() {
        let resp: CostResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.rows.is_empty());
        assert!(resp.next_link.is_none());
    }

    #[test]
    fn deserialize_next_link() {
        let json = r#"{ "rows": [], "nextLink": "https://management.azure.com/x?$skiptoken=abc" }"#;
        let resp: CostResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            resp.next_link.as_deref(),
            Some("https://management.azure.com/x?$skiptoken=abc")
        );
    }

    #[test]
    fn cost_row_from_raw() {
        let raw = vec![json!(12.5), json!(20240308), json!("Storage"), json!("CAD")];
        let row = CostRow::from_raw(&raw).unwrap();
        assert_eq!(row.cost, Some(12.5));
        assert_eq!(row.date, "20240308");
        assert_eq!(row.service_name, "Storage");
        assert_eq!(row.currency, "CAD");
    }

    #[test]
    fn cost_row_short_row_is_none() {
        let raw = vec![json!(12.5), json!(20240308), json!("Storage")];
        assert!(CostRow::from_raw(&raw).is_none());
    }

    #[test]
    fn numeric_cost_variants() {
        assert_eq!(numeric_cost(&json!(3)), Some(3.0));
        assert_eq!(numeric_cost(&json!(-2.25)), Some(-2.25));
        assert_eq!(numeric_cost(&json!("4.5")), None);
        assert_eq!(numeric_cost(&json!("x")), None);
        assert_eq!(numeric_cost(&json!(null)), None);
        assert_eq!(numeric_cost(&json!([1])), None);
    }

    #[test]
    fn forecast_query_keeps_dates() {
        let start = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 4, 14).unwrap();
        let q = CostQuery::forecast("sub", start, end);
        assert_eq!(q.mode, CostMode::Forecast);
        assert_eq!(q.mode.endpoint(), "forecast");
        assert_eq!(q.granularity, Granularity::Daily);
        assert_eq!(q.start_date, start);
        let q = q.with_granularity(Granularity::Monthly);
        assert_eq!(q.granularity, Granularity::Monthly);
    }

    #[test]
    fn cost_figure_serializes_with_status() {
        let v = serde_json::to_value(CostFigure::Available(1.5)).unwrap();
        assert_eq!(v["status"], "available");
        assert_eq!(v["amount"], 1.5);
        let v = serde_json::to_value(CostFigure::Unavailable).unwrap();
        assert_eq!(v["status"], "unavailable");
    }
}
