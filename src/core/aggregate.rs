use serde_json::Value;

use crate::core::formatter::format_currency;
use crate::core::models::cost::{numeric_cost, AggregateResult, BreakdownEntry, CostRow};

/// Sum of the numeric cost cell across all rows. Rows whose first cell is
/// missing or not a number contribute nothing.
pub fn total_cost(rows: &[Vec<Value>]) -> f64 {
    rows.iter()
        .filter_map(|row| row.first().and_then(numeric_cost))
        .sum()
}

/// Reduce raw cost rows into a total and a per-service breakdown sorted by
/// cost, highest first. Equal costs keep their original order.
pub fn aggregate(rows: &[Vec<Value>], currency_symbol: &str) -> AggregateResult {
    let mut parsed: Vec<CostRow> = rows.iter().filter_map(|r| CostRow::from_raw(r)).collect();

    parsed.sort_by(|a, b| {
        let a = a.cost.unwrap_or(0.0);
        let b = b.cost.unwrap_or(0.0);
        b.partial_cmp(&a).unwrap_or(std::cmp::Ordering::Equal)
    });

    let breakdown = parsed
        .into_iter()
        .map(|row| {
            let cost = row.cost.unwrap_or(0.0);
            BreakdownEntry {
                service_name: row.service_name,
                cost,
                formatted_cost: format_currency(cost, currency_symbol),
                currency: row.currency,
            }
        })
        .collect();

    AggregateResult {
        total_cost: total_cost(rows),
        breakdown,
    }
}

/// Currency code reported by the rows, if any row carries one.
pub fn detect_currency(rows: &[Vec<Value>]) -> Option<String> {
    rows.iter()
        .filter_map(|r| CostRow::from_raw(r))
        .map(|r| r.currency)
        .find(|c| !c.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(cost: Value, service: &str) -> Vec<Value> {
        vec![cost, json!(20240308), json!(service), json!("CAD")]
    }

    #[test]
    fn aggregate_empty() {
        let result = aggregate(&[], "$");
        assert_eq!(result.total_cost, 0.0);
        assert!(result.breakdown.is_empty());
    }

    #[test]
    fn aggregate_ignores_non_numeric_cost() {
        let result = aggregate(&[row(json!("x"), "svc")], "$");
        assert_eq!(result.total_cost, 0.0);
        assert_eq!(result.breakdown.len(), 1);
        assert_eq!(result.breakdown[0].formatted_cost, "$0.00");
    }

    #[test]
    fn breakdown_sorted_descending() {
        let rows = vec![row(json!(5), "A"), row(json!(10), "B")];
        let result = aggregate(&rows, "$");
        let names: Vec<&str> = result.breakdown.iter().map(|e| e.service_name.as_str()).collect();
        assert_eq!(names, vec!["B", "A"]);
        assert_eq!(result.breakdown[0].cost, 10.0);
        assert_eq!(result.breakdown[1].cost, 5.0);
        assert!((result.total_cost - 15.0).abs() < 1e-10);
    }

    #[test]
    fn breakdown_ties_keep_original_order() {
        let rows = vec![
            row(json!(3), "first"),
            row(json!(7), "big"),
            row(json!(3), "second"),
            row(json!(3), "third"),
        ];
        let result = aggregate(&rows, "$");
        let names: Vec<&str> = result.breakdown.iter().map(|e| e.service_name.as_str()).collect();
        assert_eq!(names, vec!["big", "first", "second", "third"]);
    }

    #[test]
    fn short_rows_count_toward_total_but_not_breakdown() {
        let rows = vec![vec![json!(4.5), json!(20240308)], row(json!(1.5), "Storage")];
        let result = aggregate(&rows, "$");
        assert!((result.total_cost - 6.0).abs() < 1e-10);
        assert_eq!(result.breakdown.len(), 1);
        assert_eq!(result.breakdown[0].service_name, "Storage");
    }

    #[test]
    fn empty_rows_are_skipped() {
        let rows = vec![vec![], row(json!(2), "Storage")];
        assert!((total_cost(&rows) - 2.0).abs() < 1e-10);
    }

    #[test]
    fn formatted_cost_uses_thousands_separator() {
        let result = aggregate(&[row(json!(1425.2), "Compute")], "$");
        assert_eq!(result.breakdown[0].formatted_cost, "$1,425.20");
        assert_eq!(result.breakdown[0].currency, "CAD");
    }

    #[test]
    fn detect_currency_from_rows() {
        assert_eq!(detect_currency(&[row(json!(1), "A")]).as_deref(), Some("CAD"));
        assert_eq!(detect_currency(&[]), None);
    }
}
