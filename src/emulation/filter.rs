use serde_json::Value as Json;

use crate::driver::Row;

/// SQL truthiness of a predicate column: booleans, non-zero numbers, and the
/// textual forms some drivers return.
pub(crate) fn is_truthy(value: Option<&Json>) -> bool {
    match value {
        Some(Json::Bool(b)) => *b,
        Some(Json::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(Json::String(s)) => matches!(s.as_str(), "1" | "true" | "TRUE"),
        _ => false,
    }
}

/// Keep rows whose predicate column is true; NULL counts as false.
pub(crate) fn keep_truthy(rows: Vec<Row>, column: &str) -> Vec<Row> {
    rows.into_iter().filter(|row| is_truthy(row.get(column))).collect()
}
