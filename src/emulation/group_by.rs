use std::collections::HashSet;

use serde_json::Value as Json;

use crate::driver::Row;

/// Keep the first row of every distinct combination of the group columns,
/// in their original order. Nothing is aggregated.
pub(crate) fn first_per_group(rows: Vec<Row>, columns: &[String]) -> Vec<Row> {
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|row| {
            let key: Vec<Json> = columns
                .iter()
                .map(|c| row.get(c).cloned().unwrap_or(Json::Null))
                .collect();
            seen.insert(Json::Array(key).to_string())
        })
        .collect()
}
