use serde_json::Value as Json;

use crate::ast::Limit;
use crate::driver::Row;
use crate::error::{CqnError, CqnResult};

/// Apply `offset` then `rows` to a result in memory.
pub(crate) fn slice(rows: Vec<Row>, window: Limit) -> Vec<Row> {
    let skipped = rows.into_iter().skip(window.offset as usize);
    match window.rows {
        Some(n) => skipped.take(n as usize).collect(),
        None => skipped.collect(),
    }
}

/// Total row count derivable from a page alone.
///
/// A page that starts at the beginning and is not full holds every row; a
/// non-empty page that is not full ends the result.
pub(crate) fn short_circuit(window: Option<Limit>, len: u64) -> Option<u64> {
    let Some(window) = window else {
        return Some(len);
    };
    let full = window.rows.is_some_and(|rows| len >= rows);
    if full {
        return None;
    }
    if window.offset == 0 {
        Some(len)
    } else if len > 0 {
        Some(window.offset + len)
    } else {
        None
    }
}

/// Read `$count` from the result of a count query.
pub(crate) fn count_rows(rows: &[Row]) -> CqnResult<u64> {
    let value = rows
        .first()
        .and_then(|row| row.get("$count"))
        .ok_or_else(|| CqnError::Database("count query returned no rows".into()))?;
    match value {
        Json::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().map(|f| f as u64))
            .ok_or_else(|| CqnError::Database(format!("invalid count {}", n))),
        Json::String(s) => s
            .parse()
            .map_err(|_| CqnError::Database(format!("invalid count '{}'", s))),
        other => Err(CqnError::Database(format!("invalid count {}", other))),
    }
}
