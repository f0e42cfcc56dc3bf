//! Renderer test modules.
//!
//! Tests are organized by category:
//! - `core`: SELECT, INSERT, UPDATE, DELETE over the bookshop model
//! - `dialects`: placeholders, converters and functions per dialect
//! - `features`: structured comparisons, expand, UPSERT, DDL and unions

mod core;

use crate::ast::*;
use crate::cqn4sql::cqn4sql;
use crate::error::CqnError;
use crate::model::fixtures::bookshop;
use crate::parser::parse_query;
use crate::transpiler::{Dialect, SqlStatement, ToSql};

pub(super) fn render(query: Query, dialect: Dialect) -> SqlStatement {
    cqn4sql(&query, &bookshop())
        .unwrap()
        .to_sql_with_dialect(dialect)
        .unwrap()
}

pub(super) fn render_text(text: &str, dialect: Dialect) -> SqlStatement {
    render(parse_query(text).unwrap(), dialect)
}

pub(super) fn render_err(query: Query, dialect: Dialect) -> CqnError {
    cqn4sql(&query, &bookshop())
        .and_then(|flat| flat.to_sql_with_dialect(dialect))
        .unwrap_err()
}

pub(super) fn record(json: serde_json::Value) -> Record {
    Value::from_json(&json).as_object().cloned().unwrap()
}
