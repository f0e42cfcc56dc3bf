use super::conditions::SqlContext;
use super::traits::{SqlGenerator, string_literal};
use crate::ast::*;
use crate::error::{CqnError, CqnResult};

/// Generate CREATE TABLE SQL.
pub fn build_create_table(ctx: &SqlContext, create: &CreateTable) -> CqnResult<String> {
    let table = create
        .table
        .as_ref()
        .ok_or_else(|| CqnError::InvalidQuery(format!("CREATE of '{}' is not flattened", create.entity)))?;
    let generator = ctx.generator.as_ref();

    let mut defs = Vec::with_capacity(table.columns.len() + 1);
    for col in &table.columns {
        let mut line = format!(
            "{} {}",
            generator.quote_identifier(&col.name),
            generator.column_type(&col.element)
        );
        if col.not_null {
            line.push_str(" NOT NULL");
        }
        if let Some(default) = col.element.default.as_ref().and_then(|v| default_literal(generator, v)) {
            line.push_str(" DEFAULT ");
            line.push_str(&default);
        }
        defs.push(line);
    }

    let keys: Vec<String> = table
        .columns
        .iter()
        .filter(|c| c.key)
        .map(|c| generator.quote_identifier(&c.name))
        .collect();
    if !keys.is_empty() {
        defs.push(format!("PRIMARY KEY({})", keys.join(", ")));
    }

    Ok(format!(
        "CREATE TABLE {} ({})",
        generator.quote_identifier(&table.name),
        defs.join(", ")
    ))
}

/// Generate DROP TABLE SQL.
pub fn build_drop_table(ctx: &SqlContext, drop: &DropTable) -> CqnResult<String> {
    let table = drop
        .table
        .as_deref()
        .ok_or_else(|| CqnError::InvalidQuery(format!("DROP of '{}' is not flattened", drop.entity)))?;
    Ok(ctx.generator.drop_table(table))
}

fn default_literal(generator: &dyn SqlGenerator, value: &Value) -> Option<String> {
    match value {
        Value::Bool(b) => Some(generator.bool_literal(*b)),
        Value::Int(n) => Some(n.to_string()),
        Value::Float(f) => Some(f.to_string()),
        Value::String(s) => Some(string_literal(s)),
        _ => None,
    }
}
