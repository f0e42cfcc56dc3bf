//! INSERT SQL generation.
//!
//! Rows are never inlined: the statement carries one placeholder per column
//! and every row becomes one entry of bindings.

use crate::ast::*;
use crate::error::{CqnError, CqnResult};
use crate::transpiler::Binding;
use crate::transpiler::conditions::SqlContext;
use crate::transpiler::traits::UpsertStyle;

use super::select::build_select;
use super::upsert::build_on_conflict;

/// Generate INSERT (or UPSERT) SQL together with the per-row bindings.
pub fn build_insert(
    ctx: &mut SqlContext,
    insert: &Insert,
    upsert: bool,
) -> CqnResult<(String, Vec<Vec<Binding>>)> {
    if insert.rows.is_empty() && insert.source.is_none() {
        return Err(CqnError::InvalidQuery("INSERT without data".into()));
    }
    let style = ctx.generator.upsert_style();
    let hana_upsert = upsert && style == UpsertStyle::WithPrimaryKey;

    let mut sql = String::from(if hana_upsert { "UPSERT " } else { "INSERT INTO " });
    sql.push_str(&table(ctx, &insert.into));

    if !insert.columns.is_empty() {
        let cols: Vec<String> = insert
            .columns
            .iter()
            .map(|c| ctx.generator.quote_identifier(c))
            .collect();
        sql.push_str(" (");
        sql.push_str(&cols.join(", "));
        sql.push(')');
    }

    let mut entries = Vec::new();
    if let Some(source) = &insert.source {
        sql.push(' ');
        sql.push_str(&build_select(ctx, source)?);
    } else {
        let placeholders: Vec<String> = (0..insert.columns.len())
            .map(|i| {
                let ty = insert
                    .elements
                    .get(i)
                    .and_then(|e| e.as_ref())
                    .map(|e| e.type_name().to_string());
                let placeholder = ctx.generator.placeholder(i + 1);
                match ty {
                    Some(ty) => ctx.converters.input(&ty, &placeholder),
                    None => placeholder,
                }
            })
            .collect();
        sql.push_str(" VALUES (");
        sql.push_str(&placeholders.join(", "));
        sql.push(')');

        for row in &insert.rows {
            let mut bindings = Vec::with_capacity(row.len());
            for expr in row {
                bindings.push(row_binding(ctx, expr)?);
            }
            entries.push(bindings);
        }
    }

    if upsert {
        if insert.keys.is_empty() {
            return Err(CqnError::unsupported("UPSERT into an entity without primary key"));
        }
        if hana_upsert {
            sql.push_str(" WITH PRIMARY KEY");
        } else {
            sql.push_str(&build_on_conflict(ctx, insert));
        }
    }

    Ok((sql, entries))
}

/// Binding of one row value; only values, variables and parameters qualify.
fn row_binding(ctx: &mut SqlContext, expr: &Expr) -> CqnResult<Binding> {
    match expr {
        Expr::Val(value @ (Value::Array(_) | Value::Object(_))) => {
            Ok(Binding::Value(Value::String(serde_json::to_string(&value.to_json())?)))
        }
        Expr::Val(value) => Ok(Binding::Value(value.clone())),
        Expr::Param(Param::Positional) => Ok(ctx.params.next_positional()),
        Expr::Param(Param::Named(name)) => Ok(Binding::Named(name.clone())),
        Expr::Ref(r) => match r.links.as_ref().and_then(|l| l.first()).map(|l| &l.definition) {
            Some(Definition::Variable(name)) => Ok(Binding::Variable(name.clone())),
            _ if r.is_variable() => Ok(Binding::Variable(r.path())),
            _ => Err(CqnError::unsupported(format!(
                "column reference '{}' as an INSERT value",
                r.path()
            ))),
        },
        other => Err(CqnError::unsupported(format!(
            "expression {:?} as an INSERT value",
            other
        ))),
    }
}

pub(crate) fn table(ctx: &SqlContext, target: &Ref) -> String {
    let name = target
        .segments
        .iter()
        .map(Segment::id)
        .collect::<Vec<_>>()
        .join(".");
    ctx.generator.quote_identifier(&name)
}
