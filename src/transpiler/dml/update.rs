//! UPDATE SQL generation.

use crate::ast::*;
use crate::error::{CqnError, CqnResult};
use crate::transpiler::conditions::SqlContext;

use super::insert::table;

/// Generate UPDATE SQL.
pub fn build_update(ctx: &mut SqlContext, update: &Update) -> CqnResult<String> {
    if update.with.is_empty() {
        return Err(CqnError::InvalidQuery("UPDATE without data".into()));
    }
    let mut sql = String::from("UPDATE ");
    sql.push_str(&target(ctx, &update.entity));

    let mut sets = Vec::with_capacity(update.with.len());
    for assignment in &update.with {
        let ty = assignment.element.as_ref().map(|e| e.type_name().to_string());
        let value = ctx.expr_typed(&assignment.expr, ty.as_deref())?;
        sets.push(format!("{} = {}", ctx.generator.quote_identifier(&assignment.column), value));
    }
    sql.push_str(" SET ");
    sql.push_str(&sets.join(", "));

    if !update.filter.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&ctx.tokens(&update.filter)?);
    }
    Ok(sql)
}

/// Table with its alias, when the alias differs from the table name.
pub(crate) fn target(ctx: &SqlContext, entity: &Ref) -> String {
    let mut sql = table(ctx, entity);
    let name = entity.first().unwrap_or_default();
    let alias = entity
        .links
        .as_ref()
        .and_then(|l| l.first())
        .and_then(|l| l.alias.as_deref());
    if let Some(alias) = alias.filter(|a| *a != name) {
        sql.push_str(" AS ");
        sql.push_str(&ctx.generator.quote_identifier(alias));
    }
    sql
}
