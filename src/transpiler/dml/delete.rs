//! DELETE SQL generation.

use crate::ast::*;
use crate::error::CqnResult;
use crate::transpiler::conditions::SqlContext;

use super::update::target;

/// Generate DELETE SQL.
pub fn build_delete(ctx: &mut SqlContext, delete: &Delete) -> CqnResult<String> {
    let mut sql = String::from("DELETE FROM ");
    sql.push_str(&target(ctx, &delete.from));
    if !delete.filter.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&ctx.tokens(&delete.filter)?);
    }
    Ok(sql)
}
