//! `WITH` clauses.

use crate::ast::With;
use crate::error::CqnResult;
use crate::transpiler::conditions::SqlContext;

use super::select::build_select;

/// `WITH a AS (...), b AS (...) ` or an empty string.
pub fn build_with(ctx: &mut SqlContext, with: &[With]) -> CqnResult<String> {
    if with.is_empty() {
        return Ok(String::new());
    }
    let mut clauses = Vec::with_capacity(with.len());
    for w in with {
        let body = build_select(ctx, &w.query)?;
        clauses.push(format!("{} AS ({})", ctx.generator.quote_identifier(&w.alias), body));
    }
    Ok(format!("WITH {} ", clauses.join(", ")))
}

/// Merge the `WITH` clauses of several selects; the first one registered
/// under an alias wins.
pub fn hoist(selects: &[crate::ast::Select]) -> Vec<With> {
    let mut merged: Vec<With> = Vec::new();
    for select in selects {
        for w in &select.with {
            if !merged.iter().any(|m| m.alias == w.alias) {
                merged.push(w.clone());
            }
        }
    }
    merged
}
