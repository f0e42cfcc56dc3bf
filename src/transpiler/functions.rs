//! Portable function names mapped to dialect SQL.

use crate::ast::*;
use crate::error::{CqnError, CqnResult};

use super::conditions::SqlContext;
use super::dialect::Dialect;
use super::traits::string_literal;

pub(crate) fn render_function(ctx: &mut SqlContext, func: &Func) -> CqnResult<String> {
    let name = func.name.to_ascii_lowercase();
    if name == "search" {
        return search(ctx, func);
    }

    let mut args = Vec::with_capacity(func.args.len());
    for arg in &func.args {
        args.push(ctx.expr(arg)?);
    }
    let star = args.is_empty() || (args.len() == 1 && func.args[0].is_keyword("*"));

    Ok(match name.as_str() {
        "count" if star => "count(*)".into(),
        "countdistinct" if star => "count(*)".into(),
        "countdistinct" => format!("count(DISTINCT {})", args.join(", ")),
        "average" => format!("avg({})", args.join(", ")),
        "tolower" => format!("lower({})", args.join(", ")),
        "toupper" => format!("upper({})", args.join(", ")),
        "substring" => substring(ctx, &func.args, &args)?,
        "concat" => {
            let parts: Vec<&str> = args.iter().map(String::as_str).collect();
            ctx.generator.string_concat(&parts)
        }
        _ => match ctx.generator.function(&name, &args) {
            Some(sql) => sql,
            None => format!("{}({})", func.name, args.join(", ")),
        },
    })
}

/// `substring(x, start[, length])` with a zero-based start.
fn substring(ctx: &SqlContext, raw: &[Expr], args: &[String]) -> CqnResult<String> {
    if args.len() < 2 || args.len() > 3 {
        return Err(CqnError::InvalidQuery("substring takes two or three arguments".into()));
    }
    let start = match &raw[1] {
        Expr::Val(Value::Int(n)) => (n + 1).to_string(),
        _ => format!("{} + 1", args[1]),
    };
    let name = match ctx.dialect {
        Dialect::Hana => "substring",
        _ => "substr",
    };
    Ok(match args.get(2) {
        Some(length) => format!("{}({}, {}, {})", name, args[0], start, length),
        None => format!("{}({}, {})", name, args[0], start),
    })
}

/// `search(columns, term)`: case-insensitive containment over any column.
fn search(ctx: &mut SqlContext, func: &Func) -> CqnResult<String> {
    let [columns, term] = func.args.as_slice() else {
        return Err(CqnError::InvalidQuery("search takes a column list and a term".into()));
    };
    let columns: Vec<&Expr> = match columns {
        Expr::List(items) => items.iter().collect(),
        single => vec![single],
    };
    if columns.is_empty() {
        return Ok(ctx.generator.bool_literal(false));
    }

    if ctx.dialect == Dialect::Hana {
        let Expr::Val(Value::String(term)) = term else {
            return Err(CqnError::unsupported("search on HANA needs a literal search term"));
        };
        let mut rendered = Vec::with_capacity(columns.len());
        for column in columns {
            rendered.push(ctx.expr(column)?);
        }
        return Ok(format!("CONTAINS(({}), {})", rendered.join(", "), string_literal(term)));
    }

    let mut parts = Vec::with_capacity(columns.len());
    for column in columns {
        let column = format!("lower({})", ctx.expr(column)?);
        let term = format!("lower({})", ctx.expr(term)?);
        let contains = ctx
            .generator
            .function("contains", &[column.clone(), term.clone()])
            .unwrap_or_else(|| format!("{} LIKE '%' || {} || '%'", column, term));
        parts.push(contains);
    }
    Ok(format!("({})", parts.join(" OR ")))
}
