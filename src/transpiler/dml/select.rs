//! SELECT SQL generation.

use crate::ast::*;
use crate::error::CqnResult;
use crate::model::Element;
use crate::transpiler::conditions::SqlContext;

use super::cte::build_with;

/// Generate SELECT SQL, `WITH` clauses included.
pub fn build_select(ctx: &mut SqlContext, select: &Select) -> CqnResult<String> {
    let mut sql = build_with(ctx, &select.with)?;
    sql.push_str(&build_body(ctx, select)?);
    Ok(sql)
}

/// SELECT without its `WITH` clauses.
pub fn build_body(ctx: &mut SqlContext, select: &Select) -> CqnResult<String> {
    let mut sql = String::from("SELECT ");
    if select.distinct {
        sql.push_str("DISTINCT ");
    }
    sql.push_str(&build_columns(ctx, &select.columns)?);

    sql.push_str(" FROM ");
    sql.push_str(&build_source(ctx, &select.from)?);

    if !select.filter.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&ctx.tokens(&select.filter)?);
    }

    if !select.group_by.is_empty() {
        let mut items = Vec::with_capacity(select.group_by.len());
        for expr in &select.group_by {
            items.push(ctx.expr(expr)?);
        }
        sql.push_str(" GROUP BY ");
        sql.push_str(&items.join(", "));
    }

    if !select.having.is_empty() {
        sql.push_str(" HAVING ");
        sql.push_str(&ctx.tokens(&select.having)?);
    }

    if !select.order_by.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&build_order_by(ctx, &select.order_by)?);
    }

    let limit = match (select.one, select.limit) {
        (true, Some(limit)) => Some(Limit { rows: Some(1), ..limit }),
        (true, None) => Some(Limit::rows(1)),
        (false, limit) => limit,
    };
    if let Some(limit) = limit {
        sql.push_str(&ctx.generator.limit_offset(limit.rows, limit.offset));
    }

    Ok(sql)
}

fn build_columns(ctx: &mut SqlContext, columns: &[Column]) -> CqnResult<String> {
    if columns.is_empty() {
        return Ok("*".into());
    }
    let mut rendered = Vec::with_capacity(columns.len());
    for column in columns {
        rendered.push(build_column(ctx, column)?);
    }
    Ok(rendered.join(", "))
}

fn build_column(ctx: &mut SqlContext, column: &Column) -> CqnResult<String> {
    let mut sql = match &column.expr {
        Expr::Select(sub) if sub.expand.is_some() => build_expand(ctx, sub)?,
        Expr::Keyword(k) if k == "*" => return Ok("*".into()),
        expr => {
            let mut sql = ctx.expr(expr)?;
            if let Some(cast) = &column.cast {
                let ty = ctx.generator.column_type(&Element::new("", cast));
                sql = format!("CAST({} AS {})", sql, ty);
            }
            match &column.element {
                Some(element) => ctx.converters.output(element.type_name(), &sql),
                None => sql,
            }
        }
    };
    if let Some(alias) = column.output_name() {
        sql.push_str(" AS ");
        sql.push_str(&ctx.generator.quote_alias(&alias));
    }
    Ok(sql)
}

/// Expand sub-select aggregated into a JSON object or array.
fn build_expand(ctx: &mut SqlContext, sub: &Select) -> CqnResult<String> {
    let keys: Vec<(String, bool)> = sub
        .columns
        .iter()
        .filter_map(|c| {
            let nested = matches!(&c.expr, Expr::Select(s) if s.expand.is_some());
            c.output_name().map(|name| (name, nested))
        })
        .collect();

    ctx.expand_depth += 1;
    let inner = build_select(ctx, sub);
    ctx.expand_depth -= 1;
    let inner = inner?;

    let many = sub.expand == Some(ExpandKind::Many);
    let json = ctx.generator.expand(&inner, &keys, many);
    Ok(if ctx.expand_depth == 0 {
        ctx.generator.json_text(&json)
    } else {
        json
    })
}

pub fn build_source(ctx: &mut SqlContext, source: &Source) -> CqnResult<String> {
    match source {
        Source::Entity { path, alias } => {
            let table = path
                .segments
                .iter()
                .map(Segment::id)
                .collect::<Vec<_>>()
                .join(".");
            let mut sql = ctx.generator.quote_identifier(&table);
            if let Some(alias) = alias.as_deref().filter(|a| *a != table) {
                sql.push_str(" AS ");
                sql.push_str(&ctx.generator.quote_identifier(alias));
            }
            Ok(sql)
        }
        Source::Subquery { query, alias } => Ok(format!(
            "({}) AS {}",
            build_select(ctx, query)?,
            ctx.generator.quote_identifier(alias)
        )),
    }
}

pub fn build_order_by(ctx: &mut SqlContext, order_by: &[OrderBy]) -> CqnResult<String> {
    let mut items = Vec::with_capacity(order_by.len());
    for item in order_by {
        let mut sql = ctx.expr(&item.expr)?;
        sql.push_str(match item.sort {
            Sort::Asc => " ASC",
            Sort::Desc => " DESC",
        });
        match item.nulls {
            Some(Nulls::First) => sql.push_str(" NULLS FIRST"),
            Some(Nulls::Last) => sql.push_str(" NULLS LAST"),
            None => {}
        }
        items.push(sql);
    }
    Ok(items.join(", "))
}
