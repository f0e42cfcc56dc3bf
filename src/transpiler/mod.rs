//! SQL renderer for flattened CQN.
//!
//! Turns the output of [`cqn4sql`](crate::cqn4sql::cqn4sql) into SQL text plus
//! the bindings its placeholders expect, for SQLite, PostgreSQL and HANA.

pub mod conditions;
pub mod converters;
pub mod ddl;
pub mod dialect;
pub mod dml;
pub mod functions;
pub mod sql;
pub mod traits;

#[cfg(test)]
mod tests;

use crate::ast::*;
use crate::error::{CqnError, CqnResult};

pub use conditions::{ParamContext, SqlContext};
pub use dialect::{Capabilities, Dialect};
pub use traits::{SqlGenerator, escape_identifier};

/// What a placeholder is bound to at execution time.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    /// Literal value taken from the query
    Value(Value),
    /// Session variable (`$user.id`, `$now`, ...)
    Variable(String),
    /// n-th positional execution argument
    Arg(usize),
    /// Named execution argument
    Named(String),
}

/// Rendered statement.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SqlStatement {
    pub sql: String,
    /// Bindings of a single execution, in placeholder order.
    pub values: Vec<Binding>,
    /// For INSERT/UPSERT: one execution per entry.
    pub entries: Vec<Vec<Binding>>,
}

/// Trait for converting flattened queries to SQL.
pub trait ToSql {
    /// Convert this node to SQL using the default dialect.
    fn to_sql(&self) -> CqnResult<SqlStatement> {
        self.to_sql_with_dialect(Dialect::default())
    }
    /// Convert this node to SQL with a specific dialect.
    fn to_sql_with_dialect(&self, dialect: Dialect) -> CqnResult<SqlStatement>;
}

impl ToSql for Query {
    fn to_sql_with_dialect(&self, dialect: Dialect) -> CqnResult<SqlStatement> {
        if !self.is_flattened() {
            return Err(CqnError::InvalidQuery(format!(
                "{} must be flattened before rendering",
                self.kind()
            )));
        }
        let mut ctx = SqlContext::new(dialect);
        let (sql, entries) = match self {
            Query::Select(s) => (dml::select::build_select(&mut ctx, s)?, Vec::new()),
            Query::Insert(i) => dml::insert::build_insert(&mut ctx, i, false)?,
            Query::Upsert(i) => dml::insert::build_insert(&mut ctx, i, true)?,
            Query::Update(u) => (dml::update::build_update(&mut ctx, u)?, Vec::new()),
            Query::Delete(d) => (dml::delete::build_delete(&mut ctx, d)?, Vec::new()),
            Query::Create(c) => (ddl::build_create_table(&ctx, c)?, Vec::new()),
            Query::Drop(d) => (ddl::build_drop_table(&ctx, d)?, Vec::new()),
        };
        Ok(SqlStatement {
            sql,
            values: ctx.params.params,
            entries,
        })
    }
}

impl ToSql for Select {
    fn to_sql_with_dialect(&self, dialect: Dialect) -> CqnResult<SqlStatement> {
        if !self.flattened {
            return Err(CqnError::InvalidQuery("SELECT must be flattened before rendering".into()));
        }
        let mut ctx = SqlContext::new(dialect);
        let sql = dml::select::build_select(&mut ctx, self)?;
        Ok(SqlStatement {
            sql,
            values: ctx.params.params,
            entries: Vec::new(),
        })
    }
}

/// Render a flattened query.
pub fn render(query: &Query, dialect: Dialect) -> CqnResult<SqlStatement> {
    query.to_sql_with_dialect(dialect)
}

/// Render flattened selects combined with `UNION ALL`; their `WITH` clauses
/// are merged into a single leading clause.
pub fn render_union(selects: &[Select], dialect: Dialect) -> CqnResult<SqlStatement> {
    if selects.is_empty() {
        return Err(CqnError::InvalidQuery("UNION of no queries".into()));
    }
    let mut ctx = SqlContext::new(dialect);
    let mut sql = dml::cte::build_with(&mut ctx, &dml::cte::hoist(selects))?;
    let mut parts = Vec::with_capacity(selects.len());
    for select in selects {
        parts.push(dml::select::build_body(&mut ctx, select)?);
    }
    sql.push_str(&parts.join(" UNION ALL "));
    Ok(SqlStatement {
        sql,
        values: ctx.params.params,
        entries: Vec::new(),
    })
}
