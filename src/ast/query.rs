//! CQN statements.

use std::sync::Arc;

use super::expr::{Column, Expr, Limit, OrderBy, Ref};
use super::values::Record;
use crate::model::Element;

/// A CQN query: one variant per statement kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Select(Select),
    Insert(Insert),
    Upsert(Insert),
    Update(Update),
    Delete(Delete),
    Create(CreateTable),
    Drop(DropTable),
}

impl Query {
    pub fn kind(&self) -> &'static str {
        match self {
            Query::Select(_) => "SELECT",
            Query::Insert(_) => "INSERT",
            Query::Upsert(_) => "UPSERT",
            Query::Update(_) => "UPDATE",
            Query::Delete(_) => "DELETE",
            Query::Create(_) => "CREATE",
            Query::Drop(_) => "DROP",
        }
    }

    /// Whether `cqn4sql` already ran on this query.
    pub fn is_flattened(&self) -> bool {
        match self {
            Query::Select(s) => s.flattened,
            Query::Insert(i) | Query::Upsert(i) => i.flattened,
            Query::Update(u) => u.flattened,
            Query::Delete(d) => d.flattened,
            Query::Create(c) => c.table.is_some(),
            Query::Drop(d) => d.table.is_some(),
        }
    }

    /// Whether the statement's target carries `$refLinks`. Flattened
    /// statements read back from JSON do not.
    pub fn is_linked(&self) -> bool {
        match self {
            Query::Select(s) => match &s.from {
                Source::Entity { path, .. } => path.links.is_some(),
                Source::Subquery { .. } => true,
            },
            Query::Insert(i) | Query::Upsert(i) => i.into.links.is_some(),
            Query::Update(u) => u.entity.links.is_some(),
            Query::Delete(d) => d.from.links.is_some(),
            Query::Create(_) | Query::Drop(_) => true,
        }
    }

    /// Internal queries are issued by emulation helpers and must not be
    /// post-processed again.
    pub fn is_internal(&self) -> bool {
        match self {
            Query::Select(s) => s.internal,
            Query::Insert(i) | Query::Upsert(i) => i.internal,
            Query::Update(u) => u.internal,
            Query::Delete(d) => d.internal,
            Query::Create(_) | Query::Drop(_) => false,
        }
    }

    /// Name of the entity this query reads or writes.
    pub fn entity_name(&self) -> Option<String> {
        match self {
            Query::Select(s) => match &s.from {
                Source::Entity { path, .. } => path.first().map(str::to_string),
                Source::Subquery { .. } => None,
            },
            Query::Insert(i) | Query::Upsert(i) => i.into.first().map(str::to_string),
            Query::Update(u) => u.entity.first().map(str::to_string),
            Query::Delete(d) => d.from.first().map(str::to_string),
            Query::Create(c) => Some(c.entity.clone()),
            Query::Drop(d) => Some(d.entity.clone()),
        }
    }
}

/// Data source of a SELECT.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    /// Entity or navigation path (`Authors[ID=1]:books`)
    Entity { path: Ref, alias: Option<String> },
    /// Derived table
    Subquery { query: Box<Select>, alias: String },
}

impl Source {
    pub fn entity(name: &str) -> Self {
        Source::Entity {
            path: Ref::entity(name),
            alias: None,
        }
    }

    pub fn alias(&self) -> Option<&str> {
        match self {
            Source::Entity { alias, .. } => alias.as_deref(),
            Source::Subquery { alias, .. } => Some(alias),
        }
    }
}

/// How an expand sub-select is aggregated into its parent row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpandKind {
    /// To-one: a single object or null
    One,
    /// To-many: an array of objects
    Many,
}

/// Named auxiliary sub-select rendered as a `WITH` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct With {
    pub alias: String,
    pub query: Select,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub from: Source,
    /// Empty means `*`.
    pub columns: Vec<Column>,
    pub distinct: bool,
    pub filter: Vec<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Vec<Expr>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<Limit>,
    /// Return a single row (or null) instead of an array.
    pub one: bool,
    /// Attach the total row count (`$count`) to the result.
    pub count: bool,
    pub with: Vec<With>,
    /// Set on sub-selects produced from `expand` columns.
    pub expand: Option<ExpandKind>,
    pub flattened: bool,
    pub internal: bool,
}

impl Select {
    pub fn from(entity: &str) -> Self {
        Self::from_source(Source::entity(entity))
    }

    pub fn from_source(from: Source) -> Self {
        Self {
            from,
            columns: Vec::new(),
            distinct: false,
            filter: Vec::new(),
            group_by: Vec::new(),
            having: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            one: false,
            count: false,
            with: Vec::new(),
            expand: None,
            flattened: false,
            internal: false,
        }
    }

    pub fn columns(mut self, columns: Vec<Column>) -> Self {
        self.columns = columns;
        self
    }

    pub fn filter(mut self, filter: Vec<Expr>) -> Self {
        self.filter = Expr::and(std::mem::take(&mut self.filter), filter);
        self
    }

    pub fn order_by(mut self, order_by: Vec<OrderBy>) -> Self {
        self.order_by.extend(order_by);
        self
    }

    pub fn group_by(mut self, group_by: Vec<Expr>) -> Self {
        self.group_by.extend(group_by);
        self
    }

    pub fn having(mut self, having: Vec<Expr>) -> Self {
        self.having = Expr::and(std::mem::take(&mut self.having), having);
        self
    }

    pub fn limit(mut self, rows: u64, offset: u64) -> Self {
        self.limit = Some(Limit::rows(rows).offset(offset));
        self
    }

    pub fn one(mut self) -> Self {
        self.one = true;
        self
    }

    pub fn count(mut self) -> Self {
        self.count = true;
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Register an auxiliary sub-select; the first query registered under an
    /// alias wins.
    pub fn add_with(&mut self, alias: &str, query: Select) -> bool {
        if self.with.iter().any(|w| w.alias == alias) {
            return false;
        }
        self.with.push(With {
            alias: alias.to_string(),
            query,
        });
        true
    }

    /// Clone for a derived execution that must bypass post-processing.
    pub fn internal_clone(&self) -> Self {
        let mut copy = self.clone();
        copy.internal = true;
        copy
    }
}

/// INSERT or UPSERT.
#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub into: Ref,
    pub columns: Vec<String>,
    /// Row-wise values aligned with `columns`.
    pub rows: Vec<Vec<Expr>>,
    /// Object-wise values; flattening turns them into `columns` + `rows`.
    pub entries: Vec<Record>,
    /// `INSERT INTO ... SELECT`
    pub source: Option<Box<Select>>,
    /// Element per column, set by flattening.
    pub elements: Vec<Option<Arc<Element>>>,
    /// Physical primary key columns, set by flattening.
    pub keys: Vec<String>,
    pub flattened: bool,
    pub internal: bool,
}

impl Insert {
    pub fn into(entity: &str) -> Self {
        Self {
            into: Ref::entity(entity),
            columns: Vec::new(),
            rows: Vec::new(),
            entries: Vec::new(),
            source: None,
            elements: Vec::new(),
            keys: Vec::new(),
            flattened: false,
            internal: false,
        }
    }

    pub fn entries(mut self, entries: Vec<Record>) -> Self {
        self.entries.extend(entries);
        self
    }

    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn rows(mut self, rows: Vec<Vec<Expr>>) -> Self {
        self.rows.extend(rows);
        self
    }
}

/// One `SET column = expr` of an UPDATE.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub column: String,
    pub expr: Expr,
    pub element: Option<Arc<Element>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub entity: Ref,
    /// Plain values; flattening moves them into `with`.
    pub data: Record,
    pub with: Vec<Assignment>,
    pub filter: Vec<Expr>,
    pub keys: Vec<String>,
    pub flattened: bool,
    pub internal: bool,
}

impl Update {
    pub fn entity(entity: &str) -> Self {
        Self {
            entity: Ref::entity(entity),
            data: Record::new(),
            with: Vec::new(),
            filter: Vec::new(),
            keys: Vec::new(),
            flattened: false,
            internal: false,
        }
    }

    pub fn data(mut self, data: Record) -> Self {
        self.data.extend(data);
        self
    }

    pub fn set(mut self, column: &str, expr: Expr) -> Self {
        self.with.push(Assignment {
            column: column.to_string(),
            expr,
            element: None,
        });
        self
    }

    pub fn filter(mut self, filter: Vec<Expr>) -> Self {
        self.filter = Expr::and(std::mem::take(&mut self.filter), filter);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub from: Ref,
    pub filter: Vec<Expr>,
    pub keys: Vec<String>,
    pub flattened: bool,
    pub internal: bool,
}

impl Delete {
    pub fn from(entity: &str) -> Self {
        Self {
            from: Ref::entity(entity),
            filter: Vec::new(),
            keys: Vec::new(),
            flattened: false,
            internal: false,
        }
    }

    pub fn filter(mut self, filter: Vec<Expr>) -> Self {
        self.filter = Expr::and(std::mem::take(&mut self.filter), filter);
        self
    }
}

/// Physical table layout derived from an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    /// Element carrying type, length, precision and default.
    pub element: Arc<Element>,
    pub key: bool,
    pub not_null: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTable {
    pub entity: String,
    /// Filled in by flattening.
    pub table: Option<TableDef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DropTable {
    pub entity: String,
    /// Physical table name, filled in by flattening.
    pub table: Option<String>,
}

impl CreateTable {
    pub fn entity(entity: &str) -> Self {
        Self {
            entity: entity.to_string(),
            table: None,
        }
    }
}

impl DropTable {
    pub fn entity(entity: &str) -> Self {
        Self {
            entity: entity.to_string(),
            table: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_first_writer_wins() {
        let mut select = Select::from("Books");
        assert!(select.add_with("recent", Select::from("Books").limit(10, 0)));
        assert!(!select.add_with("recent", Select::from("Authors")));
        assert_eq!(select.with.len(), 1);
        assert_eq!(select.with[0].query.limit.and_then(|l| l.rows), Some(10));
    }

    #[test]
    fn test_internal_clone_is_independent() {
        let original = Select::from("Books").limit(5, 10);
        let mut copy = original.internal_clone();
        assert!(copy.internal);
        copy.limit = None;
        assert_eq!(original.limit, Some(Limit::rows(5).offset(10)));
        assert!(!original.internal);
    }
}
