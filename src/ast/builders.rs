//! Fluent construction with textual shorthands.
//!
//! ```ignore
//! let q = SELECT::from("Books")
//!     .cols("ID, title, author { name }")?
//!     .matching("stock > ? and exists author[name like 'E%']")?
//!     .order("title desc")?;
//! ```

use super::expr::Expr;
use super::query::{Delete, Insert, Query, Select, Source, Update};
use super::values::Record;
use crate::error::CqnResult;
use crate::parser;

/// Entry points mirroring the statement keywords.
#[allow(non_camel_case_types)]
pub struct SELECT;

impl SELECT {
    pub fn from(entity: &str) -> Select {
        Select::from(entity)
    }

    /// `SELECT.one.from(...)`
    pub fn one(entity: &str) -> Select {
        Select::from(entity).one()
    }

    /// Navigation source such as `Authors[ID = 1]:books`.
    pub fn from_path(path: &str) -> CqnResult<Select> {
        let (path, alias) = parser::parse_source(path)?;
        Ok(Select::from_source(Source::Entity { path, alias }))
    }
}

#[allow(non_camel_case_types)]
pub struct INSERT;

impl INSERT {
    pub fn into(entity: &str) -> Insert {
        Insert::into(entity)
    }
}

#[allow(non_camel_case_types)]
pub struct UPSERT;

impl UPSERT {
    pub fn into(entity: &str) -> Insert {
        Insert::into(entity)
    }
}

#[allow(non_camel_case_types)]
pub struct UPDATE;

impl UPDATE {
    pub fn entity(entity: &str) -> Update {
        Update::entity(entity)
    }
}

#[allow(non_camel_case_types)]
pub struct DELETE;

impl DELETE {
    pub fn from(entity: &str) -> Delete {
        Delete::from(entity)
    }
}

impl Select {
    /// Replace the column list: `"ID, author.name as writer, books { title }"`.
    pub fn cols(mut self, spec: &str) -> CqnResult<Self> {
        self.columns = parser::parse_columns(spec)?;
        Ok(self)
    }

    /// AND a textual predicate onto the WHERE clause.
    pub fn matching(self, predicate: &str) -> CqnResult<Self> {
        Ok(self.filter(parser::parse_predicate(predicate)?))
    }

    pub fn order(self, spec: &str) -> CqnResult<Self> {
        Ok(self.order_by(parser::parse_order_by(spec)?))
    }

    pub fn into_query(self) -> Query {
        Query::Select(self)
    }
}

impl Insert {
    pub fn entry(mut self, entry: Record) -> Self {
        self.entries.push(entry);
        self
    }
}

impl Update {
    pub fn matching(self, predicate: &str) -> CqnResult<Self> {
        Ok(self.filter(parser::parse_predicate(predicate)?))
    }

    /// `SET column = <expression>` from text, e.g. `("stock", "stock - 1")`.
    pub fn set_expr(self, column: &str, expression: &str) -> CqnResult<Self> {
        let mut tokens = parser::parse_predicate(expression)?;
        let expr = if tokens.len() == 1 {
            tokens.remove(0)
        } else {
            Expr::Xpr(tokens)
        };
        Ok(self.set(column, expr))
    }
}

impl Delete {
    pub fn matching(self, predicate: &str) -> CqnResult<Self> {
        Ok(self.filter(parser::parse_predicate(predicate)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Segment, Sort};

    #[test]
    fn test_select_shorthands() {
        let q = SELECT::from("Books")
            .cols("ID, title as name")
            .unwrap()
            .matching("stock > 10")
            .unwrap()
            .matching("price < 5 or price > 50")
            .unwrap()
            .order("title desc")
            .unwrap();
        assert_eq!(q.columns.len(), 2);
        assert_eq!(q.columns[1].alias.as_deref(), Some("name"));
        // stock > 10 and (price < 5 or price > 50)
        assert_eq!(q.filter.len(), 5);
        assert_eq!(q.order_by[0].sort, Sort::Desc);
    }

    #[test]
    fn test_from_path() {
        let q = SELECT::from_path("Authors[ID = 1]:books as b").unwrap();
        let Source::Entity { path, alias } = &q.from else {
            panic!("expected entity source");
        };
        assert_eq!(alias.as_deref(), Some("b"));
        assert_eq!(path.segments.len(), 2);
        assert!(matches!(&path.segments[0], Segment::Filtered { id, .. } if id == "Authors"));
    }

    #[test]
    fn test_update_set_expr() {
        let u = UPDATE::entity("Books")
            .set_expr("stock", "stock - 1")
            .unwrap()
            .matching("ID = 201")
            .unwrap();
        assert!(matches!(u.with[0].expr, Expr::Xpr(ref t) if t.len() == 3));
        assert_eq!(u.filter.len(), 3);
    }
}
