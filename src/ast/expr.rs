//! Expressions, references and columns.

use std::sync::Arc;

use super::query::Select;
use super::values::Value;
use crate::model::{Element, Entity, Leaf};

/// A node of a CQN expression token stream.
///
/// Conditions are kept as flat token lists the way CQN writes them:
/// `[{ref:[stock]}, ">", {val:10}, "and", ...]`, with keywords and operators
/// as `Keyword` tokens.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Ref(Ref),
    Val(Value),
    Param(Param),
    Func(Func),
    /// Parenthesized token list
    Xpr(Vec<Expr>),
    /// Value list, e.g. the right side of `in`
    List(Vec<Expr>),
    /// Sub-select, e.g. the operand of `exists` after flattening
    Select(Box<Select>),
    /// Operator or keyword (`=`, `and`, `exists`, `is`, `null`, `*`, ...)
    Keyword(String),
}

impl Expr {
    /// Reference by dotted path: `Expr::reference("author.name")`.
    pub fn reference(path: &str) -> Expr {
        Expr::Ref(Ref::from_path(path))
    }

    pub fn val(v: impl Into<Value>) -> Expr {
        Expr::Val(v.into())
    }

    pub fn keyword(k: impl Into<String>) -> Expr {
        Expr::Keyword(k.into())
    }

    pub fn func(name: impl Into<String>, args: Vec<Expr>) -> Expr {
        Expr::Func(Func {
            name: name.into(),
            args,
        })
    }

    pub fn is_keyword(&self, kw: &str) -> bool {
        matches!(self, Expr::Keyword(k) if k.eq_ignore_ascii_case(kw))
    }

    pub fn as_reference(&self) -> Option<&Ref> {
        match self {
            Expr::Ref(r) => Some(r),
            _ => None,
        }
    }

    /// Join two conditions with `and`, wrapping multi-token operands that
    /// contain `or` so precedence is kept.
    pub fn and(left: Vec<Expr>, right: Vec<Expr>) -> Vec<Expr> {
        if left.is_empty() {
            return right;
        }
        if right.is_empty() {
            return left;
        }
        let mut out = wrap_or(left);
        out.push(Expr::keyword("and"));
        out.extend(wrap_or(right));
        out
    }

    /// Walk this expression and every nested expression, sub-selects excluded.
    pub fn visit(&self, f: &mut dyn FnMut(&Expr)) {
        f(self);
        match self {
            Expr::Func(func) => {
                for arg in &func.args {
                    arg.visit(f);
                }
            }
            Expr::Xpr(items) | Expr::List(items) => {
                for item in items {
                    item.visit(f);
                }
            }
            Expr::Ref(r) => {
                for seg in &r.segments {
                    if let Segment::Filtered { filter, .. } = seg {
                        for token in filter {
                            token.visit(f);
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

fn wrap_or(tokens: Vec<Expr>) -> Vec<Expr> {
    if tokens.len() > 1 && tokens.iter().any(|t| t.is_keyword("or")) {
        vec![Expr::Xpr(tokens)]
    } else {
        tokens
    }
}

/// A path reference (`ref`).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Ref {
    pub segments: Vec<Segment>,
    /// `$refLinks`: one entry per segment once the reference is linked.
    pub links: Option<Vec<RefLink>>,
    /// Leaf columns of a structured value or managed association, filled in by
    /// flattening so the renderer can compare them one by one.
    pub leaves: Option<Vec<Leaf>>,
}

impl Ref {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self {
            segments,
            links: None,
            leaves: None,
        }
    }

    pub fn from_path(path: &str) -> Self {
        Self::new(path.split('.').map(Segment::name).collect())
    }

    /// Single-segment reference to an entity; entity names may contain dots.
    pub fn entity(name: &str) -> Self {
        Self::new(vec![Segment::name(name)])
    }

    /// `alias.column`, the shape every column reference has after flattening.
    pub fn qualified(alias: &str, column: &str) -> Self {
        Self::new(vec![Segment::name(alias), Segment::name(column)])
    }

    pub fn first(&self) -> Option<&str> {
        self.segments.first().map(Segment::id)
    }

    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(Segment::id)
    }

    /// Dotted path, filters omitted.
    pub fn path(&self) -> String {
        self.segments
            .iter()
            .map(Segment::id)
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Session variables start with `$` (`$user.id`, `$now`); `$self` does not count.
    pub fn is_variable(&self) -> bool {
        self.first()
            .map(|s| s.starts_with('$') && s != "$self")
            .unwrap_or(false)
    }

    pub fn with_links(mut self, links: Vec<RefLink>) -> Self {
        self.links = Some(links);
        self
    }
}

/// A path segment: a plain name or a name with an infix filter
/// (`books[stock > 10]`).
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Name(String),
    Filtered { id: String, filter: Vec<Expr> },
}

impl Segment {
    pub fn name(id: impl Into<String>) -> Self {
        Segment::Name(id.into())
    }

    pub fn id(&self) -> &str {
        match self {
            Segment::Name(id) | Segment::Filtered { id, .. } => id,
        }
    }

    pub fn filter(&self) -> Option<&[Expr]> {
        match self {
            Segment::Filtered { filter, .. } if !filter.is_empty() => Some(filter),
            _ => None,
        }
    }
}

/// Resolution of one path segment.
#[derive(Debug, Clone, PartialEq)]
pub struct RefLink {
    pub definition: Definition,
    /// Target entity when the segment is an association or an entity.
    pub target: Option<Arc<Entity>>,
    /// Table alias introduced for the target, if any.
    pub alias: Option<String>,
}

impl RefLink {
    pub fn element(element: Arc<Element>) -> Self {
        Self {
            definition: Definition::Element(element),
            target: None,
            alias: None,
        }
    }

    pub fn as_element(&self) -> Option<&Arc<Element>> {
        match &self.definition {
            Definition::Element(e) => Some(e),
            _ => None,
        }
    }
}

/// What a segment resolved to.
#[derive(Debug, Clone, PartialEq)]
pub enum Definition {
    Entity(Arc<Entity>),
    Element(Arc<Element>),
    /// Session variable such as `$user.id` or `$now`
    Variable(String),
    /// Alias of an output column of the enclosing SELECT
    OutputColumn(String),
}

/// Function call.
#[derive(Debug, Clone, PartialEq)]
pub struct Func {
    pub name: String,
    pub args: Vec<Expr>,
}

/// Query parameter supplied at execution time.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    /// `?`, bound in order of appearance
    Positional,
    /// `:name`
    Named(String),
}

/// A SELECT column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub expr: Expr,
    pub alias: Option<String>,
    /// Nested projection for `expand`.
    pub expand: Option<Vec<Column>>,
    /// Ordering of expanded rows.
    pub order_by: Vec<OrderBy>,
    /// Pagination of expanded rows.
    pub limit: Option<Limit>,
    /// Target CDS type of an explicit cast.
    pub cast: Option<String>,
    /// Element typing this column, set by flattening.
    pub element: Option<Arc<Element>>,
}

impl Column {
    pub fn new(expr: Expr) -> Self {
        Self {
            expr,
            alias: None,
            expand: None,
            order_by: Vec::new(),
            limit: None,
            cast: None,
            element: None,
        }
    }

    /// `*`
    pub fn star() -> Self {
        Self::new(Expr::keyword("*"))
    }

    pub fn reference(path: &str) -> Self {
        Self::new(Expr::reference(path))
    }

    pub fn expand(path: &str, columns: Vec<Column>) -> Self {
        let mut col = Self::reference(path);
        col.expand = Some(columns);
        col
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn is_star(&self) -> bool {
        self.expr.is_keyword("*")
    }

    /// Name of this column in the result set.
    pub fn output_name(&self) -> Option<String> {
        if let Some(alias) = &self.alias {
            return Some(alias.clone());
        }
        match &self.expr {
            Expr::Ref(r) => r.last().map(str::to_string),
            Expr::Func(f) => Some(f.name.clone()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sort {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nulls {
    First,
    Last,
}

/// An ORDER BY item.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub expr: Expr,
    pub sort: Sort,
    pub nulls: Option<Nulls>,
}

impl OrderBy {
    pub fn asc(expr: Expr) -> Self {
        Self {
            expr,
            sort: Sort::Asc,
            nulls: None,
        }
    }

    pub fn desc(expr: Expr) -> Self {
        Self {
            expr,
            sort: Sort::Desc,
            nulls: None,
        }
    }
}

/// Row window: `rows` (none = unbounded) after skipping `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Limit {
    pub rows: Option<u64>,
    pub offset: u64,
}

impl Limit {
    pub fn rows(rows: u64) -> Self {
        Self {
            rows: Some(rows),
            offset: 0,
        }
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_and_wraps_or_operands() {
        let left = vec![
            Expr::reference("a"),
            Expr::keyword("="),
            Expr::val(1),
            Expr::keyword("or"),
            Expr::reference("b"),
            Expr::keyword("="),
            Expr::val(2),
        ];
        let right = vec![Expr::reference("c"), Expr::keyword("="), Expr::val(3)];
        let joined = Expr::and(left, right);
        assert_eq!(joined.len(), 5);
        assert!(matches!(joined[0], Expr::Xpr(_)));
        assert!(joined[1].is_keyword("AND"));
    }

    #[test]
    fn test_ref_paths() {
        let r = Ref::from_path("dedication.addressee");
        assert_eq!(r.first(), Some("dedication"));
        assert_eq!(r.last(), Some("addressee"));
        assert_eq!(r.path(), "dedication.addressee");
        assert!(Ref::from_path("$user.id").is_variable());
        assert!(!Ref::from_path("$self").is_variable());
    }

    #[test]
    fn test_output_name() {
        assert_eq!(Column::reference("author.name").output_name().as_deref(), Some("name"));
        assert_eq!(
            Column::reference("title").alias("t").output_name().as_deref(),
            Some("t")
        );
        assert_eq!(Column::star().output_name(), None);
    }
}
