//! Expression and predicate rendering with parameter collection.

use crate::ast::*;
use crate::error::{CqnError, CqnResult};
use crate::model::Leaf;

use super::converters::{ConverterRegistry, converters};
use super::dialect::Dialect;
use super::traits::SqlGenerator;
use super::{Binding, dml, functions};

/// Context for parameterized query building.
#[derive(Debug, Default)]
pub struct ParamContext {
    /// Current parameter index (1-based for Postgres $1, $2, etc.)
    pub index: usize,
    /// Collected bindings in placeholder order
    pub params: Vec<Binding>,
    /// Positional `?` parameters seen so far
    pub positional: usize,
}

impl ParamContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding and return the placeholder for it.
    pub fn add_param(&mut self, binding: Binding, generator: &dyn SqlGenerator) -> String {
        self.index += 1;
        self.params.push(binding);
        generator.placeholder(self.index)
    }

    /// Binding for the next positional parameter.
    pub fn next_positional(&mut self) -> Binding {
        self.positional += 1;
        Binding::Arg(self.positional - 1)
    }
}

/// Rendering state for one statement.
pub struct SqlContext {
    pub dialect: Dialect,
    pub generator: Box<dyn SqlGenerator>,
    pub converters: &'static ConverterRegistry,
    pub params: ParamContext,
    /// Nesting depth of expand sub-selects.
    pub(crate) expand_depth: usize,
}

const COMPARISONS: &[&str] = &["=", "==", "!=", "<>", "<", ">", "<=", ">=", "like", "in"];
const ORDERING: &[&str] = &["<", ">", "<=", ">="];

fn is_comparison(token: Option<&Expr>) -> bool {
    matches!(token, Some(Expr::Keyword(k)) if COMPARISONS.contains(&k.to_ascii_lowercase().as_str()))
}

/// CDS type of a linked column reference.
pub(crate) fn ref_type(expr: Option<&Expr>) -> Option<String> {
    let Some(Expr::Ref(r)) = expr else {
        return None;
    };
    r.links
        .as_ref()?
        .last()?
        .as_element()
        .map(|e| e.type_name().to_string())
}

/// Leaves of a reference that stands for several columns (or for a single
/// foreign key below an association).
fn struct_leaves(expr: Option<&Expr>) -> Option<(&Ref, &Vec<Leaf>)> {
    let Some(Expr::Ref(r)) = expr else {
        return None;
    };
    let leaves = r.leaves.as_ref()?;
    if leaves.len() == 1 && leaves[0].path.is_empty() {
        return None;
    }
    Some((r, leaves))
}

/// Right-hand side of a structured comparison, resolved per leaf.
enum Operand<'a> {
    Object(&'a Value),
    Null,
    Leaves(&'a Ref, &'a Vec<Leaf>),
    Scalar(&'a Expr),
}

impl SqlContext {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            generator: dialect.generator(),
            converters: converters(dialect),
            params: ParamContext::new(),
            expand_depth: 0,
        }
    }

    /// Bind a value and return its placeholder, wrapped by the input
    /// converter of `ty`.
    pub fn bind(&mut self, binding: Binding, ty: Option<&str>) -> String {
        let placeholder = self.params.add_param(binding, self.generator.as_ref());
        match ty {
            Some(ty) => self.converters.input(ty, &placeholder),
            None => placeholder,
        }
    }

    /// Numbers, booleans and null are inlined; everything else is bound.
    pub fn value(&mut self, value: &Value, ty: Option<&str>) -> CqnResult<String> {
        Ok(match value {
            Value::Null => "NULL".into(),
            Value::Bool(b) => self.generator.bool_literal(*b),
            Value::Int(n) => n.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Array(_) | Value::Object(_) => {
                let json = serde_json::to_string(&value.to_json())?;
                self.bind(Binding::Value(Value::String(json)), ty)
            }
            other => self.bind(Binding::Value(other.clone()), ty),
        })
    }

    /// Render a flat token list.
    pub fn tokens(&mut self, tokens: &[Expr]) -> CqnResult<String> {
        let mut parts = Vec::with_capacity(tokens.len());
        let mut i = 0;
        while i < tokens.len() {
            if let Some((sql, consumed)) = self.struct_comparison(tokens, i)? {
                parts.push(sql);
                i += consumed;
                continue;
            }
            let ty = if i >= 2 && is_comparison(tokens.get(i - 1)) {
                ref_type(tokens.get(i - 2))
            } else if is_comparison(tokens.get(i + 1)) && !tokens[i + 1].is_keyword("in") {
                ref_type(tokens.get(i + 2))
            } else {
                None
            };
            parts.push(self.expr_typed(&tokens[i], ty.as_deref())?);
            i += 1;
        }
        Ok(parts.join(" "))
    }

    pub fn expr(&mut self, expr: &Expr) -> CqnResult<String> {
        self.expr_typed(expr, None)
    }

    /// Render an expression; bound values get the input converter of `ty`.
    pub fn expr_typed(&mut self, expr: &Expr, ty: Option<&str>) -> CqnResult<String> {
        match expr {
            Expr::Ref(r) => self.reference(r),
            Expr::Val(v) => self.value(v, ty),
            Expr::Param(Param::Positional) => {
                let binding = self.params.next_positional();
                Ok(self.bind(binding, ty))
            }
            Expr::Param(Param::Named(name)) => Ok(self.bind(Binding::Named(name.clone()), ty)),
            Expr::Func(f) => functions::render_function(self, f),
            Expr::Xpr(items) => Ok(format!("({})", self.tokens(items)?)),
            Expr::List(items) => {
                let mut rendered = Vec::with_capacity(items.len());
                for item in items {
                    rendered.push(self.expr_typed(item, ty)?);
                }
                Ok(format!("({})", rendered.join(", ")))
            }
            Expr::Select(s) => Ok(format!("({})", dml::select::build_select(self, s)?)),
            Expr::Keyword(k) => Ok(keyword(k)),
        }
    }

    fn reference(&mut self, r: &Ref) -> CqnResult<String> {
        match r.links.as_ref().and_then(|l| l.first()).map(|l| &l.definition) {
            Some(Definition::Variable(name)) => return Ok(self.bind(Binding::Variable(name.clone()), None)),
            Some(Definition::OutputColumn(name)) => return Ok(self.generator.quote_alias(name)),
            None if r.is_variable() => return Ok(self.bind(Binding::Variable(r.path()), None)),
            _ => {}
        }
        if let Some(leaves) = &r.leaves {
            return match (leaves.as_slice(), r.first()) {
                ([leaf], Some(alias)) if r.segments.len() == 2 => Ok(self.column(alias, &leaf.column)),
                _ => Err(CqnError::unsupported(format!(
                    "structured value '{}' can only be compared with = or != or tested for null",
                    r.path()
                ))),
            };
        }
        Ok(r.segments
            .iter()
            .map(|s| self.generator.quote_identifier(s.id()))
            .collect::<Vec<_>>()
            .join("."))
    }

    /// `alias.column`
    pub fn column(&self, alias: &str, column: &str) -> String {
        format!(
            "{}.{}",
            self.generator.quote_identifier(alias),
            self.generator.quote_identifier(column)
        )
    }

    /// Rewrite `struct = value`, `struct != value` and `struct is [not] null`
    /// into per-leaf comparisons. Returns the SQL and the number of tokens
    /// consumed.
    fn struct_comparison(
        &mut self,
        tokens: &[Expr],
        i: usize,
    ) -> CqnResult<Option<(String, usize)>> {
        let (r, leaves, op, operand, consumed) = if let Some((r, leaves)) = struct_leaves(tokens.get(i)) {
            let next = tokens.get(i + 1);
            if next.is_some_and(|t| t.is_keyword("is")) {
                let negated = tokens.get(i + 2).is_some_and(|t| t.is_keyword("not"));
                let null_at = if negated { i + 3 } else { i + 2 };
                if !tokens.get(null_at).is_some_and(|t| t.is_keyword("null")) {
                    return Ok(None);
                }
                let op = if negated { "!=" } else { "=" };
                (r, leaves, op.to_string(), Operand::Null, null_at + 1 - i)
            } else if is_comparison(next) {
                let op = match next {
                    Some(Expr::Keyword(k)) => k.to_ascii_lowercase(),
                    _ => return Ok(None),
                };
                let operand = match tokens.get(i + 2) {
                    Some(rhs) => operand(rhs),
                    None => return Ok(None),
                };
                (r, leaves, op, operand, 3)
            } else {
                return Ok(None);
            }
        } else if let Some((r, leaves)) = struct_leaves(tokens.get(i + 2)) {
            let op = match tokens.get(i + 1) {
                Some(Expr::Keyword(k)) if is_comparison(tokens.get(i + 1)) => k.to_ascii_lowercase(),
                _ => return Ok(None),
            };
            (r, leaves, op, operand(&tokens[i]), 3)
        } else {
            return Ok(None);
        };

        if ORDERING.contains(&op.as_str()) {
            return Err(CqnError::unsupported(format!(
                "'{}' cannot be compared with '{}': ordering is undefined for structured values",
                r.path(),
                op
            )));
        }
        let conjunction = match op.as_str() {
            "=" | "==" => " AND ",
            "!=" | "<>" => " OR ",
            other => {
                return Err(CqnError::unsupported(format!(
                    "operator '{}' on structured value '{}'",
                    other,
                    r.path()
                )));
            }
        };
        let negated = conjunction == " OR ";
        let alias = r.first().unwrap_or_default().to_string();

        let mut parts = Vec::with_capacity(leaves.len());
        for (n, leaf) in leaves.iter().enumerate() {
            let lhs = self.column(&alias, &leaf.column);
            let ty = leaf.element.type_name().to_string();
            let rhs = match &operand {
                Operand::Null => None,
                Operand::Object(v) => match v.at_path(&leaf.path) {
                    None | Some(Value::Null) => None,
                    Some(v) => Some(self.value(v, Some(&ty))?),
                },
                Operand::Leaves(other, other_leaves) => {
                    let matching = other_leaves
                        .iter()
                        .find(|l| l.path == leaf.path)
                        .or_else(|| other_leaves.get(n))
                        .ok_or_else(|| {
                            CqnError::unsupported(format!(
                                "'{}' and '{}' have different structures",
                                r.path(),
                                other.path()
                            ))
                        })?;
                    Some(self.column(other.first().unwrap_or_default(), &matching.column))
                }
                Operand::Scalar(expr) if leaves.len() == 1 => Some(self.expr_typed(expr, Some(&ty))?),
                Operand::Scalar(_) => {
                    return Err(CqnError::unsupported(format!(
                        "structured value '{}' must be compared with an object or null",
                        r.path()
                    )));
                }
            };
            parts.push(match (rhs, negated) {
                (None, false) => format!("{} IS NULL", lhs),
                (None, true) => format!("{} IS NOT NULL", lhs),
                (Some(rhs), false) => format!("{} = {}", lhs, rhs),
                (Some(rhs), true) => format!("{} != {}", lhs, rhs),
            });
        }

        let sql = parts.join(conjunction);
        let sql = if parts.len() > 1 && tokens.len() > consumed {
            format!("({})", sql)
        } else {
            sql
        };
        Ok(Some((sql, consumed)))
    }
}

fn operand(expr: &Expr) -> Operand<'_> {
    match expr {
        Expr::Val(Value::Null) => Operand::Null,
        Expr::Val(v @ Value::Object(_)) => Operand::Object(v),
        Expr::Ref(r) => match &r.leaves {
            Some(leaves) => Operand::Leaves(r, leaves),
            None => Operand::Scalar(expr),
        },
        other => Operand::Scalar(other),
    }
}

/// Operators and keywords: words upper-cased, `==` normalized.
pub(crate) fn keyword(k: &str) -> String {
    match k {
        "==" => "=".into(),
        k if k.chars().all(|c| c.is_ascii_alphabetic()) => k.to_ascii_uppercase(),
        k => k.to_string(),
    }
}
