//! `cqn4sql`: flatten model-relative CQN into physical, alias-qualified CQN.
//!
//! After this pass every column reference has the shape `alias.column`
//! (carrying `$refLinks` of equal length), `exists` predicates and `expand`
//! columns are correlated sub-selects, structured values are represented by
//! their leaf columns, and `*` is expanded. The renderer needs no model
//! knowledge afterwards.
//!
//! The pass is idempotent: flattened queries are marked and returned as-is.
//! A flattened query that lost its links (read back from JSON) is linked
//! again from its physical names.

mod columns;
mod dml;
mod exists;
mod expand;
mod relink;

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::ast::*;
use crate::error::{CqnError, CqnResult};
use crate::model::{Element, Entity, Model};
use crate::resolver::{Flat, Scope};

/// Flatten a query against the model.
pub fn cqn4sql(query: &Query, model: &Model) -> CqnResult<Query> {
    if query.is_flattened() {
        if query.is_linked() {
            return Ok(query.clone());
        }
        return Compiler::new(model).relink(query);
    }
    let mut compiler = Compiler::new(model);
    let flat = match query {
        Query::Select(s) => Query::Select(compiler.select(s)?),
        Query::Insert(i) => Query::Insert(compiler.insert(i, false)?),
        Query::Upsert(i) => Query::Upsert(compiler.insert(i, true)?),
        Query::Update(u) => Query::Update(compiler.update(u)?),
        Query::Delete(d) => Query::Delete(compiler.delete(d)?),
        Query::Create(c) => Query::Create(compiler.create(c)?),
        Query::Drop(d) => Query::Drop(compiler.drop_table(d)?),
    };
    debug!("cqn4sql: flattened {} on {:?}", flat.kind(), query.entity_name());
    Ok(flat)
}

/// Per-statement compilation state.
pub(crate) struct Compiler<'m> {
    model: &'m Model,
    /// Table aliases handed out so far.
    aliases: HashSet<String>,
}

/// `alias.column`, linked to the alias' entity and the column's element.
pub(crate) fn qualified_ref(
    alias: &str,
    entity: &Arc<Entity>,
    column: &str,
    element: &Arc<Element>,
) -> Ref {
    Ref::qualified(alias, column).with_links(vec![
        RefLink {
            definition: Definition::Entity(entity.clone()),
            target: Some(entity.clone()),
            alias: Some(alias.to_string()),
        },
        RefLink::element(element.clone()),
    ])
}

pub(crate) fn column_ref(
    alias: &str,
    entity: &Arc<Entity>,
    column: &str,
    element: &Arc<Element>,
) -> Expr {
    Expr::Ref(qualified_ref(alias, entity, column, element))
}

/// Synthetic CDS type of a literal.
pub(crate) fn literal_type(value: &Value) -> &'static str {
    match value {
        Value::Int(_) => "cds.Integer",
        Value::Float(_) => "cds.Decimal",
        Value::Bool(_) => "cds.Boolean",
        Value::Binary(_) | Value::Stream(_) => "cds.Binary",
        _ => "cds.String",
    }
}

/// Synthetic CDS type of a session variable.
pub(crate) fn variable_type(name: &str) -> &'static str {
    match name {
        "$now" | "$at" | "$valid.from" | "$valid.to" => "cds.Timestamp",
        _ => "cds.String",
    }
}

impl<'m> Compiler<'m> {
    pub(crate) fn new(model: &'m Model) -> Self {
        Self {
            model,
            aliases: HashSet::new(),
        }
    }

    /// Reserve a table alias, appending a counter on collision.
    pub(crate) fn unique_alias(&mut self, base: &str) -> String {
        if self.aliases.insert(base.to_string()) {
            return base.to_string();
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}{}", base, n);
            if self.aliases.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Physical table reference for an entity.
    pub(crate) fn table_source(entity: &Arc<Entity>, alias: &str) -> Source {
        Source::Entity {
            path: Ref::entity(&entity.table_name()).with_links(vec![RefLink {
                definition: Definition::Entity(entity.clone()),
                target: Some(entity.clone()),
                alias: Some(alias.to_string()),
            }]),
            alias: Some(alias.to_string()),
        }
    }

    pub(crate) fn select(&mut self, select: &Select) -> CqnResult<Select> {
        if select.flattened {
            return Ok(select.clone());
        }

        let Source::Entity { path, alias } = &select.from else {
            return Err(CqnError::unsupported(
                "sub-selects in 'from' must be flattened by the caller",
            ));
        };
        let (entity, alias, mut filter) = self.source(path, alias.as_deref())?;

        let scope = Scope::entity(self.model, &alias, entity.clone());
        let columns = self.columns(&scope, &select.columns)?;
        let outputs = columns.iter().filter_map(|c| c.alias.clone()).collect();
        let scope = scope.with_outputs(outputs);

        filter = Expr::and(filter, self.tokens(&scope, &select.filter)?);

        let mut group_by = Vec::with_capacity(select.group_by.len());
        for expr in &select.group_by {
            group_by.extend(self.expand_leaves(&scope, expr)?);
        }

        let mut order_by = Vec::with_capacity(select.order_by.len());
        for item in &select.order_by {
            for expr in self.expand_leaves(&scope, &item.expr)? {
                order_by.push(OrderBy {
                    expr,
                    sort: item.sort,
                    nulls: item.nulls,
                });
            }
        }

        let mut with = Vec::with_capacity(select.with.len());
        for w in &select.with {
            with.push(With {
                alias: w.alias.clone(),
                query: self.select(&w.query)?,
            });
        }

        Ok(Select {
            from: Self::table_source(&entity, &alias),
            columns,
            distinct: select.distinct,
            filter,
            group_by,
            having: self.tokens(&scope, &select.having)?,
            order_by,
            limit: select.limit,
            one: select.one,
            count: select.count,
            with,
            expand: select.expand,
            flattened: true,
            internal: select.internal,
        })
    }

    /// Resolve the `from` path: a plain entity, or a navigation such as
    /// `Authors[ID=1]:books` that becomes the target plus a back-correlated
    /// `exists` filter.
    fn source(
        &mut self,
        path: &Ref,
        alias: Option<&str>,
    ) -> CqnResult<(Arc<Entity>, String, Vec<Expr>)> {
        let root_segment = path
            .segments
            .first()
            .ok_or_else(|| CqnError::invalid_path("", "empty 'from'"))?;
        let root = self.model.entity(root_segment.id())?.clone();

        if path.segments.len() == 1 {
            let alias = self.unique_alias(alias.unwrap_or(root.default_alias()));
            let filter = match root_segment.filter() {
                Some(f) => {
                    let scope = Scope::entity(self.model, &alias, root.clone());
                    self.tokens(&scope, f)?
                }
                None => Vec::new(),
            };
            return Ok((root, alias, filter));
        }
        self.navigation_source(root, path, alias)
    }

    /// Compile a token list (WHERE, HAVING, filters, `on` conditions).
    pub(crate) fn tokens(&mut self, scope: &Scope<'_>, tokens: &[Expr]) -> CqnResult<Vec<Expr>> {
        let mut out = Vec::with_capacity(tokens.len());
        let mut i = 0;
        while i < tokens.len() {
            let token = &tokens[i];
            if token.is_keyword("exists")
                && let Some(Expr::Ref(r)) = tokens.get(i + 1)
            {
                out.push(Expr::keyword("exists"));
                out.push(Expr::Select(Box::new(self.exists_subquery(scope, r)?)));
                i += 2;
                continue;
            }
            out.push(self.expr(scope, token)?);
            i += 1;
        }
        Ok(out)
    }

    /// Compile a single expression.
    pub(crate) fn expr(&mut self, scope: &Scope<'_>, expr: &Expr) -> CqnResult<Expr> {
        Ok(match expr {
            Expr::Ref(r) => self.reference(scope, r)?,
            Expr::Func(f) => {
                let mut args = Vec::with_capacity(f.args.len());
                for arg in &f.args {
                    args.push(self.expr(scope, arg)?);
                }
                Expr::Func(Func {
                    name: f.name.clone(),
                    args,
                })
            }
            Expr::Xpr(items) => Expr::Xpr(self.tokens(scope, items)?),
            Expr::List(items) => {
                let mut list = Vec::with_capacity(items.len());
                for item in items {
                    list.push(self.expr(scope, item)?);
                }
                Expr::List(list)
            }
            Expr::Select(s) => Expr::Select(Box::new(self.select(s)?)),
            other => other.clone(),
        })
    }

    /// Compile a reference in a plain expression position.
    fn reference(&mut self, scope: &Scope<'_>, r: &Ref) -> CqnResult<Expr> {
        if r.segments.iter().any(|s| s.filter().is_some()) {
            return Err(CqnError::invalid_path(
                r.path(),
                "path filters are only allowed in from, exists and expand",
            ));
        }
        let (flat, resolution) = scope.flatten(r)?;
        Ok(match flat {
            Flat::Variable(_) => Expr::Ref(r.clone().with_links(resolution.links)),
            Flat::Output(name) => Expr::Ref(Ref::from_path(&name).with_links(resolution.links)),
            Flat::Columns {
                alias,
                entity,
                element,
                leaves,
            } => {
                if leaves.len() == 1 && leaves[0].path.is_empty() {
                    column_ref(&alias, &entity, &leaves[0].column, &leaves[0].element)
                } else {
                    // Structured value or association: keep the leaves for
                    // the renderer's per-leaf comparison.
                    let name: Vec<&str> = r.segments[resolution.start..].iter().map(|s| s.id()).collect();
                    let mut flat_ref = qualified_ref(&alias, &entity, &name.join("_"), &element);
                    flat_ref.leaves = Some(leaves);
                    Expr::Ref(flat_ref)
                }
            }
        })
    }

    /// Like [`Compiler::expr`], but a structured reference yields one
    /// expression per leaf column (GROUP BY, ORDER BY).
    fn expand_leaves(&mut self, scope: &Scope<'_>, expr: &Expr) -> CqnResult<Vec<Expr>> {
        let compiled = self.expr(scope, expr)?;
        let Expr::Ref(r) = &compiled else {
            return Ok(vec![compiled]);
        };
        let (Some(leaves), Some(links)) = (&r.leaves, &r.links) else {
            return Ok(vec![compiled]);
        };
        let Some(Definition::Entity(entity)) = links.first().map(|l| &l.definition) else {
            return Ok(vec![compiled]);
        };
        let alias = r.first().unwrap_or_default();
        Ok(leaves
            .iter()
            .map(|leaf| column_ref(alias, entity, &leaf.column, &leaf.element))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::bookshop;
    use crate::parser::parse_query;
    use crate::transpiler::{Dialect, render};
    use pretty_assertions::assert_eq;

    fn flatten(text: &str) -> Select {
        let model = bookshop();
        match cqn4sql(&parse_query(text).unwrap(), &model).unwrap() {
            Query::Select(s) => s,
            other => panic!("expected select, got {:?}", other),
        }
    }

    fn column_names(select: &Select) -> Vec<String> {
        select.columns.iter().filter_map(|c| c.alias.clone()).collect()
    }

    #[test]
    fn test_flatten_is_idempotent() {
        let model = bookshop();
        let query = parse_query(
            "SELECT from sap.capire.Books { ID, author { name }, dedication } where exists author[name = 'Poe'] order by title",
        )
        .unwrap();
        let once = cqn4sql(&query, &model).unwrap();
        let twice = cqn4sql(&once, &model).unwrap();
        assert_eq!(once, twice);
        assert!(once.is_flattened());
        assert!(!query.is_flattened());
    }

    #[test]
    fn test_flatten_survives_the_json_form() {
        let model = bookshop();
        let record = |value: serde_json::Value| Value::from_json(&value).as_object().cloned().unwrap();
        let mut queries: Vec<Query> = [
            "SELECT from sap.capire.Books { ID, author { name }, dedication, stock * 2 as double, upper(title) as shout } \
             where exists author[name = 'Poe'] and dedication.sub = ? and double > 1 order by title desc, dedication.sub",
            "SELECT from sap.capire.Authors { name, books { title, genre { name } } as works } \
             where exists books.genre[name = 'Drama']",
            "UPDATE sap.capire.Books set stock = stock - 1 where dedication.text = 'x'",
            "DELETE from sap.capire.Authors where not exists books",
        ]
        .iter()
        .map(|text| parse_query(text).unwrap())
        .collect();
        let entry = record(serde_json::json!({
            "ID": 1,
            "title": "Eleonora",
            "author": { "ID": 101 },
            "dedication": { "text": "x" }
        }));
        queries.push(Query::Insert(INSERT::into("sap.capire.Books").entries(vec![entry])));

        for query in queries {
            let once = cqn4sql(&query, &model).unwrap();
            let json = once.to_json();
            let read_back = Query::from_json(&json).unwrap();
            assert!(read_back.is_flattened(), "{}", json);
            assert!(!read_back.is_linked());

            let again = cqn4sql(&read_back, &model).unwrap();
            assert_eq!(again, once, "{}", json);
            assert_eq!(
                render(&again, Dialect::Postgres).unwrap().sql,
                render(&once, Dialect::Postgres).unwrap().sql
            );
        }
    }

    #[test]
    fn test_clone_fidelity() {
        let query = parse_query("SELECT from sap.capire.Books { ID } where stock > 10").unwrap();
        let mut copy = query.clone();
        assert_eq!(copy, query);
        if let Query::Select(s) = &mut copy {
            s.filter.clear();
            s.columns.push(Column::reference("title"));
        }
        assert_ne!(copy, query);
        let Query::Select(original) = &query else {
            unreachable!()
        };
        assert_eq!(original.filter.len(), 3);
        assert_eq!(original.columns.len(), 1);
    }

    #[test]
    fn test_refs_are_alias_qualified_and_linked() {
        let s = flatten("SELECT from sap.capire.Books { title } where stock > 1");
        let Expr::Ref(r) = &s.filter[0] else {
            panic!("expected ref");
        };
        assert_eq!(r.path(), "Books.stock");
        assert_eq!(r.links.as_ref().map(Vec::len), Some(2));
        let Source::Entity { path, alias } = &s.from else {
            panic!("expected table");
        };
        assert_eq!(path.path(), "sap_capire_Books");
        assert_eq!(alias.as_deref(), Some("Books"));
    }

    #[test]
    fn test_wildcard_expansion() {
        let s = flatten("SELECT from sap.capire.Books");
        assert_eq!(
            column_names(&s),
            vec![
                "ID",
                "title",
                "stock",
                "price",
                "author_ID",
                "genre_ID",
                "dedication_addressee_ID",
                "dedication_text",
                "dedication_sub_foo",
                "dedication_sub_bar",
                "image",
                "createdAt",
                "modifiedBy",
            ]
        );
    }

    #[test]
    fn test_explicit_column_replaces_wildcard_entry() {
        let s = flatten("SELECT from sap.capire.Authors { *, upper(name) as name }");
        assert_eq!(column_names(&s), vec!["ID", "name"]);
        assert!(matches!(s.columns[1].expr, Expr::Func(_)));
    }

    #[test]
    fn test_scenario_b_column_elements() {
        let s = flatten(
            "SELECT from sap.capire.Books { ID, author, dedication.addressee, dedication.sub }",
        );
        assert_eq!(
            column_names(&s),
            vec![
                "ID",
                "author_ID",
                "dedication_addressee_ID",
                "dedication_sub_foo",
                "dedication_sub_bar"
            ]
        );
        let element = |i: usize| s.columns[i].element.clone().unwrap();
        assert_eq!((element(0).parent.as_str(), element(0).name.as_str()), ("sap.capire.Books", "ID"));
        assert_eq!((element(1).parent.as_str(), element(1).name.as_str()), ("sap.capire.Authors", "ID"));
        assert_eq!((element(2).parent.as_str(), element(2).name.as_str()), ("sap.capire.Authors", "ID"));
        assert_eq!(element(3).name, "foo");
        assert_eq!(element(4).name, "bar");
        assert_eq!(element(4).type_name(), "cds.Integer");
    }

    #[test]
    fn test_synthetic_elements() {
        let s = flatten("SELECT from sap.capire.Books { count(*) as n, 'x' as tag, 1.5 as factor }");
        let types: Vec<&str> = s
            .columns
            .iter()
            .map(|c| c.element.as_ref().map(|e| e.type_name()).unwrap_or(""))
            .collect();
        assert_eq!(types, vec!["cds.Integer", "cds.String", "cds.Decimal"]);
    }

    #[test]
    fn test_association_navigation_is_rejected() {
        let model = bookshop();
        let query = parse_query("SELECT from sap.capire.Books { author.name }").unwrap();
        let err = cqn4sql(&query, &model).unwrap_err();
        assert!(matches!(err, CqnError::InvalidPath { .. }), "{}", err);

        let query = parse_query("SELECT from sap.capire.Authors { books }").unwrap();
        assert!(cqn4sql(&query, &model).is_err());
    }

    #[test]
    fn test_struct_reference_keeps_leaves() {
        let s = flatten("SELECT from sap.capire.Books { ID } where dedication.sub = ?");
        let Expr::Ref(r) = &s.filter[0] else {
            panic!("expected ref");
        };
        let leaves: Vec<&str> = r.leaves.as_ref().unwrap().iter().map(|l| l.column.as_str()).collect();
        assert_eq!(leaves, vec!["dedication_sub_foo", "dedication_sub_bar"]);
    }

    #[test]
    fn test_order_by_output_alias_and_structs() {
        let s = flatten("SELECT from sap.capire.Books { ID, stock * 2 as double } order by double desc, dedication.sub");
        assert_eq!(s.order_by.len(), 3);
        let Expr::Ref(r) = &s.order_by[0].expr else {
            panic!("expected ref");
        };
        assert!(matches!(
            r.links.as_ref().unwrap()[0].definition,
            Definition::OutputColumn(ref n) if n == "double"
        ));
    }
}
