//! Relinking of flattened statements that lost their `$refLinks`, such as
//! statements read back from the JSON form. Table and column names are
//! already physical; they are looked up in the model again.

use std::sync::Arc;

use super::columns::{argument_type, function_type};
use super::dml::target_ref;
use super::{Compiler, column_ref, literal_type, variable_type};
use crate::ast::*;
use crate::error::{CqnError, CqnResult};
use crate::model::{Element, Entity};
use crate::resolver::Scope;

/// Element path whose column prefix is `name` (`dedication_addressee` →
/// `dedication.addressee`).
fn element_path(elements: &[Arc<Element>], name: &str) -> Option<Vec<String>> {
    elements.iter().find_map(|element| {
        if element.name == name {
            return Some(vec![element.name.clone()]);
        }
        let rest = name.strip_prefix(element.name.as_str())?.strip_prefix('_')?;
        let mut path = element_path(element.elements.as_deref()?, rest)?;
        path.insert(0, element.name.clone());
        Some(path)
    })
}

fn associations_to<'e>(
    elements: &'e [Arc<Element>],
    target: &str,
    out: &mut Vec<&'e Arc<Element>>,
) {
    for element in elements {
        match (&element.association, &element.elements) {
            (Some(assoc), _) if assoc.target == target => out.push(element),
            (None, Some(children)) => associations_to(children, target, out),
            _ => {}
        }
    }
}

/// Association an expand column follows: the one named like the column,
/// else the one its sub-select alias was made from.
fn expand_association(
    entity: &Entity,
    column: &str,
    sub_alias: &str,
    target: &Entity,
) -> Option<Arc<Element>> {
    let mut candidates = Vec::new();
    associations_to(&entity.elements, &target.name, &mut candidates);
    let base = sub_alias.trim_end_matches(|c: char| c.is_ascii_digit());
    candidates
        .iter()
        .find(|e| e.name == column)
        .or_else(|| candidates.iter().find(|e| e.name == base))
        .or_else(|| candidates.first())
        .map(|e| (*e).clone())
}

impl Compiler<'_> {
    pub(crate) fn relink(&mut self, query: &Query) -> CqnResult<Query> {
        Ok(match query {
            Query::Select(s) => Query::Select(self.relink_select(s, &[])?),
            Query::Insert(i) => Query::Insert(self.relink_insert(i)?),
            Query::Upsert(i) => Query::Upsert(self.relink_insert(i)?),
            Query::Update(u) => Query::Update(self.relink_update(u)?),
            Query::Delete(d) => Query::Delete(self.relink_delete(d)?),
            other => other.clone(),
        })
    }

    fn table(&self, path: &Ref) -> CqnResult<Arc<Entity>> {
        let name = path.first().unwrap_or_default();
        self.model
            .by_table(name)
            .cloned()
            .ok_or_else(|| CqnError::NoSuchEntity(name.to_string()))
    }

    /// `outer` are the aliases of enclosing queries, visible to correlated
    /// sub-selects.
    fn relink_select(
        &mut self,
        select: &Select,
        outer: &[(String, Arc<Entity>)],
    ) -> CqnResult<Select> {
        let Source::Entity { path, alias } = &select.from else {
            return Ok(select.clone());
        };
        if path.links.is_some() {
            return Ok(select.clone());
        }
        let entity = self.table(path)?;
        let alias = alias.clone().unwrap_or_else(|| entity.default_alias().to_string());

        let mut scope = Scope::entity(self.model, &alias, entity.clone());
        for (outer_alias, outer_entity) in outer {
            scope = scope.with_source(outer_alias, outer_entity.clone());
        }
        let outputs = select.columns.iter().filter_map(|c| c.alias.clone()).collect();
        let scope = scope.with_outputs(outputs);

        let mut columns = Vec::with_capacity(select.columns.len());
        for column in &select.columns {
            columns.push(self.relink_column(&scope, &entity, column)?);
        }
        let mut order_by = Vec::with_capacity(select.order_by.len());
        for item in &select.order_by {
            order_by.push(OrderBy {
                expr: self.relink_expr(&scope, &item.expr)?,
                ..item.clone()
            });
        }
        let mut with = Vec::with_capacity(select.with.len());
        for w in &select.with {
            with.push(With {
                alias: w.alias.clone(),
                query: self.relink_select(&w.query, &[])?,
            });
        }

        Ok(Select {
            from: Self::table_source(&entity, &alias),
            columns,
            filter: self.relink_tokens(&scope, &select.filter)?,
            group_by: self.relink_tokens(&scope, &select.group_by)?,
            having: self.relink_tokens(&scope, &select.having)?,
            order_by,
            with,
            flattened: true,
            ..select.clone()
        })
    }

    fn relink_column(
        &mut self,
        scope: &Scope<'_>,
        entity: &Entity,
        column: &Column,
    ) -> CqnResult<Column> {
        let mut out = column.clone();
        if let Expr::Select(sub) = &column.expr
            && sub.expand.is_some()
        {
            let relinked = self.relink_select(sub, scope.sources())?;
            let name = column.alias.as_deref().unwrap_or_default();
            let element = match &relinked.from {
                Source::Entity { path, alias } => {
                    let target = self.table(path)?;
                    expand_association(entity, name, alias.as_deref().unwrap_or_default(), &target)
                }
                Source::Subquery { .. } => None,
            };
            out.element = Some(element.ok_or_else(|| {
                CqnError::invalid_path(name, "expand column without a matching association")
            })?);
            out.expr = Expr::Select(Box::new(relinked));
            return Ok(out);
        }

        out.expr = self.relink_expr(scope, &column.expr)?;
        let Some(name) = &column.alias else {
            out.element = None;
            return Ok(out);
        };
        let ty = match (&column.cast, &out.expr) {
            (Some(cast), _) => cast.clone(),
            (None, Expr::Ref(r)) if r.is_variable() => variable_type(&r.path()).to_string(),
            (None, Expr::Ref(r)) => {
                out.element = r
                    .links
                    .as_ref()
                    .and_then(|l| l.last())
                    .and_then(RefLink::as_element)
                    .cloned();
                return Ok(out);
            }
            (None, Expr::Val(v)) => literal_type(v).to_string(),
            (None, Expr::Func(f)) => match function_type(&f.name) {
                Some(ty) => ty.to_string(),
                None => argument_type(&out.expr),
            },
            (None, _) => "cds.String".to_string(),
        };
        out.element = Some(Element::synthetic(name, &ty));
        Ok(out)
    }

    fn relink_tokens(&mut self, scope: &Scope<'_>, tokens: &[Expr]) -> CqnResult<Vec<Expr>> {
        tokens.iter().map(|t| self.relink_expr(scope, t)).collect()
    }

    fn relink_expr(&mut self, scope: &Scope<'_>, expr: &Expr) -> CqnResult<Expr> {
        Ok(match expr {
            Expr::Ref(r) => self.relink_ref(scope, r)?,
            Expr::Func(f) => Expr::Func(Func {
                name: f.name.clone(),
                args: self.relink_tokens(scope, &f.args)?,
            }),
            Expr::Xpr(items) => Expr::Xpr(self.relink_tokens(scope, items)?),
            Expr::List(items) => Expr::List(self.relink_tokens(scope, items)?),
            Expr::Select(s) => Expr::Select(Box::new(self.relink_select(s, scope.sources())?)),
            other => other.clone(),
        })
    }

    /// `alias.column` names a physical column, or the column prefix of a
    /// structure or managed association compared leaf by leaf.
    fn relink_ref(&mut self, scope: &Scope<'_>, r: &Ref) -> CqnResult<Expr> {
        if r.links.is_some() {
            return Ok(Expr::Ref(r.clone()));
        }
        if let [table, column] = r.segments.as_slice()
            && let Some((alias, entity)) = scope.source(table.id()).cloned()
        {
            if let Ok(leaf) = self.physical_leaf(&entity, column.id()) {
                return Ok(column_ref(&alias, &entity, &leaf.column, &leaf.element));
            }
            let path = element_path(&entity.elements, column.id()).ok_or_else(|| {
                CqnError::NoSuchElement {
                    name: column.id().to_string(),
                    parent: entity.name.clone(),
                }
            })?;
            let mut segments = vec![Segment::name(alias.as_str())];
            segments.extend(path.into_iter().map(Segment::name));
            return self.reference(scope, &Ref::new(segments));
        }
        self.reference(scope, r)
    }

    fn relink_insert(&mut self, insert: &Insert) -> CqnResult<Insert> {
        let entity = self.table(&insert.into)?;
        let scope = Scope::entity(self.model, &entity.table_name(), entity.clone());
        let mut elements = Vec::with_capacity(insert.columns.len());
        for column in &insert.columns {
            elements.push(Some(self.physical_leaf(&entity, column)?.element));
        }
        let mut rows = Vec::with_capacity(insert.rows.len());
        for row in &insert.rows {
            rows.push(self.relink_tokens(&scope, row)?);
        }
        let source = match &insert.source {
            Some(s) => Some(Box::new(self.relink_select(s, &[])?)),
            None => None,
        };
        Ok(Insert {
            into: target_ref(&entity, None),
            rows,
            source,
            elements,
            keys: self.key_columns(&entity)?,
            ..insert.clone()
        })
    }

    fn relink_update(&mut self, update: &Update) -> CqnResult<Update> {
        let entity = self.table(&update.entity)?;
        let alias = entity.default_alias().to_string();
        let scope = Scope::entity(self.model, &alias, entity.clone());
        let mut with = Vec::with_capacity(update.with.len());
        for assignment in &update.with {
            with.push(Assignment {
                column: assignment.column.clone(),
                expr: self.relink_expr(&scope, &assignment.expr)?,
                element: Some(self.physical_leaf(&entity, &assignment.column)?.element),
            });
        }
        Ok(Update {
            entity: target_ref(&entity, Some(&alias)),
            with,
            filter: self.relink_tokens(&scope, &update.filter)?,
            keys: self.key_columns(&entity)?,
            ..update.clone()
        })
    }

    fn relink_delete(&mut self, delete: &Delete) -> CqnResult<Delete> {
        let entity = self.table(&delete.from)?;
        let alias = entity.default_alias().to_string();
        let scope = Scope::entity(self.model, &alias, entity.clone());
        Ok(Delete {
            from: target_ref(&entity, Some(&alias)),
            filter: self.relink_tokens(&scope, &delete.filter)?,
            keys: self.key_columns(&entity)?,
            ..delete.clone()
        })
    }
}
