//! `@assert.range` and `@mandatory` checks.
//!
//! After a write, every annotated element the statement touched is checked
//! by one sub-select per element that returns a row for each violating
//! record. The sub-selects are combined with `UNION ALL` and run inside the
//! same transaction, so a violation rolls the write back.

use std::sync::Arc;

use serde_json::Value as Json;
use tracing::debug;

use crate::ast::*;
use crate::cqn4sql::{Compiler, column_ref};
use crate::driver::Row;
use crate::error::{CqnError, CqnResult, ErrorCode};
use crate::model::{Element, Entity};

/// Checks for one flattened write.
#[derive(Debug, Clone)]
pub struct Checks {
    pub entity: String,
    pub selects: Vec<Select>,
}

impl Checks {
    pub fn is_empty(&self) -> bool {
        self.selects.is_empty()
    }

    /// First violation reported by the checks, as an error.
    pub fn raise(&self, rows: &[Row]) -> CqnResult<()> {
        let Some(row) = rows.first() else {
            return Ok(());
        };
        let text = |column: &str| row.get(column).and_then(Json::as_str).unwrap_or_default().to_string();
        Err(CqnError::Assertion {
            code: ErrorCode::AssertionFailed,
            entity: self.entity.clone(),
            element: text("element"),
            message: text("message"),
        })
    }
}

/// Build the checks for a flattened INSERT, UPSERT or UPDATE. Other
/// statements never carry any.
pub fn checks(query: &Query) -> CqnResult<Checks> {
    match query {
        Query::Insert(insert) | Query::Upsert(insert) => insert_checks(insert),
        Query::Update(update) => update_checks(update),
        other => Ok(Checks {
            entity: other.entity_name().unwrap_or_default(),
            selects: Vec::new(),
        }),
    }
}

fn target_entity(target: &Ref) -> CqnResult<(Arc<Entity>, Option<String>)> {
    match target.links.as_ref().and_then(|l| l.first()) {
        Some(RefLink {
            definition: Definition::Entity(entity),
            alias,
            ..
        }) => Ok((entity.clone(), alias.clone())),
        _ => Err(CqnError::InvalidQuery(format!(
            "'{}' must be flattened before its assertions are built",
            target.path()
        ))),
    }
}

fn insert_checks(insert: &Insert) -> CqnResult<Checks> {
    let (entity, _) = target_entity(&insert.into)?;
    let mut checks = Checks {
        entity: entity.name.clone(),
        selects: Vec::new(),
    };
    // Rows written by INSERT ... SELECT cannot be told apart by key.
    if insert.source.is_some() || insert.rows.is_empty() {
        return Ok(checks);
    }
    let alias = entity.default_alias().to_string();
    let Some(scope) = inserted_rows(insert, &entity, &alias) else {
        return Ok(checks);
    };

    for element in annotated(&entity) {
        let written = insert.columns.iter().any(|c| *c == element.name);
        if let Some(predicate) = violation(&alias, &entity, element, written, true)? {
            checks.selects.push(check_select(&entity, &alias, element, predicate, scope.clone()));
        }
    }
    debug!("{} assertion(s) for INSERT into {}", checks.selects.len(), entity.name);
    Ok(checks)
}

fn update_checks(update: &Update) -> CqnResult<Checks> {
    let (entity, alias) = target_entity(&update.entity)?;
    let alias = alias.unwrap_or_else(|| entity.default_alias().to_string());
    let mut checks = Checks {
        entity: entity.name.clone(),
        selects: Vec::new(),
    };
    for element in annotated(&entity) {
        let written = update.with.iter().any(|a| a.column == element.name);
        if let Some(predicate) = violation(&alias, &entity, element, written, false)? {
            checks
                .selects
                .push(check_select(&entity, &alias, element, predicate, update.filter.clone()));
        }
    }
    debug!("{} assertion(s) for UPDATE of {}", checks.selects.len(), entity.name);
    Ok(checks)
}

fn annotated(entity: &Entity) -> impl Iterator<Item = &Arc<Element>> {
    entity.elements.iter().filter(|e| {
        !e.is_virtual
            && !e.is_association()
            && !e.is_structured()
            && (e.has_annotation("@mandatory") || e.annotation("@assert.range").is_some())
    })
}

/// Predicate that holds for a violating row. Range checks apply only to
/// written columns; an INSERT must fill every mandatory column.
fn violation(
    alias: &str,
    entity: &Arc<Entity>,
    element: &Arc<Element>,
    written: bool,
    insert: bool,
) -> CqnResult<Option<Vec<Expr>>> {
    let column = || column_ref(alias, entity, &element.name, element);
    let mut predicate = Vec::new();

    if element.has_annotation("@mandatory") && (written || insert) {
        predicate.extend([column(), Expr::keyword("is"), Expr::keyword("null")]);
        if element.type_name() == "cds.String" {
            predicate.extend([Expr::keyword("or"), column(), Expr::keyword("="), Expr::val("")]);
        }
    }

    if let Some(range) = element.annotation("@assert.range").filter(|_| written) {
        let (min, max) = match range.as_array().map(Vec::as_slice) {
            Some([min, max]) => (Value::from_json(min), Value::from_json(max)),
            _ => {
                return Err(CqnError::InvalidModel(format!(
                    "@assert.range of '{}.{}' must be [min, max]",
                    entity.name, element.name
                )));
            }
        };
        if !predicate.is_empty() {
            predicate.push(Expr::keyword("or"));
        }
        predicate.extend([
            column(),
            Expr::keyword("<"),
            Expr::Val(min),
            Expr::keyword("or"),
            column(),
            Expr::keyword(">"),
            Expr::Val(max),
        ]);
    }

    Ok((!predicate.is_empty()).then_some(predicate))
}

fn check_select(
    entity: &Arc<Entity>,
    alias: &str,
    element: &Element,
    predicate: Vec<Expr>,
    scope: Vec<Expr>,
) -> Select {
    let message = match element.annotation("@assert.range") {
        Some(range) => format!("Value must be within {}", range),
        None => "Value is required".to_string(),
    };
    let mut select = Select::from_source(Compiler::table_source(entity, alias)).columns(vec![
        Column::new(Expr::val(element.name.clone())).alias("element"),
        Column::new(Expr::val(message)).alias("message"),
    ]);
    select.filter = Expr::and(vec![Expr::Xpr(predicate)], scope);
    select.flattened = true;
    select.internal = true;
    select
}

/// `key in (...)` over the inserted rows, or `None` when a key column is
/// not part of the insert.
fn inserted_rows(insert: &Insert, entity: &Arc<Entity>, alias: &str) -> Option<Vec<Expr>> {
    let mut keys = Vec::with_capacity(insert.keys.len());
    for key in &insert.keys {
        let position = insert.columns.iter().position(|c| c == key)?;
        let element = insert
            .elements
            .get(position)
            .cloned()
            .flatten()
            .unwrap_or_else(|| Element::synthetic(key, "cds.String"));
        keys.push((position, column_ref(alias, entity, key, &element)));
    }
    match keys.as_slice() {
        [] => None,
        [(position, column)] => Some(vec![
            column.clone(),
            Expr::keyword("in"),
            Expr::List(insert.rows.iter().map(|row| row[*position].clone()).collect()),
        ]),
        _ => {
            let mut any = Vec::new();
            for row in &insert.rows {
                let mut all = Vec::new();
                for (position, column) in &keys {
                    all = Expr::and(all, vec![column.clone(), Expr::keyword("="), row[*position].clone()]);
                }
                if !any.is_empty() {
                    any.push(Expr::keyword("or"));
                }
                any.push(Expr::Xpr(all));
            }
            Some(vec![Expr::Xpr(any)])
        }
    }
}
