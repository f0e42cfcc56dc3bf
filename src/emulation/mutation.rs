//! Per-row fallback for UPDATE and DELETE filters the database cannot run.
//!
//! The affected keys are selected first, then one statement per key is
//! executed. Every statement is awaited even after a failure; the first
//! error is returned at the end. Nothing is rolled back here: the caller's
//! transaction decides.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::ast::*;
use crate::cqn4sql::column_ref;
use crate::error::{CqnError, CqnResult};
use crate::model::{Element, Entity};

use super::{EmulationConfig, Runner, Stage};

/// Run a flattened data modification, falling back to per-row statements
/// when its filter must be emulated.
pub async fn run_mutation<R: Runner + ?Sized>(
    runner: &mut R,
    query: &Query,
    config: &EmulationConfig,
) -> CqnResult<u64> {
    let (target, filter, keys) = match query {
        Query::Update(u) => (&u.entity, &u.filter, &u.keys),
        Query::Delete(d) => (&d.from, &d.filter, &d.keys),
        _ => return runner.affected(query).await,
    };
    if query.is_internal() || filter.is_empty() || !config.is_forced(Stage::Where) {
        return runner.affected(query).await;
    }
    if keys.is_empty() {
        return Err(CqnError::unsupported(format!(
            "per-row {} on '{}' needs a primary key",
            query.kind(),
            target.path()
        )));
    }

    let (entity, alias) = target_entity(target)?;
    let impact = impact_select(target, &entity, &alias, filter, keys);
    let rows = runner.rows(&impact).await?;
    debug!("{} on '{}' runs per row for {} rows", query.kind(), target.path(), rows.len());

    let mut affected = 0;
    let mut first_error = None;
    for row in &rows {
        let mut by_key = Vec::new();
        for key in keys {
            let value = Value::from_json(row.get(key).unwrap_or(&serde_json::Value::Null));
            by_key = Expr::and(
                by_key,
                vec![
                    column_ref(&alias, &entity, key, &key_element(&entity, key)),
                    Expr::keyword("="),
                    Expr::Val(value),
                ],
            );
        }
        let single = match query {
            Query::Update(u) => Query::Update(Update {
                filter: by_key,
                internal: true,
                ..u.clone()
            }),
            Query::Delete(d) => Query::Delete(Delete {
                filter: by_key,
                internal: true,
                ..d.clone()
            }),
            other => other.clone(),
        };
        match runner.affected(&single).await {
            Ok(n) => affected += n,
            Err(e) => {
                warn!("per-row {} failed: {}", query.kind(), e);
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(affected),
    }
}

fn target_entity(target: &Ref) -> CqnResult<(Arc<Entity>, String)> {
    let link = target
        .links
        .as_ref()
        .and_then(|l| l.first())
        .ok_or_else(|| CqnError::InvalidQuery(format!("'{}' is not linked", target.path())))?;
    let Definition::Entity(entity) = &link.definition else {
        return Err(CqnError::InvalidQuery(format!("'{}' is not an entity", target.path())));
    };
    let alias = link.alias.clone().unwrap_or_else(|| entity.table_name());
    Ok((entity.clone(), alias))
}

fn key_element(entity: &Entity, key: &str) -> Arc<Element> {
    entity
        .element(key)
        .cloned()
        .unwrap_or_else(|| Element::synthetic(key, "cds.String"))
}

/// `SELECT keys FROM target WHERE filter`
fn impact_select(
    target: &Ref,
    entity: &Arc<Entity>,
    alias: &str,
    filter: &[Expr],
    keys: &[String],
) -> Select {
    let mut select = Select::from_source(Source::Entity {
        path: target.clone(),
        alias: Some(alias.to_string()),
    });
    select.columns = keys
        .iter()
        .map(|key| {
            let element = key_element(entity, key);
            let mut column = Column::new(column_ref(alias, entity, key, &element)).alias(key.clone());
            column.element = Some(element);
            column
        })
        .collect();
    select.filter = filter.to_vec();
    select.flattened = true;
    select.internal = true;
    select
}
