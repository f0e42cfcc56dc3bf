//! Data modification and DDL: object entries become physical columns,
//! managed fields are filled from session variables.

use std::sync::Arc;

use serde_json::Value as Json;
use tracing::debug;

use super::Compiler;
use crate::ast::*;
use crate::error::{CqnError, CqnResult};
use crate::model::{Element, Entity, Leaf};
use crate::resolver::{Flat, Scope};

/// Flattened entry: physical column, value, typing element.
type FlatValue = (String, Value, Arc<Element>);

/// Session variable named by `@cds.on.insert` / `@cds.on.update`.
fn managed_variable(element: &Element, annotation: &str) -> Option<String> {
    let value = element.annotation(annotation)?;
    let name = value
        .get("=")
        .and_then(Json::as_str)
        .or_else(|| value.get("ref").and_then(|r| r.get(0)).and_then(Json::as_str))
        .or_else(|| value.as_str())?;
    Some(match name {
        "$user" => "$user.id".to_string(),
        other => other.to_string(),
    })
}

fn variable_expr(name: &str) -> Expr {
    let r = Ref::from_path(name);
    let links = r
        .segments
        .iter()
        .map(|_| RefLink {
            definition: Definition::Variable(name.to_string()),
            target: None,
            alias: None,
        })
        .collect();
    Expr::Ref(r.with_links(links))
}

/// Plain scalar elements, the only ones that can be managed.
fn scalars(entity: &Entity) -> impl Iterator<Item = &Arc<Element>> {
    entity
        .elements
        .iter()
        .filter(|e| !e.is_virtual && !e.is_structured() && !e.is_association())
}

pub(super) fn target_ref(entity: &Arc<Entity>, alias: Option<&str>) -> Ref {
    Ref::entity(&entity.table_name()).with_links(vec![RefLink {
        definition: Definition::Entity(entity.clone()),
        target: Some(entity.clone()),
        alias: alias.map(str::to_string),
    }])
}

impl Compiler<'_> {
    /// DML target: a single entity segment, optionally filtered.
    fn target(&self, r: &Ref) -> CqnResult<(Arc<Entity>, Option<Vec<Expr>>)> {
        match r.segments.as_slice() {
            [segment] => Ok((
                self.model.entity(segment.id())?.clone(),
                segment.filter().map(<[Expr]>::to_vec),
            )),
            _ => Err(CqnError::unsupported(format!(
                "navigation in the target of a data modification: '{}'",
                r.path()
            ))),
        }
    }

    /// Every physical column of a table with its top-level element.
    fn table_leaves(&self, entity: &Arc<Entity>) -> CqnResult<Vec<(Arc<Element>, Leaf)>> {
        let mut out = Vec::new();
        for element in entity.elements.iter().filter(|e| !e.is_virtual) {
            for leaf in self.model.leaves(entity, element)? {
                out.push((element.clone(), leaf));
            }
        }
        Ok(out)
    }

    pub(super) fn physical_leaf(&self, entity: &Arc<Entity>, column: &str) -> CqnResult<Leaf> {
        self.table_leaves(entity)?
            .into_iter()
            .map(|(_, leaf)| leaf)
            .find(|leaf| leaf.column == column)
            .ok_or_else(|| CqnError::NoSuchElement {
                name: column.to_string(),
                parent: entity.name.clone(),
            })
    }

    /// Flatten one entry into physical columns.
    fn flat_record(&self, entity: &Arc<Entity>, record: &Record) -> CqnResult<Vec<FlatValue>> {
        let mut out = Vec::new();
        for element in &entity.elements {
            if let Some(value) = record.get(&element.name) {
                self.flat_value(entity, element, &element.name, value, &mut out)?;
            }
        }
        // Physical column names (`author_ID`) are accepted as well.
        for (name, value) in record {
            if entity.element(name).is_some() || out.iter().any(|(c, _, _)| c == name) {
                continue;
            }
            match self.physical_leaf(entity, name) {
                Ok(leaf) => out.push((leaf.column, value.clone(), leaf.element)),
                Err(_) => debug!("Ignoring unknown field '{}' of {}", name, entity.name),
            }
        }
        Ok(out)
    }

    fn flat_value(
        &self,
        entity: &Arc<Entity>,
        element: &Arc<Element>,
        column: &str,
        value: &Value,
        out: &mut Vec<FlatValue>,
    ) -> CqnResult<()> {
        if element.is_virtual {
            return Ok(());
        }
        if let Some(children) = &element.elements {
            return match value {
                Value::Object(fields) => {
                    for child in children {
                        if let Some(v) = fields.get(&child.name) {
                            self.flat_value(entity, child, &format!("{}_{}", column, child.name), v, out)?;
                        }
                    }
                    Ok(())
                }
                Value::Null => {
                    for leaf in self.model.leaves_with_prefix(entity, element, column)? {
                        out.push((leaf.column, Value::Null, leaf.element));
                    }
                    Ok(())
                }
                other => Err(CqnError::InvalidQuery(format!(
                    "structured element '{}' expects an object, got {}",
                    column, other
                ))),
            };
        }
        if element.is_association() {
            if !element.is_managed() || element.is_many() {
                debug!("Skipping deep data for association '{}' of {}", column, entity.name);
                return Ok(());
            }
            let fks = self.model.foreign_keys(entity, element, column)?;
            match value {
                Value::Object(_) => {
                    for fk in fks {
                        if let Some(v) = value.at_path(&fk.path) {
                            out.push((fk.source_column, v.clone(), fk.element));
                        }
                    }
                }
                Value::Null => {
                    for fk in fks {
                        out.push((fk.source_column, Value::Null, fk.element));
                    }
                }
                scalar if fks.len() == 1 => {
                    if let Some(fk) = fks.into_iter().next() {
                        out.push((fk.source_column, scalar.clone(), fk.element));
                    }
                }
                other => {
                    return Err(CqnError::InvalidQuery(format!(
                        "association '{}' expects an object with its keys, got {}",
                        column, other
                    )));
                }
            }
            return Ok(());
        }
        let value = match (element.is_array(), value) {
            (true, Value::Array(_)) => Value::String(serde_json::to_string(&value.to_json())?),
            _ => value.clone(),
        };
        out.push((column.to_string(), value, element.clone()));
        Ok(())
    }

    pub(super) fn key_columns(&self, entity: &Arc<Entity>) -> CqnResult<Vec<String>> {
        let mut keys = Vec::new();
        for key in entity.keys() {
            keys.extend(self.model.leaves(entity, key)?.into_iter().map(|l| l.column));
        }
        Ok(keys)
    }

    pub(crate) fn insert(&mut self, insert: &Insert, upsert: bool) -> CqnResult<Insert> {
        if insert.flattened {
            return Ok(insert.clone());
        }
        let (entity, filter) = self.target(&insert.into)?;
        if filter.is_some() {
            return Err(CqnError::unsupported("filters on the target of an INSERT"));
        }
        let alias = entity.table_name();
        let scope = Scope::entity(self.model, &alias, entity.clone());

        let mut columns: Vec<(String, Arc<Element>)> = Vec::new();
        let mut rows: Vec<Vec<Expr>> = Vec::new();

        if !insert.entries.is_empty() {
            let flat = insert
                .entries
                .iter()
                .map(|entry| self.flat_record(&entity, entry))
                .collect::<CqnResult<Vec<_>>>()?;
            for (_, leaf) in self.table_leaves(&entity)? {
                if flat.iter().any(|row| row.iter().any(|(c, _, _)| *c == leaf.column)) {
                    columns.push((leaf.column, leaf.element));
                }
            }
            for row in &flat {
                rows.push(
                    columns
                        .iter()
                        .map(|(column, element)| {
                            let value = row
                                .iter()
                                .find(|(c, _, _)| c == column)
                                .map(|(_, v, _)| v.clone())
                                .or_else(|| element.default.clone())
                                .unwrap_or(Value::Null);
                            Expr::Val(value)
                        })
                        .collect(),
                );
            }
        } else {
            for name in &insert.columns {
                let leaf = self.physical_leaf(&entity, name)?;
                columns.push((leaf.column, leaf.element));
            }
            for row in &insert.rows {
                if row.len() != columns.len() {
                    return Err(CqnError::InvalidQuery(format!(
                        "INSERT row has {} values for {} columns",
                        row.len(),
                        columns.len()
                    )));
                }
                rows.push(row.iter().map(|v| self.expr(&scope, v)).collect::<CqnResult<_>>()?);
            }
        }

        if !rows.is_empty() {
            let annotations: &[&str] = if upsert {
                &["@cds.on.insert", "@cds.on.update"]
            } else {
                &["@cds.on.insert"]
            };
            for element in scalars(&entity) {
                if columns.iter().any(|(c, _)| *c == element.name) {
                    continue;
                }
                let Some(variable) = annotations.iter().find_map(|a| managed_variable(element, a)) else {
                    continue;
                };
                columns.push((element.name.clone(), element.clone()));
                for row in rows.iter_mut() {
                    row.push(variable_expr(&variable));
                }
            }
        }

        let source = match &insert.source {
            Some(s) => Some(Box::new(self.select(s)?)),
            None => None,
        };

        Ok(Insert {
            into: target_ref(&entity, None),
            elements: columns.iter().map(|(_, e)| Some(e.clone())).collect(),
            columns: columns.into_iter().map(|(c, _)| c).collect(),
            rows,
            entries: Vec::new(),
            source,
            keys: self.key_columns(&entity)?,
            flattened: true,
            internal: insert.internal,
        })
    }

    pub(crate) fn update(&mut self, update: &Update) -> CqnResult<Update> {
        if update.flattened {
            return Ok(update.clone());
        }
        let (entity, target_filter) = self.target(&update.entity)?;
        let alias = self.unique_alias(entity.default_alias());
        let scope = Scope::entity(self.model, &alias, entity.clone());
        let keys = self.key_columns(&entity)?;

        let mut with: Vec<Assignment> = self
            .flat_record(&entity, &update.data)?
            .into_iter()
            .map(|(column, value, element)| Assignment {
                column,
                expr: Expr::Val(value),
                element: Some(element),
            })
            .collect();

        for assignment in &update.with {
            let (column, element) = match scope.flatten(&Ref::from_path(&assignment.column))?.0 {
                Flat::Columns { leaves, .. } if leaves.len() == 1 && leaves[0].path.is_empty() => {
                    (leaves[0].column.clone(), leaves[0].element.clone())
                }
                _ => {
                    return Err(CqnError::InvalidQuery(format!(
                        "'{}' cannot be assigned an expression",
                        assignment.column
                    )));
                }
            };
            let compiled = Assignment {
                column,
                expr: self.expr(&scope, &assignment.expr)?,
                element: Some(element),
            };
            match with.iter_mut().find(|a| a.column == compiled.column) {
                Some(existing) => *existing = compiled,
                None => with.push(compiled),
            }
        }

        let mut filter = match &target_filter {
            Some(f) => self.tokens(&scope, f)?,
            None => Vec::new(),
        };
        filter = Expr::and(filter, self.tokens(&scope, &update.filter)?);

        // Without a filter, key values in the data identify the row.
        if filter.is_empty() && !keys.is_empty() && keys.iter().all(|k| with.iter().any(|a| a.column == *k)) {
            for key in &keys {
                if let Some(position) = with.iter().position(|a| a.column == *key) {
                    let assignment = with.remove(position);
                    let element = assignment
                        .element
                        .clone()
                        .unwrap_or_else(|| Element::synthetic(key, "cds.String"));
                    filter = Expr::and(
                        filter,
                        vec![
                            super::column_ref(&alias, &entity, key, &element),
                            Expr::keyword("="),
                            assignment.expr,
                        ],
                    );
                }
            }
        }

        if !with.is_empty() {
            for element in scalars(&entity) {
                if with.iter().any(|a| a.column == element.name) {
                    continue;
                }
                if let Some(variable) = managed_variable(element, "@cds.on.update") {
                    with.push(Assignment {
                        column: element.name.clone(),
                        expr: variable_expr(&variable),
                        element: Some(element.clone()),
                    });
                }
            }
        }

        Ok(Update {
            entity: target_ref(&entity, Some(&alias)),
            data: Record::new(),
            with,
            filter,
            keys,
            flattened: true,
            internal: update.internal,
        })
    }

    pub(crate) fn delete(&mut self, delete: &Delete) -> CqnResult<Delete> {
        if delete.flattened {
            return Ok(delete.clone());
        }
        let (entity, target_filter) = self.target(&delete.from)?;
        let alias = self.unique_alias(entity.default_alias());
        let scope = Scope::entity(self.model, &alias, entity.clone());
        let mut filter = match &target_filter {
            Some(f) => self.tokens(&scope, f)?,
            None => Vec::new(),
        };
        filter = Expr::and(filter, self.tokens(&scope, &delete.filter)?);
        Ok(Delete {
            from: target_ref(&entity, Some(&alias)),
            filter,
            keys: self.key_columns(&entity)?,
            flattened: true,
            internal: delete.internal,
        })
    }

    pub(crate) fn create(&mut self, create: &CreateTable) -> CqnResult<CreateTable> {
        if create.table.is_some() {
            return Ok(create.clone());
        }
        let entity = self.model.entity(&create.entity)?.clone();
        if entity.is_external() {
            return Err(CqnError::unsupported(format!(
                "'{}' is not persisted by this service",
                entity.name
            )));
        }
        let mut columns = Vec::new();
        for (top, leaf) in self.table_leaves(&entity)? {
            // Foreign key columns borrow the target key's type, not its
            // constraints or default.
            let element = if top.is_association() {
                Arc::new(Element {
                    key: false,
                    not_null: false,
                    default: None,
                    annotations: Default::default(),
                    ..(*leaf.element).clone()
                })
            } else {
                leaf.element
            };
            columns.push(ColumnDef {
                name: leaf.column,
                element,
                key: top.key,
                not_null: top.key || top.not_null,
            });
        }
        if columns.is_empty() {
            return Err(CqnError::InvalidModel(format!("entity '{}' has no columns", entity.name)));
        }
        Ok(CreateTable {
            entity: create.entity.clone(),
            table: Some(TableDef {
                name: entity.table_name(),
                columns,
            }),
        })
    }

    pub(crate) fn drop_table(&mut self, drop: &DropTable) -> CqnResult<DropTable> {
        if drop.table.is_some() {
            return Ok(drop.clone());
        }
        let entity = self.model.entity(&drop.entity)?;
        Ok(DropTable {
            entity: drop.entity.clone(),
            table: Some(entity.table_name()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::cqn4sql;
    use crate::ast::*;
    use crate::model::fixtures::bookshop;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        match Value::from_json(&value) {
            Value::Object(r) => r,
            other => panic!("expected object, got {:?}", other),
        }
    }

    fn flatten(query: Query) -> Query {
        cqn4sql(&query, &bookshop()).unwrap()
    }

    #[test]
    fn test_insert_entries_flatten_structures_and_foreign_keys() {
        let query = Query::Insert(Insert::into("sap.capire.Books").entries(vec![
            record(json!({ "ID": 1, "title": "Raven", "author": { "ID": 150 }, "dedication": { "sub": { "foo": "x" } } })),
            record(json!({ "ID": 2, "author_ID": 42, "rating": 5 })),
        ]));
        let Query::Insert(insert) = flatten(query) else {
            panic!("expected insert");
        };
        assert_eq!(
            insert.columns,
            vec!["ID", "title", "author_ID", "dedication_sub_foo", "createdAt", "modifiedBy"]
        );
        assert_eq!(insert.rows[0][2], Expr::Val(Value::Int(150)));
        assert_eq!(insert.rows[1][1], Expr::Val(Value::Null));
        assert_eq!(insert.rows[1][2], Expr::Val(Value::Int(42)));
        let Expr::Ref(user) = &insert.rows[0][5] else {
            panic!("expected variable");
        };
        assert_eq!(user.path(), "$user.id");
        assert_eq!(insert.keys, vec!["ID"]);
        assert_eq!(insert.into.path(), "sap_capire_Books");
        assert_eq!(insert.elements.len(), insert.columns.len());
        assert!(insert.entries.is_empty());
    }

    #[test]
    fn test_insert_columns_and_rows() {
        let query = Query::Insert(
            Insert::into("sap.capire.Authors")
                .columns(&["ID", "name"])
                .rows(vec![vec![Expr::val(1), Expr::val("Poe")]]),
        );
        let Query::Insert(insert) = flatten(query) else {
            panic!("expected insert");
        };
        assert_eq!(insert.columns, vec!["ID", "name"]);
        assert_eq!(insert.rows.len(), 1);
    }

    #[test]
    fn test_upsert_fills_update_managed_fields() {
        let query = Query::Upsert(
            Insert::into("sap.capire.Books").entries(vec![record(json!({ "ID": 1, "modifiedBy": "me" }))]),
        );
        let Query::Upsert(insert) = flatten(query) else {
            panic!("expected upsert");
        };
        assert_eq!(insert.columns, vec!["ID", "modifiedBy", "createdAt"]);
    }

    #[test]
    fn test_update_moves_keys_into_where() {
        let query = Query::Update(
            Update::entity("sap.capire.Books").data(record(json!({ "ID": 7, "stock": 3, "dedication": { "text": "hi" } }))),
        );
        let Query::Update(update) = flatten(query) else {
            panic!("expected update");
        };
        let columns: Vec<&str> = update.with.iter().map(|a| a.column.as_str()).collect();
        assert_eq!(columns, vec!["stock", "dedication_text", "modifiedBy"]);
        assert_eq!(update.filter.len(), 3);
        let Expr::Ref(key) = &update.filter[0] else {
            panic!("expected ref");
        };
        assert_eq!(key.path(), "Books.ID");
        assert_eq!(update.entity.links.as_ref().unwrap()[0].alias.as_deref(), Some("Books"));
    }

    #[test]
    fn test_update_expression_assignment() {
        let query = Query::Update(
            Update::entity("sap.capire.Books")
                .set("stock", Expr::Xpr(vec![Expr::reference("stock"), Expr::keyword("-"), Expr::val(1)]))
                .filter(vec![Expr::reference("ID"), Expr::keyword("="), Expr::val(1)]),
        );
        let Query::Update(update) = flatten(query) else {
            panic!("expected update");
        };
        let Expr::Xpr(tokens) = &update.with[0].expr else {
            panic!("expected expression");
        };
        assert_eq!(tokens[0].as_reference().map(Ref::path).as_deref(), Some("Books.stock"));
    }

    #[test]
    fn test_delete_with_exists() {
        let query = crate::parser::parse_query("DELETE from sap.capire.Authors where not exists books").unwrap();
        let Query::Delete(delete) = flatten(query) else {
            panic!("expected delete");
        };
        assert!(delete.filter[0].is_keyword("not"));
        assert!(matches!(delete.filter[2], Expr::Select(_)));
    }

    #[test]
    fn test_create_table_definition() {
        let Query::Create(create) = flatten(Query::Create(CreateTable::entity("sap.capire.Books"))) else {
            panic!("expected create");
        };
        let table = create.table.unwrap();
        assert_eq!(table.name, "sap_capire_Books");
        let id = &table.columns[0];
        assert!(id.key && id.not_null);
        let author = table.columns.iter().find(|c| c.name == "author_ID").unwrap();
        assert!(!author.key);
        assert_eq!(author.element.type_name(), "cds.Integer");
        assert!(table.columns.iter().any(|c| c.name == "secret"));
        assert!(!table.columns.iter().any(|c| c.name == "rating"));
    }
}
