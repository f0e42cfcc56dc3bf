//! Physical columns of elements: structured flattening and foreign keys.

use std::sync::Arc;

use super::{Element, Entity, Model};
use crate::error::{CqnError, CqnResult};

/// Nesting deeper than this means a foreign key refers back to itself.
const MAX_DEPTH: usize = 16;

/// One physical column of an element.
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    /// Path below the element, e.g. `["sub", "foo"]`; empty for scalars.
    pub path: Vec<String>,
    /// Physical column, e.g. `dedication_sub_foo`.
    pub column: String,
    /// Element typing the column; for foreign keys, the target's key element.
    pub element: Arc<Element>,
}

/// A foreign key column of a managed association.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    /// Path into the target entity, e.g. `["ID"]`.
    pub path: Vec<String>,
    /// Column on the association's side: `author_ID`.
    pub source_column: String,
    /// Column on the target's side: `ID`.
    pub target_column: String,
    pub element: Arc<Element>,
}

fn too_deep(entity: &str, element: &str) -> CqnError {
    CqnError::InvalidModel(format!(
        "foreign keys of '{}.{}' nest too deeply (cyclic keys?)",
        entity, element
    ))
}

impl Model {
    /// Physical columns of `element` in `entity`, named after the element.
    pub fn leaves(&self, entity: &Entity, element: &Arc<Element>) -> CqnResult<Vec<Leaf>> {
        self.leaves_with_prefix(entity, element, &element.name)
    }

    /// Physical columns of `element`, named with an explicit column prefix
    /// (used for elements nested in structures: `dedication_addressee`).
    pub fn leaves_with_prefix(
        &self,
        entity: &Entity,
        element: &Arc<Element>,
        prefix: &str,
    ) -> CqnResult<Vec<Leaf>> {
        let mut out = Vec::new();
        self.collect_leaves(entity, element, prefix, Vec::new(), &mut out, 0)?;
        Ok(out)
    }

    fn collect_leaves(
        &self,
        entity: &Entity,
        element: &Arc<Element>,
        column: &str,
        path: Vec<String>,
        out: &mut Vec<Leaf>,
        depth: usize,
    ) -> CqnResult<()> {
        if depth > MAX_DEPTH {
            return Err(too_deep(&entity.name, &element.name));
        }
        if element.is_virtual {
            return Ok(());
        }
        if let Some(items) = &element.items {
            check_items(entity, element, items)?;
            out.push(Leaf {
                path,
                column: column.to_string(),
                element: element.clone(),
            });
            return Ok(());
        }
        if let Some(children) = &element.elements {
            for child in children {
                let mut child_path = path.clone();
                child_path.push(child.name.clone());
                let child_column = format!("{}_{}", column, child.name);
                self.collect_leaves(entity, child, &child_column, child_path, out, depth + 1)?;
            }
            return Ok(());
        }
        if element.is_association() {
            if element.is_managed() {
                for fk in self.foreign_keys_at(entity, element, column, depth + 1)? {
                    let mut fk_path = path.clone();
                    fk_path.extend(fk.path);
                    out.push(Leaf {
                        path: fk_path,
                        column: fk.source_column,
                        element: fk.element,
                    });
                }
            }
            return Ok(());
        }
        out.push(Leaf {
            path,
            column: column.to_string(),
            element: element.clone(),
        });
        Ok(())
    }

    /// Foreign keys of a managed association; `prefix` is the association's
    /// column prefix (its name, or the structure path to it).
    pub fn foreign_keys(
        &self,
        entity: &Entity,
        association: &Arc<Element>,
        prefix: &str,
    ) -> CqnResult<Vec<ForeignKey>> {
        self.foreign_keys_at(entity, association, prefix, 0)
    }

    fn foreign_keys_at(
        &self,
        entity: &Entity,
        association: &Arc<Element>,
        prefix: &str,
        depth: usize,
    ) -> CqnResult<Vec<ForeignKey>> {
        if depth > MAX_DEPTH {
            return Err(too_deep(&entity.name, &association.name));
        }
        let Some(assoc) = &association.association else {
            return Ok(Vec::new());
        };
        let Some(keys) = &assoc.keys else {
            return Ok(Vec::new());
        };
        let target = self.entity(&assoc.target)?;

        let mut out = Vec::new();
        for key in keys {
            let element = resolve_key(target, &key.path)?;
            let walk = KeyWalk {
                entity,
                association,
                target,
                key_name: key.path.join("."),
            };
            self.collect_foreign_keys(
                &walk,
                &element,
                &format!("{}_{}", prefix, key.name()),
                &key.path.join("_"),
                key.path.clone(),
                &mut out,
                depth,
            )?;
        }
        Ok(out)
    }

    #[allow(clippy::too_many_arguments)]
    fn collect_foreign_keys(
        &self,
        walk: &KeyWalk<'_>,
        element: &Arc<Element>,
        source_column: &str,
        target_column: &str,
        path: Vec<String>,
        out: &mut Vec<ForeignKey>,
        depth: usize,
    ) -> CqnResult<()> {
        if depth > MAX_DEPTH {
            return Err(too_deep(&walk.entity.name, &walk.association.name));
        }
        if element.is_array() {
            return Err(walk.invalid("array-like elements cannot be used as foreign keys"));
        }
        if element.is_unmanaged() {
            return Err(walk.invalid(format!(
                "unmanaged association '{}' cannot be used as foreign key",
                element.name
            )));
        }
        if let Some(children) = &element.elements {
            for child in children {
                let mut child_path = path.clone();
                child_path.push(child.name.clone());
                self.collect_foreign_keys(
                    walk,
                    child,
                    &format!("{}_{}", source_column, child.name),
                    &format!("{}_{}", target_column, child.name),
                    child_path,
                    out,
                    depth + 1,
                )?;
            }
            return Ok(());
        }
        if element.is_association() {
            // Key is itself a managed association: continue into its keys.
            for nested in self.foreign_keys_at(walk.target, element, target_column, depth + 1)? {
                let suffix = nested
                    .source_column
                    .strip_prefix(target_column)
                    .unwrap_or(&nested.source_column)
                    .to_string();
                let mut nested_path = path.clone();
                nested_path.extend(nested.path);
                out.push(ForeignKey {
                    path: nested_path,
                    source_column: format!("{}{}", source_column, suffix),
                    target_column: nested.source_column,
                    element: nested.element,
                });
            }
            return Ok(());
        }
        if element.ty.is_none() && !walk.target.is_external() {
            return Err(CqnError::MissingForeignKeyType {
                entity: walk.entity.name.clone(),
                member: walk.association.name.clone(),
                field: walk.key_name.clone(),
            });
        }
        out.push(ForeignKey {
            path,
            source_column: source_column.to_string(),
            target_column: target_column.to_string(),
            element: element.clone(),
        });
        Ok(())
    }
}

/// Context of one foreign key walk, for error reporting.
struct KeyWalk<'a> {
    entity: &'a Entity,
    association: &'a Arc<Element>,
    target: &'a Arc<Entity>,
    key_name: String,
}

impl KeyWalk<'_> {
    fn invalid(&self, reason: impl Into<String>) -> CqnError {
        CqnError::InvalidForeignKey {
            entity: self.entity.name.clone(),
            association: self.association.name.clone(),
            element: self.key_name.clone(),
            reason: reason.into(),
        }
    }
}

fn resolve_key(target: &Entity, path: &[String]) -> CqnResult<Arc<Element>> {
    let mut segments = path.iter();
    let first = segments.next().ok_or_else(|| {
        CqnError::InvalidModel(format!("empty foreign key path into '{}'", target.name))
    })?;
    let mut current = target
        .element(first)
        .cloned()
        .ok_or_else(|| CqnError::NoSuchElement {
            name: first.clone(),
            parent: target.name.clone(),
        })?;
    for segment in segments {
        current = current
            .child(segment)
            .cloned()
            .ok_or_else(|| CqnError::NoSuchElement {
                name: segment.clone(),
                parent: format!("{}.{}", target.name, current.name),
            })?;
    }
    Ok(current)
}

/// Unmanaged associations cannot live inside array-like elements, at any depth.
fn check_items(entity: &Entity, element: &Element, items: &Element) -> CqnResult<()> {
    if items.is_unmanaged() {
        return Err(CqnError::AssociationInArray {
            entity: entity.name.clone(),
            element: element.name.clone(),
            association: items.name.clone(),
        });
    }
    if let Some(children) = &items.elements {
        for child in children {
            check_items(entity, element, child)?;
        }
    }
    if let Some(nested) = &items.items {
        check_items(entity, element, nested)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;
    use crate::model::fixtures::bookshop;
    use serde_json::json;

    fn columns(leaves: &[Leaf]) -> Vec<&str> {
        leaves.iter().map(|l| l.column.as_str()).collect()
    }

    #[test]
    fn test_structured_leaves() {
        let model = bookshop();
        let books = model.entity("sap.capire.Books").unwrap();
        let dedication = books.element("dedication").unwrap();
        let leaves = model.leaves(books, dedication).unwrap();
        assert_eq!(
            columns(&leaves),
            vec![
                "dedication_addressee_ID",
                "dedication_text",
                "dedication_sub_foo",
                "dedication_sub_bar"
            ]
        );
        // FK leaves are typed by the target's key element.
        assert_eq!(leaves[0].element.parent, "sap.capire.Authors");
        assert_eq!(leaves[0].path, vec!["addressee".to_string(), "ID".to_string()]);
    }

    #[test]
    fn test_implicit_and_nested_foreign_keys() {
        let model = Model::new(vec![
            Entity::new(
                "Orders",
                vec![
                    Element::new("ID", "cds.Integer").key(),
                    Element::association("item", "Items", &["order", "pos"]),
                ],
            ),
            Entity::new(
                "Items",
                vec![
                    Element::association("order", "Orders", &["ID"]).key(),
                    Element::new("pos", "cds.Integer").key(),
                ],
            ),
        ]);
        let orders = model.entity("Orders").unwrap();
        let fks = model
            .foreign_keys(orders, orders.element("item").unwrap(), "item")
            .unwrap();
        let pairs: Vec<(&str, &str)> = fks
            .iter()
            .map(|fk| (fk.source_column.as_str(), fk.target_column.as_str()))
            .collect();
        assert_eq!(pairs, vec![("item_order_ID", "order_ID"), ("item_pos", "pos")]);
    }

    #[test]
    fn test_array_like_key_is_rejected() {
        let model = Model::new(vec![
            Entity::new("A", vec![Element::association("toB", "B", &["ID"])]),
            Entity::new(
                "B",
                vec![Element::array_of("ID", Element::new("item", "cds.Integer")).key()],
            ),
        ]);
        let err = model.validate().unwrap_err();
        assert!(err.to_string().contains("must not be foreign key"), "{}", err);
    }

    #[test]
    fn test_unmanaged_as_foreign_key_is_rejected() {
        let on = vec![Expr::reference("back.ID"), Expr::keyword("="), Expr::reference("$self.ID")];
        let model = Model::new(vec![
            Entity::new(
                "A",
                vec![
                    Element::new("ID", "cds.Integer").key(),
                    Element::association("toB", "B", &["back"]),
                    Element::association("viaStruct", "B", &["nested"]),
                ],
            ),
            Entity::new(
                "B",
                vec![
                    Element::new("ID", "cds.Integer").key(),
                    Element::unmanaged("back", "A", on.clone(), false),
                    Element::structured(
                        "nested",
                        vec![Element::unmanaged("inner", "A", on, false)],
                    ),
                ],
            ),
        ]);
        let a = model.entity("A").unwrap();
        for name in ["toB", "viaStruct"] {
            let err = model.leaves(a, a.element(name).unwrap()).unwrap_err();
            assert!(matches!(err, CqnError::InvalidForeignKey { .. }));
            assert!(err.to_string().contains("must not be foreign key"));
        }
    }

    #[test]
    fn test_unmanaged_in_array_is_rejected() {
        let on = vec![Expr::reference("x.ID"), Expr::keyword("="), Expr::reference("$self.ID")];
        let model = Model::new(vec![Entity::new(
            "A",
            vec![
                Element::new("ID", "cds.Integer").key(),
                Element::array_of(
                    "entries",
                    Element::structured("entry", vec![Element::unmanaged("x", "A", on, false)]),
                ),
            ],
        )]);
        let err = model.validate().unwrap_err();
        assert!(matches!(err, CqnError::AssociationInArray { .. }), "{}", err);
    }

    #[test]
    fn test_missing_key_type() {
        let untyped_key = Element {
            name: "ID".into(),
            key: true,
            ..Default::default()
        };
        let model = Model::new(vec![
            Entity::new("A", vec![Element::association("toB", "B", &["ID"])]),
            Entity::new("B", vec![untyped_key.clone()]),
        ]);
        match model.validate().unwrap_err() {
            CqnError::MissingForeignKeyType { member, field, .. } => {
                assert_eq!(member, "toB");
                assert_eq!(field, "ID");
            }
            other => panic!("unexpected {:?}", other),
        }

        let exempt = Model::new(vec![
            Entity::new("A", vec![Element::association("toB", "B", &["ID"])]),
            Entity::new("B", vec![untyped_key]).annotate("@cds.persistence.skip", json!(true)),
        ]);
        exempt.validate().unwrap();
    }
}
