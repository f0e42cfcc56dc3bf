//! Loading the linked model from CSN JSON.

use std::sync::Arc;

use serde_json::{Map, Value as Json};
use tracing::debug;

use super::{Annotations, Association, Element, Entity, ForeignKeyRef, Model};
use crate::ast::Value;
use crate::ast::json::parse_expr;
use crate::error::{CqnError, CqnResult};

/// Named type chains deeper than this are treated as cyclic.
const MAX_TYPE_DEPTH: usize = 32;

fn invalid(message: impl Into<String>) -> CqnError {
    CqnError::InvalidModel(message.into())
}

fn annotations(def: &Json) -> Annotations {
    def.as_object()
        .map(|obj| {
            obj.iter()
                .filter(|(k, _)| k.starts_with('@'))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default()
}

fn number(def: &Json, key: &str) -> Option<u32> {
    def.get(key)
        .and_then(Json::as_u64)
        .and_then(|n| u32::try_from(n).ok())
}

fn flag(def: &Json, key: &str) -> bool {
    def.get(key).and_then(Json::as_bool).unwrap_or(false)
}

impl Model {
    /// Link a CSN document: `{"definitions": {"Books": {"kind": "entity", ...}}}`.
    ///
    /// Named types are inlined, managed to-one associations without explicit
    /// `keys` get the target's primary key.
    pub fn from_csn(csn: &Json) -> CqnResult<Model> {
        let definitions = csn
            .get("definitions")
            .and_then(Json::as_object)
            .ok_or_else(|| invalid("CSN has no 'definitions'"))?;

        let linker = Linker { definitions };
        let mut entities = Vec::new();
        for (name, def) in definitions {
            let kind = def.get("kind").and_then(Json::as_str).unwrap_or("entity");
            if kind != "entity" {
                continue;
            }
            let elements = def
                .get("elements")
                .and_then(Json::as_object)
                .ok_or_else(|| invalid(format!("entity '{}' has no elements", name)))?;
            let mut linked = Vec::with_capacity(elements.len());
            for (element_name, element_def) in elements {
                linked.push(linker.element(name, element_name, element_def, 0)?);
            }
            let mut entity = Entity::new(name, linked);
            entity.annotations = annotations(def);
            entities.push(entity);
        }
        debug!("Linked {} entities from CSN", entities.len());
        Ok(Model::new(entities))
    }
}

struct Linker<'a> {
    definitions: &'a Map<String, Json>,
}

impl Linker<'_> {
    fn element(&self, entity: &str, name: &str, def: &Json, depth: usize) -> CqnResult<Element> {
        if depth > MAX_TYPE_DEPTH {
            return Err(invalid(format!(
                "type of '{}.{}' does not resolve (cyclic type definition?)",
                entity, name
            )));
        }

        let mut element = Element {
            name: name.to_string(),
            parent: entity.to_string(),
            ..Default::default()
        };

        // Named types contribute their definition; local properties win.
        if let Some(ty) = def.get("type").and_then(Json::as_str)
            && !ty.starts_with("cds.")
        {
            let named = self
                .definitions
                .get(ty)
                .ok_or_else(|| invalid(format!("unknown type '{}' of '{}.{}'", ty, entity, name)))?;
            element = self.element(entity, name, named, depth + 1)?;
        } else if let Some(ty) = def.get("type").and_then(Json::as_str) {
            element.ty = Some(ty.to_string());
        }

        element.key |= flag(def, "key");
        element.is_virtual |= flag(def, "virtual");
        element.not_null |= flag(def, "notNull");
        element.unique |= flag(def, "unique");
        element.length = number(def, "length").or(element.length);
        element.precision = number(def, "precision").or(element.precision);
        element.scale = number(def, "scale").or(element.scale);
        if let Some(default) = def.get("default") {
            element.default = Some(Value::from_json(default.get("val").unwrap_or(default)));
        }
        element.annotations.extend(annotations(def));

        if let Some(children) = def.get("elements").and_then(Json::as_object) {
            let mut nested = Vec::with_capacity(children.len());
            for (child_name, child_def) in children {
                nested.push(Arc::new(self.element(entity, child_name, child_def, depth + 1)?));
            }
            element.ty = None;
            element.elements = Some(nested);
        }

        if let Some(items) = def.get("items") {
            element.items = Some(Arc::new(self.element(entity, name, items, depth + 1)?));
            element.ty = Some("cds.LargeString".into());
        }

        if let Some(target) = def.get("target").and_then(Json::as_str) {
            element.association = Some(self.association(entity, name, target, def)?);
        }
        Ok(element)
    }

    fn association(
        &self,
        entity: &str,
        name: &str,
        target: &str,
        def: &Json,
    ) -> CqnResult<Association> {
        let many = match def.get("cardinality").and_then(|c| c.get("max")) {
            Some(Json::String(max)) => max == "*",
            Some(Json::Number(max)) => max.as_u64().map(|m| m > 1).unwrap_or(false),
            _ => false,
        };
        let composition = def.get("type").and_then(Json::as_str) == Some("cds.Composition");

        let on = match def.get("on").and_then(Json::as_array) {
            Some(tokens) => Some(tokens.iter().map(parse_expr).collect::<CqnResult<Vec<_>>>()?),
            None => None,
        };

        let keys = if on.is_some() {
            None
        } else if let Some(keys) = def.get("keys").and_then(Json::as_array) {
            let mut refs = Vec::with_capacity(keys.len());
            for key in keys {
                let path = key
                    .get("ref")
                    .and_then(Json::as_array)
                    .ok_or_else(|| invalid(format!("foreign key of '{}.{}' needs a ref", entity, name)))?
                    .iter()
                    .filter_map(Json::as_str)
                    .map(str::to_string)
                    .collect();
                refs.push(ForeignKeyRef {
                    path,
                    alias: key.get("as").and_then(Json::as_str).map(str::to_string),
                });
            }
            Some(refs)
        } else if many {
            Some(Vec::new())
        } else {
            Some(self.target_keys(target))
        };

        Ok(Association {
            target: target.to_string(),
            keys,
            on,
            many,
            composition,
        })
    }

    /// Primary key names of a target, used as implicit foreign keys.
    fn target_keys(&self, target: &str) -> Vec<ForeignKeyRef> {
        self.definitions
            .get(target)
            .and_then(|t| t.get("elements"))
            .and_then(Json::as_object)
            .map(|elements| {
                elements
                    .iter()
                    .filter(|(_, def)| flag(def, "key"))
                    .map(|(key, _)| ForeignKeyRef::new(key))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_named_types_and_default_keys() {
        let model = Model::from_csn(&json!({
            "definitions": {
                "Address": { "kind": "type", "elements": {
                    "street": { "type": "cds.String" },
                    "city": { "type": "cds.String" }
                }},
                "Currency": { "kind": "type", "type": "cds.String", "length": 3 },
                "Orders": { "kind": "entity", "elements": {
                    "ID": { "key": true, "type": "cds.UUID" },
                    "shipTo": { "type": "Address" },
                    "currency": { "type": "Currency", "notNull": true },
                    "customer": { "type": "cds.Association", "target": "Customers" }
                }},
                "Customers": { "kind": "entity", "elements": {
                    "ID": { "key": true, "type": "cds.Integer" }
                }}
            }
        }))
        .unwrap();

        let orders = model.entity("Orders").unwrap();
        let ship_to = orders.element("shipTo").unwrap();
        assert!(ship_to.is_structured());
        assert_eq!(ship_to.child("city").unwrap().type_name(), "cds.String");

        let currency = orders.element("currency").unwrap();
        assert_eq!(currency.ty.as_deref(), Some("cds.String"));
        assert_eq!(currency.length, Some(3));
        assert!(currency.not_null);

        let customer = orders.element("customer").unwrap();
        let keys = customer.association.as_ref().unwrap().keys.as_ref().unwrap();
        assert_eq!(keys, &vec![ForeignKeyRef::new("ID")]);
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let err = Model::from_csn(&json!({
            "definitions": { "E": { "kind": "entity", "elements": { "x": { "type": "Nope" } } } }
        }))
        .unwrap_err();
        assert!(err.to_string().contains("unknown type 'Nope'"));
    }
}
