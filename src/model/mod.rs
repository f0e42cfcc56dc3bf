//! Linked model: entities, elements, associations and annotations.
//!
//! The model is loaded once (see [`Model::from_csn`]) and shared read-only
//! behind `Arc`. Associations name their target entity; targets are looked up
//! through the model, so the graph has no reference cycles.

mod csn;
mod foreign_keys;

pub use foreign_keys::{ForeignKey, Leaf};

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as Json;

use crate::ast::{Expr, Value};
use crate::error::{CqnError, CqnResult};

/// Annotation values by name, including the leading `@`.
pub type Annotations = BTreeMap<String, Json>;

fn annotation_is_set(annotations: &Annotations, name: &str) -> bool {
    match annotations.get(name) {
        None | Some(Json::Null) | Some(Json::Bool(false)) => false,
        Some(_) => true,
    }
}

/// The linked model.
#[derive(Debug, Clone, Default)]
pub struct Model {
    entities: BTreeMap<String, Arc<Entity>>,
}

impl Model {
    pub fn new(entities: Vec<Entity>) -> Self {
        Self {
            entities: entities
                .into_iter()
                .map(|e| (e.name.clone(), Arc::new(e)))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Entity>> {
        self.entities.get(name)
    }

    /// Look up an entity by its fully qualified name.
    pub fn entity(&self, name: &str) -> CqnResult<&Arc<Entity>> {
        self.get(name)
            .ok_or_else(|| CqnError::NoSuchEntity(name.to_string()))
    }

    pub fn entities(&self) -> impl Iterator<Item = &Arc<Entity>> {
        self.entities.values()
    }

    /// Entity persisted in the physical table `table`.
    pub fn by_table(&self, table: &str) -> Option<&Arc<Entity>> {
        self.get(table)
            .filter(|e| e.table_name() == table)
            .or_else(|| self.entities().find(|e| e.table_name() == table))
    }

    /// Target entity of an association element.
    pub fn target(&self, element: &Element) -> CqnResult<&Arc<Entity>> {
        match &element.association {
            Some(assoc) => self.entity(&assoc.target),
            None => Err(CqnError::InvalidPath {
                path: element.name.clone(),
                reason: "not an association".into(),
            }),
        }
    }

    /// Eagerly check every association and array-like element; compilation
    /// performs the same checks lazily for the elements a query touches.
    pub fn validate(&self) -> CqnResult<()> {
        for entity in self.entities() {
            for element in &entity.elements {
                self.leaves(entity, element)?;
            }
        }
        Ok(())
    }
}

/// An entity (table or view).
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub name: String,
    pub elements: Vec<Arc<Element>>,
    pub annotations: Annotations,
}

impl Entity {
    pub fn new(name: &str, elements: Vec<Element>) -> Self {
        Self {
            name: name.to_string(),
            elements: elements
                .into_iter()
                .map(|mut e| {
                    e.set_parent(name);
                    Arc::new(e)
                })
                .collect(),
            annotations: Annotations::new(),
        }
    }

    pub fn annotate(mut self, name: &str, value: Json) -> Self {
        self.annotations.insert(name.to_string(), value);
        self
    }

    pub fn element(&self, name: &str) -> Option<&Arc<Element>> {
        self.elements.iter().find(|e| e.name == name)
    }

    /// Primary key elements in declaration order.
    pub fn keys(&self) -> impl Iterator<Item = &Arc<Element>> {
        self.elements.iter().filter(|e| e.key)
    }

    /// Physical table name: `sap.capire.Books` becomes `sap_capire_Books`.
    pub fn table_name(&self) -> String {
        self.name.replace('.', "_")
    }

    /// Default table alias: the last part of the qualified name.
    pub fn default_alias(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    pub fn annotation(&self, name: &str) -> Option<&Json> {
        self.annotations.get(name)
    }

    pub fn has_annotation(&self, name: &str) -> bool {
        annotation_is_set(&self.annotations, name)
    }

    /// Targets that are not persisted by this service.
    pub fn is_external(&self) -> bool {
        self.has_annotation("@cds.persistence.skip") || self.has_annotation("@cds.external")
    }
}

/// Association or composition metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Association {
    pub target: String,
    /// Foreign keys of a managed association.
    pub keys: Option<Vec<ForeignKeyRef>>,
    /// Join condition of an unmanaged association.
    pub on: Option<Vec<Expr>>,
    pub many: bool,
    pub composition: bool,
}

impl Association {
    pub fn is_managed(&self) -> bool {
        self.on.is_none()
    }
}

/// One entry of a managed association's `keys`: a path into the target.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKeyRef {
    pub path: Vec<String>,
    pub alias: Option<String>,
}

impl ForeignKeyRef {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.split('.').map(str::to_string).collect(),
            alias: None,
        }
    }

    /// Name used in the generated column: alias, or the path joined with `_`.
    pub fn name(&self) -> String {
        self.alias.clone().unwrap_or_else(|| self.path.join("_"))
    }
}

/// An element of an entity or of a structured type.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    pub name: String,
    /// Owning entity.
    pub parent: String,
    /// CDS type such as `cds.String`; `None` for structured elements.
    pub ty: Option<String>,
    pub length: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub key: bool,
    pub is_virtual: bool,
    pub not_null: bool,
    pub unique: bool,
    pub default: Option<Value>,
    pub association: Option<Association>,
    /// Nested elements of a structured element.
    pub elements: Option<Vec<Arc<Element>>>,
    /// Item type of an array-like element.
    pub items: Option<Arc<Element>>,
    pub annotations: Annotations,
}

impl Element {
    pub fn new(name: &str, ty: &str) -> Self {
        Self {
            name: name.to_string(),
            ty: Some(ty.to_string()),
            ..Default::default()
        }
    }

    /// Element typing a computed column (literal, function, expression).
    pub fn synthetic(name: &str, ty: &str) -> Arc<Self> {
        Arc::new(Self::new(name, ty))
    }

    pub fn key(mut self) -> Self {
        self.key = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn virtual_(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn annotate(mut self, name: &str, value: Json) -> Self {
        self.annotations.insert(name.to_string(), value);
        self
    }

    /// Managed association (to-one) with explicit foreign keys.
    pub fn association(name: &str, target: &str, keys: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            ty: Some("cds.Association".into()),
            association: Some(Association {
                target: target.to_string(),
                keys: Some(keys.iter().map(|k| ForeignKeyRef::new(k)).collect()),
                on: None,
                many: false,
                composition: false,
            }),
            ..Default::default()
        }
    }

    /// Unmanaged association with an `on` condition.
    pub fn unmanaged(name: &str, target: &str, on: Vec<Expr>, many: bool) -> Self {
        Self {
            name: name.to_string(),
            ty: Some("cds.Association".into()),
            association: Some(Association {
                target: target.to_string(),
                keys: None,
                on: Some(on),
                many,
                composition: false,
            }),
            ..Default::default()
        }
    }

    pub fn structured(name: &str, elements: Vec<Element>) -> Self {
        Self {
            name: name.to_string(),
            elements: Some(elements.into_iter().map(Arc::new).collect()),
            ..Default::default()
        }
    }

    pub fn array_of(name: &str, items: Element) -> Self {
        Self {
            name: name.to_string(),
            items: Some(Arc::new(items)),
            ..Default::default()
        }
    }

    pub(crate) fn set_parent(&mut self, parent: &str) {
        self.parent = parent.to_string();
        if let Some(children) = &mut self.elements {
            for child in children.iter_mut() {
                Arc::make_mut(child).set_parent(parent);
            }
        }
    }

    pub fn is_association(&self) -> bool {
        self.association.is_some()
    }

    pub fn is_managed(&self) -> bool {
        self.association.as_ref().map(Association::is_managed).unwrap_or(false)
    }

    pub fn is_unmanaged(&self) -> bool {
        self.association.as_ref().map(|a| !a.is_managed()).unwrap_or(false)
    }

    pub fn is_many(&self) -> bool {
        self.association.as_ref().map(|a| a.many).unwrap_or(false)
    }

    pub fn is_structured(&self) -> bool {
        self.elements.is_some()
    }

    pub fn is_array(&self) -> bool {
        self.items.is_some()
    }

    pub fn child(&self, name: &str) -> Option<&Arc<Element>> {
        self.elements.as_ref()?.iter().find(|e| e.name == name)
    }

    pub fn type_name(&self) -> &str {
        self.ty.as_deref().unwrap_or("cds.String")
    }

    pub fn annotation(&self, name: &str) -> Option<&Json> {
        self.annotations.get(name)
    }

    pub fn has_annotation(&self, name: &str) -> bool {
        annotation_is_set(&self.annotations, name)
    }
}
