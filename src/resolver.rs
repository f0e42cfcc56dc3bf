//! Path resolution: linking `ref` segments to the model.
//!
//! A [`Scope`] knows the table aliases a query introduces and the names of
//! its output columns. [`Scope::resolve`] annotates every segment of a path
//! with its definition (`$refLinks`); [`Scope::flatten`] goes one step further
//! and turns a path into the physical columns it denotes.

use std::sync::Arc;

use crate::ast::{Definition, Ref, RefLink};
use crate::error::{CqnError, CqnResult};
use crate::model::{Element, Entity, Leaf, Model};

/// A resolved path.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// One link per segment.
    pub links: Vec<RefLink>,
    /// Table alias and entity the path starts from; `None` for session
    /// variables and output columns.
    pub root: Option<(String, Arc<Entity>)>,
    /// Index of the first element segment (1 when the path starts with a
    /// table alias or `$self`).
    pub start: usize,
}

impl Resolution {
    /// Element links from `start` on.
    pub fn elements(&self) -> impl Iterator<Item = (usize, &Arc<Element>)> {
        self.links
            .iter()
            .enumerate()
            .skip(self.start)
            .filter_map(|(i, l)| l.as_element().map(|e| (i, e)))
    }

    pub fn last_element(&self) -> Option<&Arc<Element>> {
        self.links.last().and_then(RefLink::as_element)
    }

    /// Index of the first association segment, if any.
    pub fn first_association(&self) -> Option<usize> {
        self.elements()
            .find(|(_, e)| e.is_association())
            .map(|(i, _)| i)
    }
}

/// What a path denotes physically.
#[derive(Debug, Clone)]
pub enum Flat {
    /// Columns of a table alias: one for scalars, several for structures and
    /// managed associations.
    Columns {
        alias: String,
        entity: Arc<Entity>,
        element: Arc<Element>,
        leaves: Vec<Leaf>,
    },
    /// Session variable such as `$user.id`
    Variable(String),
    /// Output column of the enclosing query
    Output(String),
}

/// Table aliases and output columns visible to a path.
#[derive(Debug, Clone)]
pub struct Scope<'m> {
    model: &'m Model,
    /// Alias → entity; the first entry resolves unqualified paths.
    sources: Vec<(String, Arc<Entity>)>,
    outputs: Vec<String>,
}

impl<'m> Scope<'m> {
    pub fn new(model: &'m Model) -> Self {
        Self {
            model,
            sources: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn entity(model: &'m Model, alias: &str, entity: Arc<Entity>) -> Self {
        Self::new(model).with_source(alias, entity)
    }

    pub fn with_source(mut self, alias: &str, entity: Arc<Entity>) -> Self {
        self.sources.push((alias.to_string(), entity));
        self
    }

    pub fn with_outputs(mut self, outputs: Vec<String>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn model(&self) -> &'m Model {
        self.model
    }

    pub fn default_source(&self) -> CqnResult<&(String, Arc<Entity>)> {
        self.sources
            .first()
            .ok_or_else(|| CqnError::InvalidQuery("no source entity in scope".into()))
    }

    /// Entity behind a table alias.
    pub fn source(&self, alias: &str) -> Option<&(String, Arc<Entity>)> {
        self.sources.iter().find(|(a, _)| a == alias)
    }

    pub fn sources(&self) -> &[(String, Arc<Entity>)] {
        &self.sources
    }

    pub fn is_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|o| o == name)
    }

    /// Link every segment of `r`.
    pub fn resolve(&self, r: &Ref) -> CqnResult<Resolution> {
        let first = r
            .first()
            .ok_or_else(|| CqnError::invalid_path("", "empty reference"))?;

        if r.is_variable() {
            let path = r.path();
            return Ok(Resolution {
                links: r
                    .segments
                    .iter()
                    .map(|_| RefLink {
                        definition: Definition::Variable(path.clone()),
                        target: None,
                        alias: None,
                    })
                    .collect(),
                root: None,
                start: r.segments.len(),
            });
        }

        let (alias, entity, start) = if first == "$self" {
            let (alias, entity) = self.default_source()?;
            (alias.clone(), entity.clone(), 1)
        } else if let Some((alias, entity)) = self
            .sources
            .iter()
            .find(|(a, _)| a == first && r.segments.len() > 1)
        {
            (alias.clone(), entity.clone(), 1)
        } else {
            let (alias, entity) = self.default_source()?;
            if entity.element(first).is_none() && self.is_output(first) && r.segments.len() == 1 {
                return Ok(Resolution {
                    links: vec![RefLink {
                        definition: Definition::OutputColumn(first.to_string()),
                        target: None,
                        alias: None,
                    }],
                    root: None,
                    start: 1,
                });
            }
            (alias.clone(), entity.clone(), 0)
        };

        let mut links = Vec::with_capacity(r.segments.len());
        if start == 1 {
            links.push(RefLink {
                definition: Definition::Entity(entity.clone()),
                target: Some(entity.clone()),
                alias: Some(alias.clone()),
            });
        }

        let mut container = Container::Entity(entity.clone());
        for segment in &r.segments[start..] {
            let id = segment.id();
            let element = container.lookup(id).ok_or_else(|| CqnError::NoSuchElement {
                name: id.to_string(),
                parent: container.name(),
            })?;
            let link = match &element.association {
                Some(assoc) => {
                    let target = self.model.entity(&assoc.target)?.clone();
                    container = Container::Entity(target.clone());
                    RefLink {
                        definition: Definition::Element(element.clone()),
                        target: Some(target),
                        alias: Some(id.to_string()),
                    }
                }
                None => {
                    container = if element.is_structured() {
                        Container::Struct(element.clone())
                    } else {
                        Container::Scalar(element.clone())
                    };
                    RefLink::element(element.clone())
                }
            };
            links.push(link);
        }

        Ok(Resolution {
            links,
            root: Some((alias, entity)),
            start,
        })
    }

    /// Resolve `r` to physical columns. Navigating along an association is only
    /// allowed into its foreign keys; `exists` and `expand` resolve their
    /// paths with [`Scope::resolve`] instead.
    pub fn flatten(&self, r: &Ref) -> CqnResult<(Flat, Resolution)> {
        let resolution = self.resolve(r)?;
        let Some((alias, root)) = resolution.root.clone() else {
            let flat = match resolution.links.first().map(|l| &l.definition) {
                Some(Definition::OutputColumn(name)) => Flat::Output(name.clone()),
                _ => Flat::Variable(r.path()),
            };
            return Ok((flat, resolution));
        };

        // `$self` or a bare alias: the primary key columns
        if resolution.start == r.segments.len() {
            let mut leaves = Vec::new();
            for key in root.keys() {
                leaves.extend(self.model.leaves(&root, key)?);
            }
            let element = root
                .keys()
                .next()
                .cloned()
                .ok_or_else(|| CqnError::invalid_path(r.path(), "entity has no key"))?;
            return Ok((
                Flat::Columns {
                    alias,
                    entity: root,
                    element,
                    leaves,
                },
                resolution,
            ));
        }

        let names: Vec<&str> = r.segments[resolution.start..].iter().map(|s| s.id()).collect();
        let elements: Vec<&Arc<Element>> = resolution.elements().map(|(_, e)| e).collect();

        for (i, element) in elements.iter().enumerate() {
            if !element.is_association() {
                continue;
            }
            let prefix = names[..=i].join("_");
            let rest: Vec<String> = names[i + 1..].iter().map(|s| s.to_string()).collect();
            if element.is_unmanaged() {
                return Err(CqnError::invalid_path(
                    r.path(),
                    format!(
                        "unmanaged association '{}' can only be used in exists or expand",
                        element.name
                    ),
                ));
            }
            let fks = self.model.foreign_keys(&root, element, &prefix)?;
            let leaves: Vec<Leaf> = fks
                .into_iter()
                .filter(|fk| fk.path.starts_with(&rest))
                .map(|fk| Leaf {
                    path: fk.path[rest.len()..].to_vec(),
                    column: fk.source_column,
                    element: fk.element,
                })
                .collect();
            if leaves.is_empty() {
                return Err(CqnError::invalid_path(
                    r.path(),
                    format!(
                        "association '{}' can only be followed in exists, expand or into its foreign keys",
                        element.name
                    ),
                ));
            }
            let element = if leaves.len() == 1 {
                leaves[0].element.clone()
            } else {
                (*element).clone()
            };
            return Ok((
                Flat::Columns {
                    alias,
                    entity: root,
                    element,
                    leaves,
                },
                resolution,
            ));
        }

        let Some(last) = elements.last() else {
            return Err(CqnError::invalid_path(r.path(), "path has no elements"));
        };
        let prefix = names.join("_");
        let leaves = self.model.leaves_with_prefix(&root, last, &prefix)?;
        Ok((
            Flat::Columns {
                alias,
                entity: root,
                element: (*last).clone(),
                leaves,
            },
            resolution,
        ))
    }
}

enum Container {
    Entity(Arc<Entity>),
    Struct(Arc<Element>),
    Scalar(Arc<Element>),
}

impl Container {
    fn lookup(&self, id: &str) -> Option<Arc<Element>> {
        match self {
            Container::Entity(e) => e.element(id).cloned(),
            Container::Struct(s) => s.child(id).cloned(),
            Container::Scalar(_) => None,
        }
    }

    fn name(&self) -> String {
        match self {
            Container::Entity(e) => e.name.clone(),
            Container::Struct(s) | Container::Scalar(s) => format!("{}.{}", s.parent, s.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::bookshop;

    fn scope(model: &Model) -> Scope<'_> {
        let books = model.entity("sap.capire.Books").unwrap().clone();
        Scope::entity(model, "Books", books).with_outputs(vec!["total".into()])
    }

    fn leaf_columns(flat: &Flat) -> Vec<String> {
        match flat {
            Flat::Columns { leaves, .. } => leaves.iter().map(|l| l.column.clone()).collect(),
            other => panic!("expected columns, got {:?}", other),
        }
    }

    #[test]
    fn test_links_have_one_entry_per_segment() {
        let model = bookshop();
        let scope = scope(&model);
        let r = Ref::from_path("author.books.title");
        let res = scope.resolve(&r).unwrap();
        assert_eq!(res.links.len(), 3);
        assert_eq!(res.links[0].target.as_ref().unwrap().name, "sap.capire.Authors");
        assert_eq!(res.links[0].alias.as_deref(), Some("author"));
        assert_eq!(res.first_association(), Some(0));

        let qualified = scope.resolve(&Ref::from_path("Books.title")).unwrap();
        assert_eq!(qualified.start, 1);
        assert!(matches!(qualified.links[0].definition, Definition::Entity(_)));
    }

    #[test]
    fn test_unknown_element() {
        let model = bookshop();
        let err = scope(&model).resolve(&Ref::from_path("dedication.nope")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "No such element 'nope' in 'sap.capire.Books.dedication'"
        );
    }

    #[test]
    fn test_flatten_structures_and_foreign_keys() {
        let model = bookshop();
        let scope = scope(&model);

        let (flat, _) = scope.flatten(&Ref::from_path("dedication.addressee")).unwrap();
        assert_eq!(leaf_columns(&flat), vec!["dedication_addressee_ID"]);

        let (flat, _) = scope.flatten(&Ref::from_path("author.ID")).unwrap();
        assert_eq!(leaf_columns(&flat), vec!["author_ID"]);
        if let Flat::Columns { element, .. } = &flat {
            assert_eq!(element.parent, "sap.capire.Authors");
        }

        let (flat, _) = scope.flatten(&Ref::from_path("$self")).unwrap();
        assert_eq!(leaf_columns(&flat), vec!["ID"]);
    }

    #[test]
    fn test_flatten_rejects_navigation() {
        let model = bookshop();
        let err = scope(&model).flatten(&Ref::from_path("author.name")).unwrap_err();
        assert!(matches!(err, CqnError::InvalidPath { .. }));
    }

    #[test]
    fn test_variables_and_outputs() {
        let model = bookshop();
        let scope = scope(&model);
        let (flat, res) = scope.flatten(&Ref::from_path("$user.id")).unwrap();
        assert!(matches!(flat, Flat::Variable(ref v) if v == "$user.id"));
        assert_eq!(res.links.len(), 2);

        let (flat, _) = scope.flatten(&Ref::from_path("total")).unwrap();
        assert!(matches!(flat, Flat::Output(ref n) if n == "total"));
    }
}
