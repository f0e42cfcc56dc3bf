//! Association paths as correlated sub-selects: `exists` predicates, `from`
//! navigation and the join conditions they share with `expand`.

use std::sync::Arc;

use super::{Compiler, column_ref};
use crate::ast::*;
use crate::error::{CqnError, CqnResult};
use crate::model::{Element, Entity};
use crate::resolver::{Flat, Scope};

/// One association step of a path.
pub(crate) struct Hop {
    pub source: Arc<Entity>,
    pub association: Arc<Element>,
    /// Column prefix of the association (`dedication_addressee`).
    pub prefix: String,
    pub target: Arc<Entity>,
    /// Filter attached to the association segment.
    pub filter: Option<Vec<Expr>>,
}

/// Split a resolved path into association hops. Structure segments before
/// an association become part of its column prefix; anything after the last
/// association is returned as the trailing element names.
pub(crate) fn hops(
    r: &Ref,
    links: &[RefLink],
    start: usize,
    root: &Arc<Entity>,
) -> CqnResult<(Vec<Hop>, Vec<String>)> {
    let mut hops = Vec::new();
    let mut source = root.clone();
    let mut prefix: Vec<&str> = Vec::new();
    for (segment, link) in r.segments.iter().zip(links).skip(start) {
        let element = link
            .as_element()
            .ok_or_else(|| CqnError::invalid_path(r.path(), "not an element path"))?;
        prefix.push(segment.id());
        let Some(target) = &link.target else {
            continue;
        };
        if !element.is_association() {
            continue;
        }
        hops.push(Hop {
            source: source.clone(),
            association: element.clone(),
            prefix: prefix.join("_"),
            target: target.clone(),
            filter: segment.filter().map(<[Expr]>::to_vec),
        });
        source = target.clone();
        prefix.clear();
    }
    Ok((hops, prefix.into_iter().map(str::to_string).collect()))
}

impl Compiler<'_> {
    /// `exists assoc[filter]` → `exists (SELECT 1 FROM Target WHERE <join> AND <filter>)`,
    /// nested once per association in the path.
    pub(crate) fn exists_subquery(&mut self, scope: &Scope<'_>, r: &Ref) -> CqnResult<Select> {
        let resolution = scope.resolve(r)?;
        let (alias, root) = resolution
            .root
            .clone()
            .ok_or_else(|| CqnError::invalid_path(r.path(), "exists needs an association path"))?;
        let (hops, trailing) = hops(r, &resolution.links, resolution.start, &root)?;
        if hops.is_empty() || !trailing.is_empty() {
            return Err(CqnError::invalid_path(
                r.path(),
                "exists needs a path ending in an association",
            ));
        }

        let mut levels = Vec::with_capacity(hops.len());
        let mut outer = alias;
        for hop in &hops {
            let inner = self.unique_alias(&hop.association.name);
            let mut filter = self.join_condition(hop, &outer, &inner)?;
            if let Some(f) = &hop.filter {
                let target_scope = Scope::entity(scope.model(), &inner, hop.target.clone());
                filter = Expr::and(filter, self.tokens(&target_scope, f)?);
            }
            let mut level = Select::from_source(Self::table_source(&hop.target, &inner));
            level.columns = vec![Column::new(Expr::val(1))];
            level.filter = filter;
            level.flattened = true;
            levels.push(level);
            outer = inner;
        }

        let mut nested: Option<Select> = None;
        while let Some(mut level) = levels.pop() {
            if let Some(inner) = nested.take() {
                level.filter = Expr::and(
                    level.filter,
                    vec![Expr::keyword("exists"), Expr::Select(Box::new(inner))],
                );
            }
            nested = Some(level);
        }
        nested.ok_or_else(|| CqnError::invalid_path(r.path(), "empty exists path"))
    }

    /// `from Authors[ID=1]:books as b`: select from the last target, filtered by
    /// an `exists` chain walking back to the root.
    pub(crate) fn navigation_source(
        &mut self,
        root: Arc<Entity>,
        path: &Ref,
        alias: Option<&str>,
    ) -> CqnResult<(Arc<Entity>, String, Vec<Expr>)> {
        let tail = Ref::new(path.segments[1..].to_vec());
        let root_alias = root.default_alias().to_string();
        let resolution = Scope::entity(self.model, &root_alias, root.clone()).resolve(&tail)?;
        let (hops, trailing) = hops(&tail, &resolution.links, 0, &root)?;
        let (Some(last), true) = (hops.last(), trailing.is_empty()) else {
            return Err(CqnError::invalid_path(
                path.path(),
                "navigation in from must end in an association",
            ));
        };

        let target = last.target.clone();
        let target_alias = self.unique_alias(alias.unwrap_or(
            path.segments.last().map(Segment::id).unwrap_or(target.default_alias()),
        ));

        let mut filter = Vec::new();
        if let Some(f) = &last.filter {
            let scope = Scope::entity(self.model, &target_alias, target.clone());
            filter = self.tokens(&scope, f)?;
        }

        // Walk backwards: each hop's source becomes an `exists` level
        // correlated with the level after it.
        let mut outer = target_alias.clone();
        let mut chain: Vec<Select> = Vec::with_capacity(hops.len());
        for (i, hop) in hops.iter().enumerate().rev() {
            let inner = self.unique_alias(hop.source.default_alias());
            let mut level_filter = self.join_condition(hop, &inner, &outer)?;
            let source_filter = if i == 0 {
                path.segments[0].filter().map(<[Expr]>::to_vec)
            } else {
                hops[i - 1].filter.clone()
            };
            if let Some(f) = source_filter {
                let scope = Scope::entity(self.model, &inner, hop.source.clone());
                level_filter = Expr::and(level_filter, self.tokens(&scope, &f)?);
            }
            let mut level = Select::from_source(Self::table_source(&hop.source, &inner));
            level.columns = vec![Column::new(Expr::val(1))];
            level.filter = level_filter;
            level.flattened = true;
            chain.push(level);
            outer = inner;
        }

        let mut nested: Option<Select> = None;
        while let Some(mut level) = chain.pop() {
            if let Some(inner) = nested.take() {
                level.filter = Expr::and(
                    level.filter,
                    vec![Expr::keyword("exists"), Expr::Select(Box::new(inner))],
                );
            }
            nested = Some(level);
        }
        if let Some(outermost) = nested {
            filter = Expr::and(
                vec![Expr::keyword("exists"), Expr::Select(Box::new(outermost))],
                filter,
            );
        }
        Ok((target, target_alias, filter))
    }

    /// Join condition between `source_alias` (the hop's source) and
    /// `target_alias` (the hop's target).
    pub(crate) fn join_condition(
        &mut self,
        hop: &Hop,
        source_alias: &str,
        target_alias: &str,
    ) -> CqnResult<Vec<Expr>> {
        let assoc = hop
            .association
            .association
            .as_ref()
            .ok_or_else(|| CqnError::invalid_path(&hop.association.name, "not an association"))?;

        let Some(on) = &assoc.on else {
            let mut condition = Vec::new();
            for fk in self.model.foreign_keys(&hop.source, &hop.association, &hop.prefix)? {
                condition = Expr::and(
                    condition,
                    vec![
                        column_ref(source_alias, &hop.source, &fk.source_column, &fk.element),
                        Expr::keyword("="),
                        column_ref(target_alias, &hop.target, &fk.target_column, &fk.element),
                    ],
                );
            }
            if condition.is_empty() {
                return Err(CqnError::invalid_path(
                    &hop.association.name,
                    "managed association without foreign keys",
                ));
            }
            return Ok(condition);
        };

        let source_scope = Scope::entity(self.model, source_alias, hop.source.clone());
        let target_scope = Scope::entity(self.model, target_alias, hop.target.clone());
        let name = hop.association.name.as_str();

        let mut out = Vec::with_capacity(on.len());
        let mut i = 0;
        while i < on.len() {
            // `assoc.backlink = $self` (either side) → backlink foreign keys
            if let (Some(Expr::Ref(a)), Some(op), Some(Expr::Ref(b))) = (on.get(i), on.get(i + 1), on.get(i + 2))
                && op.is_keyword("=")
            {
                let backlink = if is_self(b) {
                    Some(a)
                } else if is_self(a) {
                    Some(b)
                } else {
                    None
                };
                if let Some(backlink) = backlink
                    && backlink.first() == Some(name)
                {
                    out.push(Expr::Xpr(self.backlink(hop, backlink, source_alias, target_alias)?));
                    i += 3;
                    continue;
                }
            }
            out.push(match &on[i] {
                Expr::Ref(r) if r.first() == Some(name) && r.segments.len() > 1 => {
                    let rest = Ref::new(r.segments[1..].to_vec());
                    self.on_ref(&target_scope, &rest)?
                }
                Expr::Ref(r) if r.first() == Some("$self") && r.segments.len() > 1 => {
                    let rest = Ref::new(r.segments[1..].to_vec());
                    self.on_ref(&source_scope, &rest)?
                }
                Expr::Ref(r) if !r.is_variable() => self.on_ref(&source_scope, r)?,
                other => self.expr(&source_scope, other)?,
            });
            i += 1;
        }
        Ok(out)
    }

    /// `books.author = $self`: compare the target's foreign keys with the
    /// source's primary key.
    fn backlink(
        &mut self,
        hop: &Hop,
        backlink: &Ref,
        source_alias: &str,
        target_alias: &str,
    ) -> CqnResult<Vec<Expr>> {
        let path = Ref::new(backlink.segments[1..].to_vec());
        let resolution = Scope::entity(self.model, target_alias, hop.target.clone()).resolve(&path)?;
        let element = resolution
            .last_element()
            .filter(|e| e.is_managed())
            .ok_or_else(|| CqnError::invalid_path(backlink.path(), "backlink must be a managed association"))?
            .clone();
        let prefix = path.segments.iter().map(Segment::id).collect::<Vec<_>>().join("_");

        let mut condition = Vec::new();
        for fk in self.model.foreign_keys(&hop.target, &element, &prefix)? {
            condition = Expr::and(
                condition,
                vec![
                    column_ref(target_alias, &hop.target, &fk.source_column, &fk.element),
                    Expr::keyword("="),
                    column_ref(source_alias, &hop.source, &fk.target_column, &fk.element),
                ],
            );
        }
        Ok(condition)
    }

    fn on_ref(&mut self, scope: &Scope<'_>, r: &Ref) -> CqnResult<Expr> {
        match scope.flatten(r)?.0 {
            Flat::Columns {
                alias,
                entity,
                leaves,
                ..
            } if leaves.len() == 1 => Ok(column_ref(&alias, &entity, &leaves[0].column, &leaves[0].element)),
            _ => Err(CqnError::invalid_path(
                r.path(),
                "on conditions may only compare scalar columns or backlinks",
            )),
        }
    }
}

fn is_self(r: &Ref) -> bool {
    r.segments.len() == 1 && r.first() == Some("$self")
}

#[cfg(test)]
mod tests {
    use super::super::cqn4sql;
    use crate::ast::*;
    use crate::model::fixtures::bookshop;
    use crate::parser::parse_query;
    use pretty_assertions::assert_eq;

    fn flatten(text: &str) -> Select {
        match cqn4sql(&parse_query(text).unwrap(), &bookshop()).unwrap() {
            Query::Select(s) => s,
            other => panic!("expected select, got {:?}", other),
        }
    }

    fn sub_select(tokens: &[Expr], at: usize) -> &Select {
        match &tokens[at] {
            Expr::Select(s) => s,
            other => panic!("expected sub-select, got {:?}", other),
        }
    }

    fn paths(tokens: &[Expr]) -> Vec<String> {
        tokens
            .iter()
            .map(|t| match t {
                Expr::Ref(r) => r.path(),
                Expr::Keyword(k) => k.clone(),
                Expr::Val(v) => v.to_string(),
                Expr::Xpr(items) => format!("({})", paths(items).join(" ")),
                _ => "?".into(),
            })
            .collect()
    }

    #[test]
    fn test_exists_managed_association() {
        let s = flatten("SELECT from sap.capire.Books { ID } where exists author[name = 'Poe']");
        assert!(s.filter[0].is_keyword("exists"));
        let sub = sub_select(&s.filter, 1);
        assert_eq!(sub.from.alias(), Some("author"));
        assert_eq!(
            paths(&sub.filter),
            vec!["Books.author_ID", "=", "author.ID", "and", "author.name", "=", "'Poe'"]
        );
        assert!(sub.flattened);
    }

    #[test]
    fn test_exists_backlink() {
        let s = flatten("SELECT from sap.capire.Authors { ID } where exists books[stock > 0]");
        let sub = sub_select(&s.filter, 1);
        assert_eq!(
            paths(&sub.filter),
            vec!["(books.author_ID = Authors.ID)", "and", "books.stock", ">", "0"]
        );
    }

    #[test]
    fn test_exists_path_nests_per_association() {
        let s = flatten("SELECT from sap.capire.Authors { ID } where exists books.genre[name = 'Drama']");
        let books = sub_select(&s.filter, 1);
        let position = books.filter.iter().position(|t| t.is_keyword("exists")).unwrap();
        let genre = sub_select(&books.filter, position + 1);
        assert_eq!(
            paths(&genre.filter),
            vec!["books.genre_ID", "=", "genre.ID", "and", "genre.name", "=", "'Drama'"]
        );
    }

    #[test]
    fn test_exists_through_structure() {
        let s = flatten("SELECT from sap.capire.Books { ID } where exists dedication.addressee");
        let sub = sub_select(&s.filter, 1);
        assert_eq!(paths(&sub.filter), vec!["Books.dedication_addressee_ID", "=", "addressee.ID"]);
    }

    #[test]
    fn test_exists_on_scalar_is_rejected() {
        let query = parse_query("SELECT from sap.capire.Books { ID } where exists title").unwrap();
        assert!(cqn4sql(&query, &bookshop()).is_err());
    }

    #[test]
    fn test_from_navigation() {
        let s = flatten("SELECT from sap.capire.Authors[ID = 1]:books { title }");
        assert_eq!(s.from.alias(), Some("books"));
        assert!(s.filter[0].is_keyword("exists"));
        let authors = sub_select(&s.filter, 1);
        assert_eq!(
            paths(&authors.filter),
            vec!["(books.author_ID = Authors.ID)", "and", "Authors.ID", "=", "1"]
        );
        let Source::Entity { path, .. } = &s.from else {
            panic!("expected table");
        };
        assert_eq!(path.path(), "sap_capire_Books");
    }

    #[test]
    fn test_from_navigation_with_target_filter_and_alias() {
        let s = flatten("SELECT from sap.capire.Books[ID = 7]:author[name like 'E%'] as a { name }");
        assert_eq!(s.from.alias(), Some("a"));
        let authors_filter = paths(&s.filter);
        assert_eq!(&authors_filter[2..], &["and", "a.name", "like", "'E%'"]);
        let books = sub_select(&s.filter, 1);
        assert_eq!(
            paths(&books.filter),
            vec!["Books.author_ID", "=", "a.ID", "and", "Books.ID", "=", "7"]
        );
    }
}
