//! Column flattening: wildcard expansion, structured and foreign key
//! columns, typed computed columns.

use std::sync::Arc;

use super::{Compiler, column_ref, literal_type, variable_type};
use crate::ast::*;
use crate::error::{CqnError, CqnResult};
use crate::model::Element;
use crate::resolver::{Flat, Scope};

/// Elements `*` selects.
fn in_wildcard(element: &Element) -> bool {
    !element.is_virtual
        && !element.is_unmanaged()
        && !element.is_many()
        && !element.has_annotation("@cds.api.ignore")
}

/// CDS type of a function result, if it does not follow its argument.
pub(super) fn function_type(name: &str) -> Option<&'static str> {
    Some(match name.to_ascii_lowercase().as_str() {
        "count" | "countdistinct" | "length" | "indexof" | "year" | "month" | "day" | "hour"
        | "minute" | "second" => "cds.Integer",
        "sum" | "avg" | "average" | "round" | "floor" | "ceiling" => "cds.Decimal",
        "contains" | "startswith" | "endswith" | "matchespattern" => "cds.Boolean",
        "min" | "max" | "coalesce" => return None,
        _ => "cds.String",
    })
}

impl Compiler<'_> {
    /// Flatten a projection; an empty projection means `*`.
    pub(crate) fn columns(
        &mut self,
        scope: &Scope<'_>,
        columns: &[Column],
    ) -> CqnResult<Vec<Column>> {
        let star = [Column::star()];
        let columns = if columns.is_empty() { &star[..] } else { columns };

        // Explicit columns first: they replace same-named wildcard entries.
        let mut explicit: Vec<(Option<String>, Vec<Column>)> = Vec::new();
        for column in columns.iter().filter(|c| !c.is_star()) {
            explicit.push((column.output_name(), self.column(scope, column)?));
        }
        let mut used = vec![false; explicit.len()];

        let (alias, entity) = scope.default_source()?.clone();
        let mut out = Vec::new();
        let mut next_explicit = 0;
        for column in columns {
            if !column.is_star() {
                if !used[next_explicit] {
                    used[next_explicit] = true;
                    out.extend(explicit[next_explicit].1.iter().cloned());
                }
                next_explicit += 1;
                continue;
            }
            for element in entity.elements.iter().filter(|e| in_wildcard(e)) {
                let replacement = explicit
                    .iter()
                    .position(|(name, _)| name.as_deref() == Some(element.name.as_str()));
                match replacement {
                    Some(i) if !used[i] => {
                        used[i] = true;
                        out.extend(explicit[i].1.iter().cloned());
                    }
                    Some(_) => {}
                    None => {
                        for leaf in scope.model().leaves(&entity, element)? {
                            let mut col = Column::new(column_ref(&alias, &entity, &leaf.column, &leaf.element));
                            col.alias = Some(leaf.column);
                            col.element = Some(leaf.element);
                            out.push(col);
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    /// Flatten one explicit column; structured values yield several.
    fn column(&mut self, scope: &Scope<'_>, column: &Column) -> CqnResult<Vec<Column>> {
        if column.expand.is_some() {
            return Ok(vec![self.expand_column(scope, column)?]);
        }

        let typed = |mut col: Column, default_type: &str, name: &str| {
            let ty = column.cast.clone().unwrap_or_else(|| default_type.to_string());
            col.element = Some(Element::synthetic(name, &ty));
            col.alias = Some(name.to_string());
            col.cast = column.cast.clone();
            col
        };
        let require_alias = || {
            column.alias.clone().ok_or_else(|| {
                CqnError::InvalidQuery("expression columns need an alias".into())
            })
        };

        match &column.expr {
            Expr::Ref(r) => self.ref_columns(scope, column, r),
            Expr::Val(v) => {
                let name = match &column.alias {
                    Some(alias) => alias.clone(),
                    None => v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()),
                };
                Ok(vec![typed(Column::new(column.expr.clone()), literal_type(v), &name)])
            }
            Expr::Func(f) => {
                let name = column.alias.clone().unwrap_or_else(|| f.name.clone());
                let compiled = self.expr(scope, &column.expr)?;
                let ty = match function_type(&f.name) {
                    Some(ty) => ty.to_string(),
                    None => argument_type(&compiled),
                };
                Ok(vec![typed(Column::new(compiled), &ty, &name)])
            }
            Expr::Xpr(_) | Expr::Select(_) | Expr::Param(_) => {
                let name = require_alias()?;
                let compiled = self.expr(scope, &column.expr)?;
                Ok(vec![typed(Column::new(compiled), "cds.String", &name)])
            }
            Expr::List(_) | Expr::Keyword(_) => Err(CqnError::InvalidQuery(format!(
                "not a column: {:?}",
                column.expr
            ))),
        }
    }

    fn ref_columns(
        &mut self,
        scope: &Scope<'_>,
        column: &Column,
        r: &Ref,
    ) -> CqnResult<Vec<Column>> {
        if r.segments.iter().any(|s| s.filter().is_some()) {
            return Err(CqnError::invalid_path(
                r.path(),
                "path filters in columns are only allowed with expand",
            ));
        }
        let (flat, resolution) = scope.flatten(r)?;
        match flat {
            Flat::Variable(name) => {
                let alias = column.alias.clone().unwrap_or_else(|| name.replace('.', "_"));
                let mut col = Column::new(Expr::Ref(r.clone().with_links(resolution.links)));
                let ty = column.cast.as_deref().unwrap_or(variable_type(&name));
                col.element = Some(Element::synthetic(&alias, ty));
                col.alias = Some(alias);
                col.cast = column.cast.clone();
                Ok(vec![col])
            }
            Flat::Output(name) => Err(CqnError::invalid_path(
                name,
                "columns cannot refer to other output columns",
            )),
            Flat::Columns {
                alias,
                entity,
                leaves,
                ..
            } => {
                let base = match &column.alias {
                    Some(a) => a.clone(),
                    None => r.segments[resolution.start..]
                        .iter()
                        .map(|s| s.id())
                        .collect::<Vec<_>>()
                        .join("_"),
                };
                Ok(leaves
                    .into_iter()
                    .map(|leaf| {
                        let name = if leaf.path.is_empty() {
                            base.clone()
                        } else {
                            format!("{}_{}", base, leaf.path.join("_"))
                        };
                        let mut col = Column::new(column_ref(&alias, &entity, &leaf.column, &leaf.element));
                        col.element = match &column.cast {
                            Some(ty) => Some(Element::synthetic(&name, ty)),
                            None => Some(leaf.element),
                        };
                        col.alias = Some(name);
                        col.cast = column.cast.clone();
                        col
                    })
                    .collect())
            }
        }
    }
}

/// Type of `min`/`max`/`coalesce`: the first argument that is a typed column.
pub(super) fn argument_type(func: &Expr) -> String {
    let Expr::Func(f) = func else {
        return "cds.String".into();
    };
    f.args
        .iter()
        .find_map(|arg| match arg {
            Expr::Ref(r) => r
                .links
                .as_ref()
                .and_then(|links| links.last())
                .and_then(RefLink::as_element)
                .map(|e: &Arc<Element>| e.type_name().to_string()),
            Expr::Val(v) => Some(literal_type(v).to_string()),
            _ => None,
        })
        .unwrap_or_else(|| "cds.String".into())
}
