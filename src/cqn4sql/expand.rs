//! `expand` columns: correlated sub-selects aggregated into JSON by the
//! renderer.

use super::Compiler;
use super::exists::hops;
use crate::ast::*;
use crate::error::{CqnError, CqnResult};
use crate::resolver::Scope;

impl Compiler<'_> {
    /// `author { name }` → `(SELECT author.name FROM Authors as author WHERE Books.author_ID = author.ID) as author`
    pub(crate) fn expand_column(
        &mut self,
        scope: &Scope<'_>,
        column: &Column,
    ) -> CqnResult<Column> {
        let Expr::Ref(r) = &column.expr else {
            return Err(CqnError::InvalidQuery("expand needs a path".into()));
        };
        let resolution = scope.resolve(r)?;
        let (alias, root) = resolution
            .root
            .clone()
            .ok_or_else(|| CqnError::invalid_path(r.path(), "expand needs an association path"))?;
        let (hops, trailing) = hops(r, &resolution.links, resolution.start, &root)?;
        let hop = match (hops.as_slice(), trailing.is_empty()) {
            ([hop], true) => hop,
            _ => {
                return Err(CqnError::invalid_path(
                    r.path(),
                    "expand must follow exactly one association",
                ));
            }
        };

        let inner = self.unique_alias(&hop.association.name);
        let target_scope = Scope::entity(scope.model(), &inner, hop.target.clone());

        let mut filter = self.join_condition(hop, &alias, &inner)?;
        if let Some(f) = &hop.filter {
            filter = Expr::and(filter, self.tokens(&target_scope, f)?);
        }

        let columns = self.columns(&target_scope, column.expand.as_deref().unwrap_or_default())?;
        let outputs = columns.iter().filter_map(|c| c.alias.clone()).collect();
        let target_scope = target_scope.with_outputs(outputs);

        let mut order_by = Vec::with_capacity(column.order_by.len());
        for item in &column.order_by {
            order_by.push(OrderBy {
                expr: self.expr(&target_scope, &item.expr)?,
                sort: item.sort,
                nulls: item.nulls,
            });
        }

        let many = hop.association.is_many();
        let mut sub = Select::from_source(Self::table_source(&hop.target, &inner));
        sub.columns = columns;
        sub.filter = filter;
        sub.order_by = order_by;
        sub.limit = column.limit;
        sub.one = !many;
        sub.expand = Some(if many { ExpandKind::Many } else { ExpandKind::One });
        sub.flattened = true;

        let mut out = Column::new(Expr::Select(Box::new(sub)));
        out.alias = Some(
            column
                .alias
                .clone()
                .unwrap_or_else(|| r.last().unwrap_or_default().to_string()),
        );
        out.element = Some(hop.association.clone());
        Ok(out)
    }
}
