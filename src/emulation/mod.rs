//! Emulation of clauses a database cannot express.
//!
//! Each [`Stage`] that is active for a query moves its clause into a
//! synthetic output column (`__where__`, `__groupBy0__`, ...) of an internal
//! clone, the clone runs, and the rows are post-processed in memory in the
//! order where → groupBy → having → orderBy → one/limit → count. Synthetic
//! columns never reach the caller.

mod filter;
mod group_by;
mod mutation;
mod order_by;
mod paging;

#[cfg(test)]
mod tests;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ast::*;
use crate::cqn4sql::literal_type;
use crate::driver::Row;
use crate::error::{CqnError, CqnResult};
use crate::model::Element;
use crate::transpiler::Dialect;

pub use mutation::run_mutation;
pub use order_by::OrderKey;

/// One emulated clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Where,
    Having,
    GroupBy,
    OrderBy,
    One,
    Limit,
    Count,
}

/// Preparation order of the stages.
pub const PIPELINE: [Stage; 7] = [
    Stage::Where,
    Stage::Having,
    Stage::GroupBy,
    Stage::OrderBy,
    Stage::One,
    Stage::Limit,
    Stage::Count,
];

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Where => "where",
            Stage::Having => "having",
            Stage::GroupBy => "groupBy",
            Stage::OrderBy => "orderBy",
            Stage::One => "one",
            Stage::Limit => "limit",
            Stage::Count => "count",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = CqnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PIPELINE
            .iter()
            .find(|stage| stage.name().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| CqnError::Config(format!("unknown emulation stage '{}'", s)))
    }
}

/// Stages emulated regardless of what the dialect supports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmulationConfig {
    #[serde(default)]
    pub force: BTreeSet<Stage>,
}

impl EmulationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always emulate `stage`.
    pub fn force(mut self, stage: Stage) -> Self {
        self.force.insert(stage);
        self
    }

    pub fn is_forced(&self, stage: Stage) -> bool {
        self.force.contains(&stage)
    }
}

/// Executes the statements emulation derives from a query.
#[async_trait]
pub trait Runner: Send {
    /// Run a flattened SELECT and return its rows.
    async fn rows(&mut self, select: &Select) -> CqnResult<Vec<Row>>;
    /// Run a flattened data modification and return the affected row count.
    async fn affected(&mut self, query: &Query) -> CqnResult<u64>;
}

/// Rows of a SELECT after post-processing.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Selection {
    pub rows: Vec<Row>,
    /// Total number of rows ignoring pagination, when requested.
    pub count: Option<u64>,
}

pub(crate) const WHERE_COLUMN: &str = "__where__";
pub(crate) const HAVING_COLUMN: &str = "__having__";

pub(crate) fn group_column(i: usize) -> String {
    format!("__groupBy{}__", i)
}

pub(crate) fn order_column(i: usize) -> String {
    format!("__orderBy{}__", i)
}

/// Rewritten query plus what to do with its rows.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Internal clone sent to the database.
    pub select: Select,
    pub stages: BTreeSet<Stage>,
    group_columns: Vec<String>,
    order_keys: Vec<OrderKey>,
    /// Window applied in memory.
    window: Option<Limit>,
    one: bool,
    /// Window the database applied natively, for the count short-circuit.
    native_window: Option<Limit>,
    /// Query the count falls back to.
    count_source: Option<Select>,
    synthetic: Vec<String>,
}

impl Plan {
    /// Decide which stages are active and rewrite the query accordingly.
    pub fn new(select: &Select, dialect: Dialect, config: &EmulationConfig) -> Plan {
        let stages = detect(select, dialect, config);
        let mut plan = Plan {
            select: select.internal_clone(),
            stages,
            group_columns: Vec::new(),
            order_keys: Vec::new(),
            window: None,
            one: false,
            native_window: None,
            count_source: None,
            synthetic: Vec::new(),
        };
        let outputs = output_expressions(select);
        for stage in PIPELINE {
            if plan.stages.contains(&stage) {
                plan.prepare(stage, &outputs);
            }
        }
        if !plan.stages.contains(&Stage::Limit) && !plan.stages.contains(&Stage::One) {
            plan.native_window = effective_window(&plan.select);
        }
        if !plan.stages.is_empty() {
            debug!(
                "emulating {} on {:?}",
                plan.stages.iter().map(Stage::name).collect::<Vec<_>>().join(", "),
                select.from.alias()
            );
        }
        plan
    }

    pub fn is_active(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }

    fn inject(&mut self, name: String, expr: Expr, ty: &str) {
        let mut column = Column::new(expr).alias(name.clone());
        column.element = Some(Element::synthetic(&name, ty));
        self.select.columns.push(column);
        self.synthetic.push(name);
    }

    fn prepare(&mut self, stage: Stage, outputs: &HashMap<String, Expr>) {
        match stage {
            Stage::Where => {
                let filter = substitute(std::mem::take(&mut self.select.filter), outputs);
                self.inject(WHERE_COLUMN.into(), Expr::Xpr(filter), "cds.Boolean");
            }
            Stage::Having => {
                let having = substitute(std::mem::take(&mut self.select.having), outputs);
                self.inject(HAVING_COLUMN.into(), Expr::Xpr(having), "cds.Boolean");
            }
            Stage::GroupBy => {
                let group_by = substitute(std::mem::take(&mut self.select.group_by), outputs);
                for (i, expr) in group_by.into_iter().enumerate() {
                    let name = group_column(i);
                    let ty = key_type(&expr, &self.select.columns);
                    self.group_columns.push(name.clone());
                    self.inject(name, expr, &ty);
                }
            }
            Stage::OrderBy => {
                for (i, item) in std::mem::take(&mut self.select.order_by).into_iter().enumerate() {
                    let name = order_column(i);
                    self.order_keys.push(OrderKey {
                        column: name.clone(),
                        sort: item.sort,
                        nulls: item.nulls,
                    });
                    let expr = substitute(vec![item.expr], outputs).into_iter().next();
                    if let Some(expr) = expr {
                        let ty = key_type(&expr, &self.select.columns);
                        self.inject(name, expr, &ty);
                    }
                }
            }
            Stage::One => {
                self.one = true;
                self.select.one = false;
                let offset = self.select.limit.take().map(|l| l.offset).unwrap_or(0);
                self.window = Some(Limit::rows(1).offset(offset));
            }
            Stage::Limit => {
                let limit = self.select.limit.take();
                // `one` already narrowed the window to a single row.
                if self.window.is_none() {
                    self.window = limit;
                }
            }
            Stage::Count => {
                self.select.count = false;
                self.count_source = Some(count_query(&self.select));
            }
        }
    }

    /// Post-process the rows of [`Plan::select`].
    pub fn finish(&self, rows: Vec<Row>) -> (Vec<Row>, Option<u64>) {
        let mut rows = rows;
        if self.is_active(Stage::Where) {
            rows = filter::keep_truthy(rows, WHERE_COLUMN);
        }
        if self.is_active(Stage::GroupBy) {
            rows = group_by::first_per_group(rows, &self.group_columns);
        }
        if self.is_active(Stage::Having) {
            rows = filter::keep_truthy(rows, HAVING_COLUMN);
        }
        if self.is_active(Stage::OrderBy) {
            order_by::sort(&mut rows, &self.order_keys);
        }
        let total = rows.len() as u64;
        if let Some(window) = self.window {
            rows = paging::slice(rows, window);
        }
        if !self.synthetic.is_empty() {
            for row in &mut rows {
                row.retain(|name, _| !self.synthetic.contains(name));
            }
        }
        let count = match self.window {
            Some(_) if self.is_active(Stage::Count) => Some(total),
            _ => None,
        };
        (rows, count)
    }
}

/// Run a SELECT with every stage the dialect needs emulated.
pub async fn run_select<R: Runner + ?Sized>(
    runner: &mut R,
    select: &Select,
    dialect: Dialect,
    config: &EmulationConfig,
) -> CqnResult<Selection> {
    if select.internal {
        return Ok(Selection {
            rows: runner.rows(select).await?,
            count: None,
        });
    }
    let plan = Plan::new(select, dialect, config);
    let rows = runner.rows(&plan.select).await?;
    let (rows, mut count) = plan.finish(rows);

    if plan.is_active(Stage::Count) && count.is_none() {
        count = match paging::short_circuit(plan.native_window, rows.len() as u64) {
            Some(total) => Some(total),
            None => match &plan.count_source {
                Some(query) => Some(paging::count_rows(&runner.rows(query).await?)?),
                None => None,
            },
        };
    }
    Ok(Selection { rows, count })
}

/// Which stages a query needs emulated, cascades included.
pub fn detect(select: &Select, dialect: Dialect, config: &EmulationConfig) -> BTreeSet<Stage> {
    let caps = dialect.capabilities();
    let forced = |stage| config.is_forced(stage);
    let mut stages = BTreeSet::new();

    if !select.filter.is_empty()
        && (forced(Stage::Where) || (!caps.where_alias && references_output(&select.filter)))
    {
        stages.insert(Stage::Where);
    }
    if !select.group_by.is_empty()
        && (forced(Stage::GroupBy)
            || !caps.group_by
            || (!caps.group_by_alias && references_output(&select.group_by)))
    {
        stages.insert(Stage::GroupBy);
    }
    if !select.having.is_empty()
        && (forced(Stage::Having)
            || !caps.having
            || (!caps.having_alias && references_output(&select.having)))
    {
        stages.insert(Stage::Having);
    }
    if !select.order_by.is_empty() && (forced(Stage::OrderBy) || !caps.order_by) {
        stages.insert(Stage::OrderBy);
    }
    if select.one && (forced(Stage::One) || !caps.limit) {
        stages.insert(Stage::One);
    }
    if select.limit.is_some() && (forced(Stage::Limit) || !caps.limit) {
        stages.insert(Stage::Limit);
    }

    // Filtering in memory moves everything after it into memory as well.
    if stages.contains(&Stage::Where) && !select.group_by.is_empty() {
        stages.insert(Stage::GroupBy);
    }
    if (stages.contains(&Stage::Where) || stages.contains(&Stage::GroupBy)) && !select.having.is_empty() {
        stages.insert(Stage::Having);
    }
    let reshaped = [Stage::Where, Stage::GroupBy, Stage::Having, Stage::OrderBy]
        .iter()
        .any(|s| stages.contains(s));
    if reshaped {
        if select.one {
            stages.insert(Stage::One);
        }
        if select.limit.is_some() {
            stages.insert(Stage::Limit);
        }
    }
    if select.count {
        stages.insert(Stage::Count);
    }
    stages
}

/// Whether any token refers to an output column alias.
fn references_output(tokens: &[Expr]) -> bool {
    let mut found = false;
    for token in tokens {
        token.visit(&mut |e| {
            if let Expr::Ref(r) = e
                && matches!(
                    r.links.as_ref().and_then(|l| l.first()).map(|l| &l.definition),
                    Some(Definition::OutputColumn(_))
                )
            {
                found = true;
            }
        });
    }
    found
}

/// CDS type of a sort or grouping key, so the output converter applies.
fn key_type(expr: &Expr, columns: &[Column]) -> String {
    let output = columns
        .iter()
        .filter(|c| c.expr == *expr)
        .find_map(|c| c.element.as_ref());
    if let Some(element) = output {
        return element.type_name().to_string();
    }
    match expr {
        Expr::Ref(r) => r
            .links
            .as_ref()
            .and_then(|links| links.last())
            .and_then(RefLink::as_element)
            .map(|e| e.type_name().to_string())
            .unwrap_or_else(|| "cds.String".into()),
        Expr::Val(v) => literal_type(v).to_string(),
        _ => "cds.String".into(),
    }
}

fn output_expressions(select: &Select) -> HashMap<String, Expr> {
    select
        .columns
        .iter()
        .filter(|c| !matches!(c.expr, Expr::Select(_)) && !c.is_star())
        .filter_map(|c| c.alias.clone().map(|alias| (alias, c.expr.clone())))
        .collect()
}

/// Replace output alias references by the expressions they name.
fn substitute(tokens: Vec<Expr>, outputs: &HashMap<String, Expr>) -> Vec<Expr> {
    tokens.into_iter().map(|t| substitute_expr(t, outputs)).collect()
}

fn substitute_expr(expr: Expr, outputs: &HashMap<String, Expr>) -> Expr {
    match expr {
        Expr::Ref(r) => {
            let target = match r.links.as_ref().and_then(|l| l.first()).map(|l| &l.definition) {
                Some(Definition::OutputColumn(name)) => outputs.get(name).cloned(),
                _ => None,
            };
            target.unwrap_or(Expr::Ref(r))
        }
        Expr::Func(f) => Expr::Func(Func {
            name: f.name,
            args: substitute(f.args, outputs),
        }),
        Expr::Xpr(items) => Expr::Xpr(substitute(items, outputs)),
        Expr::List(items) => Expr::List(substitute(items, outputs)),
        other => other,
    }
}

/// Window the database applies to a query, `one` included.
fn effective_window(select: &Select) -> Option<Limit> {
    match (select.one, select.limit) {
        (true, limit) => Some(Limit::rows(1).offset(limit.map(|l| l.offset).unwrap_or(0))),
        (false, limit) => limit,
    }
}

/// `SELECT count(*)` over the query without pagination or ordering.
fn count_query(select: &Select) -> Select {
    let mut inner = select.internal_clone();
    inner.order_by.clear();
    inner.limit = None;
    inner.one = false;
    inner.count = false;
    inner.columns.retain(|c| !matches!(c.expr, Expr::Select(_)));

    let mut count = Column::new(Expr::func("count", vec![Expr::keyword("*")])).alias("$count");
    count.element = Some(Element::synthetic("$count", "cds.Integer"));

    if inner.group_by.is_empty() && !inner.distinct {
        inner.columns = vec![count];
        return inner;
    }
    let mut outer = Select::from_source(Source::Subquery {
        query: Box::new(inner),
        alias: "__count__".into(),
    });
    outer.columns = vec![count];
    outer.flattened = true;
    outer.internal = true;
    outer
}
