use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{Value as Json, json};

use super::*;
use crate::cqn4sql::cqn4sql;
use crate::model::fixtures::bookshop;
use crate::parser::parse_query;
use crate::transpiler::render;

type Respond = Box<dyn FnMut(&Select) -> Vec<Row> + Send>;

/// Answers SELECTs from a closure, UPDATE/DELETE with one affected row, and
/// records everything it was asked to run.
struct ScriptedRunner {
    respond: Respond,
    fail_on: Option<usize>,
    selects: Vec<Select>,
    mutations: Vec<Query>,
}

impl ScriptedRunner {
    fn new(respond: impl FnMut(&Select) -> Vec<Row> + Send + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            fail_on: None,
            selects: Vec::new(),
            mutations: Vec::new(),
        }
    }
}

#[async_trait]
impl Runner for ScriptedRunner {
    async fn rows(&mut self, select: &Select) -> CqnResult<Vec<Row>> {
        self.selects.push(select.clone());
        Ok((self.respond)(select))
    }

    async fn affected(&mut self, query: &Query) -> CqnResult<u64> {
        self.mutations.push(query.clone());
        if self.fail_on == Some(self.mutations.len()) {
            return Err(CqnError::database(None, "NOT NULL constraint failed: Books.title"));
        }
        Ok(1)
    }
}

fn rows(values: Json) -> Vec<Row> {
    values
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect()
}

fn ids(rows: &[Row]) -> Vec<i64> {
    rows.iter().map(|r| r["ID"].as_i64().unwrap()).collect()
}

fn flat_select(text: &str) -> Select {
    match cqn4sql(&parse_query(text).unwrap(), &bookshop()).unwrap() {
        Query::Select(s) => s,
        other => panic!("expected SELECT, got {:?}", other),
    }
}

fn is_count(select: &Select) -> bool {
    select.columns.iter().any(|c| c.alias.as_deref() == Some("$count"))
}

#[test]
fn test_stage_names() {
    assert_eq!("groupBy".parse::<Stage>().unwrap(), Stage::GroupBy);
    assert_eq!("LIMIT".parse::<Stage>().unwrap(), Stage::Limit);
    assert!("sort".parse::<Stage>().is_err());
    assert_eq!(PIPELINE.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(","),
        "where,having,groupBy,orderBy,one,limit,count");
}

#[test]
fn test_native_queries_pass_through() {
    let select = flat_select("SELECT from sap.capire.Books { ID } where stock > 1 order by ID limit 5");
    let plan = Plan::new(&select, Dialect::SQLite, &EmulationConfig::default());
    assert!(plan.stages.is_empty());
    assert_eq!(plan.select.limit, select.limit);
    assert_eq!(plan.select.filter, select.filter);
    assert!(plan.select.internal);
}

#[test]
fn test_where_on_output_alias_cascades() {
    let select = flat_select("SELECT from sap.capire.Books { ID, stock * 2 as double } where double > 10 limit 1");
    let plan = Plan::new(&select, Dialect::SQLite, &EmulationConfig::default());
    assert!(plan.is_active(Stage::Where));
    assert!(plan.is_active(Stage::Limit));
    assert!(plan.select.filter.is_empty());
    assert!(plan.select.limit.is_none());
    assert!(plan.select.columns.iter().any(|c| c.alias.as_deref() == Some(WHERE_COLUMN)));
    render(&Query::Select(plan.select.clone()), Dialect::SQLite).unwrap();
}

#[tokio::test]
async fn test_where_filters_truthy_rows() {
    let select = flat_select("SELECT from sap.capire.Books { ID, stock * 2 as double } where double > 10");
    let mut runner = ScriptedRunner::new(|_| {
        rows(json!([
            {"ID": 1, "double": 4, "__where__": 0},
            {"ID": 2, "double": 12, "__where__": 1},
            {"ID": 3, "double": null, "__where__": null},
            {"ID": 4, "double": 20, "__where__": true},
        ]))
    });
    let result = run_select(&mut runner, &select, Dialect::SQLite, &EmulationConfig::default())
        .await
        .unwrap();
    assert_eq!(ids(&result.rows), vec![2, 4]);
    assert!(result.rows.iter().all(|r| !r.contains_key(WHERE_COLUMN)));
}

#[tokio::test]
async fn test_emulated_limit_counts_in_memory() {
    let mut select = flat_select("SELECT from sap.capire.Books { ID } order by ID limit 2 offset 1");
    select.count = true;
    let config = EmulationConfig::new().force(Stage::Limit);
    let mut runner = ScriptedRunner::new(|_| {
        rows(json!([{"ID": 1}, {"ID": 2}, {"ID": 3}, {"ID": 4}, {"ID": 5}]))
    });

    let result = run_select(&mut runner, &select, Dialect::SQLite, &config).await.unwrap();
    assert_eq!(ids(&result.rows), vec![2, 3]);
    assert_eq!(result.count, Some(5));
    assert_eq!(runner.selects.len(), 1);
    assert!(runner.selects[0].limit.is_none());
    assert!(!runner.selects[0].order_by.is_empty());
}

#[tokio::test]
async fn test_partial_page_short_circuits_count() {
    let mut select = flat_select("SELECT from sap.capire.Books { ID } limit 10 offset 20");
    select.count = true;
    let mut runner = ScriptedRunner::new(|_| rows(json!([{"ID": 21}, {"ID": 22}, {"ID": 23}])));

    let result = run_select(&mut runner, &select, Dialect::SQLite, &EmulationConfig::default())
        .await
        .unwrap();
    assert_eq!(result.count, Some(23));
    assert_eq!(runner.selects.len(), 1);
    assert_eq!(runner.selects[0].limit, Some(Limit::rows(10).offset(20)));
}

#[tokio::test]
async fn test_full_page_runs_count_query() {
    let mut select = flat_select("SELECT from sap.capire.Books { ID } where stock > 1 order by ID limit 2");
    select.count = true;
    let mut runner = ScriptedRunner::new(|s| {
        if is_count(s) {
            rows(json!([{"$count": 42}]))
        } else {
            rows(json!([{"ID": 1}, {"ID": 2}]))
        }
    });

    let result = run_select(&mut runner, &select, Dialect::SQLite, &EmulationConfig::default())
        .await
        .unwrap();
    assert_eq!(ids(&result.rows), vec![1, 2]);
    assert_eq!(result.count, Some(42));
    assert_eq!(runner.selects.len(), 2);

    let stmt = render(&Query::Select(runner.selects[1].clone()), Dialect::SQLite).unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT count(*) AS \"$count\" FROM sap_capire_Books AS Books WHERE Books.stock > 1"
    );
}

#[tokio::test]
async fn test_grouped_count_wraps_the_query() {
    let mut select = flat_select("SELECT from sap.capire.Books { stock } group by stock limit 1");
    select.count = true;
    let mut runner = ScriptedRunner::new(|s| {
        if is_count(s) {
            rows(json!([{"$count": 3}]))
        } else {
            rows(json!([{"stock": 5}]))
        }
    });

    let result = run_select(&mut runner, &select, Dialect::SQLite, &EmulationConfig::default())
        .await
        .unwrap();
    assert_eq!(result.count, Some(3));
    let stmt = render(&Query::Select(runner.selects[1].clone()), Dialect::SQLite).unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT count(*) AS \"$count\" FROM (SELECT Books.stock AS \"stock\" FROM sap_capire_Books AS Books GROUP BY Books.stock) AS __count__"
    );
}

#[tokio::test]
async fn test_group_by_keeps_first_occurrence() {
    let select = flat_select("SELECT from sap.capire.Books { ID, stock } group by stock");
    let config = EmulationConfig::new().force(Stage::GroupBy);
    let mut runner = ScriptedRunner::new(|_| {
        rows(json!([
            {"ID": 1, "stock": 5, "__groupBy0__": 5},
            {"ID": 2, "stock": 3, "__groupBy0__": 3},
            {"ID": 3, "stock": 5, "__groupBy0__": 5},
            {"ID": 4, "stock": null, "__groupBy0__": null},
            {"ID": 5, "stock": null, "__groupBy0__": null},
        ]))
    });

    let result = run_select(&mut runner, &select, Dialect::SQLite, &config).await.unwrap();
    assert_eq!(ids(&result.rows), vec![1, 2, 4]);
    assert!(runner.selects[0].group_by.is_empty());
    assert_eq!(result.rows[0].keys().cloned().collect::<Vec<_>>(), vec!["ID", "stock"]);
}

#[tokio::test]
async fn test_order_by_emulation_is_stable_and_pages_after_sorting() {
    let select = flat_select("SELECT from sap.capire.Books { ID, stock } order by stock desc limit 3");
    let config = EmulationConfig::new().force(Stage::OrderBy);
    let mut runner = ScriptedRunner::new(|_| {
        rows(json!([
            {"ID": 1, "__orderBy0__": 1},
            {"ID": 2, "__orderBy0__": 9},
            {"ID": 3, "__orderBy0__": 1},
            {"ID": 4, "__orderBy0__": 9},
            {"ID": 5, "__orderBy0__": 4},
        ]))
    });

    let plan = Plan::new(&select, Dialect::SQLite, &config);
    assert!(plan.is_active(Stage::Limit));

    let result = run_select(&mut runner, &select, Dialect::SQLite, &config).await.unwrap();
    assert_eq!(ids(&result.rows), vec![2, 4, 5]);
    assert!(runner.selects[0].order_by.is_empty());
    assert!(runner.selects[0].limit.is_none());
}

#[test]
fn test_sort_and_group_keys_keep_their_type() {
    let select = flat_select(
        "SELECT from sap.capire.Books { ID, price } group by price order by price desc",
    );
    let config = EmulationConfig::new().force(Stage::OrderBy).force(Stage::GroupBy);
    let plan = Plan::new(&select, Dialect::Postgres, &config);
    let key = |name: &str| {
        plan.select
            .columns
            .iter()
            .find(|c| c.alias.as_deref() == Some(name))
            .and_then(|c| c.element.as_ref())
            .map(|e| e.type_name().to_string())
    };
    assert_eq!(key("__orderBy0__").as_deref(), Some("cds.Decimal"));
    assert_eq!(key("__groupBy0__").as_deref(), Some("cds.Decimal"));

    let sql = render(&Query::Select(plan.select.clone()), Dialect::Postgres).unwrap().sql;
    assert!(sql.contains("Books.price::float8 AS \"__orderBy0__\""), "{}", sql);
    assert!(sql.contains("Books.price::float8 AS \"__groupBy0__\""), "{}", sql);
}

#[test]
fn test_sort_key_on_output_alias_takes_the_column_type() {
    let select = flat_select("SELECT from sap.capire.Books { ID, price as cost } order by cost");
    let plan = Plan::new(&select, Dialect::Postgres, &EmulationConfig::new().force(Stage::OrderBy));
    let sql = render(&Query::Select(plan.select.clone()), Dialect::Postgres).unwrap().sql;
    assert!(sql.contains("Books.price::float8 AS \"__orderBy0__\""), "{}", sql);
}

#[tokio::test]
async fn test_emulated_one_returns_a_single_row() {
    let mut select = flat_select("SELECT from sap.capire.Books { ID }");
    select.one = true;
    let config = EmulationConfig::new().force(Stage::One);
    let mut runner = ScriptedRunner::new(|_| rows(json!([{"ID": 7}, {"ID": 8}])));

    let result = run_select(&mut runner, &select, Dialect::SQLite, &config).await.unwrap();
    assert_eq!(ids(&result.rows), vec![7]);
    assert!(!runner.selects[0].one);
}

#[tokio::test]
async fn test_update_runs_per_row() {
    let update = cqn4sql(
        &parse_query("UPDATE sap.capire.Books set stock = 0 where stock < 5").unwrap(),
        &bookshop(),
    )
    .unwrap();
    let config = EmulationConfig::new().force(Stage::Where);
    let mut runner = ScriptedRunner::new(|_| rows(json!([{"ID": 1}, {"ID": 2}, {"ID": 3}])));

    let affected = run_mutation(&mut runner, &update, &config).await.unwrap();
    assert_eq!(affected, 3);
    assert_eq!(runner.selects.len(), 1);
    assert_eq!(runner.mutations.len(), 3);

    let impact = render(&Query::Select(runner.selects[0].clone()), Dialect::SQLite).unwrap();
    assert_eq!(
        impact.sql,
        "SELECT Books.ID AS \"ID\" FROM sap_capire_Books AS Books WHERE Books.stock < 5"
    );
    let first = render(&runner.mutations[0], Dialect::SQLite).unwrap();
    assert_eq!(
        first.sql,
        "UPDATE sap_capire_Books AS Books SET stock = 0, modifiedBy = ? WHERE Books.ID = 1"
    );
}

#[tokio::test]
async fn test_per_row_failure_is_reported_after_all_rows() {
    let delete = cqn4sql(
        &parse_query("DELETE from sap.capire.Books where stock < 5").unwrap(),
        &bookshop(),
    )
    .unwrap();
    let config = EmulationConfig::new().force(Stage::Where);
    let mut runner = ScriptedRunner::new(|_| rows(json!([{"ID": 1}, {"ID": 2}, {"ID": 3}])));
    runner.fail_on = Some(2);

    let err = run_mutation(&mut runner, &delete, &config).await.unwrap_err();
    assert_eq!(err.code(), Some(crate::error::ErrorCode::NotNullViolated));
    assert_eq!(runner.mutations.len(), 3);
}

#[tokio::test]
async fn test_mutation_without_forced_where_runs_once() {
    let delete = cqn4sql(
        &parse_query("DELETE from sap.capire.Books where stock < 5").unwrap(),
        &bookshop(),
    )
    .unwrap();
    let mut runner = ScriptedRunner::new(|_| Vec::new());
    let affected = run_mutation(&mut runner, &delete, &EmulationConfig::default()).await.unwrap();
    assert_eq!(affected, 1);
    assert!(runner.selects.is_empty());
}
