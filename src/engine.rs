//! Database service: runs CQN on pooled connections.
//!
//! Every statement runs inside a [`Transaction`] that owns one leased
//! connection and the session variables of its request. A query is
//! flattened against the model, rendered for the pool's dialect, executed
//! with emulation where the dialect falls short, checked against
//! `@assert` annotations and finally shaped into a [`QueryResult`].
//!
//! ```rust,ignore
//! let service = DatabaseService::connect(&config, Arc::new(model)).await?;
//! let books = service
//!     .run(&parse_query("SELECT from sap.capire.Books { ID, title }")?, RequestContext::new())
//!     .await?;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::panic::Location;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as Json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::assertions;
use crate::ast::*;
use crate::config::Config;
use crate::cqn4sql::cqn4sql;
use crate::driver::{AnyDriver, Driver, Pool, PoolConfig, PooledConnection, Row};
use crate::emulation::{self, EmulationConfig, Runner};
use crate::error::{CqnError, CqnResult};
use crate::model::Model;
use crate::session::{RequestContext, SessionVariables};
use crate::transpiler::{Binding, Dialect, SqlStatement, ToSql, render, render_union};

/// Execution arguments for `?` and `:name` parameters.
#[derive(Debug, Clone, Default)]
pub struct Args {
    positional: Vec<Value>,
    named: HashMap<String, Value>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the next positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn named(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.named.insert(name.to_string(), value.into());
        self
    }

    /// A JSON array gives positional arguments, an object named ones.
    pub fn from_json(json: &Json) -> CqnResult<Self> {
        match json {
            Json::Array(items) => Ok(Self {
                positional: items.iter().map(Value::from_json).collect(),
                named: HashMap::new(),
            }),
            Json::Object(map) => Ok(Self {
                positional: Vec::new(),
                named: map.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect(),
            }),
            Json::Null => Ok(Self::default()),
            other => Err(CqnError::InvalidQuery(format!(
                "arguments must be an array or an object, got {}",
                other
            ))),
        }
    }

    fn positional(&self, index: usize) -> CqnResult<Value> {
        self.positional
            .get(index)
            .cloned()
            .ok_or_else(|| CqnError::MissingArgument(format!("?{}", index + 1)))
    }

    fn named_value(&self, name: &str) -> CqnResult<Value> {
        self.named
            .get(name)
            .cloned()
            .ok_or_else(|| CqnError::MissingArgument(format!(":{}", name)))
    }
}

/// Outcome of one statement.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    /// SELECT rows; `count` is set when `$count` was requested.
    Rows { rows: Vec<Row>, count: Option<u64> },
    /// SELECT one
    One(Option<Row>),
    /// Rows written by INSERT, UPSERT, UPDATE or DELETE
    Affected(u64),
}

impl QueryResult {
    pub fn rows(&self) -> &[Row] {
        match self {
            QueryResult::Rows { rows, .. } => rows,
            QueryResult::One(row) => row.as_slice(),
            QueryResult::Affected(_) => &[],
        }
    }

    pub fn count(&self) -> Option<u64> {
        match self {
            QueryResult::Rows { count, .. } => *count,
            _ => None,
        }
    }

    pub fn affected(&self) -> u64 {
        match self {
            QueryResult::Affected(n) => *n,
            _ => 0,
        }
    }

    pub fn to_json(&self) -> Json {
        match self {
            QueryResult::Rows { rows, count } => {
                let rows = Json::Array(rows.iter().cloned().map(Json::Object).collect());
                match count {
                    Some(count) => serde_json::json!({ "$count": count, "rows": rows }),
                    None => rows,
                }
            }
            QueryResult::One(row) => row.clone().map(Json::Object).unwrap_or(Json::Null),
            QueryResult::Affected(n) => Json::from(*n),
        }
    }
}

/// Model, pool and emulation settings shared by every request.
#[derive(Clone)]
pub struct DatabaseService {
    model: Arc<Model>,
    pool: Pool,
    emulation: EmulationConfig,
}

impl DatabaseService {
    /// Open the pool described by `config`.
    pub async fn connect(config: &Config, model: Arc<Model>) -> CqnResult<Self> {
        let dialect = config.dialect()?;
        let driver = Arc::new(AnyDriver::with_dialect(&config.database.url, dialect));
        let pool = Pool::connect(driver, config.pool.to_pool_config()).await?;
        Ok(Self::with_pool(model, pool, config.emulation.clone()))
    }

    /// Service over any driver; connections are opened on demand.
    pub fn new(
        model: Arc<Model>,
        driver: Arc<dyn Driver>,
        pool: PoolConfig,
        emulation: EmulationConfig,
    ) -> Self {
        Self::with_pool(model, Pool::new(driver, pool), emulation)
    }

    pub fn with_pool(model: Arc<Model>, pool: Pool, emulation: EmulationConfig) -> Self {
        Self { model, pool, emulation }
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn dialect(&self) -> Dialect {
        self.pool.dialect()
    }

    /// Flatten and render without executing.
    pub fn compile(&self, query: &Query) -> CqnResult<(Query, SqlStatement)> {
        let flat = cqn4sql(query, &self.model)?;
        let stmt = render(&flat, self.dialect())?;
        Ok((flat, stmt))
    }

    /// Start a transaction; the caller is recorded as the lease's `begin`
    /// site.
    #[track_caller]
    pub fn begin(
        &self,
        context: RequestContext,
    ) -> impl Future<Output = CqnResult<Transaction>> + Send + '_ {
        let site = Location::caller();
        self.begin_at(site, context)
    }

    async fn begin_at(
        &self,
        site: &'static Location<'static>,
        context: RequestContext,
    ) -> CqnResult<Transaction> {
        let mut conn = self.pool.acquire_at(site).await?;
        let dialect = self.dialect();
        if let Some(sql) = begin_statement(dialect) {
            if let Err(e) = conn.batch(sql).await {
                conn.release(true).await;
                return Err(e);
            }
        }
        conn.mark_begin(site);
        let session = SessionVariables::new(context);
        debug!("transaction {} begun on lease #{}", session.context_id, conn.lease_id());
        Ok(Transaction {
            conn: Some(conn),
            session,
            model: self.model.clone(),
            dialect,
            emulation: self.emulation.clone(),
            failed: false,
        })
    }

    /// Run one query in its own transaction.
    #[track_caller]
    pub fn run<'a>(
        &'a self,
        query: &'a Query,
        context: RequestContext,
    ) -> impl Future<Output = CqnResult<QueryResult>> + Send + 'a {
        self.run_with(query, Args::default(), context)
    }

    #[track_caller]
    pub fn run_with<'a>(
        &'a self,
        query: &'a Query,
        args: Args,
        context: RequestContext,
    ) -> impl Future<Output = CqnResult<QueryResult>> + Send + 'a {
        let site = Location::caller();
        async move {
            let mut tx = self.begin_at(site, context).await?;
            match tx.run_with(query, args).await {
                Ok(result) => {
                    tx.commit().await?;
                    Ok(result)
                }
                Err(e) => {
                    if let Err(rollback) = tx.rollback().await {
                        warn!("rollback after failed {} failed: {}", query.kind(), rollback);
                    }
                    Err(e)
                }
            }
        }
    }

    /// Drop and recreate the tables of every persisted entity.
    pub async fn deploy(&self) -> CqnResult<usize> {
        let names: Vec<String> = self
            .model
            .entities()
            .filter(|e| !e.is_external())
            .map(|e| e.name.clone())
            .collect();
        let mut tx = self.begin(RequestContext::new()).await?;
        for name in &names {
            let result = match tx.run(&Query::Drop(DropTable::entity(name))).await {
                Ok(_) => tx.run(&Query::Create(CreateTable::entity(name))).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                tx.rollback().await?;
                return Err(e);
            }
        }
        tx.commit().await?;
        info!("deployed {} tables", names.len());
        Ok(names.len())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn begin_statement(dialect: Dialect) -> Option<&'static str> {
    match dialect {
        Dialect::SQLite | Dialect::Postgres => Some("BEGIN"),
        // HANA sessions run with autocommit off.
        Dialect::Hana => None,
    }
}

/// One request's unit of work on a leased connection.
///
/// Dropping a transaction that was neither committed nor rolled back rolls
/// it back in the background and discards the connection.
pub struct Transaction {
    conn: Option<PooledConnection>,
    session: SessionVariables,
    model: Arc<Model>,
    dialect: Dialect,
    emulation: EmulationConfig,
    /// A statement failed; the connection is not reused.
    failed: bool,
}

impl Transaction {
    pub fn context_id(&self) -> Uuid {
        self.session.context_id
    }

    /// Value of a session variable as bound into statements.
    pub fn variable(&mut self, name: &str) -> CqnResult<Value> {
        self.session.get(name)
    }

    pub async fn run(&mut self, query: &Query) -> CqnResult<QueryResult> {
        self.run_with(query, Args::default()).await
    }

    pub async fn run_with(&mut self, query: &Query, args: Args) -> CqnResult<QueryResult> {
        let result = self.execute(query, &args).await;
        if let Err(e) = &result {
            if !e.is_compile_error() {
                self.failed = true;
            }
        }
        result
    }

    async fn execute(&mut self, query: &Query, args: &Args) -> CqnResult<QueryResult> {
        let flat = cqn4sql(query, &self.model)?;
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| CqnError::Connection("transaction already ended".into()))?;
        let mut statements = Statements {
            conn,
            session: &mut self.session,
            args,
            dialect: self.dialect,
        };

        match &flat {
            Query::Select(select) => {
                let selection = emulation::run_select(&mut statements, select, self.dialect, &self.emulation).await?;
                let rows = decode(selection.rows, &select.columns)?;
                if select.one {
                    Ok(QueryResult::One(rows.into_iter().next()))
                } else {
                    Ok(QueryResult::Rows {
                        rows,
                        count: selection.count,
                    })
                }
            }
            Query::Insert(_) | Query::Upsert(_) | Query::Update(_) | Query::Delete(_) => {
                let affected = emulation::run_mutation(&mut statements, &flat, &self.emulation).await?;
                let checks = assertions::checks(&flat)?;
                if !checks.is_empty() {
                    let violations = statements.union(&checks.selects).await?;
                    checks.raise(&violations)?;
                }
                Ok(QueryResult::Affected(affected))
            }
            Query::Create(_) | Query::Drop(_) => {
                statements.affected(&flat).await?;
                Ok(QueryResult::Affected(0))
            }
        }
    }

    pub async fn commit(mut self) -> CqnResult<()> {
        self.finish("COMMIT").await
    }

    pub async fn rollback(mut self) -> CqnResult<()> {
        self.finish("ROLLBACK").await
    }

    async fn finish(&mut self, sql: &str) -> CqnResult<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        let result = conn.batch(sql).await;
        if result.is_err() || self.failed {
            warn!("discarding connection of transaction {}", self.session.context_id);
        }
        conn.release(result.is_err() || self.failed).await;
        self.session.reset();
        debug!("transaction {} ended with {}", self.session.context_id, sql);
        result
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        warn!(
            "transaction {} dropped without commit or rollback",
            self.session.context_id
        );
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = conn.batch("ROLLBACK").await {
                    warn!("background rollback failed: {}", e);
                }
                conn.release(true).await;
            });
        }
    }
}

/// Runs rendered statements on the transaction's connection.
struct Statements<'t> {
    conn: &'t mut PooledConnection,
    session: &'t mut SessionVariables,
    args: &'t Args,
    dialect: Dialect,
}

impl Statements<'_> {
    async fn resolve(&mut self, bindings: &[Binding]) -> CqnResult<Vec<Value>> {
        let mut values = Vec::with_capacity(bindings.len());
        for binding in bindings {
            values.push(match binding {
                Binding::Value(Value::Stream(stream)) => Value::Binary(Binary::new(stream.read_all().await?)),
                Binding::Value(value) => value.clone(),
                Binding::Variable(name) => self.session.get(name)?,
                Binding::Arg(index) => self.args.positional(*index)?,
                Binding::Named(name) => self.args.named_value(name)?,
            });
        }
        Ok(values)
    }

    async fn query(&mut self, stmt: SqlStatement) -> CqnResult<Vec<Row>> {
        debug!("{}", stmt.sql);
        let params = self.resolve(&stmt.values).await?;
        self.conn.query(&stmt.sql, &params).await
    }

    async fn union(&mut self, selects: &[Select]) -> CqnResult<Vec<Row>> {
        let stmt = render_union(selects, self.dialect)?;
        self.query(stmt).await
    }
}

#[async_trait]
impl Runner for Statements<'_> {
    async fn rows(&mut self, select: &Select) -> CqnResult<Vec<Row>> {
        let stmt = select.to_sql_with_dialect(self.dialect)?;
        self.query(stmt).await
    }

    async fn affected(&mut self, query: &Query) -> CqnResult<u64> {
        let stmt = render(query, self.dialect)?;
        debug!("{}", stmt.sql);
        if matches!(query, Query::Create(_) | Query::Drop(_)) {
            self.conn.batch(&stmt.sql).await?;
            return Ok(0);
        }
        if stmt.entries.is_empty() {
            let params = self.resolve(&stmt.values).await?;
            return self.conn.execute(&stmt.sql, &params).await;
        }
        let mut affected = 0;
        for entry in &stmt.entries {
            let params = self.resolve(entry).await?;
            affected += self.conn.execute(&stmt.sql, &params).await?;
        }
        Ok(affected)
    }
}

/// Parse expand columns (JSON text at the top level) and turn integer
/// booleans into JSON booleans, guided by the select's columns.
fn decode(rows: Vec<Row>, columns: &[Column]) -> CqnResult<Vec<Row>> {
    rows.into_iter()
        .map(|mut row| {
            decode_row(&mut row, columns)?;
            Ok(row)
        })
        .collect()
}

fn decode_row(row: &mut Row, columns: &[Column]) -> CqnResult<()> {
    for column in columns {
        let Some(value) = column.output_name().and_then(|name| row.get_mut(&name)) else {
            continue;
        };
        match &column.expr {
            Expr::Select(sub) if sub.expand.is_some() => {
                let mut parsed = match value.take() {
                    Json::String(text) => serde_json::from_str(&text)?,
                    other => other,
                };
                if parsed.is_null() && sub.expand == Some(ExpandKind::Many) {
                    parsed = Json::Array(Vec::new());
                }
                match &mut parsed {
                    Json::Object(object) => decode_row(object, &sub.columns)?,
                    Json::Array(items) => {
                        for item in items.iter_mut() {
                            if let Json::Object(object) = item {
                                decode_row(object, &sub.columns)?;
                            }
                        }
                    }
                    _ => {}
                }
                *value = parsed;
            }
            _ => {
                let boolean = column
                    .element
                    .as_ref()
                    .is_some_and(|e| e.type_name() == "cds.Boolean");
                if let (true, Some(n)) = (boolean, value.as_i64()) {
                    *value = Json::Bool(n != 0);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::recording::{RecordingDriver, Reply};
    use crate::emulation::Stage;
    use crate::error::ErrorCode;
    use crate::model::fixtures::bookshop;
    use crate::parser::parse_query;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn service(driver: &RecordingDriver) -> DatabaseService {
        service_with(driver, EmulationConfig::new())
    }

    fn service_with(driver: &RecordingDriver, emulation: EmulationConfig) -> DatabaseService {
        DatabaseService::new(
            Arc::new(bookshop()),
            Arc::new(driver.clone()),
            PoolConfig::new().max_connections(2),
            emulation,
        )
    }

    fn row(value: Json) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn entry(value: Json) -> Record {
        Value::from_json(&value).as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_select_runs_in_a_transaction() {
        let driver = RecordingDriver::with(Dialect::SQLite, |sql, _| {
            if sql.starts_with("SELECT") {
                Reply::Rows(vec![row(json!({ "ID": 1, "name": "Emily Brontë" }))])
            } else {
                Reply::Affected(0)
            }
        });
        let db = service(&driver);

        let query = parse_query("SELECT from sap.capire.Authors { ID, name }").unwrap();
        let result = db.run(&query, RequestContext::new()).await.unwrap();

        assert_eq!(result.rows().len(), 1);
        assert_eq!(result.rows()[0]["name"], json!("Emily Brontë"));
        assert_eq!(
            driver.statements(),
            vec![
                "BEGIN".to_string(),
                "SELECT Authors.ID AS \"ID\", Authors.name AS \"name\" FROM sap_capire_Authors AS Authors".to_string(),
                "COMMIT".to_string(),
            ]
        );
        assert_eq!(db.pool().active_count(), 0);
    }

    #[tokio::test]
    async fn test_insert_binds_session_variables_and_checks_assertions() {
        let driver = RecordingDriver::new(Dialect::SQLite);
        let db = service(&driver);

        let insert = Query::Insert(
            INSERT::into("sap.capire.Books").entries(vec![entry(json!({ "ID": 1, "title": "Jane Eyre", "stock": 5 }))]),
        );
        let result = db.run(&insert, RequestContext::new().user("alice")).await.unwrap();
        assert_eq!(result, QueryResult::Affected(1));

        let log = driver.log();
        assert_eq!(log.len(), 4);
        assert!(log[1].0.starts_with("INSERT INTO sap_capire_Books (ID, title, stock, createdAt, modifiedBy)"));
        assert_eq!(log[1].1[0], Value::Int(1));
        assert_eq!(log[1].1[4], Value::from("alice"));
        assert!(log[1].1[3].as_str().is_some_and(|ts| ts.ends_with('Z')));
        assert!(log[2].0.contains(" UNION ALL "), "{}", log[2].0);
        assert_eq!(log[3].0, "COMMIT");
    }

    #[tokio::test]
    async fn test_assertion_violation_rolls_back_and_discards() {
        let driver = RecordingDriver::with(Dialect::SQLite, |sql, _| {
            if sql.contains("AS \"element\"") {
                Reply::Rows(vec![row(json!({ "element": "stock", "message": "Value must be within [0,1000]" }))])
            } else if sql.starts_with("SELECT") {
                Reply::Rows(Vec::new())
            } else {
                Reply::Affected(1)
            }
        });
        let db = service(&driver);

        let update = Query::Update(
            UPDATE::entity("sap.capire.Books")
                .data(entry(json!({ "ID": 4, "stock": -1 }))),
        );
        let err = db.run(&update, RequestContext::new()).await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::AssertionFailed));
        assert_eq!(driver.statements().last().map(String::as_str), Some("ROLLBACK"));

        db.run(&parse_query("SELECT from sap.capire.Authors").unwrap(), RequestContext::new())
            .await
            .unwrap();
        assert_eq!(driver.connects(), 2);
    }

    #[tokio::test]
    async fn test_failed_statement_rolls_back_and_discards() {
        let driver = RecordingDriver::with(Dialect::SQLite, |sql, _| {
            if sql.starts_with("INSERT") {
                Reply::Fail("UNIQUE constraint failed: sap_capire_Authors.ID".into())
            } else if sql.starts_with("SELECT") {
                Reply::Rows(Vec::new())
            } else {
                Reply::Affected(0)
            }
        });
        let db = service(&driver);

        let insert = Query::Insert(
            INSERT::into("sap.capire.Authors").entries(vec![entry(json!({ "ID": 1, "name": "Poe" }))]),
        );
        let err = db.run(&insert, RequestContext::new()).await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::UniqueConstraintViolated));
        assert_eq!(driver.statements().last().map(String::as_str), Some("ROLLBACK"));
        assert_eq!(db.pool().active_count(), 0);

        db.run(&parse_query("SELECT from sap.capire.Authors").unwrap(), RequestContext::new())
            .await
            .unwrap();
        assert_eq!(driver.connects(), 2);
    }

    #[tokio::test]
    async fn test_arguments_are_bound_in_placeholder_order() {
        let driver = RecordingDriver::new(Dialect::Postgres);
        let db = service(&driver);
        let query = parse_query("SELECT from sap.capire.Authors { ID } where ID = ? and name = :name").unwrap();

        db.run_with(&query, Args::new().arg(7).named("name", "Poe"), RequestContext::new())
            .await
            .unwrap();
        let log = driver.log();
        assert_eq!(log[1].1, vec![Value::Int(7), Value::from("Poe")]);

        let err = db.run(&query, RequestContext::new()).await.unwrap_err();
        assert!(matches!(err, CqnError::MissingArgument(ref name) if name == "?1"), "{}", err);
    }

    #[tokio::test]
    async fn test_expand_columns_are_decoded() {
        let driver = RecordingDriver::with(Dialect::SQLite, |sql, _| {
            if sql.starts_with("SELECT") {
                Reply::Rows(vec![
                    row(json!({ "name": "Poe", "books": "[{\"title\":\"The Raven\"}]" })),
                    row(json!({ "name": "Brontë", "books": null })),
                ])
            } else {
                Reply::Affected(0)
            }
        });
        let db = service(&driver);
        let query = parse_query("SELECT from sap.capire.Authors { name, books { title } }").unwrap();

        let result = db.run(&query, RequestContext::new()).await.unwrap();
        assert_eq!(result.rows()[0]["books"], json!([{ "title": "The Raven" }]));
        assert_eq!(result.rows()[1]["books"], json!([]));
    }

    #[tokio::test]
    async fn test_select_one_returns_a_single_row() {
        let driver = RecordingDriver::new(Dialect::SQLite);
        let db = service(&driver);
        let query = Query::Select(SELECT::one("sap.capire.Authors").cols("name").unwrap());
        assert_eq!(db.run(&query, RequestContext::new()).await.unwrap(), QueryResult::One(None));
    }

    #[tokio::test]
    async fn test_forced_where_updates_row_by_row() {
        let driver = RecordingDriver::with(Dialect::SQLite, |sql, _| {
            if sql.starts_with("SELECT Authors.ID") {
                Reply::Rows(vec![row(json!({ "ID": 1 })), row(json!({ "ID": 2 }))])
            } else if sql.starts_with("SELECT") {
                Reply::Rows(Vec::new())
            } else {
                Reply::Affected(1)
            }
        });
        let db = service_with(&driver, EmulationConfig::new().force(Stage::Where));
        let query = parse_query("UPDATE sap.capire.Authors set name = 'anonymous' where name is null").unwrap();

        let result = db.run(&query, RequestContext::new()).await.unwrap();
        assert_eq!(result.affected(), 2);
        let updates = driver
            .statements()
            .into_iter()
            .filter(|sql| sql.starts_with("UPDATE"))
            .count();
        assert_eq!(updates, 2);
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let driver = RecordingDriver::new(Dialect::SQLite);
        let db = service(&driver);

        let tx = db.begin(RequestContext::new()).await.unwrap();
        assert_eq!(db.pool().leases().len(), 1);
        drop(tx);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(driver.statements(), vec!["BEGIN".to_string(), "ROLLBACK".to_string()]);
        assert!(db.pool().leases().is_empty());
    }

    #[tokio::test]
    async fn test_deploy_recreates_every_table() {
        let driver = RecordingDriver::new(Dialect::SQLite);
        let db = service(&driver);

        assert_eq!(db.deploy().await.unwrap(), 3);
        let statements = driver.statements();
        assert_eq!(statements[1], "DROP TABLE IF EXISTS sap_capire_Authors");
        assert_eq!(
            statements[2],
            "CREATE TABLE sap_capire_Authors (ID INTEGER NOT NULL, name NVARCHAR(5000), PRIMARY KEY(ID))"
        );
        assert_eq!(statements.len(), 8);
        assert_eq!(statements[7], "COMMIT");
    }

    #[test]
    fn test_args_from_json() {
        let args = Args::from_json(&json!([1, "two"])).unwrap();
        assert_eq!(args.positional(1).unwrap(), Value::from("two"));
        let args = Args::from_json(&json!({ "name": "Poe" })).unwrap();
        assert_eq!(args.named_value("name").unwrap(), Value::from("Poe"));
        assert!(Args::from_json(&json!(3)).is_err());
    }
}
