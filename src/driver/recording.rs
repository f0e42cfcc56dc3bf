//! In-memory driver for tests: records every statement and answers from a
//! closure.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{Connection, Driver, Row};
use crate::ast::Value;
use crate::error::{CqnError, CqnResult};
use crate::transpiler::Dialect;

/// Answer to one statement.
pub(crate) enum Reply {
    Rows(Vec<Row>),
    Affected(u64),
    Fail(String),
}

type Responder = dyn Fn(&str, &[Value]) -> Reply + Send + Sync;

#[derive(Clone)]
pub(crate) struct RecordingDriver {
    dialect: Dialect,
    log: Arc<Mutex<Vec<(String, Vec<Value>)>>>,
    respond: Arc<Responder>,
    connects: Arc<AtomicUsize>,
}

impl RecordingDriver {
    /// Queries return no rows, every other statement affects one row.
    pub(crate) fn new(dialect: Dialect) -> Self {
        Self::with(dialect, |sql, _| {
            if sql.starts_with("SELECT") || sql.starts_with("WITH") {
                Reply::Rows(Vec::new())
            } else {
                Reply::Affected(1)
            }
        })
    }

    pub(crate) fn with(
        dialect: Dialect,
        respond: impl Fn(&str, &[Value]) -> Reply + Send + Sync + 'static,
    ) -> Self {
        Self {
            dialect,
            log: Arc::new(Mutex::new(Vec::new())),
            respond: Arc::new(respond),
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn log(&self) -> Vec<(String, Vec<Value>)> {
        self.log.lock().unwrap().clone()
    }

    pub(crate) fn statements(&self) -> Vec<String> {
        self.log().into_iter().map(|(sql, _)| sql).collect()
    }

    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    fn answer(&self, sql: &str, params: &[Value]) -> Reply {
        self.log.lock().unwrap().push((sql.to_string(), params.to_vec()));
        (self.respond)(sql, params)
    }
}

#[async_trait]
impl Driver for RecordingDriver {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn connect(&self) -> CqnResult<Box<dyn Connection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(RecordingConnection { driver: self.clone() }))
    }
}

struct RecordingConnection {
    driver: RecordingDriver,
}

#[async_trait]
impl Connection for RecordingConnection {
    async fn query(&mut self, sql: &str, params: &[Value]) -> CqnResult<Vec<Row>> {
        match self.driver.answer(sql, params) {
            Reply::Rows(rows) => Ok(rows),
            Reply::Affected(_) => Ok(Vec::new()),
            Reply::Fail(message) => Err(CqnError::database(None, message)),
        }
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> CqnResult<u64> {
        match self.driver.answer(sql, params) {
            Reply::Rows(rows) => Ok(rows.len() as u64),
            Reply::Affected(n) => Ok(n),
            Reply::Fail(message) => Err(CqnError::database(None, message)),
        }
    }

    async fn batch(&mut self, sql: &str) -> CqnResult<()> {
        match self.driver.answer(sql, &[]) {
            Reply::Fail(message) => Err(CqnError::database(None, message)),
            _ => Ok(()),
        }
    }
}
