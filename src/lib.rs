//! # cqn: CQN to SQL
//!
//! Compiles CQN, a tree-shaped query notation over a linked entity model,
//! into SQL for SQLite, PostgreSQL and HANA, and runs it on a pooled
//! database service.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use cqn::prelude::*;
//!
//! let model = Model::from_csn(&serde_json::from_str(&csn)?)?;
//! let query = parse_query("SELECT from sap.capire.Books { ID, author { name } } where stock > 10")?;
//!
//! let flat = cqn4sql(&query, &model)?;
//! let stmt = flat.to_sql_with_dialect(Dialect::Postgres)?;
//! // => SELECT Books.ID AS "ID", (SELECT json_build_object(...) ...) AS "author"
//! //    FROM sap_capire_Books AS Books WHERE Books.stock > 10
//! ```
//!
//! ## Pipeline
//!
//! | Stage        | Module                      | Output                          |
//! |--------------|-----------------------------|---------------------------------|
//! | Resolve      | [`resolver`]                | `$refLinks` per path segment    |
//! | Flatten      | [`cqn4sql`]                 | alias-qualified physical CQN    |
//! | Render       | [`transpiler`]              | SQL text + ordered bindings     |
//! | Execute      | [`engine`], [`driver`]      | rows on a leased connection     |
//! | Post-process | [`emulation`], [`assertions`] | rows, `$count`, violations    |

pub mod assertions;
pub mod ast;
pub mod config;
pub mod cqn4sql;
pub mod driver;
pub mod emulation;
pub mod engine;
pub mod error;
pub mod model;
pub mod parser;
pub mod resolver;
pub mod session;
pub mod transpiler;

pub mod prelude {
    pub use crate::ast::*;
    pub use crate::config::Config;
    pub use crate::cqn4sql::cqn4sql;
    pub use crate::driver::{AnyDriver, Pool, PoolConfig, Row};
    pub use crate::emulation::{EmulationConfig, Stage};
    pub use crate::engine::{Args, DatabaseService, QueryResult, Transaction};
    pub use crate::error::*;
    pub use crate::model::Model;
    pub use crate::parser::parse_query;
    pub use crate::session::RequestContext;
    pub use crate::transpiler::{Dialect, SqlStatement, ToSql};
}

/// Parse the textual form of a query.
///
/// # Example
///
/// ```
/// use cqn::parse;
///
/// let query = parse("SELECT from sap.capire.Books { ID, title } where stock > 10").unwrap();
/// assert!(matches!(query, cqn::ast::Query::Select(_)));
/// ```
pub fn parse(input: &str) -> Result<ast::Query, error::CqnError> {
    parser::parse_query(input)
}
