use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CqnError;
use crate::transpiler::sql::hana::HanaGenerator;
use crate::transpiler::sql::postgres::PostgresGenerator;
use crate::transpiler::sql::sqlite::SqliteGenerator;
use crate::transpiler::traits::SqlGenerator;

/// Supported SQL Dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    SQLite,
    Postgres,
    Hana,
}

/// Clauses a dialect can express natively. Anything missing is emulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub limit: bool,
    pub group_by: bool,
    /// GROUP BY may name output column aliases.
    pub group_by_alias: bool,
    pub having: bool,
    /// HAVING may name output column aliases.
    pub having_alias: bool,
    pub order_by: bool,
    /// WHERE may name output column aliases.
    pub where_alias: bool,
}

impl Dialect {
    pub fn generator(&self) -> Box<dyn SqlGenerator> {
        match self {
            Dialect::SQLite => Box::new(SqliteGenerator),
            Dialect::Postgres => Box::new(PostgresGenerator),
            Dialect::Hana => Box::new(HanaGenerator),
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        let all = Capabilities {
            limit: true,
            group_by: true,
            group_by_alias: true,
            having: true,
            having_alias: true,
            order_by: true,
            where_alias: false,
        };
        match self {
            Dialect::SQLite => all,
            Dialect::Postgres => Capabilities {
                having_alias: false,
                ..all
            },
            Dialect::Hana => Capabilities {
                group_by_alias: false,
                having_alias: false,
                ..all
            },
        }
    }

    /// Dialect of a database URL (`sqlite::memory:`, `postgres://...`).
    pub fn from_url(url: &str) -> Option<Dialect> {
        let scheme = url.split(':').next()?;
        scheme.parse().ok()
    }
}

impl FromStr for Dialect {
    type Err = CqnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Dialect::SQLite),
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            "hana" | "hdb" => Ok(Dialect::Hana),
            other => Err(CqnError::Config(format!("unknown dialect '{}'", other))),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Dialect::SQLite => "sqlite",
            Dialect::Postgres => "postgres",
            Dialect::Hana => "hana",
        })
    }
}
