//! Per-dialect type converters: SQL wrappers applied to bound input values
//! and to output columns, keyed by CDS type. Looked up at render time.

use std::collections::HashMap;
use std::sync::LazyLock;

use super::dialect::Dialect;

type Wrap = fn(&str) -> String;

#[derive(Clone, Copy, Default)]
pub struct Converter {
    /// Wraps a placeholder bound to a column of this type.
    pub input: Option<Wrap>,
    /// Wraps a selected column of this type.
    pub output: Option<Wrap>,
}

#[derive(Default)]
pub struct ConverterRegistry {
    entries: HashMap<&'static str, Converter>,
}

impl ConverterRegistry {
    pub fn register(&mut self, ty: &'static str, converter: Converter) -> &mut Self {
        self.entries.insert(ty, converter);
        self
    }

    pub fn get(&self, ty: &str) -> Option<&Converter> {
        self.entries.get(ty)
    }

    pub fn input(&self, ty: &str, sql: &str) -> String {
        match self.get(ty).and_then(|c| c.input) {
            Some(wrap) => wrap(sql),
            None => sql.to_string(),
        }
    }

    pub fn output(&self, ty: &str, sql: &str) -> String {
        match self.get(ty).and_then(|c| c.output) {
            Some(wrap) => wrap(sql),
            None => sql.to_string(),
        }
    }
}

fn sqlite() -> ConverterRegistry {
    let mut registry = ConverterRegistry::default();
    registry
        .register(
            "cds.Timestamp",
            Converter {
                input: None,
                output: Some(|x| format!("strftime('%Y-%m-%dT%H:%M:%fZ', {})", x)),
            },
        )
        .register(
            "cds.DateTime",
            Converter {
                input: None,
                output: Some(|x| format!("strftime('%Y-%m-%dT%H:%M:%SZ', {})", x)),
            },
        );
    registry
}

fn postgres() -> ConverterRegistry {
    let mut registry = ConverterRegistry::default();
    registry
        .register(
            "cds.Timestamp",
            Converter {
                input: Some(|x| format!("{}::timestamp", x)),
                output: Some(|x| format!("to_char({}, 'YYYY-MM-DD\"T\"HH24:MI:SS.MS\"Z\"')", x)),
            },
        )
        .register(
            "cds.DateTime",
            Converter {
                input: Some(|x| format!("{}::timestamp", x)),
                output: Some(|x| format!("to_char({}, 'YYYY-MM-DD\"T\"HH24:MI:SS\"Z\"')", x)),
            },
        )
        .register(
            "cds.Date",
            Converter {
                input: Some(|x| format!("{}::date", x)),
                output: Some(|x| format!("to_char({}, 'YYYY-MM-DD')", x)),
            },
        )
        .register(
            "cds.Time",
            Converter {
                input: Some(|x| format!("{}::time", x)),
                output: Some(|x| format!("to_char({}, 'HH24:MI:SS')", x)),
            },
        )
        .register(
            "cds.Decimal",
            Converter {
                input: Some(|x| format!("{}::numeric", x)),
                output: Some(|x| format!("{}::float8", x)),
            },
        );
    registry
}

fn hana() -> ConverterRegistry {
    let mut registry = ConverterRegistry::default();
    registry
        .register(
            "cds.Timestamp",
            Converter {
                input: Some(|x| format!("TO_TIMESTAMP({})", x)),
                output: Some(|x| format!("to_char({}, 'YYYY-MM-DD\"T\"HH24:MI:SS.FF3\"Z\"')", x)),
            },
        )
        .register(
            "cds.DateTime",
            Converter {
                input: Some(|x| format!("TO_SECONDDATE({})", x)),
                output: Some(|x| format!("to_char({}, 'YYYY-MM-DD\"T\"HH24:MI:SS\"Z\"')", x)),
            },
        );
    registry
}

static SQLITE: LazyLock<ConverterRegistry> = LazyLock::new(sqlite);
static POSTGRES: LazyLock<ConverterRegistry> = LazyLock::new(postgres);
static HANA: LazyLock<ConverterRegistry> = LazyLock::new(hana);

/// Converter registry of a dialect.
pub fn converters(dialect: Dialect) -> &'static ConverterRegistry {
    match dialect {
        Dialect::SQLite => &SQLITE,
        Dialect::Postgres => &POSTGRES,
        Dialect::Hana => &HANA,
    }
}
