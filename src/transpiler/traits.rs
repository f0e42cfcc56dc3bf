//! Transpiler traits and utilities.

use crate::model::Element;

/// SQL reserved words that must be quoted when used as identifiers.
pub const RESERVED_WORDS: &[&str] = &[
    "order",
    "group",
    "user",
    "table",
    "select",
    "from",
    "where",
    "join",
    "left",
    "right",
    "inner",
    "outer",
    "on",
    "and",
    "or",
    "not",
    "null",
    "true",
    "false",
    "limit",
    "offset",
    "as",
    "in",
    "is",
    "like",
    "between",
    "having",
    "union",
    "all",
    "distinct",
    "case",
    "when",
    "then",
    "else",
    "end",
    "create",
    "alter",
    "drop",
    "insert",
    "update",
    "delete",
    "index",
    "key",
    "primary",
    "foreign",
    "references",
    "default",
    "constraint",
    "check",
    "values",
    "desc",
    "asc",
    "by",
];

/// Escape an identifier if it's a reserved word or contains special chars.
/// Handles dotted identifiers (e.g., `table.column`) by quoting each part.
pub fn escape_identifier(name: &str) -> String {
    if name.contains('.') {
        return name
            .split('.')
            .map(escape_single_identifier)
            .collect::<Vec<_>>()
            .join(".");
    }
    escape_single_identifier(name)
}

/// Escape a single identifier part (no dots).
fn escape_single_identifier(name: &str) -> String {
    let lower = name.to_lowercase();
    let needs_escaping = RESERVED_WORDS.contains(&lower.as_str())
        || name.chars().any(|c| !c.is_alphanumeric() && c != '_')
        || name.chars().next().map(|c| c.is_numeric()).unwrap_or(false);

    if needs_escaping {
        format!("\"{}\"", name.replace('"', "\"\""))
    } else {
        name.to_string()
    }
}

/// Quote a string literal.
pub fn string_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// How a dialect expresses UPSERT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertStyle {
    /// `INSERT ... ON CONFLICT (keys) DO UPDATE SET ...`
    OnConflict,
    /// `UPSERT ... WITH PRIMARY KEY`
    WithPrimaryKey,
}

/// Trait for dialect-specific SQL generation.
pub trait SqlGenerator: Send + Sync {
    /// Quote an identifier (table or column name).
    fn quote_identifier(&self, name: &str) -> String {
        escape_identifier(name)
    }

    /// Quote an output column alias; always quoted so every dialect keeps its case.
    fn quote_alias(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Generate the parameter placeholder (e.g., $1, ?) for a given index.
    fn placeholder(&self, index: usize) -> String;

    /// Get the boolean literal (true/false vs 1/0).
    fn bool_literal(&self, val: bool) -> String;

    /// Generate string concatenation expression.
    fn string_concat(&self, parts: &[&str]) -> String {
        format!("({})", parts.join(" || "))
    }

    fn limit_offset(&self, rows: Option<u64>, offset: u64) -> String;

    /// Map a CDS type to a column type for `CREATE TABLE`.
    fn column_type(&self, element: &Element) -> String;

    /// Dialect-specific rendering of a portable function; `None` falls back
    /// to the generic table.
    fn function(&self, _name: &str, _args: &[String]) -> Option<String> {
        None
    }

    fn upsert_style(&self) -> UpsertStyle {
        UpsertStyle::OnConflict
    }

    /// Aggregate an expand sub-select into JSON. `inner` is the rendered
    /// sub-select, `keys` its output columns with a flag for nested expands.
    fn expand(&self, inner: &str, keys: &[(String, bool)], many: bool) -> String;

    /// Make a JSON expression transportable as text at the top level.
    fn json_text(&self, expr: &str) -> String {
        expr.to_string()
    }

    fn drop_table(&self, table: &str) -> String {
        format!("DROP TABLE IF EXISTS {}", self.quote_identifier(table))
    }
}

/// `json_object('a', x."a", ...)` style key/value list over the `_json_` alias.
pub(crate) fn json_pairs(
    generator: &dyn SqlGenerator,
    keys: &[(String, bool)],
    nested: impl Fn(String) -> String,
) -> String {
    keys.iter()
        .map(|(key, is_nested)| {
            let column = format!("_json_.{}", generator.quote_alias(key));
            let value = if *is_nested { nested(column) } else { column };
            format!("{}, {}", string_literal(key), value)
        })
        .collect::<Vec<_>>()
        .join(", ")
}
