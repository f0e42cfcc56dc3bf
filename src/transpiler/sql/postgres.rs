use crate::model::Element;
use crate::transpiler::traits::{SqlGenerator, json_pairs};

pub struct PostgresGenerator;

impl Default for PostgresGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl PostgresGenerator {
    pub fn new() -> Self {
        Self
    }
}

impl SqlGenerator for PostgresGenerator {
    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn bool_literal(&self, val: bool) -> String {
        if val {
            "true".to_string()
        } else {
            "false".to_string()
        }
    }

    fn limit_offset(&self, rows: Option<u64>, offset: u64) -> String {
        let mut sql = String::new();
        if let Some(n) = rows {
            sql.push_str(&format!(" LIMIT {}", n));
        }
        if offset > 0 {
            sql.push_str(&format!(" OFFSET {}", offset));
        }
        sql
    }

    fn column_type(&self, element: &Element) -> String {
        match element.type_name() {
            "cds.String" => format!("VARCHAR({})", element.length.unwrap_or(5000)),
            "cds.LargeString" => "TEXT".into(),
            "cds.UUID" => "VARCHAR(36)".into(),
            "cds.Integer" | "cds.Int32" | "cds.Int16" | "cds.UInt8" => "INTEGER".into(),
            "cds.Integer64" | "cds.Int64" => "BIGINT".into(),
            "cds.Decimal" => match (element.precision, element.scale) {
                (Some(p), Some(s)) => format!("DECIMAL({}, {})", p, s),
                (Some(p), None) => format!("DECIMAL({})", p),
                _ => "DECIMAL".into(),
            },
            "cds.Double" | "cds.DecimalFloat" => "FLOAT8".into(),
            "cds.Boolean" => "BOOLEAN".into(),
            "cds.Date" => "DATE".into(),
            "cds.Time" => "TIME".into(),
            "cds.DateTime" => "TIMESTAMP(0)".into(),
            "cds.Timestamp" => "TIMESTAMP".into(),
            "cds.Binary" | "cds.LargeBinary" => "BYTEA".into(),
            _ => "VARCHAR(5000)".into(),
        }
    }

    fn function(&self, name: &str, args: &[String]) -> Option<String> {
        let arg = |i: usize| args.get(i).map(String::as_str).unwrap_or("NULL");
        let part = |field: &str| format!("date_part('{}', {})::integer", field, arg(0));
        Some(match name {
            "contains" => format!("strpos({}, {}) > 0", arg(0), arg(1)),
            "startswith" => format!("strpos({}, {}) = 1", arg(0), arg(1)),
            "endswith" => format!("right({}, length({})) = {}", arg(0), arg(1), arg(1)),
            "indexof" => format!("(strpos({}, {}) - 1)", arg(0), arg(1)),
            "year" => part("year"),
            "month" => part("month"),
            "day" => part("day"),
            "hour" => part("hour"),
            "minute" => part("minute"),
            "second" => format!("floor(date_part('second', {}))::integer", arg(0)),
            "months_between" => format!(
                "(date_part('year', age({b}, {a})) * 12 + date_part('month', age({b}, {a})))::integer",
                a = arg(0),
                b = arg(1)
            ),
            _ => return None,
        })
    }

    fn expand(&self, inner: &str, keys: &[(String, bool)], many: bool) -> String {
        let object = format!("json_build_object({})", json_pairs(self, keys, |c| c));
        if many {
            format!(
                "(SELECT coalesce(json_agg({}), '[]'::json) FROM ({}) AS _json_)",
                object, inner
            )
        } else {
            format!("(SELECT {} FROM ({}) AS _json_)", object, inner)
        }
    }

    fn json_text(&self, expr: &str) -> String {
        format!("{}::text", expr)
    }
}
