use super::super::traits::{SqlGenerator, json_pairs};
use crate::model::Element;

pub struct SqliteGenerator;

impl SqlGenerator for SqliteGenerator {
    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn bool_literal(&self, val: bool) -> String {
        if val {
            "1".to_string()
        } else {
            "0".to_string()
        }
    }

    fn limit_offset(&self, rows: Option<u64>, offset: u64) -> String {
        let mut sql = String::new();
        match rows {
            Some(n) => sql.push_str(&format!(" LIMIT {}", n)),
            // SQLite needs a LIMIT before OFFSET
            None if offset > 0 => sql.push_str(" LIMIT -1"),
            None => {}
        }
        if offset > 0 {
            sql.push_str(&format!(" OFFSET {}", offset));
        }
        sql
    }

    fn column_type(&self, element: &Element) -> String {
        match element.type_name() {
            "cds.String" => format!("NVARCHAR({})", element.length.unwrap_or(5000)),
            "cds.LargeString" => "NCLOB".into(),
            "cds.UUID" => "NVARCHAR(36)".into(),
            "cds.Integer" | "cds.Int32" | "cds.Int16" | "cds.UInt8" => "INTEGER".into(),
            "cds.Integer64" | "cds.Int64" => "BIGINT".into(),
            "cds.Decimal" => match (element.precision, element.scale) {
                (Some(p), Some(s)) => format!("DECIMAL({}, {})", p, s),
                (Some(p), None) => format!("DECIMAL({})", p),
                _ => "DECIMAL".into(),
            },
            "cds.Double" | "cds.DecimalFloat" => "DOUBLE".into(),
            "cds.Boolean" => "BOOLEAN".into(),
            "cds.Date" => "DATE_TEXT".into(),
            "cds.Time" => "TIME_TEXT".into(),
            "cds.DateTime" | "cds.Timestamp" => "TIMESTAMP_TEXT".into(),
            "cds.Binary" | "cds.LargeBinary" => "BLOB".into(),
            _ => "NVARCHAR(5000)".into(),
        }
    }

    fn function(&self, name: &str, args: &[String]) -> Option<String> {
        let arg = |i: usize| args.get(i).map(String::as_str).unwrap_or("NULL");
        let part = |format: &str| format!("cast(strftime('{}', {}) as Integer)", format, arg(0));
        Some(match name {
            "contains" => format!("ifnull(instr({}, {}), 0) > 0", arg(0), arg(1)),
            "startswith" => format!("ifnull(instr({}, {}), 0) = 1", arg(0), arg(1)),
            "endswith" => format!(
                "substr({}, length({}) + 1 - length({})) = {}",
                arg(0),
                arg(0),
                arg(1),
                arg(1)
            ),
            "indexof" => format!("(instr({}, {}) - 1)", arg(0), arg(1)),
            "year" => part("%Y"),
            "month" => part("%m"),
            "day" => part("%d"),
            "hour" => part("%H"),
            "minute" => part("%M"),
            "second" => part("%S"),
            "months_between" => format!(
                "((cast(strftime('%Y', {b}) as Integer) - cast(strftime('%Y', {a}) as Integer)) * 12 + cast(strftime('%m', {b}) as Integer) - cast(strftime('%m', {a}) as Integer))",
                a = arg(0),
                b = arg(1)
            ),
            _ => return None,
        })
    }

    fn expand(&self, inner: &str, keys: &[(String, bool)], many: bool) -> String {
        let object = format!("json_object({})", json_pairs(self, keys, |c| format!("json({})", c)));
        if many {
            format!("(SELECT json_group_array({}) FROM ({}) AS _json_)", object, inner)
        } else {
            format!("(SELECT {} FROM ({}) AS _json_)", object, inner)
        }
    }
}
