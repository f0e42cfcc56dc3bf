use crate::model::Element;
use crate::transpiler::traits::{SqlGenerator, UpsertStyle};

/// SAP HANA generator.
pub struct HanaGenerator;

impl SqlGenerator for HanaGenerator {
    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn bool_literal(&self, val: bool) -> String {
        if val {
            "TRUE".to_string()
        } else {
            "FALSE".to_string()
        }
    }

    fn limit_offset(&self, rows: Option<u64>, offset: u64) -> String {
        let mut sql = String::new();
        match rows {
            Some(n) => sql.push_str(&format!(" LIMIT {}", n)),
            None if offset > 0 => sql.push_str(&format!(" LIMIT {}", i32::MAX)),
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
            "cds.Integer" | "cds.Int32" => "INTEGER".into(),
            "cds.Int16" => "SMALLINT".into(),
            "cds.UInt8" => "TINYINT".into(),
            "cds.Integer64" | "cds.Int64" => "BIGINT".into(),
            "cds.Decimal" => match (element.precision, element.scale) {
                (Some(p), Some(s)) => format!("DECIMAL({}, {})", p, s),
                (Some(p), None) => format!("DECIMAL({})", p),
                _ => "DECIMAL".into(),
            },
            "cds.Double" => "DOUBLE".into(),
            "cds.DecimalFloat" => "DECIMAL".into(),
            "cds.Boolean" => "BOOLEAN".into(),
            "cds.Date" => "DATE".into(),
            "cds.Time" => "TIME".into(),
            "cds.DateTime" => "SECONDDATE".into(),
            "cds.Timestamp" => "TIMESTAMP".into(),
            "cds.Binary" => format!("VARBINARY({})", element.length.unwrap_or(5000)),
            "cds.LargeBinary" => "BLOB".into(),
            _ => "NVARCHAR(5000)".into(),
        }
    }

    fn function(&self, name: &str, args: &[String]) -> Option<String> {
        let arg = |i: usize| args.get(i).map(String::as_str).unwrap_or("NULL");
        Some(match name {
            "contains" => format!("locate({}, {}) > 0", arg(0), arg(1)),
            "startswith" => format!("locate({}, {}) = 1", arg(0), arg(1)),
            "endswith" => format!("right({}, length({})) = {}", arg(0), arg(1), arg(1)),
            "indexof" => format!("(locate({}, {}) - 1)", arg(0), arg(1)),
            "day" => format!("dayofmonth({})", arg(0)),
            "second" => format!("to_integer(second({}))", arg(0)),
            _ => return None,
        })
    }

    fn upsert_style(&self) -> UpsertStyle {
        UpsertStyle::WithPrimaryKey
    }

    fn expand(&self, inner: &str, _keys: &[(String, bool)], many: bool) -> String {
        let arraywrap = if many { "" } else { ", 'arraywrap'='no'" };
        format!("({} FOR JSON ('format'='no', 'omitnull'='no'{}))", inner, arraywrap)
    }

    fn drop_table(&self, table: &str) -> String {
        format!("DROP TABLE {}", self.quote_identifier(table))
    }
}
