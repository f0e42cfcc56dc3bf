//! CQN JSON form.
//!
//! ```text
//! {"SELECT": {"from": {"ref": ["Books"]},
//!             "columns": ["*", {"ref": ["author"], "expand": ["*"]}],
//!             "where": [{"ref": ["ID"]}, "=", {"val": 1}]}}
//! ```
//!
//! Links, leaves and resolved elements are compile-time annotations and are
//! never serialized. Flattened statements carry `"$flat": true` instead;
//! `cqn4sql` links them again from their physical names.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value as Json, json};

use super::expr::*;
use super::query::*;
use super::values::{Record, Value};
use crate::error::{CqnError, CqnResult};

fn invalid(message: impl Into<String>) -> CqnError {
    CqnError::InvalidQuery(message.into())
}

fn object<'a>(json: &'a Json, what: &str) -> CqnResult<&'a Map<String, Json>> {
    json.as_object()
        .ok_or_else(|| invalid(format!("{} must be an object, got {}", what, json)))
}

impl Query {
    /// Parse a CQN JSON object such as `{"SELECT": {...}}`.
    pub fn from_json(json: &Json) -> CqnResult<Query> {
        let obj = object(json, "query")?;
        let (kind, body) = obj
            .iter()
            .next()
            .ok_or_else(|| invalid("empty query object"))?;
        match kind.as_str() {
            "SELECT" => Ok(Query::Select(parse_select(body)?)),
            "INSERT" => Ok(Query::Insert(parse_insert(body)?)),
            "UPSERT" => Ok(Query::Upsert(parse_insert(body)?)),
            "UPDATE" => Ok(Query::Update(parse_update(body)?)),
            "DELETE" => Ok(Query::Delete(parse_delete(body)?)),
            "CREATE" => Ok(Query::Create(CreateTable::entity(&entity_name(body)?))),
            "DROP" => Ok(Query::Drop(DropTable::entity(&entity_name(body)?))),
            other => Err(invalid(format!("unknown query kind '{}'", other))),
        }
    }

    pub fn to_json(&self) -> Json {
        match self {
            Query::Select(s) => json!({ "SELECT": select_to_json(s) }),
            Query::Insert(i) => json!({ "INSERT": insert_to_json(i) }),
            Query::Upsert(i) => json!({ "UPSERT": insert_to_json(i) }),
            Query::Update(u) => {
                let mut body = Map::new();
                body.insert("entity".into(), ref_to_json(&u.entity));
                if !u.data.is_empty() {
                    body.insert("data".into(), Value::Object(u.data.clone()).to_json());
                }
                if !u.with.is_empty() {
                    let with: Map<String, Json> = u
                        .with
                        .iter()
                        .map(|a| (a.column.clone(), expr_to_json(&a.expr)))
                        .collect();
                    body.insert("with".into(), Json::Object(with));
                }
                if !u.filter.is_empty() {
                    body.insert("where".into(), tokens_to_json(&u.filter));
                }
                mark_flat(&mut body, u.flattened);
                json!({ "UPDATE": body })
            }
            Query::Delete(d) => {
                let mut body = Map::new();
                body.insert("from".into(), ref_to_json(&d.from));
                if !d.filter.is_empty() {
                    body.insert("where".into(), tokens_to_json(&d.filter));
                }
                mark_flat(&mut body, d.flattened);
                json!({ "DELETE": body })
            }
            Query::Create(c) => json!({ "CREATE": { "entity": c.entity } }),
            Query::Drop(d) => json!({ "DROP": { "entity": d.entity } }),
        }
    }
}

impl Serialize for Query {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Query {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = Json::deserialize(deserializer)?;
        Query::from_json(&json).map_err(serde::de::Error::custom)
    }
}

/// `"Books"`, `{"ref": ["Books"]}` or `{"entity": "Books"}`.
fn entity_name(json: &Json) -> CqnResult<String> {
    match json {
        Json::String(name) => Ok(name.clone()),
        Json::Object(obj) => {
            if let Some(name) = obj.get("entity").or_else(|| obj.get("table")) {
                return entity_name(name);
            }
            let target = parse_target(json)?;
            target
                .first()
                .map(str::to_string)
                .ok_or_else(|| invalid("empty entity reference"))
        }
        other => Err(invalid(format!("expected entity name, got {}", other))),
    }
}

fn parse_target(json: &Json) -> CqnResult<Ref> {
    match json {
        Json::String(name) => Ok(Ref::entity(name)),
        Json::Object(obj) => match obj.get("ref") {
            Some(segments) => parse_ref(segments),
            None => Err(invalid(format!("expected {{ref}}, got {}", json))),
        },
        other => Err(invalid(format!("expected entity reference, got {}", other))),
    }
}

fn parse_ref(json: &Json) -> CqnResult<Ref> {
    let items = json
        .as_array()
        .ok_or_else(|| invalid("ref must be an array"))?;
    if items.is_empty() {
        return Err(invalid("ref must not be empty"));
    }
    let mut segments = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Json::String(id) => segments.push(Segment::Name(id.clone())),
            Json::Object(obj) => {
                let id = obj
                    .get("id")
                    .and_then(Json::as_str)
                    .ok_or_else(|| invalid("filtered segment needs an id"))?;
                let filter = match obj.get("where") {
                    Some(w) => parse_tokens(w)?,
                    None => Vec::new(),
                };
                segments.push(Segment::Filtered {
                    id: id.to_string(),
                    filter,
                });
            }
            other => return Err(invalid(format!("invalid ref segment {}", other))),
        }
    }
    Ok(Ref::new(segments))
}

fn parse_tokens(json: &Json) -> CqnResult<Vec<Expr>> {
    match json {
        Json::Array(items) => items.iter().map(parse_expr).collect(),
        Json::Null => Ok(Vec::new()),
        other => Err(invalid(format!("expected token list, got {}", other))),
    }
}

/// Parse one expression token.
pub fn parse_expr(json: &Json) -> CqnResult<Expr> {
    let obj = match json {
        Json::String(keyword) => return Ok(Expr::Keyword(keyword.clone())),
        Json::Object(obj) => obj,
        other => return Ok(Expr::Val(Value::from_json(other))),
    };

    if let Some(r) = obj.get("ref") {
        let reference = parse_ref(r)?;
        if obj.get("param").and_then(Json::as_bool).unwrap_or(false) {
            let name = reference.path();
            return Ok(Expr::Param(match name.as_str() {
                "?" => Param::Positional,
                other => Param::Named(other.trim_start_matches(':').to_string()),
            }));
        }
        return Ok(Expr::Ref(reference));
    }
    if let Some(v) = obj.get("val") {
        return Ok(Expr::Val(Value::from_json(v)));
    }
    if let Some(name) = obj.get("func").and_then(Json::as_str) {
        let args = match obj.get("args") {
            Some(args) => parse_tokens(args)?,
            None => Vec::new(),
        };
        return Ok(Expr::func(name, args));
    }
    if let Some(x) = obj.get("xpr") {
        return Ok(Expr::Xpr(parse_tokens(x)?));
    }
    if let Some(l) = obj.get("list") {
        return Ok(Expr::List(parse_tokens(l)?));
    }
    if let Some(s) = obj.get("SELECT") {
        return Ok(Expr::Select(Box::new(parse_select(s)?)));
    }
    Err(invalid(format!("unrecognized expression {}", json)))
}

fn parse_columns(json: &Json) -> CqnResult<Vec<Column>> {
    match json {
        Json::Array(items) => items.iter().map(parse_column).collect(),
        Json::String(s) if s == "*" => Ok(vec![Column::star()]),
        other => Err(invalid(format!("expected column list, got {}", other))),
    }
}

fn parse_column(json: &Json) -> CqnResult<Column> {
    if json.as_str() == Some("*") {
        return Ok(Column::star());
    }
    let obj = object(json, "column")?;
    let mut column = Column::new(parse_expr(json)?);
    column.alias = obj.get("as").and_then(Json::as_str).map(str::to_string);
    if let Some(expand) = obj.get("expand") {
        column.expand = Some(parse_columns(expand)?);
    }
    if let Some(order) = obj.get("orderBy") {
        column.order_by = parse_order_by(order)?;
    }
    if let Some(limit) = obj.get("limit") {
        column.limit = Some(parse_limit(limit)?);
    }
    column.cast = obj
        .get("cast")
        .and_then(|c| c.get("type"))
        .and_then(Json::as_str)
        .map(str::to_string);
    Ok(column)
}

fn parse_order_by(json: &Json) -> CqnResult<Vec<OrderBy>> {
    let items = json
        .as_array()
        .ok_or_else(|| invalid("orderBy must be an array"))?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let obj = object(item, "orderBy item")?;
        let sort = match obj.get("sort").and_then(Json::as_str) {
            Some(s) if s.eq_ignore_ascii_case("desc") => Sort::Desc,
            _ => Sort::Asc,
        };
        let nulls = match obj.get("nulls").and_then(Json::as_str) {
            Some(n) if n.eq_ignore_ascii_case("first") => Some(Nulls::First),
            Some(n) if n.eq_ignore_ascii_case("last") => Some(Nulls::Last),
            _ => None,
        };
        out.push(OrderBy {
            expr: parse_expr(item)?,
            sort,
            nulls,
        });
    }
    Ok(out)
}

fn limit_number(json: Option<&Json>) -> CqnResult<Option<u64>> {
    match json {
        None | Some(Json::Null) => Ok(None),
        Some(Json::Number(n)) => Ok(n.as_u64()),
        Some(Json::Object(obj)) => limit_number(obj.get("val")),
        Some(other) => Err(invalid(format!("invalid limit {}", other))),
    }
}

fn parse_limit(json: &Json) -> CqnResult<Limit> {
    let obj = object(json, "limit")?;
    Ok(Limit {
        rows: limit_number(obj.get("rows"))?,
        offset: limit_number(obj.get("offset"))?.unwrap_or(0),
    })
}

fn flag(obj: &Map<String, Json>, key: &str) -> bool {
    obj.get(key).and_then(Json::as_bool).unwrap_or(false)
}

const FLAT: &str = "$flat";

fn mark_flat(body: &mut Map<String, Json>, flattened: bool) {
    if flattened {
        body.insert(FLAT.into(), Json::Bool(true));
    }
}

fn parse_expand_kind(json: Option<&Json>) -> CqnResult<Option<ExpandKind>> {
    match json {
        None | Some(Json::Null) => Ok(None),
        Some(Json::String(kind)) if kind == "one" => Ok(Some(ExpandKind::One)),
        Some(Json::String(kind)) if kind == "many" => Ok(Some(ExpandKind::Many)),
        Some(other) => Err(invalid(format!("invalid expand kind {}", other))),
    }
}

fn parse_select(json: &Json) -> CqnResult<Select> {
    let obj = object(json, "SELECT")?;
    let from_json = obj.get("from").ok_or_else(|| invalid("SELECT needs 'from'"))?;
    let from = match from_json.get("SELECT") {
        Some(sub) => Source::Subquery {
            query: Box::new(parse_select(sub)?),
            alias: from_json
                .get("as")
                .and_then(Json::as_str)
                .ok_or_else(|| invalid("sub-select in 'from' needs an alias"))?
                .to_string(),
        },
        None => Source::Entity {
            path: parse_target(from_json)?,
            alias: from_json.get("as").and_then(Json::as_str).map(str::to_string),
        },
    };

    let mut select = Select::from_source(from);
    if let Some(columns) = obj.get("columns") {
        select.columns = parse_columns(columns)?;
    }
    if let Some(w) = obj.get("where") {
        select.filter = parse_tokens(w)?;
    }
    if let Some(g) = obj.get("groupBy") {
        select.group_by = parse_tokens(g)?;
    }
    if let Some(h) = obj.get("having") {
        select.having = parse_tokens(h)?;
    }
    if let Some(o) = obj.get("orderBy") {
        select.order_by = parse_order_by(o)?;
    }
    if let Some(l) = obj.get("limit") {
        select.limit = Some(parse_limit(l)?);
    }
    select.one = flag(obj, "one");
    select.count = flag(obj, "count");
    select.distinct = flag(obj, "distinct");
    select.expand = parse_expand_kind(obj.get("expand"))?;
    select.flattened = flag(obj, FLAT);
    Ok(select)
}

fn parse_record(json: &Json, what: &str) -> CqnResult<Record> {
    match Value::from_json(json) {
        Value::Object(record) => Ok(record),
        _ => Err(invalid(format!("{} must be an object", what))),
    }
}

/// Keys that make an object in a row an expression rather than a value.
const EXPRESSION_KEYS: [&str; 6] = ["ref", "val", "func", "xpr", "list", "SELECT"];

fn parse_row(json: &Json) -> CqnResult<Vec<Expr>> {
    let items = json
        .as_array()
        .ok_or_else(|| invalid("row must be an array"))?;
    items
        .iter()
        .map(|item| match item {
            Json::Object(obj) if EXPRESSION_KEYS.iter().any(|k| obj.contains_key(*k)) => {
                parse_expr(item)
            }
            other => Ok(Expr::Val(Value::from_json(other))),
        })
        .collect()
}

fn parse_insert(json: &Json) -> CqnResult<Insert> {
    let obj = object(json, "INSERT")?;
    let into = parse_target(obj.get("into").ok_or_else(|| invalid("INSERT needs 'into'"))?)?;
    let mut insert = Insert::into("");
    insert.into = into;

    match obj.get("entries") {
        Some(Json::Array(entries)) => {
            for entry in entries {
                insert.entries.push(parse_record(entry, "entry")?);
            }
        }
        Some(entry @ Json::Object(_)) => insert.entries.push(parse_record(entry, "entry")?),
        Some(other) => return Err(invalid(format!("invalid entries {}", other))),
        None => {}
    }
    if let Some(columns) = obj.get("columns").and_then(Json::as_array) {
        insert.columns = columns
            .iter()
            .map(|c| {
                c.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| invalid("column names must be strings"))
            })
            .collect::<CqnResult<_>>()?;
    }
    if let Some(rows) = obj.get("rows").and_then(Json::as_array) {
        for row in rows {
            insert.rows.push(parse_row(row)?);
        }
    }
    if let Some(values) = obj.get("values") {
        insert.rows.push(parse_row(values)?);
    }
    if let Some(source) = obj.get("as") {
        let sub = source.get("SELECT").unwrap_or(source);
        insert.source = Some(Box::new(parse_select(sub)?));
    }
    insert.flattened = flag(obj, FLAT);
    Ok(insert)
}

fn parse_update(json: &Json) -> CqnResult<Update> {
    let obj = object(json, "UPDATE")?;
    let mut update = Update::entity("");
    update.entity = parse_target(obj.get("entity").ok_or_else(|| invalid("UPDATE needs 'entity'"))?)?;
    if let Some(data) = obj.get("data") {
        update.data = parse_record(data, "data")?;
    }
    if let Some(with) = obj.get("with") {
        for (column, expr) in object(with, "with")? {
            update = update.set(column, parse_expr(expr)?);
        }
    }
    if let Some(w) = obj.get("where") {
        update.filter = parse_tokens(w)?;
    }
    update.flattened = flag(obj, FLAT);
    Ok(update)
}

fn parse_delete(json: &Json) -> CqnResult<Delete> {
    let obj = object(json, "DELETE")?;
    let mut delete = Delete::from("");
    delete.from = parse_target(obj.get("from").ok_or_else(|| invalid("DELETE needs 'from'"))?)?;
    if let Some(w) = obj.get("where") {
        delete.filter = parse_tokens(w)?;
    }
    delete.flattened = flag(obj, FLAT);
    Ok(delete)
}

fn segment_to_json(segment: &Segment) -> Json {
    match segment {
        Segment::Name(id) => Json::String(id.clone()),
        Segment::Filtered { id, filter } => json!({ "id": id, "where": tokens_to_json(filter) }),
    }
}

fn ref_to_json(r: &Ref) -> Json {
    json!({ "ref": r.segments.iter().map(segment_to_json).collect::<Vec<_>>() })
}

fn tokens_to_json(tokens: &[Expr]) -> Json {
    Json::Array(tokens.iter().map(expr_to_json).collect())
}

pub fn expr_to_json(expr: &Expr) -> Json {
    match expr {
        Expr::Ref(r) => ref_to_json(r),
        Expr::Val(v) => json!({ "val": v.to_json() }),
        Expr::Param(Param::Positional) => json!({ "ref": ["?"], "param": true }),
        Expr::Param(Param::Named(name)) => json!({ "ref": [format!(":{}", name)], "param": true }),
        Expr::Func(f) => json!({ "func": f.name, "args": tokens_to_json(&f.args) }),
        Expr::Xpr(items) => json!({ "xpr": tokens_to_json(items) }),
        Expr::List(items) => json!({ "list": tokens_to_json(items) }),
        Expr::Select(s) => json!({ "SELECT": select_to_json(s) }),
        Expr::Keyword(k) => Json::String(k.clone()),
    }
}

fn column_to_json(column: &Column) -> Json {
    if column.is_star() {
        return Json::String("*".into());
    }
    let mut out = match expr_to_json(&column.expr) {
        Json::Object(obj) => obj,
        other => {
            let mut obj = Map::new();
            obj.insert("xpr".into(), Json::Array(vec![other]));
            obj
        }
    };
    if let Some(alias) = &column.alias {
        out.insert("as".into(), Json::String(alias.clone()));
    }
    if let Some(expand) = &column.expand {
        out.insert(
            "expand".into(),
            Json::Array(expand.iter().map(column_to_json).collect()),
        );
    }
    if !column.order_by.is_empty() {
        out.insert("orderBy".into(), order_by_to_json(&column.order_by));
    }
    if let Some(limit) = &column.limit {
        out.insert("limit".into(), limit_to_json(limit));
    }
    if let Some(cast) = &column.cast {
        out.insert("cast".into(), json!({ "type": cast }));
    }
    Json::Object(out)
}

fn order_by_to_json(order_by: &[OrderBy]) -> Json {
    Json::Array(
        order_by
            .iter()
            .map(|o| {
                let mut obj = match expr_to_json(&o.expr) {
                    Json::Object(obj) => obj,
                    other => {
                        let mut obj = Map::new();
                        obj.insert("xpr".into(), Json::Array(vec![other]));
                        obj
                    }
                };
                if o.sort == Sort::Desc {
                    obj.insert("sort".into(), Json::String("desc".into()));
                }
                match o.nulls {
                    Some(Nulls::First) => {
                        obj.insert("nulls".into(), Json::String("first".into()));
                    }
                    Some(Nulls::Last) => {
                        obj.insert("nulls".into(), Json::String("last".into()));
                    }
                    None => {}
                }
                Json::Object(obj)
            })
            .collect(),
    )
}

fn limit_to_json(limit: &Limit) -> Json {
    let mut obj = Map::new();
    if let Some(rows) = limit.rows {
        obj.insert("rows".into(), json!({ "val": rows }));
    }
    if limit.offset > 0 {
        obj.insert("offset".into(), json!({ "val": limit.offset }));
    }
    Json::Object(obj)
}

fn select_to_json(select: &Select) -> Json {
    let mut body = Map::new();
    let from = match &select.from {
        Source::Entity { path, alias } => {
            let mut from = ref_to_json(path);
            if let (Some(alias), Json::Object(obj)) = (alias, &mut from) {
                obj.insert("as".into(), Json::String(alias.clone()));
            }
            from
        }
        Source::Subquery { query, alias } => {
            json!({ "SELECT": select_to_json(query), "as": alias })
        }
    };
    body.insert("from".into(), from);
    if !select.columns.is_empty() {
        body.insert(
            "columns".into(),
            Json::Array(select.columns.iter().map(column_to_json).collect()),
        );
    }
    if !select.filter.is_empty() {
        body.insert("where".into(), tokens_to_json(&select.filter));
    }
    if !select.group_by.is_empty() {
        body.insert("groupBy".into(), tokens_to_json(&select.group_by));
    }
    if !select.having.is_empty() {
        body.insert("having".into(), tokens_to_json(&select.having));
    }
    if !select.order_by.is_empty() {
        body.insert("orderBy".into(), order_by_to_json(&select.order_by));
    }
    if let Some(limit) = &select.limit {
        body.insert("limit".into(), limit_to_json(limit));
    }
    for (key, set) in [
        ("one", select.one),
        ("count", select.count),
        ("distinct", select.distinct),
    ] {
        if set {
            body.insert(key.into(), Json::Bool(true));
        }
    }
    match select.expand {
        Some(ExpandKind::One) => {
            body.insert("expand".into(), Json::String("one".into()));
        }
        Some(ExpandKind::Many) => {
            body.insert("expand".into(), Json::String("many".into()));
        }
        None => {}
    }
    mark_flat(&mut body, select.flattened);
    Json::Object(body)
}

fn insert_to_json(insert: &Insert) -> Json {
    let mut body = Map::new();
    body.insert("into".into(), ref_to_json(&insert.into));
    if !insert.entries.is_empty() {
        body.insert(
            "entries".into(),
            Json::Array(
                insert
                    .entries
                    .iter()
                    .map(|e| Value::Object(e.clone()).to_json())
                    .collect(),
            ),
        );
    }
    if !insert.columns.is_empty() {
        body.insert("columns".into(), json!(insert.columns));
    }
    if !insert.rows.is_empty() {
        let rows = insert
            .rows
            .iter()
            .map(|row| {
                Json::Array(
                    row.iter()
                        .map(|e| match e {
                            Expr::Val(v) => v.to_json(),
                            other => expr_to_json(other),
                        })
                        .collect(),
                )
            })
            .collect();
        body.insert("rows".into(), Json::Array(rows));
    }
    if let Some(source) = &insert.source {
        body.insert("as".into(), json!({ "SELECT": select_to_json(source) }));
    }
    mark_flat(&mut body, insert.flattened);
    Json::Object(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_select_with_expand() {
        let json = json!({"SELECT": {
            "from": {"ref": ["Books"], "as": "b"},
            "columns": ["*", {"ref": ["author"], "expand": [{"ref": ["name"]}]}],
            "where": [{"ref": ["stock"]}, ">", {"val": 10}],
            "orderBy": [{"ref": ["title"], "sort": "desc"}],
            "limit": {"rows": {"val": 5}, "offset": {"val": 10}},
            "count": true
        }});
        let Query::Select(select) = Query::from_json(&json).unwrap() else {
            panic!("expected SELECT");
        };
        assert_eq!(select.from.alias(), Some("b"));
        assert!(select.columns[0].is_star());
        assert_eq!(select.columns[1].expand.as_ref().map(Vec::len), Some(1));
        assert_eq!(select.filter.len(), 3);
        assert_eq!(select.order_by[0].sort, Sort::Desc);
        assert_eq!(select.limit, Some(Limit::rows(5).offset(10)));
        assert!(select.count);
        assert_eq!(Query::Select(select).to_json(), json);
    }

    #[test]
    fn test_parse_params_and_dml() {
        let json = json!({"UPDATE": {
            "entity": {"ref": ["Books"]},
            "with": {"stock": {"xpr": [{"ref": ["stock"]}, "-", {"ref": ["?"], "param": true}]}},
            "where": [{"ref": ["ID"]}, "=", {"ref": [":id"], "param": true}]
        }});
        let Query::Update(update) = Query::from_json(&json).unwrap() else {
            panic!("expected UPDATE");
        };
        assert_eq!(update.with[0].column, "stock");
        assert_eq!(update.filter[2], Expr::Param(Param::Named("id".into())));

        let upsert = Query::from_json(&json!({"UPSERT": {
            "into": "Books", "columns": ["ID"], "rows": [[1], [9]]
        }}))
        .unwrap();
        let Query::Upsert(upsert) = upsert else {
            panic!("expected UPSERT");
        };
        assert_eq!(upsert.rows, vec![vec![Expr::val(1)], vec![Expr::val(9)]]);
    }

    #[test]
    fn test_flat_marker_and_expand_kind() {
        let json = json!({"SELECT": {
            "from": {"ref": ["sap_capire_Authors"], "as": "Authors"},
            "columns": [{"SELECT": {
                "from": {"ref": ["sap_capire_Books"], "as": "books"},
                "columns": [{"ref": ["books", "title"], "as": "title"}],
                "expand": "many",
                "$flat": true
            }, "as": "books"}],
            "$flat": true
        }});
        let Query::Select(select) = Query::from_json(&json).unwrap() else {
            panic!("expected SELECT");
        };
        assert!(select.flattened);
        let Expr::Select(sub) = &select.columns[0].expr else {
            panic!("expected sub-select");
        };
        assert_eq!(sub.expand, Some(ExpandKind::Many));
        assert!(sub.flattened);
        assert_eq!(Query::Select(select).to_json(), json);

        let insert = Query::from_json(&json!({"INSERT": {
            "into": {"ref": ["sap_capire_Books"]},
            "columns": ["ID", "createdBy"],
            "rows": [[1, {"ref": ["$user", "id"]}]],
            "$flat": true
        }}))
        .unwrap();
        let Query::Insert(insert) = insert else {
            panic!("expected INSERT");
        };
        assert!(insert.flattened);
        assert_eq!(insert.rows[0][0], Expr::val(1));
        assert_eq!(insert.rows[0][1], Expr::reference("$user.id"));
    }

    #[test]
    fn test_rejects_unknown_kind() {
        let err = Query::from_json(&json!({"MERGE": {}})).unwrap_err();
        assert!(err.to_string().contains("unknown query kind"));
    }

    #[test]
    fn test_serde_roundtrip_through_strings() {
        let text = r#"{"DELETE":{"from":{"ref":["Books"]},"where":[{"ref":["stock"]},"=",{"val":0}]}}"#;
        let query: Query = serde_json::from_str(text).unwrap();
        assert_eq!(serde_json::to_string(&query).unwrap(), text);
    }
}
