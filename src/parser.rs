//! CQN shorthand parser using nom.
//!
//! Parses a compact textual form of CQN into the AST.
//!
//! # Syntax Overview
//!
//! ```text
//! SELECT from Authors[ID = 1]:books as b { ID, title, author { name } }
//!        ─────┬────────────────── ──┬─ ────────────┬─────────────────
//!             │                     │              └── Columns (with expand)
//!             │                     └── Table alias
//!             └── Source path (entity, filter, navigation)
//!   where stock > ? and exists author[name like 'E%']
//!   order by title desc limit 10 offset 20
//! ```
//!
//! Predicates are produced as flat CQN token lists; parentheses become `xpr`
//! and `(a, b)` value lists become `list`.

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while},
    character::complete::{char, digit1, multispace0, multispace1, satisfy},
    combinator::{map, not, opt, recognize, value},
    error::{Error, ErrorKind},
    multi::separated_list1,
    sequence::{delimited, pair, preceded, terminated, tuple},
};

use crate::ast::*;
use crate::error::{CqnError, CqnResult};

/// Words that never start an identifier.
const RESERVED: &[&str] = &[
    "and", "or", "not", "is", "null", "in", "like", "between", "exists", "as", "where", "group",
    "order", "by", "having", "limit", "offset", "asc", "desc", "nulls", "from", "set", "true",
    "false", "one", "distinct",
];

/// Word operators emitted as keyword tokens.
const WORD_OPERATORS: &[&str] = &["and", "or", "not", "like", "in", "between", "exists", "is"];

/// Parse a complete shorthand query string.
pub fn parse_query(input: &str) -> CqnResult<Query> {
    complete(input, query)
}

/// Parse a predicate or expression into CQN tokens.
pub fn parse_predicate(input: &str) -> CqnResult<Vec<Expr>> {
    complete(input, tokens)
}

/// Parse a comma separated column list.
pub fn parse_columns(input: &str) -> CqnResult<Vec<Column>> {
    complete(input, columns)
}

/// Parse order-by items: `title desc, stock nulls last`.
pub fn parse_order_by(input: &str) -> CqnResult<Vec<OrderBy>> {
    complete(input, order_items)
}

/// Parse a dotted path with optional filters: `author.books[stock > 1]`.
pub fn parse_path(input: &str) -> CqnResult<Ref> {
    complete(input, path)
}

/// Parse a SELECT source: `sap.Books`, `Authors[ID = 1]:books as b`.
pub fn parse_source(input: &str) -> CqnResult<(Ref, Option<String>)> {
    complete(input, source)
}

fn complete<'a, T>(
    input: &'a str,
    mut parser: impl FnMut(&'a str) -> IResult<&'a str, T>,
) -> CqnResult<T> {
    let trimmed = input.trim();
    let offset = input.len() - input.trim_start().len();
    match parser(trimmed) {
        Ok((rest, out)) if rest.trim().is_empty() => Ok(out),
        Ok((rest, _)) => Err(CqnError::parse(
            offset + trimmed.len() - rest.trim_start().len(),
            format!("Unexpected trailing content: '{}'", rest.trim()),
        )),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(CqnError::parse(
            offset + trimmed.len() - e.input.trim_start().len(),
            format!("Parse failed near '{}'", e.input.chars().take(20).collect::<String>()),
        )),
        Err(nom::Err::Incomplete(_)) => Err(CqnError::parse(input.len(), "Incomplete input")),
    }
}

fn ws<'a, O>(
    inner: impl FnMut(&'a str) -> IResult<&'a str, O>,
) -> impl FnMut(&'a str) -> IResult<&'a str, O> {
    delimited(multispace0, inner, multispace0)
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Case-insensitive keyword that is not the prefix of a longer word.
fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(tag_no_case(kw), not(satisfy(is_ident_char)))
}

/// Parse an identifier (element, alias, variable).
fn identifier(input: &str) -> IResult<&str, &str> {
    let (rest, ident) = recognize(pair(
        satisfy(|c: char| c.is_alphabetic() || c == '_' || c == '$'),
        take_while(is_ident_char),
    ))(input)?;
    if RESERVED.iter().any(|r| r.eq_ignore_ascii_case(ident)) {
        return Err(nom::Err::Error(Error::new(input, ErrorKind::Tag)));
    }
    Ok((rest, ident))
}

fn filter(input: &str) -> IResult<&str, Vec<Expr>> {
    delimited(char('['), ws(tokens), char(']'))(input)
}

fn segment(input: &str) -> IResult<&str, Segment> {
    let (input, id) = identifier(input)?;
    let (input, filter) = opt(filter)(input)?;
    Ok((input, make_segment(id, filter)))
}

fn make_segment(id: &str, filter: Option<Vec<Expr>>) -> Segment {
    match filter {
        Some(filter) => Segment::Filtered {
            id: id.to_string(),
            filter,
        },
        None => Segment::Name(id.to_string()),
    }
}

fn path(input: &str) -> IResult<&str, Ref> {
    map(separated_list1(char('.'), segment), Ref::new)(input)
}

/// Entity name (dots allowed), optional filter, optional `:` navigation and alias.
fn source(input: &str) -> IResult<&str, (Ref, Option<String>)> {
    let (input, name) = recognize(separated_list1(char('.'), identifier))(input)?;
    let (input, entity_filter) = opt(filter)(input)?;
    let mut segments = vec![make_segment(name, entity_filter)];
    let (input, navigation) = opt(preceded(ws(char(':')), path))(input)?;
    if let Some(nav) = navigation {
        segments.extend(nav.segments);
    }
    let (input, alias) = opt(preceded(ws(keyword("as")), identifier))(input)?;
    Ok((input, (Ref::new(segments), alias.map(str::to_string))))
}

fn string_literal(input: &str) -> IResult<&str, String> {
    let (mut rest, _) = char('\'')(input)?;
    let mut out = String::new();
    loop {
        match rest.find('\'') {
            None => return Err(nom::Err::Failure(Error::new(rest, ErrorKind::Char))),
            Some(pos) => {
                out.push_str(&rest[..pos]);
                rest = &rest[pos + 1..];
                if let Some(stripped) = rest.strip_prefix('\'') {
                    out.push('\'');
                    rest = stripped;
                } else {
                    return Ok((rest, out));
                }
            }
        }
    }
}

fn number(input: &str) -> IResult<&str, Value> {
    let (rest, text) = recognize(pair(digit1, opt(pair(char('.'), digit1))))(input)?;
    let parsed = if text.contains('.') {
        text.parse::<f64>().map(Value::Float).ok()
    } else {
        text.parse::<i64>().map(Value::Int).ok()
    };
    match parsed {
        Some(v) => Ok((rest, v)),
        None => Err(nom::Err::Error(Error::new(input, ErrorKind::Digit))),
    }
}

fn literal(input: &str) -> IResult<&str, Expr> {
    alt((
        map(string_literal, |s| Expr::Val(Value::String(s))),
        map(number, Expr::Val),
        value(Expr::Val(Value::Bool(true)), keyword("true")),
        value(Expr::Val(Value::Bool(false)), keyword("false")),
        value(Expr::Val(Value::Null), keyword("null")),
    ))(input)
}

fn param(input: &str) -> IResult<&str, Expr> {
    alt((
        value(Expr::Param(Param::Positional), char('?')),
        map(preceded(char(':'), identifier), |name| {
            Expr::Param(Param::Named(name.to_string()))
        }),
    ))(input)
}

fn symbol_operator(input: &str) -> IResult<&str, &str> {
    alt((
        tag("<="),
        tag(">="),
        tag("<>"),
        tag("!="),
        tag("=="),
        tag("||"),
        tag("="),
        tag("<"),
        tag(">"),
        tag("+"),
        tag("-"),
        tag("*"),
        tag("/"),
    ))(input)
}

/// `is null` / `is not null` as separate keyword tokens.
fn null_check(input: &str) -> IResult<&str, Vec<Expr>> {
    alt((
        map(
            tuple((keyword("is"), multispace1, keyword("not"), multispace1, keyword("null"))),
            |_| vec![Expr::keyword("is"), Expr::keyword("not"), Expr::keyword("null")],
        ),
        map(
            tuple((keyword("is"), multispace1, keyword("null"))),
            |_| vec![Expr::keyword("is"), Expr::keyword("null")],
        ),
    ))(input)
}

fn word_operator(input: &str) -> IResult<&str, Expr> {
    for op in WORD_OPERATORS {
        if let Ok((rest, _)) = keyword(op)(input) {
            return Ok((rest, Expr::keyword(*op)));
        }
    }
    Err(nom::Err::Error(Error::new(input, ErrorKind::Tag)))
}

/// Comma separated token lists, one per argument or list item.
fn token_groups(input: &str) -> IResult<&str, Vec<Vec<Expr>>> {
    let (input, _) = char('(')(input)?;
    let (input, _) = multispace0(input)?;
    if let Ok((rest, _)) = char::<_, Error<&str>>(')')(input) {
        return Ok((rest, Vec::new()));
    }
    let (input, groups) = separated_list1(ws(char(',')), tokens)(input)?;
    let (input, _) = ws(char(')'))(input)?;
    Ok((input, groups))
}

fn group_expr(mut group: Vec<Expr>) -> Expr {
    if group.len() == 1 {
        group.remove(0)
    } else {
        Expr::Xpr(group)
    }
}

fn function_call(input: &str) -> IResult<&str, Expr> {
    let (rest, name) = identifier(input)?;
    let (rest, groups) = token_groups(rest)?;
    let args = groups.into_iter().map(group_expr).collect();
    Ok((rest, Expr::func(name, args)))
}

/// One token; may expand to several keyword tokens (`is not null`).
fn token<'a>(input: &'a str, previous: Option<&Expr>) -> IResult<&'a str, Vec<Expr>> {
    if let Ok(found) = null_check(input) {
        return Ok(found);
    }
    if let Ok((rest, op)) = symbol_operator(input) {
        return Ok((rest, vec![Expr::keyword(op)]));
    }
    if let Ok((rest, op)) = word_operator(input) {
        return Ok((rest, vec![op]));
    }
    if let Ok((rest, lit)) = literal(input) {
        return Ok((rest, vec![lit]));
    }
    if let Ok((rest, p)) = param(input) {
        return Ok((rest, vec![p]));
    }
    if input.starts_with('(') {
        let (rest, groups) = token_groups(input)?;
        let after_in = previous.map(|p| p.is_keyword("in")).unwrap_or(false);
        let expr = if groups.len() > 1 || after_in {
            Expr::List(groups.into_iter().map(group_expr).collect())
        } else {
            Expr::Xpr(groups.into_iter().flatten().collect())
        };
        return Ok((rest, vec![expr]));
    }
    if let Ok((rest, f)) = function_call(input) {
        return Ok((rest, vec![f]));
    }
    let (rest, r) = path(input)?;
    Ok((rest, vec![Expr::Ref(r)]))
}

/// A flat CQN token list; stops at the first thing that is not a token.
fn tokens(input: &str) -> IResult<&str, Vec<Expr>> {
    let mut out: Vec<Expr> = Vec::new();
    let mut rest = input;
    loop {
        let (next, _) = multispace0(rest)?;
        match token(next, out.last()) {
            Ok((after, found)) => {
                out.extend(found);
                rest = after;
            }
            Err(nom::Err::Error(_)) => break,
            Err(e) => return Err(e),
        }
    }
    if out.is_empty() {
        return Err(nom::Err::Error(Error::new(input, ErrorKind::Many1)));
    }
    Ok((rest, out))
}

fn alias(input: &str) -> IResult<&str, &str> {
    preceded(ws(keyword("as")), identifier)(input)
}

fn expand_block(input: &str) -> IResult<&str, Vec<Column>> {
    delimited(ws(char('{')), columns, ws(char('}')))(input)
}

fn column(input: &str) -> IResult<&str, Column> {
    if let Ok((rest, _)) = char::<_, Error<&str>>('*')(input) {
        return Ok((rest, Column::star()));
    }
    let (input, expr) = map(tokens, group_expr)(input)?;
    let mut col = Column::new(expr);
    let (input, first_alias) = opt(alias)(input)?;
    let (input, expand) = opt(expand_block)(input)?;
    let (input, second_alias) = opt(alias)(input)?;
    col.alias = first_alias.or(second_alias).map(str::to_string);
    col.expand = expand;
    Ok((input, col))
}

fn columns(input: &str) -> IResult<&str, Vec<Column>> {
    separated_list1(ws(char(',')), column)(input)
}

fn order_item(input: &str) -> IResult<&str, OrderBy> {
    let (input, expr) = map(tokens, group_expr)(input)?;
    let (input, sort) = opt(preceded(
        multispace0,
        alt((
            value(Sort::Asc, keyword("asc")),
            value(Sort::Desc, keyword("desc")),
        )),
    ))(input)?;
    let (input, nulls) = opt(preceded(
        tuple((multispace0, keyword("nulls"), multispace1)),
        alt((
            value(Nulls::First, keyword("first")),
            value(Nulls::Last, keyword("last")),
        )),
    ))(input)?;
    Ok((
        input,
        OrderBy {
            expr,
            sort: sort.unwrap_or_default(),
            nulls,
        },
    ))
}

fn order_items(input: &str) -> IResult<&str, Vec<OrderBy>> {
    separated_list1(ws(char(',')), order_item)(input)
}

fn clause<'a, O>(
    kw: &'static str,
    inner: impl FnMut(&'a str) -> IResult<&'a str, O>,
) -> impl FnMut(&'a str) -> IResult<&'a str, Option<O>> {
    opt(preceded(ws(keyword(kw)), inner))
}

fn two_word_clause<'a, O>(
    first: &'static str,
    second: &'static str,
    inner: impl FnMut(&'a str) -> IResult<&'a str, O>,
) -> impl FnMut(&'a str) -> IResult<&'a str, Option<O>> {
    opt(preceded(
        tuple((multispace0, keyword(first), multispace1, keyword(second), multispace0)),
        inner,
    ))
}

fn unsigned(input: &str) -> IResult<&str, u64> {
    let (rest, digits) = digit1(input)?;
    match digits.parse() {
        Ok(n) => Ok((rest, n)),
        Err(_) => Err(nom::Err::Error(Error::new(input, ErrorKind::Digit))),
    }
}

fn select(input: &str) -> IResult<&str, Select> {
    let (input, _) = keyword("select")(input)?;
    let (input, one) = opt(ws(keyword("one")))(input)?;
    let (input, distinct) = opt(ws(keyword("distinct")))(input)?;
    let (input, leading_columns) = opt(ws(columns))(input)?;
    let (input, _) = ws(keyword("from"))(input)?;
    let (input, (path, table_alias)) = source(input)?;
    let (input, trailing_columns) = opt(expand_block)(input)?;

    let mut select = Select::from_source(Source::Entity {
        path,
        alias: table_alias,
    });
    select.one = one.is_some();
    select.distinct = distinct.is_some();
    select.columns = trailing_columns.or(leading_columns).unwrap_or_default();

    let (input, filter) = clause("where", tokens)(input)?;
    let (input, group_by) = two_word_clause(
        "group",
        "by",
        separated_list1(ws(char(',')), map(tokens, group_expr)),
    )(input)?;
    let (input, having) = clause("having", tokens)(input)?;
    let (input, order_by) = two_word_clause("order", "by", order_items)(input)?;
    let (input, rows) = clause("limit", unsigned)(input)?;
    let (input, offset) = clause("offset", unsigned)(input)?;

    select.filter = filter.unwrap_or_default();
    select.group_by = group_by.unwrap_or_default();
    select.having = having.unwrap_or_default();
    select.order_by = order_by.unwrap_or_default();
    if rows.is_some() || offset.is_some() {
        select.limit = Some(Limit {
            rows,
            offset: offset.unwrap_or(0),
        });
    }
    Ok((input, select))
}

fn assignment(input: &str) -> IResult<&str, (String, Expr)> {
    let (input, target) = path(input)?;
    let (input, _) = ws(char('='))(input)?;
    let (input, expr) = map(tokens, group_expr)(input)?;
    Ok((input, (target.path(), expr)))
}

fn update(input: &str) -> IResult<&str, Update> {
    let (input, _) = keyword("update")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, (entity, _)) = source(input)?;
    let (input, assignments) = clause("set", separated_list1(ws(char(',')), assignment))(input)?;
    let (input, filter) = clause("where", tokens)(input)?;

    let mut update = Update::entity("");
    update.entity = entity;
    for (column, expr) in assignments.unwrap_or_default() {
        update = update.set(&column, expr);
    }
    update.filter = filter.unwrap_or_default();
    Ok((input, update))
}

fn delete(input: &str) -> IResult<&str, Delete> {
    let (input, _) = keyword("delete")(input)?;
    let (input, _) = ws(keyword("from"))(input)?;
    let (input, (from, _)) = source(input)?;
    let (input, filter) = clause("where", tokens)(input)?;

    let mut delete = Delete::from("");
    delete.from = from;
    delete.filter = filter.unwrap_or_default();
    Ok((input, delete))
}

fn query(input: &str) -> IResult<&str, Query> {
    alt((
        map(select, Query::Select),
        map(update, Query::Update),
        map(delete, Query::Delete),
    ))(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_predicate_tokens() {
        let tokens = parse_predicate("stock > 10 and title like 'A%'").unwrap();
        assert_eq!(
            tokens,
            vec![
                Expr::reference("stock"),
                Expr::keyword(">"),
                Expr::val(10),
                Expr::keyword("and"),
                Expr::reference("title"),
                Expr::keyword("like"),
                Expr::val("A%"),
            ]
        );
    }

    #[test]
    fn test_parse_exists_with_filter() {
        let tokens = parse_predicate("exists author[name = 'Poe']").unwrap();
        assert!(tokens[0].is_keyword("exists"));
        let Expr::Ref(r) = &tokens[1] else {
            panic!("expected ref");
        };
        assert_eq!(r.segments[0].id(), "author");
        assert_eq!(r.segments[0].filter().map(<[Expr]>::len), Some(3));
    }

    #[test]
    fn test_parse_lists_groups_and_nulls() {
        let tokens = parse_predicate("ID in (1, 2) or (price is not null and x != ?)").unwrap();
        assert_eq!(
            tokens[2],
            Expr::List(vec![Expr::val(1), Expr::val(2)])
        );
        let Expr::Xpr(inner) = &tokens[4] else {
            panic!("expected xpr");
        };
        assert_eq!(inner[1], Expr::keyword("is"));
        assert_eq!(inner[2], Expr::keyword("not"));
        assert_eq!(inner[3], Expr::keyword("null"));
        assert_eq!(inner[7], Expr::Param(Param::Positional));

        let single = parse_predicate("ID in (1)").unwrap();
        assert_eq!(single[2], Expr::List(vec![Expr::val(1)]));
    }

    #[test]
    fn test_parse_function_and_strings() {
        let tokens = parse_predicate("contains(title, 'It''s') = true").unwrap();
        assert_eq!(
            tokens[0],
            Expr::func("contains", vec![Expr::reference("title"), Expr::val("It's")])
        );
        assert_eq!(tokens[2], Expr::val(true));
    }

    #[test]
    fn test_parse_columns_with_expand() {
        let cols = parse_columns("ID, author.name as writer, books[stock > 1] { title, * } as big, count(*) as n").unwrap();
        assert_eq!(cols.len(), 4);
        assert_eq!(cols[1].alias.as_deref(), Some("writer"));
        assert_eq!(cols[2].alias.as_deref(), Some("big"));
        assert_eq!(cols[2].expand.as_ref().map(Vec::len), Some(2));
        assert!(cols[2].expand.as_ref().map(|e| e[1].is_star()).unwrap_or(false));
        assert_eq!(cols[3].expr, Expr::func("count", vec![Expr::keyword("*")]));
    }

    #[test]
    fn test_parse_full_select() {
        let q = parse_query(
            "SELECT one from sap.capire.Books as b { ID, title } where stock > 1 group by author.ID having count(*) > 1 order by title desc nulls last limit 10 offset 5",
        )
        .unwrap();
        let Query::Select(s) = q else {
            panic!("expected select");
        };
        assert!(s.one);
        assert_eq!(s.from, Source::Entity { path: Ref::entity("sap.capire.Books"), alias: Some("b".into()) });
        assert_eq!(s.columns.len(), 2);
        assert_eq!(s.group_by, vec![Expr::reference("author.ID")]);
        assert_eq!(s.having.len(), 3);
        assert_eq!(s.order_by[0].sort, Sort::Desc);
        assert_eq!(s.order_by[0].nulls, Some(Nulls::Last));
        assert_eq!(s.limit, Some(Limit::rows(10).offset(5)));
    }

    #[test]
    fn test_parse_update_and_delete() {
        let Query::Update(u) = parse_query("UPDATE Books set stock = stock - 1, title = 'x' where ID = 1").unwrap() else {
            panic!("expected update");
        };
        assert_eq!(u.with.len(), 2);
        assert_eq!(u.with[1].expr, Expr::val("x"));

        let Query::Delete(d) = parse_query("DELETE from Books where stock = 0").unwrap() else {
            panic!("expected delete");
        };
        assert_eq!(d.filter.len(), 3);
    }

    #[test]
    fn test_parse_error_position() {
        let err = parse_predicate("stock > 10 ]").unwrap_err();
        match err {
            CqnError::Parse { position, .. } => assert_eq!(position, 11),
            other => panic!("unexpected error {:?}", other),
        }
    }
}
