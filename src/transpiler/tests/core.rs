//! SELECT, INSERT, UPDATE and DELETE rendering.

use pretty_assertions::assert_eq;
use serde_json::json;

use super::{record, render, render_text};
use crate::ast::*;
use crate::transpiler::{Binding, Dialect, ToSql};

#[test]
fn test_select_with_bound_string() {
    let stmt = render_text(
        "SELECT from sap.capire.Authors { ID, name } where name = 'Poe'",
        Dialect::SQLite,
    );
    assert_eq!(
        stmt.sql,
        "SELECT Authors.ID AS \"ID\", Authors.name AS \"name\" FROM sap_capire_Authors AS Authors WHERE Authors.name = ?"
    );
    assert_eq!(stmt.values, vec![Binding::Value(Value::from("Poe"))]);
}

#[test]
fn test_numbers_and_booleans_are_inlined() {
    let stmt = render_text(
        "SELECT from sap.capire.Books { ID } where stock > 10 and ID != 3",
        Dialect::SQLite,
    );
    assert_eq!(
        stmt.sql,
        "SELECT Books.ID AS \"ID\" FROM sap_capire_Books AS Books WHERE Books.stock > 10 AND Books.ID != 3"
    );
    assert!(stmt.values.is_empty());
}

#[test]
fn test_order_by_and_pagination() {
    let stmt = render_text(
        "SELECT from sap.capire.Authors { name } order by name desc limit 10 offset 20",
        Dialect::SQLite,
    );
    assert_eq!(
        stmt.sql,
        "SELECT Authors.name AS \"name\" FROM sap_capire_Authors AS Authors ORDER BY Authors.name DESC LIMIT 10 OFFSET 20"
    );
}

#[test]
fn test_select_one_limits_to_a_single_row() {
    let stmt = render(
        Query::Select(SELECT::one("sap.capire.Authors").cols("name").unwrap()),
        Dialect::SQLite,
    );
    assert!(stmt.sql.ends_with(" LIMIT 1"), "{}", stmt.sql);
}

#[test]
fn test_group_by_and_having() {
    let stmt = render_text(
        "SELECT from sap.capire.Books { author, count(*) as n } group by author having count(*) > 1",
        Dialect::SQLite,
    );
    assert_eq!(
        stmt.sql,
        "SELECT Books.author_ID AS \"author_ID\", count(*) AS \"n\" FROM sap_capire_Books AS Books GROUP BY Books.author_ID HAVING count(*) > 1"
    );
}

#[test]
fn test_exists_renders_correlated_subquery() {
    let stmt = render_text(
        "SELECT from sap.capire.Books { ID } where exists author[name = 'Poe']",
        Dialect::SQLite,
    );
    assert_eq!(
        stmt.sql,
        "SELECT Books.ID AS \"ID\" FROM sap_capire_Books AS Books WHERE EXISTS (SELECT 1 FROM sap_capire_Authors AS author WHERE Books.author_ID = author.ID AND author.name = ?)"
    );
    assert_eq!(stmt.values, vec![Binding::Value(Value::from("Poe"))]);
}

#[test]
fn test_backlink_exists() {
    let stmt = render_text(
        "SELECT from sap.capire.Authors { ID } where not exists books",
        Dialect::SQLite,
    );
    assert_eq!(
        stmt.sql,
        "SELECT Authors.ID AS \"ID\" FROM sap_capire_Authors AS Authors WHERE NOT EXISTS (SELECT 1 FROM sap_capire_Books AS books WHERE (books.author_ID = Authors.ID))"
    );
}

#[test]
fn test_insert_binds_every_row() {
    let query = Query::Insert(INSERT::into("sap.capire.Authors").entries(vec![
        record(json!({ "ID": 1, "name": "Poe" })),
        record(json!({ "ID": 2 })),
    ]));
    let stmt = render(query, Dialect::SQLite);
    assert_eq!(stmt.sql, "INSERT INTO sap_capire_Authors (ID, name) VALUES (?, ?)");
    assert!(stmt.values.is_empty());
    assert_eq!(
        stmt.entries,
        vec![
            vec![Binding::Value(Value::Int(1)), Binding::Value(Value::from("Poe"))],
            vec![Binding::Value(Value::Int(2)), Binding::Value(Value::Null)],
        ]
    );
}

#[test]
fn test_insert_fills_managed_fields_with_variables() {
    let query = Query::Insert(INSERT::into("sap.capire.Books").entries(vec![record(json!({ "ID": 1 }))]));
    let stmt = render(query, Dialect::SQLite);
    assert_eq!(
        stmt.sql,
        "INSERT INTO sap_capire_Books (ID, createdAt, modifiedBy) VALUES (?, ?, ?)"
    );
    assert_eq!(
        stmt.entries[0],
        vec![
            Binding::Value(Value::Int(1)),
            Binding::Variable("$now".into()),
            Binding::Variable("$user.id".into()),
        ]
    );
}

#[test]
fn test_update_with_alias_and_managed_field() {
    let query = Query::Update(UPDATE::entity("sap.capire.Books").data(record(json!({ "ID": 7, "stock": 3 }))));
    let stmt = render(query, Dialect::SQLite);
    assert_eq!(
        stmt.sql,
        "UPDATE sap_capire_Books AS Books SET stock = 3, modifiedBy = ? WHERE Books.ID = 7"
    );
    assert_eq!(stmt.values, vec![Binding::Variable("$user.id".into())]);
}

#[test]
fn test_delete() {
    let stmt = render_text("DELETE from sap.capire.Authors where ID = 1", Dialect::SQLite);
    assert_eq!(
        stmt.sql,
        "DELETE FROM sap_capire_Authors AS Authors WHERE Authors.ID = 1"
    );
}

#[test]
fn test_unflattened_query_is_rejected() {
    let query = crate::parser::parse_query("SELECT from sap.capire.Books").unwrap();
    assert!(query.to_sql().is_err());
}
