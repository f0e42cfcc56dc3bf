//! DML (Data Manipulation Language) SQL generation.
//!
//! SELECT, INSERT, UPSERT, UPDATE and DELETE over flattened queries.

pub mod cte;
pub mod delete;
pub mod insert;
pub mod select;
pub mod update;
pub mod upsert;
