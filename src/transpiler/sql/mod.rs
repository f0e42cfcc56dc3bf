//! Dialect generators.

pub mod hana;
pub mod postgres;
pub mod sqlite;
