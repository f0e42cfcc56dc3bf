//! Abstract Syntax Tree for CQN queries.

pub mod builders;
pub mod expr;
pub mod json;
pub mod query;
pub mod values;

pub use builders::*;
pub use expr::*;
pub use query::*;
pub use values::*;
