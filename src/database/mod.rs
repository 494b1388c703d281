//! Statement translation and execution through `sea-orm`.

pub mod loader;
pub mod statements;

pub use loader::{Loader, Row, fetch_count, fetch_rows};
pub use statements::{count_statement, predicate_condition, select_statement};
