//! SQLite backend for the canonical field registry.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. [`SqliteStore`] implements both the
//! relational [`FieldStore`](canon_core::store::FieldStore) and the physical
//! [`ColumnActuator`](canon_core::store::ColumnActuator) for the
//! `form_field_values_wide` reporting table.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use schema::WIDE_TABLE;
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
