//! Core types and engine for field canonicalization.
//!
//! Raw placeholder text extracted from legal-form templates is reduced to a
//! matching key, compared against the known canonical fields, and either
//! attached to one of them as a synonym or promoted to a new field. Every
//! canonical field is then given a column in the reporting wide table.
//!
//! This crate has no HTTP or database dependencies. Storage
//! backends implement [`store::FieldStore`] and [`store::ColumnActuator`];
//! embedding backends implement [`semantic::Embedder`].

// Store and validator traits use native `async fn`; their futures carry
// explicit `Send` bounds where callers need them.
#![allow(async_fn_in_trait)]

pub mod config;
pub mod error;
pub mod field;
pub mod infer;
pub mod normalize;
pub mod pipeline;
pub mod registry;
pub mod schema;
pub mod semantic;
pub mod similarity;
pub mod store;

pub use error::{Error, Result};
