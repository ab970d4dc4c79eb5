//! The `FieldStore` and `ColumnActuator` traits.
//!
//! `FieldStore` holds the relational state: canonical fields, synonyms,
//! options, the logical column catalog and form usage. `ColumnActuator` is the
//! only code that alters the physical reporting table. Both are implemented by
//! storage backends (e.g. `canon-store-sqlite`); the engine depends on these
//! abstractions only.

use std::future::Future;

use uuid::Uuid;

use crate::{
  field::{
    CanonicalField, FieldOption, FieldUpdate, FormFieldAssociation, NewField,
    Synonym,
  },
  schema::{NamingConflict, SchemaColumn},
};

// ─── Outcomes ────────────────────────────────────────────────────────────────

/// Result of inserting a canonical field.
#[derive(Debug, Clone)]
pub enum FieldInsert {
  Created(CanonicalField),
  /// Another field already holds the normalized key (a concurrent writer
  /// won); the caller should treat it as a match.
  KeyTaken(CanonicalField),
  /// Another field already holds the canonical name.
  NameTaken(CanonicalField),
}

/// Result of claiming a column name for a field in the catalog.
#[derive(Debug, Clone)]
pub enum ColumnClaim {
  Claimed(SchemaColumn),
  /// The name or the field already has a catalog row; this is it.
  Taken(SchemaColumn),
}

/// Result of adding a physical column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddColumn {
  Added,
  /// The column was already there (an earlier or concurrent run made it).
  AlreadyExists,
}

/// A raw spelling to attach to a field.
#[derive(Debug, Clone)]
pub struct NewSynonym {
  pub canonical_field_id: Uuid,
  pub raw_text:           String,
  pub normalized_key:     String,
  pub source_document_id: String,
}

/// A single occurrence to record against a form.
#[derive(Debug, Clone)]
pub struct NewOccurrence {
  pub form_id:             String,
  pub canonical_field_id:  Uuid,
  pub raw_text:            String,
  pub paragraph_group_ref: Option<String>,
}

// ─── Traits ──────────────────────────────────────────────────────────────────

/// Abstraction over the relational store behind the registry.
///
/// Fields are never deleted; synonyms, options, catalog rows and occurrences
/// only accumulate. Every insert is idempotent on its natural key.
pub trait FieldStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Canonical fields ──────────────────────────────────────────────────

  /// All fields, ordered by canonical name.
  fn list_fields(
    &self,
  ) -> impl Future<Output = Result<Vec<CanonicalField>, Self::Error>> + Send + '_;

  fn get_field(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<CanonicalField>, Self::Error>> + Send + '_;

  fn find_by_name(
    &self,
    canonical_name: &str,
  ) -> impl Future<Output = Result<Option<CanonicalField>, Self::Error>> + Send;

  /// The field a normalized key resolves to: the field created from it, or
  /// else the field its earliest synonym was attached to.
  fn find_by_key(
    &self,
    normalized_key: &str,
  ) -> impl Future<Output = Result<Option<CanonicalField>, Self::Error>> + Send;

  /// Insert a field. Uniqueness of both the name and the normalized key is
  /// enforced by the store, not by the caller.
  fn insert_field(
    &self,
    input: NewField,
  ) -> impl Future<Output = Result<FieldInsert, Self::Error>> + Send + '_;

  /// Apply an admin metadata edit. Returns `None` if the field is unknown.
  fn update_field(
    &self,
    id: Uuid,
    update: FieldUpdate,
  ) -> impl Future<Output = Result<Option<CanonicalField>, Self::Error>> + Send + '_;

  // ── Synonyms & options ────────────────────────────────────────────────

  /// Record a raw spelling for a field. Returns `false` if it was already
  /// recorded.
  fn add_synonym(
    &self,
    input: NewSynonym,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn list_synonyms(
    &self,
    canonical_field_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Synonym>, Self::Error>> + Send + '_;

  /// Append unseen options after the existing ones, preserving input order.
  /// Returns how many were new.
  fn add_options(
    &self,
    canonical_field_id: Uuid,
    options: &[String],
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send;

  /// Options ordered by `display_order`.
  fn list_options(
    &self,
    canonical_field_id: Uuid,
  ) -> impl Future<Output = Result<Vec<FieldOption>, Self::Error>> + Send + '_;

  // ── Column catalog ────────────────────────────────────────────────────

  fn get_column(
    &self,
    canonical_field_id: Uuid,
  ) -> impl Future<Output = Result<Option<SchemaColumn>, Self::Error>> + Send + '_;

  fn column_owner(
    &self,
    column_name: &str,
  ) -> impl Future<Output = Result<Option<SchemaColumn>, Self::Error>> + Send;

  /// Record that `column_name` belongs to the field. Both the field and the
  /// column name are unique in the catalog.
  fn claim_column(
    &self,
    canonical_field_id: Uuid,
    column_name: &str,
  ) -> impl Future<Output = Result<ColumnClaim, Self::Error>> + Send;

  /// All catalog rows, ordered by creation.
  fn list_columns(
    &self,
  ) -> impl Future<Output = Result<Vec<SchemaColumn>, Self::Error>> + Send + '_;

  /// Flag a field as pending manual resolution. Idempotent per field.
  fn record_conflict(
    &self,
    conflict: NamingConflict,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Pending conflicts whose field still has no column.
  fn list_conflicts(
    &self,
  ) -> impl Future<Output = Result<Vec<NamingConflict>, Self::Error>> + Send + '_;

  // ── Usage ─────────────────────────────────────────────────────────────

  /// Record an occurrence and return the form's association with the field.
  /// The association is created with a count of one the first time the
  /// `(form, field)` pair is seen and left unchanged afterwards; the raw
  /// spelling is kept as provenance either way.
  fn record_occurrence(
    &self,
    occurrence: NewOccurrence,
  ) -> impl Future<Output = Result<FormFieldAssociation, Self::Error>> + Send + '_;

  fn list_associations(
    &self,
    canonical_field_id: Option<Uuid>,
  ) -> impl Future<Output = Result<Vec<FormFieldAssociation>, Self::Error>> + Send + '_;
}

/// The physical side of schema evolution.
pub trait ColumnActuator: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Column names currently present in the reporting table.
  fn physical_columns(
    &self,
  ) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send + '_;

  /// Add a column. A column that already exists is not an error.
  fn add_column(
    &self,
    column_name: &str,
    sql_type: &'static str,
  ) -> impl Future<Output = Result<AddColumn, Self::Error>> + Send;
}
