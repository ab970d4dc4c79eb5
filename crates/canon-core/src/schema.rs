//! Schema evolution: one reporting column per canonical field.
//!
//! The logical catalog (which field owns which column name) lives in the
//! [`FieldStore`]; the physical table is only touched through a
//! [`ColumnActuator`]. Columns are never dropped or renamed, so a report built
//! against an older snapshot of the wide table keeps working.

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
  Error, Result,
  config::EngineConfig,
  field::CanonicalField,
  store::{AddColumn, ColumnActuator, ColumnClaim, FieldStore},
};

// ─── Catalog rows ────────────────────────────────────────────────────────────

/// A canonical field's physical column. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaColumn {
  pub canonical_field_id: Uuid,
  pub column_name:        String,
  pub created_at:         DateTime<Utc>,
}

/// A field whose column name is already owned by another field. The field
/// stays valid; only its reporting column is deferred until someone resolves
/// the clash by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingConflict {
  pub canonical_field_id: Uuid,
  pub canonical_name:     String,
  pub wanted_column:      String,
  /// The field that already owns `wanted_column`.
  pub holder_field_id:    Uuid,
}

impl fmt::Display for NamingConflict {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "field {:?} ({}) wants column {:?}, already owned by field {}",
      self.canonical_name, self.canonical_field_id, self.wanted_column, self.holder_field_id
    )
  }
}

// ─── Sanitation ──────────────────────────────────────────────────────────────

/// Rules that turn a canonical name into a storage-safe column identifier.
#[derive(Debug, Clone)]
pub struct ColumnRules {
  pub max_length:     usize,
  pub reserved_words: Vec<String>,
}

impl ColumnRules {
  pub fn from_config(config: &EngineConfig) -> Self {
    Self {
      max_length:     config.column_name_max_length,
      reserved_words: config
        .reserved_words
        .iter()
        .map(|w| w.to_lowercase())
        .collect(),
    }
  }

  /// Sanitize `canonical_name` into a column identifier.
  ///
  /// Only `[a-z0-9_]` survive, runs of underscores collapse, a leading digit
  /// gets an `f_` prefix, reserved words get a `_field` suffix, and the result
  /// is cut to `max_length`. Distinct names may collide; callers detect that.
  pub fn sanitize(&self, canonical_name: &str) -> String {
    let mut out = String::with_capacity(canonical_name.len());
    for c in canonical_name.chars().flat_map(char::to_lowercase) {
      let c = if c.is_ascii_alphanumeric() { c } else { '_' };
      if c == '_' && (out.is_empty() || out.ends_with('_')) {
        continue;
      }
      out.push(c);
    }
    let mut out = out.trim_end_matches('_').to_owned();

    if out.is_empty() {
      out.push_str("field");
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
      out.insert_str(0, "f_");
    }

    const SUFFIX: &str = "_field";
    if self.is_reserved(&out) {
      out.push_str(SUFFIX);
    }
    if out.len() > self.max_length {
      out.truncate(self.max_length);
      let trimmed = out.trim_end_matches('_').len();
      out.truncate(trimmed);
      // Truncation may land back on a reserved word.
      if self.is_reserved(&out) {
        out.truncate(self.max_length.saturating_sub(SUFFIX.len()));
        out.push_str(SUFFIX);
      }
    }
    out
  }

  fn is_reserved(&self, ident: &str) -> bool {
    self.reserved_words.iter().any(|w| w == ident)
  }
}

// ─── Manager ─────────────────────────────────────────────────────────────────

/// Ensures every canonical field has a column, growing the wide table
/// monotonically.
pub struct SchemaManager<S, A> {
  store:    Arc<S>,
  actuator: Arc<A>,
  rules:    ColumnRules,
  /// Serializes the ensure-column critical section within this process.
  gate:     Mutex<()>,
}

impl<S, A> SchemaManager<S, A>
where
  S: FieldStore,
  A: ColumnActuator,
{
  pub fn new(store: Arc<S>, actuator: Arc<A>, rules: ColumnRules) -> Self {
    Self { store, actuator, rules, gate: Mutex::new(()) }
  }

  /// Make sure `field` has a column and return it. Idempotent.
  ///
  /// Fails with [`Error::SchemaNamingConflict`] when the sanitized name is
  /// owned by another field; the conflict is recorded in the store and the
  /// field is left without a column.
  pub async fn ensure_column(&self, field: &CanonicalField) -> Result<SchemaColumn> {
    if let Some(existing) = self.store.get_column(field.id).await.map_err(Error::store)? {
      return Ok(existing);
    }

    let _guard = self.gate.lock().await;

    // Fresh check under the gate.
    if let Some(existing) = self.store.get_column(field.id).await.map_err(Error::store)? {
      return Ok(existing);
    }

    let column_name = self.rules.sanitize(&field.canonical_name);

    if let Some(owner) = self
      .store
      .column_owner(&column_name)
      .await
      .map_err(Error::store)?
      && owner.canonical_field_id != field.id
    {
      return Err(self.conflict(field, column_name, owner.canonical_field_id).await?);
    }

    match self
      .actuator
      .add_column(&column_name, field.data_type.sql_type())
      .await
      .map_err(Error::store)?
    {
      AddColumn::Added => {
        tracing::info!(column = %column_name, field = %field.canonical_name, "added wide-table column");
      }
      AddColumn::AlreadyExists => {
        tracing::debug!(column = %column_name, "wide-table column already present, converging");
      }
    }

    match self
      .store
      .claim_column(field.id, &column_name)
      .await
      .map_err(Error::store)?
    {
      ColumnClaim::Claimed(column) => Ok(column),
      ColumnClaim::Taken(owner) if owner.canonical_field_id == field.id => Ok(owner),
      ColumnClaim::Taken(owner) => {
        Err(self.conflict(field, column_name, owner.canonical_field_id).await?)
      }
    }
  }

  async fn conflict(
    &self,
    field: &CanonicalField,
    wanted_column: String,
    holder_field_id: Uuid,
  ) -> Result<Error> {
    let conflict = NamingConflict {
      canonical_field_id: field.id,
      canonical_name: field.canonical_name.clone(),
      wanted_column,
      holder_field_id,
    };
    tracing::warn!("{conflict}; column deferred until resolved by hand");
    self
      .store
      .record_conflict(conflict.clone())
      .await
      .map_err(Error::store)?;
    Ok(Error::SchemaNamingConflict(conflict))
  }
}
