//! Canonical fields and the rows that hang off them.
//!
//! A canonical field is created once, the first time a normalized key finds no
//! acceptable match. Its name never changes afterwards. Synonyms, options and
//! form associations only ever accumulate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Data type ───────────────────────────────────────────────────────────────

/// The kind of value a field holds. Decides the SQL type of its wide-table
/// column.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Default,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DataType {
  #[default]
  Text,
  Date,
  Number,
  Email,
  Phone,
  Address,
  Currency,
  Boolean,
  /// A closed set of options, e.g. `{Granted|Denied}`.
  Choice,
}

impl DataType {
  /// SQL column type used when the field's column is added to the wide table.
  pub fn sql_type(self) -> &'static str {
    match self {
      Self::Date => "DATE",
      Self::Number => "INTEGER",
      Self::Currency => "NUMERIC(15,2)",
      Self::Boolean => "BOOLEAN",
      Self::Text
      | Self::Email
      | Self::Phone
      | Self::Address
      | Self::Choice => "TEXT",
    }
  }
}

// ─── Canonical field ─────────────────────────────────────────────────────────

/// The single authoritative representation of a placeholder across forms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalField {
  pub id:             Uuid,
  /// Globally unique, lowercase, immutable once assigned.
  pub canonical_name: String,
  /// The normalized key the field was created from.
  pub normalized_key: String,
  /// Set from inference at creation; afterwards only by an admin edit.
  pub data_type:      DataType,
  pub tooltip:        Option<String>,
  pub created_at:     DateTime<Utc>,
}

/// Input to [`crate::store::FieldStore::insert_field`]. The store assigns
/// `created_at`.
#[derive(Debug, Clone)]
pub struct NewField {
  pub id:             Uuid,
  pub canonical_name: String,
  pub normalized_key: String,
  pub data_type:      DataType,
  pub tooltip:        Option<String>,
}

/// Metadata edit coming from admin tooling. `None` leaves a value untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldUpdate {
  pub data_type: Option<DataType>,
  pub tooltip:   Option<String>,
}

impl FieldUpdate {
  pub fn is_empty(&self) -> bool {
    self.data_type.is_none() && self.tooltip.is_none()
  }
}

// ─── Synonyms & options ──────────────────────────────────────────────────────

/// A raw spelling observed in a document, mapped onto a canonical field.
/// Unique per `(canonical_field_id, raw_text)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synonym {
  pub id:                 Uuid,
  pub raw_text:           String,
  /// Key of `raw_text`; later occurrences with the same key resolve here.
  pub normalized_key:     String,
  pub canonical_field_id: Uuid,
  /// The document the spelling was first seen in.
  pub source_document_id: String,
}

/// One choice value of a field, in the order first encountered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOption {
  pub canonical_field_id: Uuid,
  pub option_value:       String,
  pub display_order:      u32,
}

// ─── Usage ───────────────────────────────────────────────────────────────────

/// A form's use of a field. `occurrence_count` is set when the pair is first
/// seen and never incremented again, so neither a second spelling in the same
/// form nor reprocessing the form inflates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormFieldAssociation {
  pub form_id:            String,
  pub canonical_field_id: Uuid,
  pub occurrence_count:   u32,
}

/// One placeholder instance found in one source document, as handed over by
/// the extraction layer. Consumed once; never persisted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawOccurrence {
  pub raw_text:            String,
  pub source_document_id:  String,
  /// Choice values already split off pipe/slash syntax.
  #[serde(default)]
  pub detected_options:    Vec<String>,
  #[serde(default)]
  pub paragraph_group_ref: Option<String>,
}

impl RawOccurrence {
  /// Convenience constructor without options or paragraph group.
  pub fn new(raw_text: impl Into<String>, source_document_id: impl Into<String>) -> Self {
    Self {
      raw_text:            raw_text.into(),
      source_document_id:  source_document_id.into(),
      detected_options:    Vec::new(),
      paragraph_group_ref: None,
    }
  }

  pub fn with_options<I, T>(mut self, options: I) -> Self
  where
    I: IntoIterator<Item = T>,
    T: Into<String>,
  {
    self.detected_options = options.into_iter().map(Into::into).collect();
    self
  }
}
