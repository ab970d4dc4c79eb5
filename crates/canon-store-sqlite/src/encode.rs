//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings, UUIDs hyphenated lowercase strings, data
//! types their snake_case names.

use std::str::FromStr as _;

use canon_core::{
  field::{CanonicalField, DataType, FieldOption, FormFieldAssociation, Synonym},
  schema::{NamingConflict, SchemaColumn},
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn encode_data_type(t: DataType) -> &'static str { t.into() }

pub fn decode_data_type(s: &str) -> Result<DataType> {
  DataType::from_str(s).map_err(|_| Error::UnknownDataType(s.to_owned()))
}

// ─── Raw rows ────────────────────────────────────────────────────────────────
//
// Plain-string mirrors of each table's rows, built inside `conn.call` closures
// and decoded once back on the async side.

/// Column list matching [`RawField::from_row`].
pub const FIELD_COLUMNS: &str =
  "f.field_id, f.canonical_name, f.normalized_key, f.data_type, f.tooltip, f.created_at";

pub struct RawField {
  pub field_id:       String,
  pub canonical_name: String,
  pub normalized_key: String,
  pub data_type:      String,
  pub tooltip:        Option<String>,
  pub created_at:     String,
}

impl RawField {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      field_id:       row.get(0)?,
      canonical_name: row.get(1)?,
      normalized_key: row.get(2)?,
      data_type:      row.get(3)?,
      tooltip:        row.get(4)?,
      created_at:     row.get(5)?,
    })
  }

  pub fn into_field(self) -> Result<CanonicalField> {
    Ok(CanonicalField {
      id:             decode_uuid(&self.field_id)?,
      canonical_name: self.canonical_name,
      normalized_key: self.normalized_key,
      data_type:      decode_data_type(&self.data_type)?,
      tooltip:        self.tooltip,
      created_at:     decode_dt(&self.created_at)?,
    })
  }
}

pub struct RawSynonym {
  pub synonym_id:         String,
  pub field_id:           String,
  pub raw_text:           String,
  pub normalized_key:     String,
  pub source_document_id: String,
}

impl RawSynonym {
  pub fn into_synonym(self) -> Result<Synonym> {
    Ok(Synonym {
      id:                 decode_uuid(&self.synonym_id)?,
      raw_text:           self.raw_text,
      normalized_key:     self.normalized_key,
      canonical_field_id: decode_uuid(&self.field_id)?,
      source_document_id: self.source_document_id,
    })
  }
}

pub struct RawOption {
  pub field_id:      String,
  pub option_value:  String,
  pub display_order: u32,
}

impl RawOption {
  pub fn into_option(self) -> Result<FieldOption> {
    Ok(FieldOption {
      canonical_field_id: decode_uuid(&self.field_id)?,
      option_value:       self.option_value,
      display_order:      self.display_order,
    })
  }
}

pub struct RawColumn {
  pub field_id:    String,
  pub column_name: String,
  pub created_at:  String,
}

impl RawColumn {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      field_id:    row.get(0)?,
      column_name: row.get(1)?,
      created_at:  row.get(2)?,
    })
  }

  pub fn into_column(self) -> Result<SchemaColumn> {
    Ok(SchemaColumn {
      canonical_field_id: decode_uuid(&self.field_id)?,
      column_name:        self.column_name,
      created_at:         decode_dt(&self.created_at)?,
    })
  }
}

pub struct RawConflict {
  pub field_id:        String,
  pub canonical_name:  String,
  pub wanted_column:   String,
  pub holder_field_id: String,
}

impl RawConflict {
  pub fn into_conflict(self) -> Result<NamingConflict> {
    Ok(NamingConflict {
      canonical_field_id: decode_uuid(&self.field_id)?,
      canonical_name:     self.canonical_name,
      wanted_column:      self.wanted_column,
      holder_field_id:    decode_uuid(&self.holder_field_id)?,
    })
  }
}

pub struct RawAssociation {
  pub form_id:          String,
  pub field_id:         String,
  pub occurrence_count: u32,
}

impl RawAssociation {
  pub fn into_association(self) -> Result<FormFieldAssociation> {
    Ok(FormFieldAssociation {
      form_id:            self.form_id,
      canonical_field_id: decode_uuid(&self.field_id)?,
      occurrence_count:   self.occurrence_count,
    })
  }
}
