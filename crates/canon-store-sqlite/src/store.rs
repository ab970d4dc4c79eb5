//! [`SqliteStore`]: the SQLite implementation of [`FieldStore`] and
//! [`ColumnActuator`].

use std::{path::Path, time::Duration};

use chrono::Utc;
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use canon_core::{
  field::{
    CanonicalField, FieldOption, FieldUpdate, FormFieldAssociation, NewField,
    Synonym,
  },
  schema::{NamingConflict, SchemaColumn},
  store::{
    AddColumn, ColumnActuator, ColumnClaim, FieldInsert, FieldStore,
    NewOccurrence, NewSynonym,
  },
};

use crate::{
  Error, Result,
  encode::{
    FIELD_COLUMNS, RawAssociation, RawColumn, RawConflict, RawField, RawOption,
    RawSynonym, encode_data_type, encode_dt, encode_uuid,
  },
  schema::{SCHEMA, WIDE_TABLE},
};

/// How long a writer waits on a lock held by another process.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// ─── Store ───────────────────────────────────────────────────────────────────

/// A field registry backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref().to_path_buf();
    let conn = tokio_rusqlite::Connection::open(&path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    tracing::debug!(path = %path.display(), "opened field store");
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn query_field(&self, sql: &'static str, param: String) -> Result<Option<CanonicalField>> {
    let raw = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(sql, rusqlite::params![param], RawField::from_row)
            .optional()?,
        )
      })
      .await?;
    raw.map(RawField::into_field).transpose()
  }

  async fn query_column(&self, sql: &'static str, param: String) -> Result<Option<SchemaColumn>> {
    let raw = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(sql, rusqlite::params![param], RawColumn::from_row)
            .optional()?,
        )
      })
      .await?;
    raw.map(RawColumn::into_column).transpose()
  }
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
  matches!(
    err,
    rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
  )
}

fn is_duplicate_column(err: &rusqlite::Error) -> bool {
  matches!(
    err,
    rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.contains("duplicate column name")
  )
}

fn physical_columns_of(conn: &rusqlite::Connection) -> rusqlite::Result<Vec<String>> {
  let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
  let names = stmt
    .query_map(rusqlite::params![WIDE_TABLE], |r| r.get(0))?
    .collect::<rusqlite::Result<Vec<String>>>()?;
  Ok(names)
}

const SELECT_FIELD_BY_ID: &str = "SELECT f.field_id, f.canonical_name, f.normalized_key, \
  f.data_type, f.tooltip, f.created_at FROM canonical_fields f WHERE f.field_id = ?1";
const SELECT_FIELD_BY_NAME: &str = "SELECT f.field_id, f.canonical_name, f.normalized_key, \
  f.data_type, f.tooltip, f.created_at FROM canonical_fields f WHERE f.canonical_name = ?1";
const SELECT_FIELD_BY_KEY: &str = "SELECT f.field_id, f.canonical_name, f.normalized_key, \
  f.data_type, f.tooltip, f.created_at FROM canonical_fields f WHERE f.normalized_key = ?1";

enum RawInsert {
  Created,
  KeyTaken(RawField),
  NameTaken(RawField),
}

// ─── FieldStore ──────────────────────────────────────────────────────────────

impl FieldStore for SqliteStore {
  type Error = Error;

  // ── Canonical fields ──────────────────────────────────────────────────────

  async fn list_fields(&self) -> Result<Vec<CanonicalField>> {
    let raws: Vec<RawField> = self
      .conn
      .call(|conn| {
        let sql = format!(
          "SELECT {FIELD_COLUMNS} FROM canonical_fields f ORDER BY f.canonical_name"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map([], RawField::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawField::into_field).collect()
  }

  async fn get_field(&self, id: Uuid) -> Result<Option<CanonicalField>> {
    self.query_field(SELECT_FIELD_BY_ID, encode_uuid(id)).await
  }

  async fn find_by_name(&self, canonical_name: &str) -> Result<Option<CanonicalField>> {
    self
      .query_field(SELECT_FIELD_BY_NAME, canonical_name.to_owned())
      .await
  }

  async fn find_by_key(&self, normalized_key: &str) -> Result<Option<CanonicalField>> {
    let key = normalized_key.to_owned();
    let raw = self
      .conn
      .call(move |conn| {
        let direct = conn
          .query_row(SELECT_FIELD_BY_KEY, rusqlite::params![key], RawField::from_row)
          .optional()?;
        if direct.is_some() {
          return Ok(direct);
        }
        let sql = format!(
          "SELECT {FIELD_COLUMNS}
           FROM field_synonyms s JOIN canonical_fields f ON f.field_id = s.field_id
           WHERE s.normalized_key = ?1
           ORDER BY s.rowid
           LIMIT 1"
        );
        Ok(
          conn
            .query_row(&sql, rusqlite::params![key], RawField::from_row)
            .optional()?,
        )
      })
      .await?;
    raw.map(RawField::into_field).transpose()
  }

  async fn insert_field(&self, input: NewField) -> Result<FieldInsert> {
    let created_at = Utc::now();

    let id_str         = encode_uuid(input.id);
    let name           = input.canonical_name.clone();
    let key            = input.normalized_key.clone();
    let data_type_str  = encode_data_type(input.data_type);
    let tooltip        = input.tooltip.clone();
    let created_at_str = encode_dt(created_at);

    let outcome = self
      .conn
      .call(move |conn| {
        let inserted = conn.execute(
          "INSERT INTO canonical_fields
             (field_id, canonical_name, normalized_key, data_type, tooltip, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![id_str, name, key, data_type_str, tooltip, created_at_str],
        );
        match inserted {
          Ok(_) => Ok(RawInsert::Created),
          Err(err) if is_constraint_violation(&err) => {
            if let Some(holder) = conn
              .query_row(SELECT_FIELD_BY_KEY, rusqlite::params![key], RawField::from_row)
              .optional()?
            {
              return Ok(RawInsert::KeyTaken(holder));
            }
            if let Some(holder) = conn
              .query_row(SELECT_FIELD_BY_NAME, rusqlite::params![name], RawField::from_row)
              .optional()?
            {
              return Ok(RawInsert::NameTaken(holder));
            }
            Err(err.into())
          }
          Err(err) => Err(err.into()),
        }
      })
      .await?;

    Ok(match outcome {
      RawInsert::Created => FieldInsert::Created(CanonicalField {
        id: input.id,
        canonical_name: input.canonical_name,
        normalized_key: input.normalized_key,
        data_type: input.data_type,
        tooltip: input.tooltip,
        created_at,
      }),
      RawInsert::KeyTaken(raw) => FieldInsert::KeyTaken(raw.into_field()?),
      RawInsert::NameTaken(raw) => FieldInsert::NameTaken(raw.into_field()?),
    })
  }

  async fn update_field(&self, id: Uuid, update: FieldUpdate) -> Result<Option<CanonicalField>> {
    let id_str        = encode_uuid(id);
    let data_type_str = update.data_type.map(encode_data_type);
    let tooltip       = update.tooltip;

    let raw = self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE canonical_fields
           SET data_type = COALESCE(?2, data_type),
               tooltip   = COALESCE(?3, tooltip)
           WHERE field_id = ?1",
          rusqlite::params![id_str, data_type_str, tooltip],
        )?;
        Ok(
          conn
            .query_row(SELECT_FIELD_BY_ID, rusqlite::params![id_str], RawField::from_row)
            .optional()?,
        )
      })
      .await?;
    raw.map(RawField::into_field).transpose()
  }

  // ── Synonyms & options ────────────────────────────────────────────────────

  async fn add_synonym(&self, input: NewSynonym) -> Result<bool> {
    let synonym_id_str = encode_uuid(Uuid::new_v4());
    let field_id_str   = encode_uuid(input.canonical_field_id);
    let created_at_str = encode_dt(Utc::now());

    let inserted = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "INSERT OR IGNORE INTO field_synonyms
             (synonym_id, field_id, raw_text, normalized_key, source_document_id, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![
            synonym_id_str,
            field_id_str,
            input.raw_text,
            input.normalized_key,
            input.source_document_id,
            created_at_str,
          ],
        )?)
      })
      .await?;
    Ok(inserted > 0)
  }

  async fn list_synonyms(&self, canonical_field_id: Uuid) -> Result<Vec<Synonym>> {
    let field_id_str = encode_uuid(canonical_field_id);
    let raws: Vec<RawSynonym> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT synonym_id, field_id, raw_text, normalized_key, source_document_id
           FROM field_synonyms WHERE field_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![field_id_str], |r| {
            Ok(RawSynonym {
              synonym_id:         r.get(0)?,
              field_id:           r.get(1)?,
              raw_text:           r.get(2)?,
              normalized_key:     r.get(3)?,
              source_document_id: r.get(4)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawSynonym::into_synonym).collect()
  }

  async fn add_options(&self, canonical_field_id: Uuid, options: &[String]) -> Result<usize> {
    let field_id_str = encode_uuid(canonical_field_id);
    let options = options.to_vec();

    let added = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut next: u32 = tx.query_row(
          "SELECT COUNT(*) FROM field_options WHERE field_id = ?1",
          rusqlite::params![field_id_str],
          |r| r.get(0),
        )?;
        let mut added = 0;
        for option in &options {
          let inserted = tx.execute(
            "INSERT OR IGNORE INTO field_options (field_id, option_value, display_order)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![field_id_str, option, next],
          )?;
          if inserted > 0 {
            next += 1;
            added += 1;
          }
        }
        tx.commit()?;
        Ok(added)
      })
      .await?;
    Ok(added)
  }

  async fn list_options(&self, canonical_field_id: Uuid) -> Result<Vec<FieldOption>> {
    let field_id_str = encode_uuid(canonical_field_id);
    let raws: Vec<RawOption> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT field_id, option_value, display_order
           FROM field_options WHERE field_id = ?1 ORDER BY display_order",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![field_id_str], |r| {
            Ok(RawOption {
              field_id:      r.get(0)?,
              option_value:  r.get(1)?,
              display_order: r.get(2)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawOption::into_option).collect()
  }

  // ── Column catalog ────────────────────────────────────────────────────────

  async fn get_column(&self, canonical_field_id: Uuid) -> Result<Option<SchemaColumn>> {
    self
      .query_column(
        "SELECT field_id, column_name, created_at FROM schema_columns WHERE field_id = ?1",
        encode_uuid(canonical_field_id),
      )
      .await
  }

  async fn column_owner(&self, column_name: &str) -> Result<Option<SchemaColumn>> {
    self
      .query_column(
        "SELECT field_id, column_name, created_at FROM schema_columns WHERE column_name = ?1",
        column_name.to_owned(),
      )
      .await
  }

  async fn claim_column(&self, canonical_field_id: Uuid, column_name: &str) -> Result<ColumnClaim> {
    let field_id_str   = encode_uuid(canonical_field_id);
    let column_name    = column_name.to_owned();
    let created_at_str = encode_dt(Utc::now());

    let (claimed, raw) = self
      .conn
      .call(move |conn| {
        let inserted = conn.execute(
          "INSERT INTO schema_columns (field_id, column_name, created_at) VALUES (?1, ?2, ?3)",
          rusqlite::params![field_id_str, column_name, created_at_str],
        );
        let claimed = match inserted {
          Ok(_) => true,
          Err(err) if is_constraint_violation(&err) => false,
          Err(err) => return Err(err.into()),
        };
        // After a lost race the field's own row wins over the name's holder.
        let raw = conn
          .query_row(
            "SELECT field_id, column_name, created_at FROM schema_columns
             WHERE field_id = ?1 OR column_name = ?2
             ORDER BY field_id = ?1 DESC
             LIMIT 1",
            rusqlite::params![field_id_str, column_name],
            RawColumn::from_row,
          )?;
        Ok((claimed, raw))
      })
      .await?;

    let column = raw.into_column()?;
    Ok(if claimed { ColumnClaim::Claimed(column) } else { ColumnClaim::Taken(column) })
  }

  async fn list_columns(&self) -> Result<Vec<SchemaColumn>> {
    let raws: Vec<RawColumn> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT field_id, column_name, created_at FROM schema_columns ORDER BY rowid",
        )?;
        let rows = stmt
          .query_map([], RawColumn::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawColumn::into_column).collect()
  }

  async fn record_conflict(&self, conflict: NamingConflict) -> Result<()> {
    let field_id_str    = encode_uuid(conflict.canonical_field_id);
    let holder_id_str   = encode_uuid(conflict.holder_field_id);
    let detected_at_str = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO schema_conflicts
             (field_id, canonical_name, wanted_column, holder_field_id, detected_at)
           VALUES (?1, ?2, ?3, ?4, ?5)
           ON CONFLICT (field_id) DO UPDATE SET
             wanted_column   = excluded.wanted_column,
             holder_field_id = excluded.holder_field_id",
          rusqlite::params![
            field_id_str,
            conflict.canonical_name,
            conflict.wanted_column,
            holder_id_str,
            detected_at_str,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn list_conflicts(&self) -> Result<Vec<NamingConflict>> {
    let raws: Vec<RawConflict> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT c.field_id, c.canonical_name, c.wanted_column, c.holder_field_id
           FROM schema_conflicts c
           WHERE NOT EXISTS (SELECT 1 FROM schema_columns s WHERE s.field_id = c.field_id)
           ORDER BY c.detected_at, c.rowid",
        )?;
        let rows = stmt
          .query_map([], |r| {
            Ok(RawConflict {
              field_id:        r.get(0)?,
              canonical_name:  r.get(1)?,
              wanted_column:   r.get(2)?,
              holder_field_id: r.get(3)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawConflict::into_conflict).collect()
  }

  // ── Usage ─────────────────────────────────────────────────────────────────

  async fn record_occurrence(&self, occurrence: NewOccurrence) -> Result<FormFieldAssociation> {
    let field_id_str    = encode_uuid(occurrence.canonical_field_id);
    let recorded_at_str = encode_dt(Utc::now());

    let raw = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT OR IGNORE INTO form_field_occurrences
             (form_id, field_id, raw_text, paragraph_group_ref, recorded_at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![
            occurrence.form_id,
            field_id_str,
            occurrence.raw_text,
            occurrence.paragraph_group_ref,
            recorded_at_str,
          ],
        )?;
        // A pair already on record keeps its count.
        tx.execute(
          "INSERT OR IGNORE INTO form_field_associations (form_id, field_id, occurrence_count)
           VALUES (?1, ?2, 1)",
          rusqlite::params![occurrence.form_id, field_id_str],
        )?;
        let count: u32 = tx.query_row(
          "SELECT occurrence_count FROM form_field_associations
           WHERE form_id = ?1 AND field_id = ?2",
          rusqlite::params![occurrence.form_id, field_id_str],
          |r| r.get(0),
        )?;
        tx.commit()?;
        Ok(RawAssociation {
          form_id:          occurrence.form_id,
          field_id:         field_id_str,
          occurrence_count: count,
        })
      })
      .await?;
    raw.into_association()
  }

  async fn list_associations(
    &self,
    canonical_field_id: Option<Uuid>,
  ) -> Result<Vec<FormFieldAssociation>> {
    let field_id_str = canonical_field_id.map(encode_uuid);
    let raws: Vec<RawAssociation> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT form_id, field_id, occurrence_count FROM form_field_associations
           WHERE ?1 IS NULL OR field_id = ?1
           ORDER BY form_id, field_id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![field_id_str], |r| {
            Ok(RawAssociation {
              form_id:          r.get(0)?,
              field_id:         r.get(1)?,
              occurrence_count: r.get(2)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawAssociation::into_association).collect()
  }
}

// ─── ColumnActuator ──────────────────────────────────────────────────────────

impl ColumnActuator for SqliteStore {
  type Error = Error;

  async fn physical_columns(&self) -> Result<Vec<String>> {
    Ok(self.conn.call(|conn| Ok(physical_columns_of(conn)?)).await?)
  }

  async fn add_column(&self, column_name: &str, sql_type: &'static str) -> Result<AddColumn> {
    if column_name.is_empty()
      || !column_name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
      return Err(Error::UnsafeIdentifier(column_name.to_owned()));
    }
    let column_name = column_name.to_owned();

    let outcome = self
      .conn
      .call(move |conn| {
        if physical_columns_of(conn)?.contains(&column_name) {
          return Ok(AddColumn::AlreadyExists);
        }
        let ddl = format!("ALTER TABLE {WIDE_TABLE} ADD COLUMN \"{column_name}\" {sql_type}");
        match conn.execute(&ddl, []) {
          Ok(_) => Ok(AddColumn::Added),
          // Another process added it between the check and the ALTER.
          Err(err) if is_duplicate_column(&err) => {
            if physical_columns_of(conn)?.contains(&column_name) {
              Ok(AddColumn::AlreadyExists)
            } else {
              Err(err.into())
            }
          }
          Err(err) => Err(err.into()),
        }
      })
      .await?;
    Ok(outcome)
  }
}
