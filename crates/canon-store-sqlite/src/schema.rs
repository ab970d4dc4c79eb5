//! SQL schema for the canonical field store.
//!
//! Executed once at connection startup via `PRAGMA user_version`. Future
//! migrations will be gated on that version number.

/// The reporting table grown one column per canonical field.
pub const WIDE_TABLE: &str = "form_field_values_wide";

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Never deleted. canonical_name is immutable once inserted.
CREATE TABLE IF NOT EXISTS canonical_fields (
    field_id        TEXT PRIMARY KEY,
    canonical_name  TEXT NOT NULL UNIQUE,
    normalized_key  TEXT NOT NULL UNIQUE,
    data_type       TEXT NOT NULL DEFAULT 'text',
    tooltip         TEXT,
    created_at      TEXT NOT NULL     -- ISO 8601 UTC
);

CREATE TABLE IF NOT EXISTS field_synonyms (
    synonym_id          TEXT PRIMARY KEY,
    field_id            TEXT NOT NULL REFERENCES canonical_fields(field_id),
    raw_text            TEXT NOT NULL,
    normalized_key      TEXT NOT NULL,
    source_document_id  TEXT NOT NULL,
    created_at          TEXT NOT NULL,
    UNIQUE (field_id, raw_text)
);

CREATE TABLE IF NOT EXISTS field_options (
    field_id       TEXT NOT NULL REFERENCES canonical_fields(field_id),
    option_value   TEXT NOT NULL,
    display_order  INTEGER NOT NULL,
    PRIMARY KEY (field_id, option_value)
);

-- Logical column catalog. Append-only: no UPDATE or DELETE is ever issued.
CREATE TABLE IF NOT EXISTS schema_columns (
    field_id     TEXT PRIMARY KEY REFERENCES canonical_fields(field_id),
    column_name  TEXT NOT NULL UNIQUE,
    created_at   TEXT NOT NULL
);

-- Fields waiting for a human to resolve a column-name clash.
CREATE TABLE IF NOT EXISTS schema_conflicts (
    field_id         TEXT PRIMARY KEY REFERENCES canonical_fields(field_id),
    canonical_name   TEXT NOT NULL,
    wanted_column    TEXT NOT NULL,
    holder_field_id  TEXT NOT NULL REFERENCES canonical_fields(field_id),
    detected_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS form_field_associations (
    form_id           TEXT NOT NULL,
    field_id          TEXT NOT NULL REFERENCES canonical_fields(field_id),
    occurrence_count  INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (form_id, field_id)
);

-- Provenance: each distinct spelling seen per form and field.
CREATE TABLE IF NOT EXISTS form_field_occurrences (
    form_id              TEXT NOT NULL,
    field_id             TEXT NOT NULL REFERENCES canonical_fields(field_id),
    raw_text             TEXT NOT NULL,
    paragraph_group_ref  TEXT,
    recorded_at          TEXT NOT NULL,
    PRIMARY KEY (form_id, field_id, raw_text)
);

-- Grown with ALTER TABLE ... ADD COLUMN; columns are never dropped.
CREATE TABLE IF NOT EXISTS form_field_values_wide (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    form_id     TEXT NOT NULL,
    created_at  TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at  TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS synonyms_key_idx   ON field_synonyms(normalized_key);
CREATE INDEX IF NOT EXISTS synonyms_field_idx ON field_synonyms(field_id);
CREATE INDEX IF NOT EXISTS wide_form_idx      ON form_field_values_wide(form_id);

PRAGMA user_version = 1;
";
