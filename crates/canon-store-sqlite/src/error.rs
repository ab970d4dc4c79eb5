//! Error type for `canon-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("unknown data type stored: {0:?}")]
  UnknownDataType(String),

  /// Refused to put a name that is not `[a-z0-9_]+` into DDL.
  #[error("unsafe column identifier: {0:?}")]
  UnsafeIdentifier(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
