//! Error types for `canon-core`.

use thiserror::Error;
use uuid::Uuid;

use crate::schema::NamingConflict;

#[derive(Debug, Error)]
pub enum Error {
  /// Normalization left nothing usable to match on.
  #[error("placeholder {raw:?} normalizes to an empty key")]
  InvalidPlaceholder { raw: String },

  /// Two canonical fields sanitize to the same physical column.
  #[error("schema naming conflict: {0}")]
  SchemaNamingConflict(NamingConflict),

  /// Every suffixed variant of a canonical name up to the configured bound is
  /// already taken by another field.
  #[error("no free canonical name for {base:?} after {attempts} suffixes")]
  NameSpaceExhausted { base: String, attempts: u32 },

  /// The backing store failed; the batch cannot continue.
  #[error("store unavailable: {0}")]
  StoreUnavailable(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("canonical field not found: {0}")]
  FieldNotFound(Uuid),

  #[error("embedding error: {0}")]
  Embedding(String),

  #[error("invalid configuration: {0}")]
  InvalidConfig(String),
}

impl Error {
  /// Wrap a backend error.
  pub fn store<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::StoreUnavailable(Box::new(err))
  }

  /// Whether this error aborts the remaining batch. Everything else is
  /// recovered per occurrence.
  pub fn is_fatal(&self) -> bool { matches!(self, Self::StoreUnavailable(_)) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
