//! Engine configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

/// Tunables for matching and schema growth, deserialised from the `[engine]`
/// table of the config file. Every field has a default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Minimum lexical score (0–100) to consider a match.
  pub fuzzy_threshold:        u8,
  /// Enables the embedding-based veto of lexical matches.
  pub semantic_enabled:       bool,
  /// Minimum cosine similarity (0.0–1.0) to keep a lexical match.
  pub semantic_threshold:     f32,
  /// Prefixes stripped from the front of a placeholder during normalization.
  pub stopword_prefixes:      Vec<String>,
  /// Punctuation that survives normalization.
  pub punctuation_allow_list: String,
  pub column_name_max_length: usize,
  /// Identifiers a column may not take verbatim.
  pub reserved_words:         Vec<String>,
  /// Highest numeric suffix tried when a canonical name is taken.
  pub max_name_suffix:        u32,
  /// Processing budget for the occurrences of one source document.
  pub document_budget_secs:   u64,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      fuzzy_threshold:        85,
      semantic_enabled:       false,
      semantic_threshold:     0.85,
      stopword_prefixes:      ["the ", "a ", "an "].map(String::from).to_vec(),
      punctuation_allow_list: "#&%$".into(),
      column_name_max_length: 64,
      reserved_words:         default_reserved_words(),
      max_name_suffix:        1000,
      document_budget_secs:   30,
    }
  }
}

impl EngineConfig {
  /// Reject values outside their documented ranges.
  pub fn validate(&self) -> Result<()> {
    if self.fuzzy_threshold > 100 {
      return Err(Error::InvalidConfig(format!(
        "fuzzy_threshold must be within 0..=100, got {}",
        self.fuzzy_threshold
      )));
    }
    if !(0.0..=1.0).contains(&self.semantic_threshold) {
      return Err(Error::InvalidConfig(format!(
        "semantic_threshold must be within 0.0..=1.0, got {}",
        self.semantic_threshold
      )));
    }
    if self.column_name_max_length < 8 {
      return Err(Error::InvalidConfig(format!(
        "column_name_max_length must be at least 8, got {}",
        self.column_name_max_length
      )));
    }
    if self.max_name_suffix < 2 {
      return Err(Error::InvalidConfig(
        "max_name_suffix must be at least 2".into(),
      ));
    }
    Ok(())
  }

  pub fn document_budget(&self) -> Duration {
    Duration::from_secs(self.document_budget_secs)
  }
}

/// SQL keywords plus the fixed columns of the wide table.
fn default_reserved_words() -> Vec<String> {
  [
    "id", "form_id", "created_at", "updated_at", "select", "from", "where",
    "table", "column", "index", "order", "group", "by", "insert", "update",
    "delete", "create", "drop", "alter", "and", "or", "not", "null", "primary",
    "key", "references", "default", "check", "unique", "values", "into",
    "join", "on", "as", "case", "when", "then", "else", "end", "limit",
    "offset", "union", "all", "distinct", "having", "is", "in", "like",
    "between", "exists", "set", "to", "transaction", "commit", "rollback",
  ]
  .map(String::from)
  .to_vec()
}
