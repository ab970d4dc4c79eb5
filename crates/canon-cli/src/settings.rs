//! Shape of `canon.toml`.

use std::path::{Path, PathBuf};

use canon_core::config::EngineConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
  /// SQLite database file. A leading `~/` is expanded.
  #[serde(default = "default_store_path")]
  pub store_path: PathBuf,
  #[serde(default)]
  pub engine:     EngineConfig,
  /// Embedding backend for semantic validation. Only consulted when
  /// `engine.semantic_enabled` is set.
  #[serde(default)]
  pub embedding:  Option<EmbeddingSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingSettings {
  #[serde(default = "default_host")]
  pub host:         String,
  pub model:        String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_store_path() -> PathBuf { PathBuf::from("canon.db") }

fn default_host() -> String { "http://localhost:11434".to_owned() }

fn default_timeout_secs() -> u64 { 30 }

/// `CANON_STORE_PATH`, `CANON_ENGINE__FUZZY_THRESHOLD=90`,
/// `CANON_ENGINE__STOPWORD_PREFIXES="the ,a "`.
fn environment() -> config::Environment {
  config::Environment::with_prefix("CANON")
    .prefix_separator("_")
    .separator("__")
    .list_separator(",")
    .with_list_parse_key("engine.stopword_prefixes")
    .with_list_parse_key("engine.reserved_words")
    .try_parsing(true)
}

impl Settings {
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    Self::load_with(path, environment())
  }

  fn load_with(path: &Path, env: config::Environment) -> anyhow::Result<Self> {
    use anyhow::Context as _;

    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(env)
      .build()
      .with_context(|| format!("failed to read config file {}", path.display()))?;

    let settings: Settings = settings
      .try_deserialize()
      .context("failed to deserialise settings")?;
    settings.engine.validate().context("invalid [engine] settings")?;
    Ok(settings)
  }

  /// `store_path` with a leading `~` expanded to the user's home directory.
  pub fn store_path(&self) -> PathBuf {
    let s = self.store_path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/")
      && let Ok(home) = std::env::var("HOME")
    {
      return PathBuf::from(home).join(rest);
    }
    self.store_path.clone()
  }
}
