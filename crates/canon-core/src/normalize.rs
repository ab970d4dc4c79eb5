//! Text normalization: raw placeholder text to matching key.

use crate::{Error, Result, config::EngineConfig};

/// Reduces raw placeholder text to the key used for matching.
///
/// Deterministic and pure: lowercase, punctuation outside the allow-list
/// becomes whitespace (apostrophes are dropped), whitespace runs collapse to
/// one space, configured prefixes are stripped, and the result is trimmed.
#[derive(Debug, Clone)]
pub struct Normalizer {
  prefixes:   Vec<String>,
  allow_list: Vec<char>,
}

impl Normalizer {
  pub fn new<I, S>(prefixes: I, allow_list: &str) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    // Prefixes are matched against already-collapsed text, so they are
    // normalized the same way. Longest first so "name of the " wins over
    // "name of ".
    let mut prefixes: Vec<String> = prefixes
      .into_iter()
      .map(|p| {
        let words = p.as_ref().to_lowercase();
        let collapsed = words.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() { collapsed } else { format!("{collapsed} ") }
      })
      .filter(|p| !p.is_empty())
      .collect();
    prefixes.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    prefixes.dedup();

    Self { prefixes, allow_list: allow_list.chars().collect() }
  }

  pub fn from_config(config: &EngineConfig) -> Self {
    Self::new(&config.stopword_prefixes, &config.punctuation_allow_list)
  }

  /// Normalize `raw`, failing with [`Error::InvalidPlaceholder`] when nothing
  /// usable remains.
  pub fn normalize(&self, raw: &str) -> Result<String> {
    let mut cleaned = String::with_capacity(raw.len());
    for c in raw.chars().flat_map(char::to_lowercase) {
      if c.is_alphanumeric() || self.allow_list.contains(&c) {
        cleaned.push(c);
      } else if c == '\'' || c == '\u{2019}' {
        // "plaintiff's" and "plaintiffs" are the same field.
      } else {
        cleaned.push(' ');
      }
    }

    let mut key = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    // Strip repeatedly: "the name of " may stack two configured prefixes.
    while let Some(prefix) = self.prefixes.iter().find(|p| key.starts_with(p.as_str())) {
      key = key[prefix.len()..].to_owned();
    }
    if self.prefixes.iter().any(|p| p.trim_end() == key) {
      key.clear();
    }

    let key = key.trim().to_owned();
    if key.is_empty() || !key.chars().any(char::is_alphanumeric) {
      return Err(Error::InvalidPlaceholder { raw: raw.to_owned() });
    }
    Ok(key)
  }
}

impl Default for Normalizer {
  fn default() -> Self { Self::from_config(&EngineConfig::default()) }
}
