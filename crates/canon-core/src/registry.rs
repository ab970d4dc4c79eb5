//! The canonical field registry: match an occurrence to a known field or
//! create a new one.

use std::{collections::HashSet, sync::Arc};

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
  Error, Result,
  config::EngineConfig,
  field::{CanonicalField, DataType, FieldUpdate, NewField},
  infer::default_tooltip,
  normalize::Normalizer,
  semantic::{SemanticValidator, Verdict},
  similarity::{Candidate, best_match},
  store::{FieldInsert, FieldStore, NewSynonym},
};

// ─── Resolution ──────────────────────────────────────────────────────────────

/// How a raw text was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchKind {
  /// The normalized key was already known, either as the key a field was
  /// created from or as the key of an earlier synonym.
  Exact,
  /// A lexical match above the threshold that the validator kept.
  Fuzzy {
    score:      f64,
    similarity: Option<f32>,
  },
  /// A new field. `vetoed` names the lexical candidate the validator
  /// rejected, if any.
  Created { vetoed: Option<String> },
}

#[derive(Debug, Clone)]
pub struct Resolution {
  pub field:          CanonicalField,
  pub normalized_key: String,
  pub kind:           MatchKind,
  /// Whether this raw spelling was new for the field.
  pub new_synonym:    bool,
}

impl Resolution {
  pub fn created(&self) -> bool { matches!(self.kind, MatchKind::Created { .. }) }
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// Owns the match-or-create decision.
///
/// Scoring reads a snapshot of the registry without locking. The create step
/// runs behind a single-writer gate and re-checks the store before inserting;
/// the store's uniqueness constraints cover writers in other processes.
pub struct Registry<S, V> {
  store:           Arc<S>,
  validator:       V,
  normalizer:      Normalizer,
  fuzzy_threshold: f64,
  max_name_suffix: u32,
  allow_list:      Vec<char>,
  gate:            Mutex<()>,
}

impl<S, V> Registry<S, V>
where
  S: FieldStore,
  V: SemanticValidator,
{
  pub fn new(store: Arc<S>, validator: V, config: &EngineConfig) -> Self {
    Self {
      store,
      validator,
      normalizer: Normalizer::from_config(config),
      fuzzy_threshold: f64::from(config.fuzzy_threshold),
      max_name_suffix: config.max_name_suffix,
      allow_list: config.punctuation_allow_list.chars().collect(),
      gate: Mutex::new(()),
    }
  }

  /// Resolve `raw_text` to a canonical field, creating one if nothing known
  /// matches. `data_type_hint` is only used for a newly created field.
  pub async fn resolve_or_create(
    &self,
    raw_text: &str,
    source_document_id: &str,
    data_type_hint: DataType,
  ) -> Result<Resolution> {
    let key = self.normalizer.normalize(raw_text)?;

    if let Some(field) = self.store.find_by_key(&key).await.map_err(Error::store)? {
      return self.attach(field, key, raw_text, source_document_id, MatchKind::Exact).await;
    }

    let snapshot = self.store.list_fields().await.map_err(Error::store)?;
    let mut vetoed = None;
    match self.propose(&key, raw_text, &snapshot).await {
      Proposal::Accept(field, kind) => {
        return self.attach(field, key, raw_text, source_document_id, kind).await;
      }
      Proposal::Vetoed(name) => vetoed = Some(name),
      Proposal::Nothing => {}
    }

    let _guard = self.gate.lock().await;

    // Fresh look under the gate: another writer may have created the key, or
    // a near-duplicate, since the snapshot was taken.
    if let Some(field) = self.store.find_by_key(&key).await.map_err(Error::store)? {
      return self.attach(field, key, raw_text, source_document_id, MatchKind::Exact).await;
    }
    let seen: HashSet<Uuid> = snapshot.iter().map(|f| f.id).collect();
    let fresh: Vec<CanonicalField> = self
      .store
      .list_fields()
      .await
      .map_err(Error::store)?
      .into_iter()
      .filter(|f| !seen.contains(&f.id))
      .collect();
    if let Proposal::Accept(field, kind) = self.propose(&key, raw_text, &fresh).await {
      return self.attach(field, key, raw_text, source_document_id, kind).await;
    }

    self
      .create(key, raw_text, source_document_id, data_type_hint, vetoed)
      .await
  }

  /// Apply an admin edit. Canonicalization never writes these values again.
  pub async fn update(&self, id: Uuid, update: FieldUpdate) -> Result<CanonicalField> {
    self
      .store
      .update_field(id, update)
      .await
      .map_err(Error::store)?
      .ok_or(Error::FieldNotFound(id))
  }

  async fn propose(
    &self,
    key: &str,
    raw_text: &str,
    fields: &[CanonicalField],
  ) -> Proposal {
    let candidates = fields.iter().map(|f| Candidate {
      canonical_name: &f.canonical_name,
      key:            &f.normalized_key,
    });
    let Some(best) = best_match(key, candidates) else {
      return Proposal::Nothing;
    };
    if best.score < self.fuzzy_threshold {
      tracing::debug!(key, best = best.canonical_name, score = best.score, "no lexical match");
      return Proposal::Nothing;
    }
    let Some(field) = fields.iter().find(|f| f.canonical_name == best.canonical_name) else {
      return Proposal::Nothing;
    };

    match self.validator.validate(raw_text, field).await {
      Verdict::Accept { similarity } => {
        tracing::debug!(
          key,
          field = %field.canonical_name,
          score = best.score,
          ?similarity,
          "lexical match accepted"
        );
        Proposal::Accept(field.clone(), MatchKind::Fuzzy { score: best.score, similarity })
      }
      Verdict::Veto { similarity } => {
        tracing::debug!(
          key,
          field = %field.canonical_name,
          score = best.score,
          similarity,
          "lexical match vetoed by semantic check"
        );
        Proposal::Vetoed(field.canonical_name.clone())
      }
    }
  }

  async fn attach(
    &self,
    field: CanonicalField,
    normalized_key: String,
    raw_text: &str,
    source_document_id: &str,
    kind: MatchKind,
  ) -> Result<Resolution> {
    let new_synonym = self
      .store
      .add_synonym(NewSynonym {
        canonical_field_id: field.id,
        raw_text:           raw_text.to_owned(),
        normalized_key:     normalized_key.clone(),
        source_document_id: source_document_id.to_owned(),
      })
      .await
      .map_err(Error::store)?;
    Ok(Resolution { field, normalized_key, kind, new_synonym })
  }

  /// Insert a new field. Caller holds the gate.
  async fn create(
    &self,
    key: String,
    raw_text: &str,
    source_document_id: &str,
    data_type: DataType,
    vetoed: Option<String>,
  ) -> Result<Resolution> {
    let base = canonical_name_for(&key, &self.allow_list);

    for attempt in 1..=self.max_name_suffix {
      let canonical_name = if attempt == 1 {
        base.clone()
      } else {
        format!("{base}_{attempt}")
      };
      let input = NewField {
        id: Uuid::new_v4(),
        tooltip: Some(default_tooltip(&canonical_name)),
        canonical_name,
        normalized_key: key.clone(),
        data_type,
      };

      match self.store.insert_field(input).await.map_err(Error::store)? {
        FieldInsert::Created(field) => {
          tracing::info!(
            field = %field.canonical_name,
            data_type = %field.data_type,
            raw_text,
            "created canonical field"
          );
          let kind = MatchKind::Created { vetoed };
          return self.attach(field, key, raw_text, source_document_id, kind).await;
        }
        FieldInsert::KeyTaken(field) => {
          return self.attach(field, key, raw_text, source_document_id, MatchKind::Exact).await;
        }
        FieldInsert::NameTaken(other) if other.normalized_key == key => {
          return self.attach(other, key, raw_text, source_document_id, MatchKind::Exact).await;
        }
        FieldInsert::NameTaken(other) => {
          tracing::debug!(taken = %other.canonical_name, "canonical name taken, trying next suffix");
        }
      }
    }

    Err(Error::NameSpaceExhausted { base, attempts: self.max_name_suffix })
  }
}

enum Proposal {
  Accept(CanonicalField, MatchKind),
  Vetoed(String),
  Nothing,
}

/// Derive a canonical name from a normalized key: words joined by `_`, only
/// ASCII alphanumerics and allow-listed punctuation kept.
pub fn canonical_name_for(key: &str, allow_list: &[char]) -> String {
  let mut name = String::with_capacity(key.len());
  for c in key.chars() {
    let c = if c.is_whitespace() || c == '_' { '_' } else { c };
    if c == '_' {
      if !name.is_empty() && !name.ends_with('_') {
        name.push('_');
      }
    } else if c.is_ascii_alphanumeric() || allow_list.contains(&c) {
      name.push(c.to_ascii_lowercase());
    }
  }
  let name = name.trim_end_matches('_');
  if name.is_empty() { "field".to_owned() } else { name.to_owned() }
}
