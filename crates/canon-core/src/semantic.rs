//! Semantic veto of lexical matches.
//!
//! A [`SemanticValidator`] only ever says "keep" or "drop" about a match the
//! lexical scorer already proposed; it never proposes one itself. The
//! implementation is chosen once at construction, see [`Validator::select`].

use std::{collections::HashMap, future::Future};

use tokio::sync::Mutex;

use crate::{Error, Result, config::EngineConfig, field::CanonicalField};

// ─── Traits ──────────────────────────────────────────────────────────────────

/// Turns texts into embedding vectors. Implemented by model backends.
pub trait Embedder: Send + Sync {
  /// Embed every text, returning one vector per input in the same order.
  fn embed(
    &self,
    texts: &[String],
  ) -> impl Future<Output = Result<Vec<Vec<f32>>>> + Send;
}

/// Outcome of validating a lexical match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
  /// Keep the match. `similarity` is `None` when nothing was computed.
  Accept { similarity: Option<f32> },
  /// Drop the match and create a new field instead.
  Veto { similarity: f32 },
}

impl Verdict {
  pub fn is_accept(&self) -> bool { matches!(self, Self::Accept { .. }) }
}

pub trait SemanticValidator: Send + Sync {
  /// Judge whether `raw_text` really denotes `candidate`.
  fn validate(
    &self,
    raw_text: &str,
    candidate: &CanonicalField,
  ) -> impl Future<Output = Verdict> + Send;
}

// ─── Always accept ───────────────────────────────────────────────────────────

/// Pass-through used when semantic validation is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysAccept;

impl SemanticValidator for AlwaysAccept {
  async fn validate(&self, _raw_text: &str, _candidate: &CanonicalField) -> Verdict {
    Verdict::Accept { similarity: None }
  }
}

// ─── Embedding cosine similarity ─────────────────────────────────────────────

/// Vetoes matches whose embeddings are less similar than `threshold`.
///
/// Embeddings are cached per text for the lifetime of the validator. If the
/// backend fails mid-run the match is kept: the engine degrades to lexical-only
/// matching rather than splitting fields on an outage.
pub struct EmbeddingValidator<E> {
  embedder:  E,
  threshold: f32,
  cache:     Mutex<HashMap<String, Vec<f32>>>,
}

impl<E: Embedder> EmbeddingValidator<E> {
  pub fn new(embedder: E, threshold: f32) -> Self {
    Self { embedder, threshold, cache: Mutex::new(HashMap::new()) }
  }

  /// Cosine similarity between the embeddings of two texts.
  pub async fn similarity(&self, a: &str, b: &str) -> Result<f32> {
    let vectors = self.vectors(&[a.to_owned(), b.to_owned()]).await?;
    cosine_similarity(&vectors[0], &vectors[1])
  }

  async fn vectors(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let missing: Vec<String> = {
      let cache = self.cache.lock().await;
      let mut missing: Vec<String> = texts
        .iter()
        .filter(|t| !cache.contains_key(*t))
        .cloned()
        .collect();
      missing.dedup();
      missing
    };

    if !missing.is_empty() {
      let computed = self.embedder.embed(&missing).await?;
      if computed.len() != missing.len() {
        return Err(Error::Embedding(format!(
          "backend returned {} embeddings for {} inputs",
          computed.len(),
          missing.len()
        )));
      }
      let mut cache = self.cache.lock().await;
      cache.extend(missing.into_iter().zip(computed));
    }

    let cache = self.cache.lock().await;
    texts
      .iter()
      .map(|t| {
        cache
          .get(t)
          .cloned()
          .ok_or_else(|| Error::Embedding(format!("no embedding cached for {t:?}")))
      })
      .collect()
  }
}

impl<E: Embedder> SemanticValidator for EmbeddingValidator<E> {
  async fn validate(&self, raw_text: &str, candidate: &CanonicalField) -> Verdict {
    match self.similarity(raw_text, &candidate.normalized_key).await {
      Ok(similarity) if similarity >= self.threshold => {
        Verdict::Accept { similarity: Some(similarity) }
      }
      Ok(similarity) => Verdict::Veto { similarity },
      Err(e) => {
        tracing::warn!(
          raw_text,
          candidate = %candidate.canonical_name,
          "semantic validation failed, keeping lexical match: {e}"
        );
        Verdict::Accept { similarity: None }
      }
    }
  }
}

/// Cosine similarity of two vectors. Zero vectors are dissimilar to
/// everything.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
  if a.len() != b.len() {
    return Err(Error::Embedding(format!(
      "dimension mismatch: {} vs {}",
      a.len(),
      b.len()
    )));
  }
  let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
  let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
  let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
  if norm_a == 0.0 || norm_b == 0.0 {
    return Ok(0.0);
  }
  Ok((dot / (norm_a * norm_b)).clamp(-1.0, 1.0))
}

// ─── Selection ───────────────────────────────────────────────────────────────

/// The validator picked for a run. Orchestration code is generic over
/// [`SemanticValidator`] and never looks at the configuration flag itself.
pub enum Validator<E> {
  AlwaysAccept(AlwaysAccept),
  Embedding(EmbeddingValidator<E>),
}

impl<E: Embedder> Validator<E> {
  /// Choose the validator for `config`.
  ///
  /// With semantics enabled the embedder is tried once on a sample text; if it
  /// is missing or that call fails, matching degrades to lexical-only with a
  /// warning.
  pub async fn select(config: &EngineConfig, embedder: Option<E>) -> Self {
    if !config.semantic_enabled {
      return Self::AlwaysAccept(AlwaysAccept);
    }
    let Some(embedder) = embedder else {
      tracing::warn!("semantic matching enabled but no embedding backend configured; using lexical matching only");
      return Self::AlwaysAccept(AlwaysAccept);
    };
    match embedder.embed(&["health check".to_owned()]).await {
      Ok(v) if v.len() == 1 && !v[0].is_empty() => {
        Self::Embedding(EmbeddingValidator::new(embedder, config.semantic_threshold))
      }
      Ok(_) => {
        tracing::warn!("embedding backend returned an empty vector; using lexical matching only");
        Self::AlwaysAccept(AlwaysAccept)
      }
      Err(e) => {
        tracing::warn!("embedding backend unavailable ({e}); using lexical matching only");
        Self::AlwaysAccept(AlwaysAccept)
      }
    }
  }

  pub fn is_semantic(&self) -> bool { matches!(self, Self::Embedding(_)) }
}

impl<E: Embedder> SemanticValidator for Validator<E> {
  async fn validate(&self, raw_text: &str, candidate: &CanonicalField) -> Verdict {
    match self {
      Self::AlwaysAccept(v) => v.validate(raw_text, candidate).await,
      Self::Embedding(v) => v.validate(raw_text, candidate).await,
    }
  }
}
