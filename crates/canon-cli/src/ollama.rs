//! Async Ollama client used as the embedding backend for semantic
//! validation.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use canon_core::semantic::Embedder;
use reqwest::Client;
use serde::Deserialize;

use crate::settings::EmbeddingSettings;

/// Embeds texts with a local Ollama model.
///
/// Prefers the batched `/api/embed` endpoint and falls back to per-item
/// `/api/embeddings` for older servers.
#[derive(Clone)]
pub struct OllamaEmbedder {
  client: Client,
  host:   String,
  model:  String,
}

#[derive(Deserialize)]
struct EmbedResp {
  embeddings: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
struct EmbeddingsResp {
  embedding: Vec<f32>,
}

impl OllamaEmbedder {
  pub fn new(settings: &EmbeddingSettings) -> Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(settings.timeout_secs))
      .build()
      .context("failed to build HTTP client")?;
    Ok(Self {
      client,
      host: normalize_host(&settings.host),
      model: settings.model.clone(),
    })
  }

  async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
      return Ok(Vec::new());
    }

    let url_embed = format!("{}/api/embed", self.host);
    let body = serde_json::json!({
      "model": self.model,
      "input": texts,
      "truncate": true,
    });
    let resp = self
      .client
      .post(&url_embed)
      .json(&body)
      .send()
      .await
      .with_context(|| format!("failed to reach ollama at {url_embed} (is it running?)"))?;

    if resp.status().is_success() {
      let out: EmbedResp = resp
        .json()
        .await
        .context("ollama /api/embed returned invalid JSON")?;
      if out.embeddings.len() != texts.len() {
        return Err(anyhow!(
          "ollama /api/embed returned {} embeddings for {} inputs",
          out.embeddings.len(),
          texts.len()
        ));
      }
      return Ok(out.embeddings);
    }
    tracing::debug!(status = %resp.status(), "/api/embed unsupported, falling back to /api/embeddings");

    let url = format!("{}/api/embeddings", self.host);
    let mut out = Vec::with_capacity(texts.len());
    for text in texts {
      let body = serde_json::json!({ "model": self.model, "prompt": text });
      let resp = self
        .client
        .post(&url)
        .json(&body)
        .send()
        .await
        .with_context(|| format!("POST {url} failed"))?;

      if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        return Err(anyhow!("ollama http error {status}: {text}"));
      }
      let r: EmbeddingsResp = resp
        .json()
        .await
        .context("ollama /api/embeddings returned invalid JSON")?;
      out.push(r.embedding);
    }
    Ok(out)
  }
}

impl Embedder for OllamaEmbedder {
  async fn embed(&self, texts: &[String]) -> canon_core::Result<Vec<Vec<f32>>> {
    self
      .embed_texts(texts)
      .await
      .map_err(|e| canon_core::Error::Embedding(format!("{e:#}")))
  }
}

/// Accepts `host:port`, `http://host:port` or `https://host:port/`.
fn normalize_host(host: &str) -> String {
  let host = host.trim().trim_end_matches('/');
  if host.starts_with("http://") || host.starts_with("https://") {
    host.to_owned()
  } else {
    format!("http://{host}")
  }
}
