//! `canon`: canonicalize template placeholders into a shared field schema.
//!
//! # Usage
//!
//! ```
//! canon ingest occurrences.jsonl
//! canon fields
//! canon update hearing --data-type date --tooltip "Date of the first hearing"
//! ```
//!
//! Settings come from `canon.toml` (or `--config`), overridable with
//! `CANON_*` environment variables, e.g. `CANON_ENGINE__FUZZY_THRESHOLD=90`
//! or `CANON_ENGINE__STOPWORD_PREFIXES="the ,a ,an "` for lists.

mod ollama;
mod settings;

use std::{
  collections::HashMap,
  io::Read as _,
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::{Context as _, Result, bail};
use canon_core::{
  field::{DataType, FieldUpdate, RawOccurrence},
  pipeline::{BatchReport, Canonicalizer},
  registry::Registry,
  semantic::{AlwaysAccept, Validator},
  store::{ColumnActuator, FieldStore},
};
use canon_store_sqlite::SqliteStore;
use clap::{Parser, Subcommand};
use ollama::OllamaEmbedder;
use settings::Settings;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

// ─── CLI args ────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "canon", version, about = "Field canonicalization and schema evolution")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "canon.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Canonicalize occurrences from a JSON array or JSON Lines file (`-` for
  /// stdin).
  Ingest {
    file: PathBuf,
    /// Print the batch report as JSON.
    #[arg(long)]
    json: bool,
  },
  /// List canonical fields with their reporting column.
  Fields,
  /// Show a field with its synonyms, options and form usage.
  Show { name: String },
  /// Edit a field's data type or tooltip.
  Update {
    name:      String,
    #[arg(long)]
    data_type: Option<DataType>,
    #[arg(long)]
    tooltip:   Option<String>,
  },
  /// List fields whose column is waiting on a naming conflict.
  Conflicts,
  /// List the physical columns of the reporting table.
  Columns,
}

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
  // Logs go to stderr so `--json` output stays clean.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();
  let settings = Settings::load(&cli.config)?;

  let store_path = settings.store_path();
  let store = Arc::new(
    SqliteStore::open(&store_path)
      .await
      .with_context(|| format!("failed to open store at {store_path:?}"))?,
  );

  match cli.command {
    Command::Ingest { file, json } => ingest(&settings, store, &file, json).await,
    Command::Fields => fields(&store).await,
    Command::Show { name } => show(&store, &name).await,
    Command::Update { name, data_type, tooltip } => {
      update(&settings, store, &name, FieldUpdate { data_type, tooltip }).await
    }
    Command::Conflicts => conflicts(&store).await,
    Command::Columns => columns(&store).await,
  }
}

// ─── Commands ────────────────────────────────────────────────────────────────

async fn ingest(settings: &Settings, store: Arc<SqliteStore>, file: &Path, json: bool) -> Result<()> {
  let occurrences = read_occurrences(file)?;

  let embedder = match &settings.embedding {
    Some(embedding) if settings.engine.semantic_enabled => Some(OllamaEmbedder::new(embedding)?),
    _ => None,
  };
  let validator = Validator::select(&settings.engine, embedder).await;
  let engine = Canonicalizer::new(Arc::clone(&store), store, validator, &settings.engine)
    .context("failed to build canonicalizer")?;

  tracing::info!(occurrences = occurrences.len(), file = %file.display(), "ingesting");
  let report = engine.run(occurrences).await.context("batch aborted")?;

  if json {
    println!("{}", serde_json::to_string_pretty(&report)?);
  } else {
    print_report(&report);
  }
  Ok(())
}

async fn fields(store: &SqliteStore) -> Result<()> {
  let pending: HashMap<_, _> = store
    .list_conflicts()
    .await?
    .into_iter()
    .map(|c| (c.canonical_field_id, c.wanted_column))
    .collect();

  for field in store.list_fields().await? {
    let column = match store.get_column(field.id).await? {
      Some(column) => column.column_name,
      None => match pending.get(&field.id) {
        Some(wanted) => format!("(pending: {wanted} is taken)"),
        None => "(none)".to_owned(),
      },
    };
    println!("{:<40} {:<9} {}", field.canonical_name, field.data_type, column);
  }
  Ok(())
}

async fn show(store: &SqliteStore, name: &str) -> Result<()> {
  let Some(field) = store.find_by_name(name).await? else {
    bail!("no field named {name:?}");
  };

  println!("{}  ({})", field.canonical_name, field.id);
  println!("  key:       {}", field.normalized_key);
  println!("  data type: {}", field.data_type);
  println!("  tooltip:   {}", field.tooltip.as_deref().unwrap_or("-"));
  println!("  created:   {}", field.created_at.format("%Y-%m-%d %H:%M:%S"));
  match store.get_column(field.id).await? {
    Some(column) => println!("  column:    {}", column.column_name),
    None => println!("  column:    (none)"),
  }

  println!("synonyms:");
  for synonym in store.list_synonyms(field.id).await? {
    println!("  {:<40} first seen in {}", synonym.raw_text, synonym.source_document_id);
  }

  let options = store.list_options(field.id).await?;
  if !options.is_empty() {
    println!("options:");
    for option in options {
      println!("  {}. {}", option.display_order + 1, option.option_value);
    }
  }

  println!("forms:");
  for association in store.list_associations(Some(field.id)).await? {
    println!("  {:<40} x{}", association.form_id, association.occurrence_count);
  }
  Ok(())
}

async fn update(
  settings: &Settings,
  store: Arc<SqliteStore>,
  name: &str,
  edit: FieldUpdate,
) -> Result<()> {
  if edit.is_empty() {
    bail!("nothing to update: pass --data-type and/or --tooltip");
  }
  let Some(field) = store.find_by_name(name).await? else {
    bail!("no field named {name:?}");
  };

  // Admin edits never match anything, so no embedding backend is needed.
  let registry = Registry::new(store, AlwaysAccept, &settings.engine);
  let field = registry.update(field.id, edit).await?;
  tracing::info!(field = %field.canonical_name, data_type = %field.data_type, "field updated");
  println!(
    "{} {} {}",
    field.canonical_name,
    field.data_type,
    field.tooltip.as_deref().unwrap_or("-")
  );
  Ok(())
}

async fn conflicts(store: &SqliteStore) -> Result<()> {
  let conflicts = store.list_conflicts().await?;
  if conflicts.is_empty() {
    println!("no pending naming conflicts");
    return Ok(());
  }
  for conflict in conflicts {
    let holder = store
      .get_field(conflict.holder_field_id)
      .await?
      .map(|f| f.canonical_name)
      .unwrap_or_else(|| conflict.holder_field_id.to_string());
    println!(
      "{:<40} wants {:<32} held by {}",
      conflict.canonical_name, conflict.wanted_column, holder
    );
  }
  Ok(())
}

async fn columns(store: &SqliteStore) -> Result<()> {
  for column in store.physical_columns().await? {
    println!("{column}");
  }
  Ok(())
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Parse a JSON array, or one JSON object per line.
fn read_occurrences(file: &Path) -> Result<Vec<RawOccurrence>> {
  let raw = if file == Path::new("-") {
    let mut buf = String::new();
    std::io::stdin()
      .read_to_string(&mut buf)
      .context("reading stdin")?;
    buf
  } else {
    std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?
  };

  if raw.trim_start().starts_with('[') {
    return serde_json::from_str(&raw).with_context(|| format!("parsing {}", file.display()));
  }
  raw
    .lines()
    .enumerate()
    .filter(|(_, line)| !line.trim().is_empty())
    .map(|(i, line)| {
      serde_json::from_str(line).with_context(|| format!("parsing {} line {}", file.display(), i + 1))
    })
    .collect()
}

fn print_report(report: &BatchReport) {
  println!("processed {} occurrence(s)", report.processed);
  println!(
    "  {} new field(s), {} matched, {} new synonym(s), {} new option(s)",
    report.created.len(),
    report.matched.len(),
    report.new_synonyms,
    report.new_options
  );
  for field in &report.created {
    println!("  + {}", field.canonical_name);
  }
  for skipped in &report.skipped {
    println!("  skipped {:?} ({}): {}", skipped.raw_text, skipped.source_document_id, skipped.reason);
  }
  for flagged in &report.flagged {
    println!("  flagged {:?} ({}): {}", flagged.raw_text, flagged.source_document_id, flagged.reason);
  }
  for document in &report.skipped_documents {
    println!("  document {document} exceeded its processing budget");
  }
}
