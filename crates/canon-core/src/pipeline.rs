//! The canonicalization pipeline: drives each occurrence through the
//! registry and the schema manager and aggregates a batch report.

use std::{sync::Arc, time::Duration};

use serde::Serialize;
use uuid::Uuid;

use crate::{
  Error, Result,
  config::EngineConfig,
  field::{FormFieldAssociation, RawOccurrence},
  infer::infer_data_type,
  registry::{MatchKind, Registry, Resolution},
  schema::{ColumnRules, NamingConflict, SchemaColumn, SchemaManager},
  semantic::SemanticValidator,
  store::{ColumnActuator, FieldStore, NewOccurrence},
};

// ─── Outcomes ────────────────────────────────────────────────────────────────

/// Column state of a field after an occurrence was processed.
#[derive(Debug, Clone)]
pub enum ColumnStatus {
  Ready(SchemaColumn),
  /// Deferred until a naming conflict is resolved by hand.
  Pending(NamingConflict),
}

/// Everything that happened to one occurrence.
#[derive(Debug, Clone)]
pub struct OccurrenceOutcome {
  pub resolution:  Resolution,
  pub new_options: usize,
  pub column:      ColumnStatus,
  pub association: FormFieldAssociation,
}

/// A field mentioned in a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldRef {
  pub id:             Uuid,
  pub canonical_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedOccurrence {
  pub raw_text:           String,
  pub source_document_id: String,
  pub reason:             String,
}

/// An occurrence that was processed but needs a human.
#[derive(Debug, Clone, Serialize)]
pub struct FlaggedOccurrence {
  pub raw_text:           String,
  pub source_document_id: String,
  pub canonical_name:     Option<String>,
  pub reason:             String,
}

/// Summary of one batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
  pub processed:         usize,
  /// Fields created by this batch, in creation order.
  pub created:           Vec<FieldRef>,
  /// Pre-existing fields this batch matched, in first-match order.
  pub matched:           Vec<FieldRef>,
  pub new_synonyms:      usize,
  pub new_options:       usize,
  pub skipped:           Vec<SkippedOccurrence>,
  pub flagged:           Vec<FlaggedOccurrence>,
  /// Documents abandoned after exceeding the processing budget.
  pub skipped_documents: Vec<String>,
}

impl BatchReport {
  fn record(&mut self, occurrence: &RawOccurrence, outcome: &OccurrenceOutcome) {
    self.processed += 1;
    let field = &outcome.resolution.field;
    let field_ref = FieldRef {
      id:             field.id,
      canonical_name: field.canonical_name.clone(),
    };

    if outcome.resolution.created() {
      self.created.push(field_ref);
    } else if !self.created.iter().chain(&self.matched).any(|f| f.id == field.id) {
      self.matched.push(field_ref);
    }
    if outcome.resolution.new_synonym {
      self.new_synonyms += 1;
    }
    self.new_options += outcome.new_options;

    if let ColumnStatus::Pending(conflict) = &outcome.column {
      self.flagged.push(FlaggedOccurrence {
        raw_text:           occurrence.raw_text.clone(),
        source_document_id: occurrence.source_document_id.clone(),
        canonical_name:     Some(field.canonical_name.clone()),
        reason:             Error::SchemaNamingConflict(conflict.clone()).to_string(),
      });
    }
  }

  fn skip(&mut self, occurrence: &RawOccurrence, err: &Error) {
    self.skipped.push(SkippedOccurrence {
      raw_text:           occurrence.raw_text.clone(),
      source_document_id: occurrence.source_document_id.clone(),
      reason:             err.to_string(),
    });
  }

  fn flag(&mut self, occurrence: &RawOccurrence, err: &Error) {
    self.flagged.push(FlaggedOccurrence {
      raw_text:           occurrence.raw_text.clone(),
      source_document_id: occurrence.source_document_id.clone(),
      canonical_name:     None,
      reason:             err.to_string(),
    });
  }
}

// ─── Canonicalizer ───────────────────────────────────────────────────────────

/// Runs the per-occurrence pipeline: normalize, resolve or create, attach
/// options, ensure a column, record the form association.
pub struct Canonicalizer<S, A, V> {
  store:           Arc<S>,
  registry:        Registry<S, V>,
  schema:          SchemaManager<S, A>,
  document_budget: Option<Duration>,
}

impl<S, A, V> Canonicalizer<S, A, V>
where
  S: FieldStore,
  A: ColumnActuator,
  V: SemanticValidator,
{
  pub fn new(
    store: Arc<S>,
    actuator: Arc<A>,
    validator: V,
    config: &EngineConfig,
  ) -> Result<Self> {
    config.validate()?;
    let budget = config.document_budget();
    Ok(Self {
      registry:        Registry::new(Arc::clone(&store), validator, config),
      schema:          SchemaManager::new(
        Arc::clone(&store),
        actuator,
        ColumnRules::from_config(config),
      ),
      store,
      document_budget: (!budget.is_zero()).then_some(budget),
    })
  }

  pub fn registry(&self) -> &Registry<S, V> { &self.registry }

  /// Process a single occurrence.
  ///
  /// A naming conflict on the column is not an error here: the field and its
  /// association are still recorded and the column is reported as pending.
  pub async fn process(&self, occurrence: &RawOccurrence) -> Result<OccurrenceOutcome> {
    let hint = infer_data_type(&occurrence.raw_text, &occurrence.detected_options);
    let resolution = self
      .registry
      .resolve_or_create(&occurrence.raw_text, &occurrence.source_document_id, hint)
      .await?;
    let field = &resolution.field;

    let new_options = if occurrence.detected_options.is_empty() {
      0
    } else {
      self
        .store
        .add_options(field.id, &occurrence.detected_options)
        .await
        .map_err(Error::store)?
    };

    let column = match self.schema.ensure_column(field).await {
      Ok(column) => ColumnStatus::Ready(column),
      Err(Error::SchemaNamingConflict(conflict)) => ColumnStatus::Pending(conflict),
      Err(e) => return Err(e),
    };

    let association = self
      .store
      .record_occurrence(NewOccurrence {
        form_id:             occurrence.source_document_id.clone(),
        canonical_field_id:  field.id,
        raw_text:            occurrence.raw_text.clone(),
        paragraph_group_ref: occurrence.paragraph_group_ref.clone(),
      })
      .await
      .map_err(Error::store)?;

    match &resolution.kind {
      MatchKind::Created { vetoed: Some(candidate) } => tracing::debug!(
        raw_text = %occurrence.raw_text,
        field = %field.canonical_name,
        vetoed = %candidate,
        "created field after semantic veto"
      ),
      kind => tracing::debug!(
        raw_text = %occurrence.raw_text,
        field = %field.canonical_name,
        ?kind,
        "resolved occurrence"
      ),
    }

    Ok(OccurrenceOutcome { resolution, new_options, column, association })
  }

  /// Process a batch in the order given.
  ///
  /// Occurrence-level failures are recorded in the report and the batch goes
  /// on. A store failure aborts the batch; everything committed before it
  /// stays, and rerunning the whole batch is safe.
  ///
  /// Consecutive occurrences from the same document share one processing
  /// budget. A document that overruns it is abandoned and reported.
  pub async fn run<I>(&self, occurrences: I) -> Result<BatchReport>
  where
    I: IntoIterator<Item = RawOccurrence>,
  {
    let mut report = BatchReport::default();
    let occurrences: Vec<RawOccurrence> = occurrences.into_iter().collect();

    for document in occurrences.chunk_by(|a, b| a.source_document_id == b.source_document_id) {
      let document_id = &document[0].source_document_id;
      let work = self.run_document(document, &mut report);
      let outcome = match self.document_budget {
        Some(budget) => tokio::time::timeout(budget, work).await,
        None => Ok(work.await),
      };
      match outcome {
        Ok(result) => result?,
        Err(_) => {
          tracing::warn!(
            document = %document_id,
            budget_secs = self.document_budget.map(|d| d.as_secs()),
            "document exceeded processing budget, skipping the rest of it"
          );
          report.skipped_documents.push(document_id.clone());
        }
      }
    }

    tracing::info!(
      processed = report.processed,
      created = report.created.len(),
      matched = report.matched.len(),
      skipped = report.skipped.len(),
      flagged = report.flagged.len(),
      "batch complete"
    );
    Ok(report)
  }

  async fn run_document(
    &self,
    document: &[RawOccurrence],
    report: &mut BatchReport,
  ) -> Result<()> {
    for occurrence in document {
      match self.process(occurrence).await {
        Ok(outcome) => report.record(occurrence, &outcome),
        Err(e) if e.is_fatal() => {
          tracing::error!(raw_text = %occurrence.raw_text, "aborting batch: {e}");
          return Err(e);
        }
        Err(e @ Error::NameSpaceExhausted { .. }) => {
          tracing::warn!(raw_text = %occurrence.raw_text, "{e}");
          report.flag(occurrence, &e);
        }
        Err(e) => {
          tracing::warn!(raw_text = %occurrence.raw_text, "skipping occurrence: {e}");
          report.skip(occurrence, &e);
        }
      }
    }
    Ok(())
  }
}
