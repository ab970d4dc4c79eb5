//! Integration tests for `SqliteStore`, alone and under the full pipeline,
//! against an in-memory database.

use std::{sync::Arc, time::Duration};

use canon_core::{
  Error as CoreError,
  config::EngineConfig,
  field::{DataType, FieldUpdate, NewField, RawOccurrence},
  pipeline::{Canonicalizer, ColumnStatus},
  registry::MatchKind,
  schema::NamingConflict,
  semantic::{AlwaysAccept, Embedder, SemanticValidator, Validator, Verdict},
  store::{
    AddColumn, ColumnActuator, ColumnClaim, FieldInsert, FieldStore,
    NewOccurrence, NewSynonym,
  },
};
use uuid::Uuid;

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

type Engine<V> = Canonicalizer<SqliteStore, SqliteStore, V>;

async fn engine_with<V: SemanticValidator>(
  validator: V,
  config: EngineConfig,
) -> (Arc<SqliteStore>, Engine<V>) {
  let store = Arc::new(store().await);
  let engine =
    Canonicalizer::new(Arc::clone(&store), Arc::clone(&store), validator, &config)
      .expect("valid config");
  (store, engine)
}

async fn engine() -> (Arc<SqliteStore>, Engine<AlwaysAccept>) {
  engine_with(AlwaysAccept, EngineConfig::default()).await
}

fn new_field(name: &str, key: &str) -> NewField {
  NewField {
    id:             Uuid::new_v4(),
    canonical_name: name.to_owned(),
    normalized_key: key.to_owned(),
    data_type:      DataType::Text,
    tooltip:        None,
  }
}

/// Embeds by keyword: anything mentioning "death" sits at cosine 0.4 from
/// everything else.
struct KeywordEmbedder;

impl Embedder for KeywordEmbedder {
  async fn embed(&self, texts: &[String]) -> canon_core::Result<Vec<Vec<f32>>> {
    Ok(
      texts
        .iter()
        .map(|t| {
          if t.contains("death") { vec![0.4, 0.916_515_1] } else { vec![1.0, 0.0] }
        })
        .collect(),
    )
  }
}

/// Accepts every candidate, eventually.
struct SlowValidator(Duration);

impl SemanticValidator for SlowValidator {
  async fn validate(
    &self,
    _raw_text: &str,
    _candidate: &canon_core::field::CanonicalField,
  ) -> Verdict {
    tokio::time::sleep(self.0).await;
    Verdict::Accept { similarity: None }
  }
}

// ─── Fields ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn insert_and_get_field() {
  let s = store().await;
  let input = new_field("name_of_plaintiff", "name of plaintiff");
  let id = input.id;

  let FieldInsert::Created(created) = s.insert_field(input).await.unwrap() else {
    panic!("expected a new field");
  };
  assert_eq!(created.id, id);

  let fetched = s.get_field(id).await.unwrap().unwrap();
  assert_eq!(fetched, created);
  assert_eq!(s.find_by_name("name_of_plaintiff").await.unwrap(), Some(created.clone()));
  assert_eq!(s.find_by_key("name of plaintiff").await.unwrap(), Some(created));
}

#[tokio::test]
async fn get_field_missing_returns_none() {
  let s = store().await;
  assert!(s.get_field(Uuid::new_v4()).await.unwrap().is_none());
  assert!(s.find_by_key("nothing here").await.unwrap().is_none());
}

#[tokio::test]
async fn duplicate_key_reports_the_holder() {
  let s = store().await;
  let FieldInsert::Created(first) = s.insert_field(new_field("case", "case")).await.unwrap() else {
    panic!("expected a new field");
  };

  match s.insert_field(new_field("case_2", "case")).await.unwrap() {
    FieldInsert::KeyTaken(holder) => assert_eq!(holder.id, first.id),
    other => panic!("expected KeyTaken, got {other:?}"),
  }
}

#[tokio::test]
async fn duplicate_name_reports_the_holder() {
  let s = store().await;
  let FieldInsert::Created(first) = s.insert_field(new_field("case", "case")).await.unwrap() else {
    panic!("expected a new field");
  };

  match s.insert_field(new_field("case", "case.")).await.unwrap() {
    FieldInsert::NameTaken(holder) => assert_eq!(holder.id, first.id),
    other => panic!("expected NameTaken, got {other:?}"),
  }
  assert_eq!(s.list_fields().await.unwrap().len(), 1);
}

#[tokio::test]
async fn list_fields_is_ordered_by_name() {
  let s = store().await;
  for name in ["zip_code", "address", "name"] {
    s.insert_field(new_field(name, &name.replace('_', " "))).await.unwrap();
  }
  let names: Vec<String> = s
    .list_fields()
    .await
    .unwrap()
    .into_iter()
    .map(|f| f.canonical_name)
    .collect();
  assert_eq!(names, ["address", "name", "zip_code"]);
}

#[tokio::test]
async fn update_field_changes_only_given_values() {
  let s = store().await;
  let mut input = new_field("hearing_date", "hearing date");
  input.tooltip = Some("Enter the hearing date".into());
  let id = input.id;
  s.insert_field(input).await.unwrap();

  let updated = s
    .update_field(id, FieldUpdate { data_type: Some(DataType::Date), tooltip: None })
    .await
    .unwrap()
    .unwrap();
  assert_eq!(updated.data_type, DataType::Date);
  assert_eq!(updated.tooltip.as_deref(), Some("Enter the hearing date"));
  assert_eq!(updated.canonical_name, "hearing_date");

  let missing = s.update_field(Uuid::new_v4(), FieldUpdate::default()).await.unwrap();
  assert!(missing.is_none());
}

// ─── Synonyms & options ──────────────────────────────────────────────────────

#[tokio::test]
async fn synonyms_are_unique_per_field_and_text() {
  let s = store().await;
  let input = new_field("name_of_plaintiff", "name of plaintiff");
  let id = input.id;
  s.insert_field(input).await.unwrap();

  let synonym = |raw: &str, doc: &str| NewSynonym {
    canonical_field_id: id,
    raw_text:           raw.to_owned(),
    normalized_key:     "plaintiff name".to_owned(),
    source_document_id: doc.to_owned(),
  };
  assert!(s.add_synonym(synonym("{plaintiff name}", "doc-1")).await.unwrap());
  assert!(!s.add_synonym(synonym("{plaintiff name}", "doc-2")).await.unwrap());

  let synonyms = s.list_synonyms(id).await.unwrap();
  assert_eq!(synonyms.len(), 1);
  assert_eq!(synonyms[0].source_document_id, "doc-1");
}

#[tokio::test]
async fn synonym_keys_resolve_to_their_field() {
  let s = store().await;
  let input = new_field("name_of_plaintiff", "name of plaintiff");
  let id = input.id;
  s.insert_field(input).await.unwrap();
  s.add_synonym(NewSynonym {
    canonical_field_id: id,
    raw_text:           "{plaintiff name}".into(),
    normalized_key:     "plaintiff name".into(),
    source_document_id: "doc-1".into(),
  })
  .await
  .unwrap();

  let found = s.find_by_key("plaintiff name").await.unwrap().unwrap();
  assert_eq!(found.id, id);
}

#[tokio::test]
async fn options_append_in_first_seen_order() {
  let s = store().await;
  let input = new_field("ruling", "ruling");
  let id = input.id;
  s.insert_field(input).await.unwrap();

  let first = ["Granted", "Denied"].map(String::from);
  let second = ["Denied", "Moot", "Moot"].map(String::from);
  assert_eq!(s.add_options(id, &first).await.unwrap(), 2);
  assert_eq!(s.add_options(id, &second).await.unwrap(), 1);
  assert_eq!(s.add_options(id, &first).await.unwrap(), 0);

  let options: Vec<(String, u32)> = s
    .list_options(id)
    .await
    .unwrap()
    .into_iter()
    .map(|o| (o.option_value, o.display_order))
    .collect();
  assert_eq!(
    options,
    [("Granted".to_owned(), 0), ("Denied".to_owned(), 1), ("Moot".to_owned(), 2)]
  );
}

// ─── Column catalog ──────────────────────────────────────────────────────────

#[tokio::test]
async fn column_names_are_claimed_once() {
  let s = store().await;
  let a = new_field("case_#", "case #");
  let b = new_field("case", "case");
  let (a_id, b_id) = (a.id, b.id);
  s.insert_field(a).await.unwrap();
  s.insert_field(b).await.unwrap();

  assert!(matches!(
    s.claim_column(a_id, "case_field").await.unwrap(),
    ColumnClaim::Claimed(_)
  ));
  match s.claim_column(b_id, "case_field").await.unwrap() {
    ColumnClaim::Taken(holder) => assert_eq!(holder.canonical_field_id, a_id),
    other => panic!("expected Taken, got {other:?}"),
  }
  // Reclaiming by the owner hands back its own row.
  match s.claim_column(a_id, "case_field").await.unwrap() {
    ColumnClaim::Taken(own) => assert_eq!(own.canonical_field_id, a_id),
    other => panic!("expected Taken, got {other:?}"),
  }

  assert_eq!(s.column_owner("case_field").await.unwrap().unwrap().canonical_field_id, a_id);
  assert!(s.get_column(b_id).await.unwrap().is_none());
  assert_eq!(s.list_columns().await.unwrap().len(), 1);
}

#[tokio::test]
async fn conflicts_are_listed_until_the_field_gets_a_column() {
  let s = store().await;
  let a = new_field("case_#", "case #");
  let b = new_field("case", "case");
  let (a_id, b_id) = (a.id, b.id);
  s.insert_field(a).await.unwrap();
  s.insert_field(b).await.unwrap();

  let conflict = NamingConflict {
    canonical_field_id: b_id,
    canonical_name:     "case".into(),
    wanted_column:      "case_field".into(),
    holder_field_id:    a_id,
  };
  s.record_conflict(conflict.clone()).await.unwrap();
  s.record_conflict(conflict.clone()).await.unwrap();
  assert_eq!(s.list_conflicts().await.unwrap(), [conflict]);

  // Resolved by hand with a different name.
  s.claim_column(b_id, "case_short").await.unwrap();
  assert!(s.list_conflicts().await.unwrap().is_empty());
}

#[tokio::test]
async fn physical_columns_converge() {
  let s = store().await;
  assert_eq!(s.add_column("case_field", "INTEGER").await.unwrap(), AddColumn::Added);
  assert_eq!(s.add_column("case_field", "INTEGER").await.unwrap(), AddColumn::AlreadyExists);

  let columns = s.physical_columns().await.unwrap();
  assert_eq!(columns.iter().filter(|c| *c == "case_field").count(), 1);
  assert!(columns.iter().any(|c| c == "form_id"));
}

#[tokio::test]
async fn unsafe_identifiers_never_reach_ddl() {
  let s = store().await;
  let err = s.add_column("x\"; DROP TABLE canonical_fields; --", "TEXT").await.unwrap_err();
  assert!(matches!(err, Error::UnsafeIdentifier(_)));
}

// ─── Usage ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn occurrence_counts_track_distinct_pairs() {
  let s = store().await;
  let input = new_field("name_of_plaintiff", "name of plaintiff");
  let id = input.id;
  s.insert_field(input).await.unwrap();

  let occurrence = |raw: &str| NewOccurrence {
    form_id:             "form-1".into(),
    canonical_field_id:  id,
    raw_text:            raw.to_owned(),
    paragraph_group_ref: None,
  };
  assert_eq!(s.record_occurrence(occurrence("{name of plaintiff}")).await.unwrap().occurrence_count, 1);
  assert_eq!(s.record_occurrence(occurrence("{plaintiff name}")).await.unwrap().occurrence_count, 1);
  assert_eq!(s.record_occurrence(occurrence("{plaintiff name}")).await.unwrap().occurrence_count, 1);

  assert_eq!(s.list_associations(Some(id)).await.unwrap().len(), 1);
  assert!(s.list_associations(Some(Uuid::new_v4())).await.unwrap().is_empty());
  assert_eq!(s.list_associations(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn reopening_a_file_keeps_everything() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("canon.db");

  let id = {
    let s = SqliteStore::open(&path).await.unwrap();
    let input = new_field("hearing_date", "hearing date");
    let id = input.id;
    s.insert_field(input).await.unwrap();
    s.add_column("hearing_date", "DATE").await.unwrap();
    id
  };

  let s = SqliteStore::open(&path).await.unwrap();
  assert_eq!(s.get_field(id).await.unwrap().unwrap().canonical_name, "hearing_date");
  assert!(s.physical_columns().await.unwrap().contains(&"hearing_date".to_owned()));
}

// ─── Pipeline scenarios ──────────────────────────────────────────────────────

#[tokio::test]
async fn equivalent_spellings_share_one_field() {
  let (s, engine) = engine().await;
  let report = engine
    .run([
      RawOccurrence::new("{name of plaintiff}", "form-1"),
      RawOccurrence::new("{plaintiff name}", "form-2"),
    ])
    .await
    .unwrap();

  assert_eq!(report.processed, 2);
  assert_eq!(report.created.len(), 1);
  assert_eq!(report.new_synonyms, 2);

  let fields = s.list_fields().await.unwrap();
  assert_eq!(fields.len(), 1);
  let field = &fields[0];
  assert_eq!(field.canonical_name, "name_of_plaintiff");
  assert_eq!(field.tooltip.as_deref(), Some("Enter the name of plaintiff"));

  let synonyms: Vec<String> = s
    .list_synonyms(field.id)
    .await
    .unwrap()
    .into_iter()
    .map(|syn| syn.raw_text)
    .collect();
  assert_eq!(synonyms, ["{name of plaintiff}", "{plaintiff name}"]);

  let columns = s.list_columns().await.unwrap();
  assert_eq!(columns.len(), 1);
  assert_eq!(columns[0].column_name, "name_of_plaintiff");

  let associations = s.list_associations(Some(field.id)).await.unwrap();
  let forms: Vec<&str> = associations.iter().map(|a| a.form_id.as_str()).collect();
  assert_eq!(forms, ["form-1", "form-2"]);
}

#[tokio::test]
async fn two_spellings_in_one_form_count_once() {
  let (s, engine) = engine().await;
  engine
    .run([
      RawOccurrence::new("{name of plaintiff}", "form-x"),
      RawOccurrence::new("{plaintiff name}", "form-x"),
    ])
    .await
    .unwrap();

  let fields = s.list_fields().await.unwrap();
  assert_eq!(fields.len(), 1);
  let associations = s.list_associations(Some(fields[0].id)).await.unwrap();
  assert_eq!(associations.len(), 1);
  assert_eq!(associations[0].form_id, "form-x");
  assert_eq!(associations[0].occurrence_count, 1);

  // Both spellings are still kept as synonyms.
  assert_eq!(s.list_synonyms(fields[0].id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn options_make_a_boolean_field() {
  let (s, engine) = engine().await;
  let outcome = engine
    .process(&RawOccurrence::new("{Yes|No|N/A}", "form-1").with_options(["Yes", "No", "N/A"]))
    .await
    .unwrap();

  let field = &outcome.resolution.field;
  assert_eq!(field.canonical_name, "yes_no_n_a");
  assert_eq!(field.data_type, DataType::Boolean);
  assert_eq!(outcome.new_options, 3);

  let options: Vec<(String, u32)> = s
    .list_options(field.id)
    .await
    .unwrap()
    .into_iter()
    .map(|o| (o.option_value, o.display_order))
    .collect();
  assert_eq!(
    options,
    [("Yes".to_owned(), 0), ("No".to_owned(), 1), ("N/A".to_owned(), 2)]
  );

  let ColumnStatus::Ready(column) = &outcome.column else {
    panic!("expected a column");
  };
  assert_eq!(column.column_name, "yes_no_n_a");
}

// Token-sort scores "date of birth" against "date of death" at about 61.5, so
// the lookalike pair only reaches the validator below the default threshold.
fn loose_config(semantic: bool) -> EngineConfig {
  EngineConfig {
    fuzzy_threshold: 60,
    semantic_enabled: semantic,
    ..EngineConfig::default()
  }
}

#[tokio::test]
async fn semantic_veto_keeps_lookalikes_apart() {
  let config = loose_config(true);
  let validator = Validator::select(&config, Some(KeywordEmbedder)).await;
  assert!(validator.is_semantic());
  let (s, engine) = engine_with(validator, config).await;

  engine.process(&RawOccurrence::new("{date of birth}", "form-1")).await.unwrap();
  let outcome = engine
    .process(&RawOccurrence::new("{date of death}", "form-1"))
    .await
    .unwrap();

  assert_eq!(
    outcome.resolution.kind,
    MatchKind::Created { vetoed: Some("date_of_birth".into()) }
  );
  let names: Vec<String> = s
    .list_fields()
    .await
    .unwrap()
    .into_iter()
    .map(|f| f.canonical_name)
    .collect();
  assert_eq!(names, ["date_of_birth", "date_of_death"]);
  assert_eq!(s.list_columns().await.unwrap().len(), 2);
}

#[tokio::test]
async fn lexical_only_merges_lookalikes() {
  let config = loose_config(false);
  let validator = Validator::<KeywordEmbedder>::select(&config, Some(KeywordEmbedder)).await;
  assert!(!validator.is_semantic());
  let (s, engine) = engine_with(validator, config).await;

  engine.process(&RawOccurrence::new("{date of birth}", "form-1")).await.unwrap();
  let outcome = engine
    .process(&RawOccurrence::new("{date of death}", "form-1"))
    .await
    .unwrap();

  assert!(matches!(outcome.resolution.kind, MatchKind::Fuzzy { .. }));
  assert_eq!(s.list_fields().await.unwrap().len(), 1);
}

#[tokio::test]
async fn taken_names_get_suffixes_until_exhausted() {
  let config = EngineConfig { max_name_suffix: 2, ..EngineConfig::default() };
  let (s, engine) = engine_with(AlwaysAccept, config).await;
  let report = engine
    .run([
      RawOccurrence::new("{日付}", "form-1"),
      RawOccurrence::new("{名前}", "form-1"),
      RawOccurrence::new("{住所}", "form-1"),
      RawOccurrence::new("{judge}", "form-1"),
    ])
    .await
    .unwrap();

  let names: Vec<&str> = report.created.iter().map(|f| f.canonical_name.as_str()).collect();
  assert_eq!(names, ["field", "field_2", "judge"]);
  assert_eq!(report.processed, 3);
  assert!(report.skipped.is_empty());

  assert_eq!(report.flagged.len(), 1);
  assert_eq!(report.flagged[0].raw_text, "{住所}");
  assert_eq!(report.flagged[0].canonical_name, None);

  let keys: Vec<String> = s
    .list_fields()
    .await
    .unwrap()
    .into_iter()
    .map(|f| f.normalized_key)
    .collect();
  assert_eq!(keys, ["日付", "名前", "judge"]);
}

#[tokio::test]
async fn column_name_clash_is_deferred_not_fatal() {
  let (s, engine) = engine().await;
  let report = engine
    .run([
      RawOccurrence::new("{Case #}", "form-1"),
      RawOccurrence::new("{Case!}", "form-2"),
    ])
    .await
    .unwrap();

  let names: Vec<&str> = report.created.iter().map(|f| f.canonical_name.as_str()).collect();
  assert_eq!(names, ["case_#", "case"]);
  assert_eq!(report.flagged.len(), 1);
  assert_eq!(report.flagged[0].canonical_name.as_deref(), Some("case"));

  let columns = s.list_columns().await.unwrap();
  assert_eq!(columns.len(), 1);
  assert_eq!(columns[0].column_name, "case_field");
  assert_eq!(columns[0].canonical_field_id, report.created[0].id);

  let conflicts = s.list_conflicts().await.unwrap();
  assert_eq!(conflicts.len(), 1);
  assert_eq!(conflicts[0].canonical_field_id, report.created[1].id);
  assert_eq!(conflicts[0].holder_field_id, report.created[0].id);

  // Both fields are still recorded against their forms.
  assert_eq!(s.list_associations(None).await.unwrap().len(), 2);

  let physical = s.physical_columns().await.unwrap();
  assert_eq!(physical.iter().filter(|c| *c == "case_field").count(), 1);
}

#[tokio::test]
async fn reprocessing_a_batch_changes_nothing() {
  let (s, engine) = engine().await;
  let batch = vec![
    RawOccurrence::new("{name of plaintiff}", "form-1"),
    RawOccurrence::new("{plaintiff name}", "form-1"),
    RawOccurrence::new("{Ruling}", "form-1").with_options(["Granted", "Denied"]),
    RawOccurrence::new("{Case #}", "form-2"),
    RawOccurrence::new("{Case!}", "form-2"),
  ];

  engine.run(batch.clone()).await.unwrap();

  let fields = s.list_fields().await.unwrap();
  let mut synonyms = Vec::new();
  let mut options = Vec::new();
  for field in &fields {
    synonyms.extend(s.list_synonyms(field.id).await.unwrap());
    options.extend(s.list_options(field.id).await.unwrap());
  }
  let columns = s.list_columns().await.unwrap();
  let associations = s.list_associations(None).await.unwrap();
  let physical = s.physical_columns().await.unwrap();

  let report = engine.run(batch).await.unwrap();
  assert!(report.created.is_empty());
  assert_eq!(report.new_synonyms, 0);
  assert_eq!(report.new_options, 0);

  let fields_again = s.list_fields().await.unwrap();
  let mut synonyms_again = Vec::new();
  let mut options_again = Vec::new();
  for field in &fields_again {
    synonyms_again.extend(s.list_synonyms(field.id).await.unwrap());
    options_again.extend(s.list_options(field.id).await.unwrap());
  }
  assert_eq!(fields_again, fields);
  assert_eq!(synonyms_again, synonyms);
  assert_eq!(options_again, options);
  assert_eq!(s.list_columns().await.unwrap(), columns);
  assert_eq!(s.list_associations(None).await.unwrap(), associations);
  assert_eq!(s.physical_columns().await.unwrap(), physical);
}

#[tokio::test]
async fn normalization_equivalents_resolve_exactly() {
  let (s, engine) = engine().await;
  let first = engine
    .process(&RawOccurrence::new("{Plaintiff's Name}", "form-1"))
    .await
    .unwrap();
  for raw in ["{PLAINTIFFS NAME}", "[plaintiffs  name]", "{The Plaintiff's Name}"] {
    let outcome = engine.process(&RawOccurrence::new(raw, "form-2")).await.unwrap();
    assert_eq!(outcome.resolution.kind, MatchKind::Exact, "{raw}");
    assert_eq!(outcome.resolution.field.id, first.resolution.field.id);
  }
  assert_eq!(s.list_fields().await.unwrap().len(), 1);
}

#[tokio::test]
async fn fuzzy_attached_spellings_stay_put() {
  let (_s, engine) = engine().await;
  let created = engine
    .process(&RawOccurrence::new("{name of plaintiff}", "form-1"))
    .await
    .unwrap();
  let fuzzy = engine
    .process(&RawOccurrence::new("{plaintiff name}", "form-2"))
    .await
    .unwrap();
  assert!(matches!(fuzzy.resolution.kind, MatchKind::Fuzzy { .. }));

  // Once attached, the same key never needs scoring again.
  let again = engine
    .process(&RawOccurrence::new("{Plaintiff Name}", "form-3"))
    .await
    .unwrap();
  assert_eq!(again.resolution.kind, MatchKind::Exact);
  assert_eq!(again.resolution.field.id, created.resolution.field.id);
}

#[tokio::test]
async fn columns_only_ever_grow() {
  let (s, engine) = engine().await;
  let mut seen: Vec<String> = Vec::new();

  for (i, raw) in ["{hearing date}", "{judge}", "{county}", "{hearing date}"].iter().enumerate() {
    engine
      .process(&RawOccurrence::new(*raw, format!("form-{i}")))
      .await
      .unwrap();
    let now: Vec<String> = s
      .list_columns()
      .await
      .unwrap()
      .into_iter()
      .map(|c| c.column_name)
      .collect();
    assert!(now.starts_with(&seen), "{now:?} does not extend {seen:?}");
    seen = now;
  }
  assert_eq!(seen, ["hearing_date", "judge", "county"]);
}

#[tokio::test]
async fn manual_edits_survive_reprocessing() {
  let (s, engine) = engine().await;
  let occurrence = RawOccurrence::new("{hearing}", "form-1");
  let outcome = engine.process(&occurrence).await.unwrap();
  let id = outcome.resolution.field.id;

  engine
    .registry()
    .update(id, FieldUpdate {
      data_type: Some(DataType::Date),
      tooltip:   Some("Date of the first hearing".into()),
    })
    .await
    .unwrap();

  engine.process(&occurrence).await.unwrap();
  engine
    .process(&RawOccurrence::new("{Hearing}", "form-2").with_options(["Morning", "Afternoon"]))
    .await
    .unwrap();

  let field = s.get_field(id).await.unwrap().unwrap();
  assert_eq!(field.data_type, DataType::Date);
  assert_eq!(field.tooltip.as_deref(), Some("Date of the first hearing"));
  assert_eq!(field.canonical_name, "hearing");
}

#[tokio::test]
async fn updating_an_unknown_field_fails() {
  let (_s, engine) = engine().await;
  let err = engine
    .registry()
    .update(Uuid::new_v4(), FieldUpdate::default())
    .await
    .unwrap_err();
  assert!(matches!(err, CoreError::FieldNotFound(_)));
}

#[tokio::test]
async fn concurrent_engines_create_one_field() {
  let s = Arc::new(store().await);
  let config = EngineConfig::default();
  let a = Canonicalizer::new(Arc::clone(&s), Arc::clone(&s), AlwaysAccept, &config).unwrap();
  let b = Canonicalizer::new(Arc::clone(&s), Arc::clone(&s), AlwaysAccept, &config).unwrap();

  let first = RawOccurrence::new("{Name of Plaintiff}", "form-1");
  let second = RawOccurrence::new("{name of plaintiff}", "form-2");
  let (x, y) = tokio::join!(a.process(&first), b.process(&second));
  let (x, y) = (x.unwrap(), y.unwrap());

  assert_eq!(x.resolution.field.id, y.resolution.field.id);
  assert_eq!(s.list_fields().await.unwrap().len(), 1);
  assert_eq!(s.list_columns().await.unwrap().len(), 1);
  let physical = s.physical_columns().await.unwrap();
  assert_eq!(physical.iter().filter(|c| *c == "name_of_plaintiff").count(), 1);
}

#[tokio::test]
async fn existing_physical_column_is_adopted() {
  let (s, engine) = engine().await;
  s.add_column("name_of_plaintiff", "TEXT").await.unwrap();

  let outcome = engine
    .process(&RawOccurrence::new("{name of plaintiff}", "form-1"))
    .await
    .unwrap();
  let ColumnStatus::Ready(column) = outcome.column else {
    panic!("expected a column");
  };
  assert_eq!(column.column_name, "name_of_plaintiff");
  let physical = s.physical_columns().await.unwrap();
  assert_eq!(physical.iter().filter(|c| *c == "name_of_plaintiff").count(), 1);
}

#[tokio::test]
async fn invalid_placeholders_are_skipped() {
  let (s, engine) = engine().await;
  let report = engine
    .run([
      RawOccurrence::new("{___}", "form-1"),
      RawOccurrence::new("{  }", "form-1"),
      RawOccurrence::new("{plaintiff name}", "form-1"),
    ])
    .await
    .unwrap();

  assert_eq!(report.processed, 1);
  assert_eq!(report.skipped.len(), 2);
  assert_eq!(s.list_fields().await.unwrap().len(), 1);

  let err = engine
    .process(&RawOccurrence::new("{___}", "form-1"))
    .await
    .unwrap_err();
  assert!(matches!(err, CoreError::InvalidPlaceholder { .. }));
}

#[tokio::test]
async fn slow_documents_are_abandoned() {
  let config = EngineConfig { document_budget_secs: 1, ..EngineConfig::default() };
  let (s, engine) = engine_with(SlowValidator(Duration::from_secs(30)), config).await;

  let report = engine
    .run([
      RawOccurrence::new("{name of plaintiff}", "slow"),
      RawOccurrence::new("{plaintiff name}", "slow"),
      RawOccurrence::new("{judge}", "fast"),
    ])
    .await
    .unwrap();

  assert_eq!(report.skipped_documents, ["slow"]);
  assert_eq!(report.processed, 2);
  assert!(s.find_by_name("judge").await.unwrap().is_some());
}
