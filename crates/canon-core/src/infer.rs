//! Data-type inference and generated tooltips for new fields.
//!
//! Only consulted when a field is created. Later admin edits win forever.

use crate::field::DataType;

/// Keyword tables, checked in order; the first hit decides.
const PATTERNS: &[(DataType, &[&str])] = &[
  (DataType::Date, &["date", "day", "month", "year", "time", "when", "dob"]),
  (DataType::Number, &["number", "amount", "quantity", "count", "age", "#", "no.", "num"]),
  (DataType::Email, &["email", "e-mail"]),
  (DataType::Phone, &["phone", "telephone", "mobile", "cell", "fax"]),
  (DataType::Address, &["address", "street", "city", "state", "zip", "county"]),
  (DataType::Currency, &["price", "cost", "fee", "fees", "payment", "dollar", "dollars", "usd", "$"]),
  (DataType::Boolean, &["yes", "no", "true", "false", "check", "checkbox"]),
];

/// Guess the data type of a placeholder from its raw text and options.
///
/// A placeholder carrying options that is not recognisably boolean is a
/// [`DataType::Choice`].
pub fn infer_data_type(raw_text: &str, options: &[String]) -> DataType {
  let lowered = raw_text.to_lowercase();
  let tokens: Vec<&str> = lowered
    .split(|c: char| c.is_whitespace() || "{}[]()|/,;:_\"'".contains(c))
    .filter(|t| !t.is_empty())
    .collect();

  let hit = |words: &[&str]| {
    tokens.iter().any(|t| {
      words
        .iter()
        .any(|w| *t == *w || t.trim_end_matches(['.', '?', '!']) == *w)
    }) || words.iter().any(|w| (*w == "#" || *w == "$") && lowered.contains(*w))
  };

  let inferred = PATTERNS
    .iter()
    .find(|(_, words)| hit(words))
    .map(|(data_type, _)| *data_type)
    .unwrap_or_default();

  if options.is_empty() {
    return inferred;
  }
  match inferred {
    DataType::Boolean => DataType::Boolean,
    _ if options.iter().all(|o| is_boolean_word(o)) => DataType::Boolean,
    _ => DataType::Choice,
  }
}

fn is_boolean_word(option: &str) -> bool {
  matches!(
    option.trim().to_lowercase().as_str(),
    "yes" | "no" | "true" | "false" | "y" | "n" | "n/a" | "na"
  )
}

/// The tooltip a field starts out with.
pub fn default_tooltip(canonical_name: &str) -> String {
  let words: Vec<&str> = canonical_name
    .split('_')
    .filter(|w| !w.is_empty())
    .collect();
  format!("Enter the {}", words.join(" "))
}
