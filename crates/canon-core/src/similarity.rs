//! Lexical similarity between normalized keys.
//!
//! The score is the Indel ratio from [`rapidfuzz`] over the whitespace tokens
//! of both keys sorted alphabetically, so word order does not matter:
//! `"name of plaintiff"` and `"plaintiff name"` score about 90.

use rapidfuzz::fuzz;

/// An existing canonical field as seen by the scorer.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
  pub canonical_name: &'a str,
  /// The normalized key the field was created from.
  pub key:            &'a str,
}

/// The best candidate for a key and its score.
#[derive(Debug, Clone, PartialEq)]
pub struct BestMatch<'a> {
  pub canonical_name: &'a str,
  pub score:          f64,
}

/// Token-order-insensitive similarity in `[0, 100]`.
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
  ratio(&sorted_tokens(a), &sorted_tokens(b))
}

/// Score `key` against every candidate and return the best one.
///
/// Equal best scores resolve to the lexicographically smallest canonical name,
/// so the result does not depend on the order candidates are supplied in.
pub fn best_match<'a, I>(key: &str, candidates: I) -> Option<BestMatch<'a>>
where
  I: IntoIterator<Item = Candidate<'a>>,
{
  let key = sorted_tokens(key);
  candidates
    .into_iter()
    .map(|c| BestMatch {
      canonical_name: c.canonical_name,
      score:          ratio(&key, &sorted_tokens(c.key)),
    })
    .min_by(|a, b| {
      b.score
        .total_cmp(&a.score)
        .then_with(|| a.canonical_name.cmp(b.canonical_name))
    })
}

fn sorted_tokens(s: &str) -> String {
  let mut tokens: Vec<&str> = s.split_whitespace().collect();
  tokens.sort_unstable();
  tokens.join(" ")
}

/// Indel ratio scaled to `[0, 100]`.
fn ratio(a: &str, b: &str) -> f64 {
  if a.is_empty() && b.is_empty() {
    return 100.0;
  }
  100.0 * fuzz::ratio(a.chars(), b.chars())
}
