//! Text and list coarsening helpers shared by the domain generalizers.

use chrono::{Datelike, NaiveDate};
use std::collections::HashSet;

/// Lower-case, collapse whitespace runs to `_`, and truncate to `max_len`
/// characters. Returns `None` when nothing is left.
pub fn normalize_text(raw: &str, max_len: usize) -> Option<String> {
    let joined = raw
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join("_");

    let truncated: String = joined.chars().take(max_len).collect();
    let truncated = truncated.trim_end_matches('_').to_string();

    if truncated.is_empty() {
        None
    } else {
        Some(truncated)
    }
}

/// `YYYY-Qn` for a calendar date.
pub fn quarter_of(date: NaiveDate) -> String {
    format!("{}-Q{}", date.year(), date.month0() / 3 + 1)
}

/// Trim vocabulary terms, drop blanks and repeats, keep the first
/// `max_len` in input order.
pub fn capped_vocabulary<I, S>(terms: I, max_len: usize) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for term in terms {
        if out.len() >= max_len {
            break;
        }
        let term = term.as_ref().trim();
        if term.is_empty() {
            continue;
        }
        if seen.insert(term.to_string()) {
            out.push(term.to_string());
        }
    }

    out
}
