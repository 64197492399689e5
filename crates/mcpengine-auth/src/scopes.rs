//! Scope parsing and subset checks.

use std::collections::BTreeSet;

/// Parse an OAuth `scope` claim (space-delimited) into a set.
pub fn parse_scopes(claim: &str) -> BTreeSet<String> {
    claim
        .split(' ')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Scopes in `required` that are not in `granted`.
pub fn missing_scopes(required: &BTreeSet<String>, granted: &BTreeSet<String>) -> BTreeSet<String> {
    required.difference(granted).cloned().collect()
}

/// Space-joined rendering used in challenges and error messages.
pub fn join_scopes<'a>(scopes: impl IntoIterator<Item = &'a String>) -> String {
    scopes
        .into_iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ")
}
