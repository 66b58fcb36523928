//! Deduplicates name/fiscal-code matches into autocomplete suggestions.

use crate::models::{AutocompleteSuggestion, Entity};
use std::collections::HashMap;

/// Inputs shorter than this never reach the index.
pub const MIN_QUERY_CHARS: usize = 2;

pub const DEFAULT_LIMIT: usize = 10;

/// Raw hits fetched per requested suggestion, to survive deduplication.
pub const FETCH_MULTIPLIER: usize = 2;

pub const QUERY_FIELDS: &str = "name,fiscal_code";

pub const INCLUDE_FIELDS: &str = "entity_id,name,fiscal_code,source_system";

/// True when `text` is long enough to be worth a query.
pub fn is_searchable(text: &str) -> bool {
    text.trim().chars().count() >= MIN_QUERY_CHARS
}

pub fn fetch_size(limit: usize) -> usize {
    limit.saturating_mul(FETCH_MULTIPLIER)
}

/// Collapses `records` to one suggestion per fiscal code, first-seen order.
///
/// Later records for a known fiscal code contribute their source label to the
/// comma-joined `source_system`, unless that exact label is already present.
pub fn dedupe_by_fiscal_code(records: Vec<Entity>, limit: usize) -> Vec<AutocompleteSuggestion> {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut suggestions: Vec<AutocompleteSuggestion> = Vec::new();

    for record in records {
        if !record.has_fiscal_code() {
            continue;
        }
        match slots.get(&record.fiscal_code) {
            Some(&slot) => append_source(&mut suggestions[slot], &record.source_system),
            None => {
                slots.insert(record.fiscal_code.clone(), suggestions.len());
                suggestions.push(AutocompleteSuggestion {
                    id: record.fiscal_code.clone(),
                    name: record.name,
                    fiscal_code: record.fiscal_code,
                    source_system: record.source_system,
                });
            }
        }
    }

    suggestions.truncate(limit);
    suggestions
}

fn append_source(suggestion: &mut AutocompleteSuggestion, source: &str) {
    let source = source.trim();
    if source.is_empty() {
        return;
    }
    if suggestion.source_system.trim().is_empty() {
        suggestion.source_system = source.to_string();
        return;
    }
    let known = suggestion
        .source_system
        .split(',')
        .map(str::trim)
        .any(|label| label == source);
    if !known {
        suggestion.source_system.push_str(", ");
        suggestion.source_system.push_str(source);
    }
}
