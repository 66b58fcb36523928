//! Translates free text plus structured filters into the index query grammar.
//!
//! Everything here is pure: no I/O, deterministic output for equal input.

use crate::models::{FilterKey, SearchFilters};
use regex::Regex;
use std::fmt::Display;
use std::sync::OnceLock;

/// Match-all query text.
pub const WILDCARD: &str = "*";

/// Fields every entity search matches against.
pub const BASE_QUERY_FIELDS: [&str; 2] = ["name", "fiscal_code"];

/// Most recently created first.
pub const DEFAULT_SORT: &str = "borrower_id:desc";

/// Birth-place filters are matched as extra full-text terms, not exact predicates,
/// so partial names and diacritic variants still hit.
const GEOGRAPHIC_KEYS: [FilterKey; 3] = [
    FilterKey::CountryOfBirth,
    FilterKey::ProvinceOfBirth,
    FilterKey::CityOfBirth,
];

const EXACT_KEYS: [FilterKey; 4] = [
    FilterKey::IsCompany,
    FilterKey::Gender,
    FilterKey::SourceSystem,
    FilterKey::BorrowerTypeId,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltQuery {
    pub query_string: String,
    pub searched_fields: Vec<String>,
    /// Empty when no exact filter applies.
    pub filter_expression: String,
    pub sort_key: String,
}

impl BuiltQuery {
    /// `query_by` wire value.
    pub fn query_by(&self) -> String {
        self.searched_fields.join(",")
    }

    pub fn filter_by(&self) -> Option<&str> {
        if self.filter_expression.is_empty() {
            None
        } else {
            Some(&self.filter_expression)
        }
    }

    /// Replaces the default sort when the caller supplied one.
    pub fn with_sort(mut self, sort_by: Option<&str>) -> Self {
        if let Some(sort) = sort_by.map(str::trim).filter(|s| !s.is_empty()) {
            self.sort_key = sort.to_string();
        }
        self
    }
}

pub fn build_search_query(free_text: Option<&str>, filters: &SearchFilters) -> BuiltQuery {
    let mut terms: Vec<String> = Vec::new();
    let mut fields: Vec<String> = BASE_QUERY_FIELDS.iter().map(|f| f.to_string()).collect();

    if let Some(text) = free_text.map(str::trim) {
        if !text.is_empty() && text != WILDCARD {
            terms.push(text.to_string());
        }
    }

    for key in GEOGRAPHIC_KEYS {
        if let Some(value) = filters.get(key) {
            terms.push(value);
            let field = key.field().to_string();
            if !fields.contains(&field) {
                fields.push(field);
            }
        }
    }

    let query_string = if terms.is_empty() {
        WILDCARD.to_string()
    } else {
        terms.join(" ")
    };

    BuiltQuery {
        query_string,
        searched_fields: fields,
        filter_expression: build_filter_expression(filters),
        sort_key: DEFAULT_SORT.to_string(),
    }
}

/// Conjunction of equality predicates for the exact-match filters.
pub fn build_filter_expression(filters: &SearchFilters) -> String {
    let clauses: Vec<String> = EXACT_KEYS
        .iter()
        .filter_map(|key| filters.get(*key).map(|value| filter_clause(key.field(), value)))
        .collect();
    conjunction(&clauses)
}

/// `field:=value`, with the value escaped when it is not a bare token.
pub fn filter_clause(field: &str, value: impl Display) -> String {
    format!("{}:={}", field, escape_filter_value(&value.to_string()))
}

pub fn conjunction(clauses: &[String]) -> String {
    clauses.join(" && ")
}

fn bare_token() -> &'static Regex {
    static BARE: OnceLock<Regex> = OnceLock::new();
    BARE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("bare token pattern is valid"))
}

/// Values with spaces or operator characters are wrapped in backticks so they
/// cannot break out of their clause.
pub fn escape_filter_value(value: &str) -> String {
    if bare_token().is_match(value) {
        value.to_string()
    } else {
        format!("`{}`", value.replace('`', ""))
    }
}
