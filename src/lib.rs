//! Entity Search API Library
//!
//! Entity resolution and federated search over a Typesense index: records
//! describing the same person or company in several source systems are found,
//! grouped by fiscal code and browsed together with their related records.
//!
//! # Modules
//!
//! - `api`: HTTP layer.
//! - `core`: Resolution, search and session logic.
//! - `integrations`: Search index client.
//! - `autocomplete`: Suggestion deduplication.
//! - `circuit_breaker`: Circuit breaker in front of the index.
//! - `config`: Configuration management.
//! - `coordinator`: Debounced search/autocomplete drivers and source switching.
//! - `debounce`: Trailing-edge debounce with stale-result suppression.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers.
//! - `models`: Entity, filter and related-record models.
//! - `query_builder`: Free text and filters to index query parameters.
//! - `related`: Addresses, contacts, banks, jobs and assets of an entity.
//! - `resolver`: Fiscal-code clustering.
//! - `search_gateway`: Typesense client.
//! - `services`: Entity search, lookup and loan queries.
//! - `session`: Tab-scoped session context.

pub mod api;
pub mod core;
pub mod integrations;

pub mod autocomplete;
pub mod circuit_breaker;
pub mod config;
pub mod coordinator;
pub mod debounce;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod query_builder;
pub mod related;
pub mod resolver;
pub mod search_gateway;
pub mod services;
pub mod session;
