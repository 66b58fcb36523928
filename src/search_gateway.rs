use crate::circuit_breaker::{create_index_circuit_breaker, guarded, IndexCircuitBreaker};
use crate::config::Config;
use crate::errors::AppError;
use crate::models::FacetCount;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const API_KEY_HEADER: &str = "X-TYPESENSE-API-KEY";

/// Query parameters of the index search endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchParams {
    pub q: String,
    pub query_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_fields: Option<String>,
}

impl SearchParams {
    pub fn new(q: impl Into<String>, query_by: impl Into<String>) -> Self {
        Self {
            q: q.into(),
            query_by: query_by.into(),
            ..Default::default()
        }
    }

    pub fn filter_by(mut self, filter: impl Into<String>) -> Self {
        let filter = filter.into();
        self.filter_by = if filter.is_empty() { None } else { Some(filter) };
        self
    }

    pub fn sort_by(mut self, sort: impl Into<String>) -> Self {
        self.sort_by = Some(sort.into());
        self
    }

    pub fn page(mut self, page: u32, per_page: u32) -> Self {
        self.page = Some(page);
        self.per_page = Some(per_page);
        self
    }

    pub fn per_page(mut self, per_page: u32) -> Self {
        self.per_page = Some(per_page);
        self
    }

    pub fn include_fields(mut self, fields: impl Into<String>) -> Self {
        self.include_fields = Some(fields.into());
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hit<T> {
    pub document: T,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse<T> {
    #[serde(default)]
    pub found: u64,
    #[serde(default = "Vec::new")]
    pub hits: Vec<Hit<T>>,
    #[serde(default)]
    pub facet_counts: Vec<FacetCount>,
}

impl<T> SearchResponse<T> {
    /// Hit documents in index order.
    pub fn into_documents(self) -> Vec<T> {
        self.hits.into_iter().map(|hit| hit.document).collect()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CollectionSummary {
    pub name: String,
    #[serde(default)]
    pub num_documents: u64,
}

/// Client for the full-text/attribute search index.
///
/// Every failure (transport, non-2xx, undecodable body) surfaces as
/// `AppError::SearchFailed`; an open breaker surfaces as `AppError::Unavailable`.
#[derive(Clone)]
pub struct TypesenseClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    breaker: IndexCircuitBreaker,
}

impl TypesenseClient {
    /// Creates a new `TypesenseClient`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Root URL of the index node, e.g. `http://localhost:8108`.
    /// * `api_key` - Search-only key sent with every request.
    /// * `timeout` - Per-request timeout.
    pub fn new(base_url: String, api_key: String, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                AppError::InternalError(format!("Failed to create index client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            breaker: create_index_circuit_breaker(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        Self::new(
            config.typesense_url.clone(),
            config.typesense_api_key.clone(),
            config.index_timeout(),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Runs one search against `collection` and decodes the hits as `T`.
    pub async fn search<T: DeserializeOwned>(
        &self,
        collection: &str,
        params: &SearchParams,
    ) -> Result<SearchResponse<T>, AppError> {
        guarded(&self.breaker, self.execute(collection, params)).await
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        collection: &str,
        params: &SearchParams,
    ) -> Result<SearchResponse<T>, AppError> {
        let url = format!(
            "{}/collections/{}/documents/search",
            self.base_url, collection
        );
        tracing::info!(
            "Index search on '{}': q='{}' filter_by={:?} page={:?} per_page={:?}",
            collection,
            params.q,
            params.filter_by,
            params.page,
            params.per_page
        );

        let response = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .query(params)
            .send()
            .await
            .map_err(|e| AppError::SearchFailed(format!("Index request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::SearchFailed(format!(
                "Index returned {} for '{}': {}",
                status, collection, error_text
            )));
        }

        let body: SearchResponse<T> = response.json().await.map_err(|e| {
            AppError::SearchFailed(format!("Failed to parse index response: {}", e))
        })?;

        tracing::debug!(
            "Index search on '{}' returned {} hit(s) of {} found",
            collection,
            body.hits.len(),
            body.found
        );
        Ok(body)
    }

    /// True when the index node reports itself healthy.
    pub async fn health(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => resp
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| v.get("ok").and_then(|ok| ok.as_bool()))
                .unwrap_or(false),
            Ok(resp) => {
                tracing::warn!("Index health check returned {}", resp.status());
                false
            }
            Err(e) => {
                tracing::warn!("Index health check failed: {}", e);
                false
            }
        }
    }

    pub async fn list_collections(&self) -> Result<Vec<CollectionSummary>, AppError> {
        let url = format!("{}/collections", self.base_url);

        let response = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| AppError::SearchFailed(format!("Index request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::SearchFailed(format!(
                "Index returned {} listing collections",
                response.status()
            )));
        }

        Ok(response.json().await?)
    }
}
