use crate::autocomplete::{self, INCLUDE_FIELDS, QUERY_FIELDS};
use crate::errors::{AppError, ResultExt};
use crate::models::*;
use crate::query_builder::{build_search_query, conjunction, filter_clause, DEFAULT_SORT, WILDCARD};
use crate::resolver::{group_by_fiscal_code, EntityCluster};
use crate::search_gateway::{SearchParams, TypesenseClient};
use crate::session::SessionContext;
use serde::Serialize;

pub const ENTITIES_COLLECTION: &str = "entities";

/// Raw records fetched per requested result, so that one page still fills up
/// after records are folded into clusters.
pub const OVERFETCH_FACTOR: u32 = 5;

/// Largest page the index serves.
pub const MAX_INDEX_PAGE: u32 = 250;

/// Upper bound on records resolved for one fiscal code.
pub const FISCAL_CODE_LOOKUP_LIMIT: u32 = 100;

/// Search results folded into clusters.
///
/// `found` and `total_pages` still count raw records, as reported by the index.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterSearchResult {
    pub clusters: Vec<EntityCluster>,
    pub found: u64,
    pub page: u32,
    #[serde(rename = "totalPages")]
    pub total_pages: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub facets: Vec<FacetCount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<SearchResult> for ClusterSearchResult {
    fn from(result: SearchResult) -> Self {
        Self {
            clusters: group_by_fiscal_code(result.results),
            found: result.found,
            page: result.page,
            total_pages: result.total_pages,
            facets: result.facets,
            error: result.error,
        }
    }
}

/// Entity search, autocomplete, identity resolution and loan lookups.
#[derive(Clone)]
pub struct EntityService {
    index: TypesenseClient,
}

impl EntityService {
    pub fn new(index: TypesenseClient) -> Self {
        Self { index }
    }

    /// Full-text search with filters. Never fails: an index error yields an
    /// empty page with `error` set.
    pub async fn search(&self, options: &SearchOptions) -> SearchResult {
        let page = options.page.max(1);
        match self.try_search(options).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Entity search failed: {}", e);
                SearchResult::failed(page, &e)
            }
        }
    }

    async fn try_search(&self, options: &SearchOptions) -> Result<SearchResult, AppError> {
        let page = options.page.max(1);
        let per_page = options.per_page.max(1);
        let built = build_search_query(options.query.as_deref(), &options.filters)
            .with_sort(options.sort_by.as_deref());

        // Always the first index page: clustering happens on the caller's side
        // of the window, so later pages are not addressable by index offset.
        let fetch = per_page.saturating_mul(OVERFETCH_FACTOR).min(MAX_INDEX_PAGE);
        let params = SearchParams::new(built.query_string.clone(), built.query_by())
            .filter_by(built.filter_expression.clone())
            .sort_by(built.sort_key.clone())
            .page(1, fetch);

        let response = self
            .index
            .search::<Entity>(ENTITIES_COLLECTION, &params)
            .await?;

        let found = response.found;
        let facets = response.facet_counts.clone();
        let results = response.into_documents();
        tracing::info!(
            "Entity search '{}' matched {} record(s), returning {}",
            built.query_string,
            found,
            results.len()
        );

        Ok(SearchResult {
            results,
            found,
            page,
            total_pages: total_pages(found, per_page),
            facets,
            error: None,
        })
    }

    /// [`search`](Self::search), grouped into fiscal-code clusters.
    pub async fn search_clusters(&self, options: &SearchOptions) -> ClusterSearchResult {
        self.search(options).await.into()
    }

    /// Up to `limit` suggestions, one per fiscal code. Short input and index
    /// failures both give an empty list.
    pub async fn autocomplete(&self, text: &str, limit: usize) -> Vec<AutocompleteSuggestion> {
        if !autocomplete::is_searchable(text) {
            return Vec::new();
        }

        let fetch = autocomplete::fetch_size(limit.max(1)).min(MAX_INDEX_PAGE as usize) as u32;
        let params = SearchParams::new(text.trim(), QUERY_FIELDS)
            .per_page(fetch)
            .include_fields(INCLUDE_FIELDS);

        match self
            .index
            .search::<Entity>(ENTITIES_COLLECTION, &params)
            .await
        {
            Ok(response) => autocomplete::dedupe_by_fiscal_code(response.into_documents(), limit),
            Err(e) => {
                tracing::error!("Autocomplete for '{}' failed: {}", text, e);
                Vec::new()
            }
        }
    }

    /// Every record carrying `fiscal_code`, as one cluster.
    pub async fn get_by_fiscal_code(&self, fiscal_code: &str) -> Result<EntityCluster, AppError> {
        let fiscal_code = normalize_fiscal_code(fiscal_code)?;
        self.resolve_fiscal_code(fiscal_code).await
    }

    /// Exact-match lookup; `fiscal_code` is sent as given.
    async fn resolve_fiscal_code(&self, fiscal_code: &str) -> Result<EntityCluster, AppError> {
        let params = SearchParams::new(fiscal_code, "fiscal_code")
            .filter_by(filter_clause("fiscal_code", fiscal_code))
            .per_page(FISCAL_CODE_LOOKUP_LIMIT);

        let records = self
            .index
            .search::<Entity>(ENTITIES_COLLECTION, &params)
            .await
            .with_context(|| format!("Resolving fiscal code {}", fiscal_code))?
            .into_documents();

        if records.is_empty() {
            return Err(AppError::NotFound(format!(
                "No entity with fiscal code {}",
                fiscal_code
            )));
        }

        tracing::info!(
            "Fiscal code {} resolved to {} record(s)",
            fiscal_code,
            records.len()
        );
        EntityCluster::new(records)
    }

    /// The record `entity_id` plus every other record sharing its fiscal code.
    pub async fn get_by_id(&self, entity_id: &str) -> Result<EntityCluster, AppError> {
        let entity_id = entity_id.trim();
        if entity_id.is_empty() {
            return Err(AppError::InvalidInput("entity id is required".to_string()));
        }

        let params = SearchParams::new(entity_id, "entity_id")
            .filter_by(filter_clause("entity_id", entity_id))
            .per_page(1);

        let record = self
            .index
            .search::<Entity>(ENTITIES_COLLECTION, &params)
            .await
            .with_context(|| format!("Looking up entity {}", entity_id))?
            .into_documents()
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound(format!("No entity with id {}", entity_id)))?;

        // Without a fiscal code there is nothing to merge with.
        if !record.has_fiscal_code() {
            return EntityCluster::new(vec![record]);
        }

        // The stored value, so the record always finds itself.
        self.resolve_fiscal_code(&record.fiscal_code).await
    }

    /// Co-obligors on one loan in one role.
    ///
    /// When `viewer_role` is the requested role the list would contain the
    /// viewer themselves, so it is empty and no query is made.
    pub async fn search_by_loan(
        &self,
        params: &LoanSearchParams,
        viewer_role: Option<BorrowerType>,
    ) -> ResultPage<Entity> {
        let page = params.page.max(1);
        let per_page = params.per_page.max(1);

        if viewer_role == Some(params.borrower_type) {
            tracing::debug!(
                "Skipping {} lookup on loan {}: viewer holds that role",
                params.borrower_type.label(),
                params.unique_loan_id
            );
            return ResultPage::empty(page);
        }
        if params.source_system.trim().is_empty() || params.unique_loan_id.trim().is_empty() {
            return ResultPage::empty(page);
        }

        let filter = conjunction(&[
            filter_clause("source_system", params.source_system.trim()),
            filter_clause("unique_loan_id", params.unique_loan_id.trim()),
            filter_clause("borrower_type_id", params.borrower_type.id()),
        ]);
        let sort = params
            .sort_by
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SORT);
        let query = SearchParams::new(WILDCARD, "name")
            .filter_by(filter)
            .sort_by(sort)
            .page(page, per_page);

        match self
            .index
            .search::<Entity>(ENTITIES_COLLECTION, &query)
            .await
        {
            Ok(response) => {
                let found = response.found;
                ResultPage {
                    results: response.into_documents(),
                    found,
                    page,
                    total_pages: total_pages(found, per_page),
                    facets: Vec::new(),
                    error: None,
                }
            }
            Err(e) => {
                tracing::error!(
                    "{} lookup on loan {} failed: {}",
                    params.borrower_type.label(),
                    params.unique_loan_id,
                    e
                );
                ResultPage::failed(page, &e)
            }
        }
    }

    /// Co-obligors in `role` on the loan the session is bound to.
    pub async fn loan_members(
        &self,
        session: &SessionContext,
        role: BorrowerType,
        page: u32,
        per_page: u32,
    ) -> ResultPage<Entity> {
        let Some(bound) = session.bound() else {
            return ResultPage::empty(page.max(1));
        };
        let mut params = LoanSearchParams::new(
            bound.source_system.clone(),
            bound.unique_loan_id.clone(),
            role,
        );
        params.page = page;
        params.per_page = per_page;
        self.search_by_loan(&params, bound.role()).await
    }
}

/// Trims caller input; blank codes are rejected. Case is kept because the
/// index matches `fiscal_code` exactly.
pub fn normalize_fiscal_code(fiscal_code: &str) -> Result<&str, AppError> {
    let trimmed = fiscal_code.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidInput("fiscal code is required".to_string()));
    }
    Ok(trimmed)
}
