use crate::config::Config;
use crate::errors::AppError;
use crate::models::*;
use crate::related::{loan_role_from_segment, RelatedCollection, RelatedRecordService};
use crate::resolver::EntityCluster;
use crate::search_gateway::TypesenseClient;
use crate::services::{ClusterSearchResult, EntityService};
use crate::session::{SessionContext, SessionStore};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

/// Header carrying the caller's tab-scoped session id.
pub const SESSION_HEADER: &str = "x-session-id";

/// Largest page a caller may request.
pub const MAX_PER_PAGE: u32 = 50;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Index client, also used for health probes.
    pub index: TypesenseClient,
    pub entities: EntityService,
    pub related: RelatedRecordService,
    /// Tab sessions keyed by `X-Session-Id`.
    pub sessions: SessionStore,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, AppError> {
        let index = TypesenseClient::from_config(&config)?;
        Ok(Self {
            entities: EntityService::new(index.clone()),
            related: RelatedRecordService::new(index.clone()),
            sessions: SessionStore::new(config.session_ttl()),
            index,
            config,
        })
    }
}

/// Health check endpoint.
///
/// Always 200; the `index` field tells whether the search index answers.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let index_ok = state.index.health().await;
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "entity-search-api",
            "version": env!("CARGO_PKG_VERSION"),
            "index": if index_ok { "ok" } else { "unreachable" },
            "checked_at": chrono::Utc::now().to_rfc3339()
        })),
    )
}

/// `?page=` is the same as no `page` at all.
fn empty_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    match Option::<String>::deserialize(deserializer)?.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// Query string of the search endpoints. Filters arrive as raw strings and
/// are parsed per key, so a malformed value is reported instead of ignored.
#[derive(Debug, Default, Deserialize)]
pub struct SearchQueryParams {
    pub q: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub page: Option<u32>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub per_page: Option<u32>,
    pub sort_by: Option<String>,
    pub is_company: Option<String>,
    pub gender: Option<String>,
    pub source_system: Option<String>,
    pub borrower_type_id: Option<String>,
    pub country_of_birth: Option<String>,
    pub province_of_birth: Option<String>,
    pub city_of_birth: Option<String>,
}

impl SearchQueryParams {
    pub fn into_options(self) -> Result<SearchOptions, AppError> {
        let defaults = SearchOptions::default();
        let per_page = self.per_page.unwrap_or(defaults.per_page);
        if per_page == 0 || per_page > MAX_PER_PAGE {
            return Err(AppError::InvalidInput(format!(
                "per_page must be between 1 and {}",
                MAX_PER_PAGE
            )));
        }

        let mut filters = SearchFilters::default();
        for (key, raw) in [
            (FilterKey::IsCompany, &self.is_company),
            (FilterKey::Gender, &self.gender),
            (FilterKey::SourceSystem, &self.source_system),
            (FilterKey::BorrowerTypeId, &self.borrower_type_id),
            (FilterKey::CountryOfBirth, &self.country_of_birth),
            (FilterKey::ProvinceOfBirth, &self.province_of_birth),
            (FilterKey::CityOfBirth, &self.city_of_birth),
        ] {
            filters.set(key, raw.as_deref())?;
        }

        Ok(SearchOptions {
            query: self.q,
            filters,
            page: self.page.unwrap_or(defaults.page).max(1),
            per_page,
            sort_by: self.sort_by,
        })
    }
}

/// GET /api/v1/entities/search
pub async fn search_entities(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchQueryParams>,
) -> Result<Json<SearchResult>, AppError> {
    let options = params.into_options()?;
    tracing::info!(
        "GET /entities/search - q={:?} page={} filters={:?}",
        options.query,
        options.page,
        options.filters
    );
    Ok(Json(state.entities.search(&options).await))
}

/// GET /api/v1/entities/clusters
pub async fn search_clusters(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchQueryParams>,
) -> Result<Json<ClusterSearchResult>, AppError> {
    let options = params.into_options()?;
    tracing::info!(
        "GET /entities/clusters - q={:?} page={}",
        options.query,
        options.page
    );
    Ok(Json(state.entities.search_clusters(&options).await))
}

#[derive(Debug, Deserialize)]
pub struct AutocompleteParams {
    #[serde(default)]
    pub q: String,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub limit: Option<usize>,
}

/// GET /api/v1/entities/autocomplete
pub async fn autocomplete(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AutocompleteParams>,
) -> Json<Vec<AutocompleteSuggestion>> {
    let limit = params
        .limit
        .unwrap_or(crate::autocomplete::DEFAULT_LIMIT)
        .clamp(1, MAX_PER_PAGE as usize);
    Json(state.entities.autocomplete(&params.q, limit).await)
}

/// GET /api/v1/entities/:entity_id
///
/// Resolves the record and all records sharing its fiscal code. With an
/// `X-Session-Id` header the session enters the detail view of the cluster.
pub async fn get_entity(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<EntityCluster>, AppError> {
    tracing::info!("GET /entities/{}", entity_id);
    let cluster = state.entities.get_by_id(&entity_id).await?;
    enter_detail_view(&state, &headers, &cluster).await?;
    Ok(Json(cluster))
}

/// GET /api/v1/entities/fiscal-code/:fiscal_code
pub async fn get_by_fiscal_code(
    State(state): State<Arc<AppState>>,
    Path(fiscal_code): Path<String>,
    headers: HeaderMap,
) -> Result<Json<EntityCluster>, AppError> {
    tracing::info!("GET /entities/fiscal-code/{}", fiscal_code);
    let cluster = state.entities.get_by_fiscal_code(&fiscal_code).await?;
    enter_detail_view(&state, &headers, &cluster).await?;
    Ok(Json(cluster))
}

async fn enter_detail_view(
    state: &AppState,
    headers: &HeaderMap,
    cluster: &EntityCluster,
) -> Result<(), AppError> {
    if let Some(session_id) = optional_session_id(headers)? {
        state.sessions.enter(&session_id, cluster.clone()).await?;
    }
    Ok(())
}

/// POST /api/v1/sessions
pub async fn create_session() -> (StatusCode, Json<serde_json::Value>) {
    let session_id = SessionStore::new_session_id();
    tracing::info!("Created session {}", session_id);
    (
        StatusCode::CREATED,
        Json(json!({ "session_id": session_id })),
    )
}

/// Session as reported to clients.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub bound: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fiscal_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_loan_id: Option<String>,
    /// Index of the bound record within the session's cluster.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<Entity>,
}

impl SessionView {
    fn of(context: &SessionContext, cluster: Option<&EntityCluster>) -> Self {
        let Some(bound) = context.bound() else {
            return Self {
                bound: false,
                entity_id: None,
                fiscal_code: None,
                role: None,
                role_label: None,
                source_system: None,
                unique_loan_id: None,
                source_index: None,
                entity: None,
            };
        };
        Self {
            bound: true,
            entity_id: Some(bound.entity_id.clone()),
            fiscal_code: Some(bound.fiscal_code.clone()),
            role: Some(bound.role),
            role_label: Some(borrower_type_label(bound.role)),
            source_system: Some(bound.source_system.clone()),
            unique_loan_id: Some(bound.unique_loan_id.clone()),
            source_index: cluster.and_then(|c| {
                c.all_sources()
                    .iter()
                    .position(|e| e.entity_id == bound.entity_id)
            }),
            entity: bound.entity_data.clone(),
        }
    }
}

/// GET /api/v1/session
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<SessionView>, AppError> {
    let session_id = require_session_id(&headers)?;
    let context = state.sessions.load(&session_id).await;
    let cluster = state.sessions.cluster(&session_id).await;
    Ok(Json(SessionView::of(&context, cluster.as_deref())))
}

/// DELETE /api/v1/session
pub async fn clear_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let session_id = require_session_id(&headers)?;
    state.sessions.clear(&session_id).await;
    tracing::info!("Cleared session {}", session_id);
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/session/source/:index
///
/// Switches the displayed source within the session's cluster. No query is
/// made.
pub async fn switch_source(
    State(state): State<Arc<AppState>>,
    Path(index): Path<usize>,
    headers: HeaderMap,
) -> Result<Json<SessionView>, AppError> {
    let session_id = require_session_id(&headers)?;
    let context = state.sessions.switch_source(&session_id, index).await?;
    let cluster = state.sessions.cluster(&session_id).await;
    Ok(Json(SessionView::of(&context, cluster.as_deref())))
}

/// GET /api/v1/session/{addresses,contacts,banks,jobs,assets}
pub async fn session_related<T>(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<T>>, AppError>
where
    T: RelatedCollection + Serialize,
{
    let session_id = require_session_id(&headers)?;
    let context = state.sessions.load(&session_id).await;
    Ok(Json(state.related.for_session::<T>(&context).await))
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    #[serde(default, deserialize_with = "empty_as_none")]
    pub page: Option<u32>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub per_page: Option<u32>,
}

/// GET /api/v1/session/loan/:role
pub async fn session_loan_members(
    State(state): State<Arc<AppState>>,
    Path(role): Path<String>,
    Query(params): Query<PageParams>,
    headers: HeaderMap,
) -> Result<Json<ResultPage<Entity>>, AppError> {
    let role = loan_role_from_segment(&role)
        .ok_or_else(|| AppError::InvalidInput(format!("Unknown loan role '{}'", role)))?;
    let per_page = params.per_page.unwrap_or(20);
    if per_page == 0 || per_page > MAX_PER_PAGE {
        return Err(AppError::InvalidInput(format!(
            "per_page must be between 1 and {}",
            MAX_PER_PAGE
        )));
    }

    let session_id = require_session_id(&headers)?;
    let context = state.sessions.load(&session_id).await;
    let page = state
        .entities
        .loan_members(&context, role, params.page.unwrap_or(1), per_page)
        .await;
    Ok(Json(page))
}

/// Every API route except `/health`, which stays outside rate limiting.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/entities/search", get(search_entities))
        .route("/api/v1/entities/clusters", get(search_clusters))
        .route("/api/v1/entities/autocomplete", get(autocomplete))
        .route(
            "/api/v1/entities/fiscal-code/:fiscal_code",
            get(get_by_fiscal_code),
        )
        .route("/api/v1/entities/:entity_id", get(get_entity))
        .route("/api/v1/sessions", post(create_session))
        .route("/api/v1/session", get(get_session).delete(clear_session))
        .route("/api/v1/session/source/:index", post(switch_source))
        .route("/api/v1/session/addresses", get(session_related::<Address>))
        .route("/api/v1/session/contacts", get(session_related::<Contact>))
        .route("/api/v1/session/banks", get(session_related::<Bank>))
        .route("/api/v1/session/jobs", get(session_related::<Job>))
        .route("/api/v1/session/assets", get(session_related::<Asset>))
        .route("/api/v1/session/loan/:role", get(session_loan_members))
}

fn optional_session_id(headers: &HeaderMap) -> Result<Option<String>, AppError> {
    let Some(value) = headers.get(SESSION_HEADER) else {
        return Ok(None);
    };
    let id = value
        .to_str()
        .map_err(|_| AppError::InvalidInput("X-Session-Id must be ASCII".to_string()))?
        .trim();
    if id.is_empty() || id.len() > 128 {
        return Err(AppError::InvalidInput(
            "X-Session-Id must be 1-128 characters".to_string(),
        ));
    }
    Ok(Some(id.to_string()))
}

fn require_session_id(headers: &HeaderMap) -> Result<String, AppError> {
    optional_session_id(headers)?
        .ok_or_else(|| AppError::InvalidInput("X-Session-Id header is required".to_string()))
}
