//! Per-entity related records: addresses, contacts, banks, jobs, assets.

use crate::models::{Address, Asset, Bank, BorrowerType, Contact, Job};
use crate::query_builder::{filter_clause, WILDCARD};
use crate::search_gateway::{SearchParams, TypesenseClient};
use crate::services::normalize_fiscal_code;
use crate::session::SessionContext;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Related lists are not paginated; one page of this size is fetched.
pub const RELATED_PAGE_SIZE: u32 = 250;

/// A collection of records attached to an entity.
pub trait RelatedCollection: DeserializeOwned + Send + Sync + 'static {
    const COLLECTION: &'static str;
    /// Fields searched when resolving by entity id.
    const QUERY_FIELDS: &'static str;
    /// Fields searched when resolving by fiscal code.
    const FISCAL_CODE_QUERY_FIELDS: &'static str = Self::QUERY_FIELDS;
}

impl RelatedCollection for Address {
    const COLLECTION: &'static str = "addresses";
    const QUERY_FIELDS: &'static str = "street,city,province";
}

impl RelatedCollection for Contact {
    const COLLECTION: &'static str = "contacts";
    const QUERY_FIELDS: &'static str = "email,phone_number";
}

impl RelatedCollection for Bank {
    const COLLECTION: &'static str = "banks";
    const QUERY_FIELDS: &'static str = "bank_cab,bank_abi,bank_name";
    const FISCAL_CODE_QUERY_FIELDS: &'static str = "bank_cab,bank_abi";
}

impl RelatedCollection for Job {
    const COLLECTION: &'static str = "jobs";
    const QUERY_FIELDS: &'static str = "employer_name";
}

impl RelatedCollection for Asset {
    const COLLECTION: &'static str = "assets";
    const QUERY_FIELDS: &'static str = "street,city,province";
    const FISCAL_CODE_QUERY_FIELDS: &'static str = "street,city";
}

/// Maps a loan-role route segment to the role it lists.
pub fn loan_role_from_segment(segment: &str) -> Option<BorrowerType> {
    match segment {
        "guarantors" => Some(BorrowerType::Guarantor),
        "joints" => Some(BorrowerType::Joint),
        "others" => Some(BorrowerType::Other),
        "possible" => Some(BorrowerType::Possible),
        "heirs" => Some(BorrowerType::Heir),
        _ => None,
    }
}

#[derive(Clone)]
pub struct RelatedRecordService {
    index: TypesenseClient,
}

impl RelatedRecordService {
    pub fn new(index: TypesenseClient) -> Self {
        Self { index }
    }

    /// Records of `T` attached to `entity_id`. Failures give an empty list.
    pub async fn by_entity_id<T: RelatedCollection>(&self, entity_id: &str) -> Vec<T> {
        let entity_id = entity_id.trim();
        if entity_id.is_empty() {
            return Vec::new();
        }
        self.fetch(T::QUERY_FIELDS, "entity_id", entity_id).await
    }

    /// Records of `T` attached to any record carrying `fiscal_code`.
    pub async fn by_fiscal_code<T: RelatedCollection>(&self, fiscal_code: &str) -> Vec<T> {
        match normalize_fiscal_code(fiscal_code) {
            Ok(code) => {
                self.fetch(T::FISCAL_CODE_QUERY_FIELDS, "fiscal_code", code)
                    .await
            }
            Err(_) => Vec::new(),
        }
    }

    /// Records of `T` for the entity the session is bound to.
    pub async fn for_session<T: RelatedCollection>(&self, session: &SessionContext) -> Vec<T> {
        match session.bound() {
            Some(bound) => self.by_entity_id(&bound.entity_id).await,
            None => Vec::new(),
        }
    }

    async fn fetch<T: RelatedCollection>(&self, query_by: &str, field: &str, value: &str) -> Vec<T> {
        let params = SearchParams::new(WILDCARD, query_by)
            .filter_by(filter_clause(field, value))
            .page(1, RELATED_PAGE_SIZE);

        match self.index.search::<T>(T::COLLECTION, &params).await {
            Ok(response) => {
                let records = response.into_documents();
                tracing::debug!(
                    "Fetched {} {} for {} {}",
                    records.len(),
                    T::COLLECTION,
                    field,
                    value
                );
                records
            }
            Err(e) => {
                tracing::error!(
                    "Failed to fetch {} for {} {}: {}",
                    T::COLLECTION,
                    field,
                    value,
                    e
                );
                Vec::new()
            }
        }
    }

    /// Keeps a list of `T` in step with the session.
    ///
    /// Each session change triggers a refetch. A fetch still running when the
    /// session changes again is dropped, so a stale list is never published.
    pub fn feed<T: RelatedCollection>(
        &self,
        mut session: watch::Receiver<SessionContext>,
    ) -> (watch::Receiver<Vec<T>>, JoinHandle<()>) {
        let (tx, rx) = watch::channel(Vec::new());
        let service = self.clone();

        let handle = tokio::spawn(async move {
            loop {
                let entity_id = session
                    .borrow_and_update()
                    .bound()
                    .map(|b| b.entity_id.clone());

                let records = match entity_id {
                    Some(id) => {
                        tokio::select! {
                            records = service.by_entity_id::<T>(&id) => records,
                            changed = session.changed() => {
                                if changed.is_err() {
                                    return;
                                }
                                continue;
                            }
                        }
                    }
                    None => Vec::new(),
                };

                if tx.send(records).is_err() {
                    return;
                }
                if session.changed().await.is_err() {
                    return;
                }
            }
        });

        (rx, handle)
    }
}
