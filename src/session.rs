//! Tab-scoped state describing the entity currently open in a detail view.
//!
//! A session is either `Empty` or `Bound` to one record of a cluster. Binding
//! always replaces the whole state at once; there are no per-field setters.
//! Only the identifying subset ([`PersistedSession`]) is ever stored, sealed
//! with a SHA-256 checksum, and the full entity payload must be refetched after
//! a restore.

use crate::errors::AppError;
use crate::models::{BorrowerType, Entity};
use crate::resolver::{EntityCluster, SelectedSource};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// The entity a session is bound to.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundEntity {
    pub entity_id: String,
    pub fiscal_code: String,
    pub role: i32,
    pub source_system: String,
    pub unique_loan_id: String,
    /// Ephemeral; `None` after a restore until refetched.
    pub entity_data: Option<Entity>,
}

impl BoundEntity {
    /// Binding for the selected member. The fiscal code is the cluster's.
    pub fn from_selected(selected: SelectedSource<'_>) -> Self {
        let entity = selected.entity();
        Self {
            entity_id: entity.entity_id.clone(),
            fiscal_code: selected.cluster().fiscal_code().to_string(),
            role: entity.borrower_type_id,
            source_system: entity.source_system.clone(),
            unique_loan_id: entity.unique_loan_id.clone(),
            entity_data: Some(entity.clone()),
        }
    }

    pub fn role(&self) -> Option<BorrowerType> {
        BorrowerType::from_id(self.role)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum SessionContext {
    #[default]
    Empty,
    Bound(BoundEntity),
}

impl SessionContext {
    pub fn bind(&mut self, binding: BoundEntity) {
        *self = SessionContext::Bound(binding);
    }

    pub fn bind_selected(&mut self, selected: SelectedSource<'_>) {
        self.bind(BoundEntity::from_selected(selected));
    }

    pub fn clear(&mut self) {
        *self = SessionContext::Empty;
    }

    pub fn bound(&self) -> Option<&BoundEntity> {
        match self {
            SessionContext::Bound(bound) => Some(bound),
            SessionContext::Empty => None,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.bound().is_some()
    }

    pub fn role(&self) -> Option<BorrowerType> {
        self.bound().and_then(BoundEntity::role)
    }

    /// Bound but without the entity payload: the caller must refetch it.
    pub fn needs_refetch(&self) -> bool {
        self.bound().is_some_and(|b| b.entity_data.is_none())
    }

    pub fn persisted(&self) -> Option<PersistedSession> {
        self.bound().map(|b| PersistedSession {
            entity_id: b.entity_id.clone(),
            fiscal_code: b.fiscal_code.clone(),
            role: b.role,
            source_system: b.source_system.clone(),
            unique_loan_id: b.unique_loan_id.clone(),
        })
    }

    pub fn restore(persisted: PersistedSession) -> Self {
        SessionContext::Bound(BoundEntity {
            entity_id: persisted.entity_id,
            fiscal_code: persisted.fiscal_code,
            role: persisted.role,
            source_system: persisted.source_system,
            unique_loan_id: persisted.unique_loan_id,
            entity_data: None,
        })
    }
}

/// The durable subset of a bound session. Never contains entity payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    pub entity_id: String,
    pub fiscal_code: String,
    pub role: i32,
    pub source_system: String,
    pub unique_loan_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SealedSnapshot {
    data: String,
    checksum: String,
}

fn checksum(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    hex::encode(hasher.finalize())
}

impl PersistedSession {
    /// JSON of the snapshot wrapped with its checksum.
    pub fn seal(&self) -> Result<String, AppError> {
        let data = serde_json::to_string(self)
            .map_err(|e| AppError::InternalError(format!("Failed to encode session: {}", e)))?;
        let sealed = SealedSnapshot {
            checksum: checksum(&data),
            data,
        };
        serde_json::to_string(&sealed)
            .map_err(|e| AppError::InternalError(format!("Failed to seal session: {}", e)))
    }

    /// Returns `None` for undecodable or tampered snapshots.
    pub fn unseal(sealed: &str) -> Option<Self> {
        let snapshot: SealedSnapshot = serde_json::from_str(sealed).ok()?;
        if checksum(&snapshot.data) != snapshot.checksum {
            tracing::warn!(
                "Session snapshot rejected: checksum mismatch ({} bytes)",
                snapshot.data.len()
            );
            return None;
        }
        serde_json::from_str(&snapshot.data).ok()
    }
}

/// Sole writer of an in-process session; readers subscribe.
///
/// The sender is deliberately not `Clone`, so there is exactly one writer.
#[derive(Debug)]
pub struct SessionHandle {
    tx: watch::Sender<SessionContext>,
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionContext::Empty);
        Self { tx }
    }

    pub fn restore(persisted: PersistedSession) -> Self {
        let (tx, _rx) = watch::channel(SessionContext::restore(persisted));
        Self { tx }
    }

    pub fn bind(&self, binding: BoundEntity) {
        self.tx.send_replace(SessionContext::Bound(binding));
    }

    pub fn bind_selected(&self, selected: SelectedSource<'_>) {
        self.bind(BoundEntity::from_selected(selected));
    }

    pub fn clear(&self) {
        self.tx.send_replace(SessionContext::Empty);
    }

    pub fn current(&self) -> SessionContext {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionContext> {
        self.tx.subscribe()
    }
}

/// Server-side home of tab sessions, keyed by the `X-Session-Id` header.
///
/// Snapshots expire after the configured idle time. The cluster a session was
/// bound from is cached next to it so switching sources is an index lookup.
#[derive(Clone)]
pub struct SessionStore {
    snapshots: Cache<String, String>,
    clusters: Cache<String, Arc<EntityCluster>>,
}

impl SessionStore {
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            snapshots: Cache::builder()
                .time_to_idle(idle_ttl)
                .max_capacity(50_000)
                .build(),
            clusters: Cache::builder()
                .time_to_idle(idle_ttl)
                .max_capacity(10_000)
                .build(),
        }
    }

    pub fn new_session_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Loads a session. The entity payload is filled in from the cached
    /// cluster when it is still there.
    pub async fn load(&self, session_id: &str) -> SessionContext {
        let Some(sealed) = self.snapshots.get(session_id).await else {
            return SessionContext::Empty;
        };
        let Some(persisted) = PersistedSession::unseal(&sealed) else {
            self.snapshots.invalidate(session_id).await;
            return SessionContext::Empty;
        };

        let mut context = SessionContext::restore(persisted);
        if let (SessionContext::Bound(bound), Some(cluster)) =
            (&mut context, self.clusters.get(session_id).await)
        {
            bound.entity_data = cluster
                .all_sources()
                .iter()
                .find(|e| e.entity_id == bound.entity_id)
                .cloned();
        }
        context
    }

    pub async fn save(&self, session_id: &str, context: &SessionContext) -> Result<(), AppError> {
        match context.persisted() {
            Some(persisted) => {
                self.snapshots
                    .insert(session_id.to_string(), persisted.seal()?)
                    .await;
            }
            None => self.clear(session_id).await,
        }
        Ok(())
    }

    /// Enters a detail view: binds the session to the cluster's primary record.
    pub async fn enter(
        &self,
        session_id: &str,
        cluster: EntityCluster,
    ) -> Result<SessionContext, AppError> {
        let cluster = Arc::new(cluster);
        let mut context = SessionContext::Empty;
        context.bind_selected(cluster.select(0)?);

        self.save(session_id, &context).await?;
        self.clusters.insert(session_id.to_string(), cluster).await;
        tracing::debug!("Session {} bound to {}", session_id, describe(&context));
        Ok(context)
    }

    /// Rebinds the session to another member of its cached cluster.
    pub async fn switch_source(
        &self,
        session_id: &str,
        index: usize,
    ) -> Result<SessionContext, AppError> {
        let cluster = self.clusters.get(session_id).await.ok_or_else(|| {
            AppError::NotFound(
                "No entity cluster for this session; reopen the detail view".to_string(),
            )
        })?;

        let mut context = SessionContext::Empty;
        context.bind_selected(cluster.select(index)?);
        self.save(session_id, &context).await?;
        tracing::debug!(
            "Session {} switched to source {}: {}",
            session_id,
            index,
            describe(&context)
        );
        Ok(context)
    }

    pub async fn cluster(&self, session_id: &str) -> Option<Arc<EntityCluster>> {
        self.clusters.get(session_id).await
    }

    /// Leaves the detail view.
    pub async fn clear(&self, session_id: &str) {
        self.snapshots.invalidate(session_id).await;
        self.clusters.invalidate(session_id).await;
    }

    /// Plants a raw snapshot; used to exercise tamper handling.
    #[cfg(test)]
    pub(crate) async fn insert_raw(&self, session_id: &str, sealed: String) {
        self.snapshots.insert(session_id.to_string(), sealed).await;
    }
}

fn describe(context: &SessionContext) -> String {
    match context.bound() {
        Some(b) => format!("entity {} ({})", b.entity_id, b.source_system),
        None => "nothing".to_string(),
    }
}
