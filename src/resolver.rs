//! Groups per-source entity records into fiscal-code clusters.
//!
//! Cluster order is first-seen order of the input, and member order inside a
//! cluster is input order. The primary member is always the first member.

use crate::errors::AppError;
use crate::models::Entity;
use serde::ser::{Serialize, Serializer};
use std::collections::HashMap;

/// Records sharing one fiscal code: one real-world person or company.
///
/// Never empty, never mutated after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityCluster {
    fiscal_code: String,
    members: Vec<Entity>,
}

impl EntityCluster {
    /// Builds a cluster from records in merge-priority order.
    ///
    /// Fails when `members` is empty or the fiscal codes disagree. Codes that
    /// differ only in case or surrounding whitespace are the same code.
    pub fn new(members: Vec<Entity>) -> Result<Self, AppError> {
        let first = members
            .first()
            .ok_or_else(|| AppError::InternalError("cluster needs at least one record".into()))?;
        let fiscal_code = first.fiscal_code.clone();

        if let Some(stray) = members
            .iter()
            .find(|e| !same_fiscal_code(&e.fiscal_code, &fiscal_code))
        {
            return Err(AppError::InternalError(format!(
                "record {} has fiscal code {} but cluster is {}",
                stray.entity_id, stray.fiscal_code, fiscal_code
            )));
        }

        Ok(Self {
            fiscal_code,
            members,
        })
    }

    pub fn fiscal_code(&self) -> &str {
        &self.fiscal_code
    }

    /// Record shown by default: the first one in result order.
    pub fn primary(&self) -> &Entity {
        &self.members[0]
    }

    pub fn is_merged(&self) -> bool {
        self.members.len() > 1
    }

    pub fn source_count(&self) -> usize {
        self.members.len()
    }

    pub fn all_sources(&self) -> &[Entity] {
        &self.members
    }

    /// Selects the member at `index` without re-querying anything.
    pub fn select(&self, index: usize) -> Result<SelectedSource<'_>, AppError> {
        if index >= self.members.len() {
            return Err(AppError::InvalidInput(format!(
                "source index {} out of range for a cluster of {}",
                index,
                self.members.len()
            )));
        }
        Ok(SelectedSource {
            cluster: self,
            index,
        })
    }

    /// Source-system labels of all members, in member order.
    pub fn source_systems(&self) -> Vec<&str> {
        self.members.iter().map(|e| e.source_system.as_str()).collect()
    }

    pub fn into_members(self) -> Vec<Entity> {
        self.members
    }
}

/// Presentation form: the primary record's fields plus merge metadata.
impl Serialize for EntityCluster {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(serde::Serialize)]
        struct View<'a> {
            #[serde(flatten)]
            primary: &'a Entity,
            is_merged: bool,
            source_count: usize,
            all_sources: &'a [Entity],
        }

        View {
            primary: self.primary(),
            is_merged: self.is_merged(),
            source_count: self.source_count(),
            all_sources: self.all_sources(),
        }
        .serialize(serializer)
    }
}

/// A cluster together with the member the viewer is currently looking at.
#[derive(Debug, Clone, Copy)]
pub struct SelectedSource<'a> {
    cluster: &'a EntityCluster,
    index: usize,
}

impl<'a> SelectedSource<'a> {
    /// Selection at `index`, pinned to the last member when out of range.
    pub(crate) fn clamped(cluster: &'a EntityCluster, index: usize) -> Self {
        Self {
            cluster,
            index: index.min(cluster.members.len() - 1),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn entity(&self) -> &'a Entity {
        &self.cluster.members[self.index]
    }

    pub fn cluster(&self) -> &'a EntityCluster {
        self.cluster
    }
}

fn same_fiscal_code(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Groups records by fiscal code, keeping first-seen cluster order.
///
/// Records with a blank fiscal code are dropped.
pub fn group_by_fiscal_code(records: Vec<Entity>) -> Vec<EntityCluster> {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<Entity>> = Vec::new();
    let mut dropped = 0usize;

    for record in records {
        if !record.has_fiscal_code() {
            dropped += 1;
            continue;
        }
        match slots.get(&record.fiscal_code) {
            Some(&slot) => groups[slot].push(record),
            None => {
                slots.insert(record.fiscal_code.clone(), groups.len());
                groups.push(vec![record]);
            }
        }
    }

    if dropped > 0 {
        tracing::debug!("Dropped {} record(s) without a fiscal code", dropped);
    }

    groups
        .into_iter()
        .map(|members| EntityCluster {
            fiscal_code: members[0].fiscal_code.clone(),
            members,
        })
        .collect()
}

/// Concatenates cluster members back into one record list.
pub fn flatten(clusters: Vec<EntityCluster>) -> Vec<Entity> {
    clusters
        .into_iter()
        .flat_map(EntityCluster::into_members)
        .collect()
}

/// Clusters on 1-based `page` when `per_page` clusters fit on a page.
pub fn page_of(clusters: &[EntityCluster], page: u32, per_page: u32) -> &[EntityCluster] {
    if page == 0 || per_page == 0 {
        return &[];
    }
    let per_page = per_page as usize;
    let start = (page as usize - 1).saturating_mul(per_page);
    if start >= clusters.len() {
        return &[];
    }
    let end = (start + per_page).min(clusters.len());
    &clusters[start..end]
}
