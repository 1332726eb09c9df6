//! Consolidation and retention report types.

use super::memory::MemoryId;
use serde::Serialize;

/// Parameters for a consolidation pass.
#[derive(Debug, Clone)]
pub struct ConsolidationRequest {
    /// Optional tag filter: only memories carrying any of these tags are
    /// considered for clustering.
    pub tags: Vec<String>,
    /// Minimum cluster size; smaller clusters are discarded.
    pub min_cluster: usize,
    /// When `true` (the default), return cluster previews without
    /// mutating anything.
    pub dry_run: bool,
}

impl Default for ConsolidationRequest {
    fn default() -> Self {
        Self {
            tags: Vec::new(),
            min_cluster: 3,
            dry_run: true,
        }
    }
}

impl ConsolidationRequest {
    /// Creates a dry-run request with the default cluster size.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts clustering to memories carrying any of `tags`.
    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Sets the minimum cluster size.
    #[must_use]
    pub const fn with_min_cluster(mut self, min_cluster: usize) -> Self {
        self.min_cluster = min_cluster;
        self
    }

    /// Switches from preview to execute mode.
    #[must_use]
    pub const fn execute(mut self) -> Self {
        self.dry_run = false;
        self
    }
}

/// One cluster found during consolidation.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterPreview {
    /// The shared tag the cluster formed around.
    pub tag: String,
    /// Members assigned to this cluster, in processing order.
    pub member_ids: Vec<MemoryId>,
}

impl ClusterPreview {
    /// Number of members in the cluster.
    #[must_use]
    pub fn size(&self) -> usize {
        self.member_ids.len()
    }
}

/// Outcome of a consolidation pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsolidationReport {
    /// Clusters found (and, in execute mode, merged).
    pub clusters: Vec<ClusterPreview>,
    /// Summary memories created. Zero in dry-run mode.
    pub consolidated: usize,
    /// Member memories demoted to background priority. Zero in dry-run
    /// mode.
    pub demoted: usize,
}

impl ConsolidationReport {
    /// Returns a human-readable summary.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.clusters.is_empty() {
            "No clusters to consolidate".to_string()
        } else {
            format!(
                "Clusters: {}, Consolidated: {}, Demoted: {}",
                self.clusters.len(),
                self.consolidated,
                self.demoted
            )
        }
    }
}

/// Outcome of a pruning pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneReport {
    /// Memories eligible for soft deletion.
    pub candidates: Vec<MemoryId>,
    /// Memories actually soft-deleted. Zero in dry-run mode.
    pub pruned: usize,
}
