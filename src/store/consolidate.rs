//! Tag-cluster consolidation.
//!
//! Groups active memories by shared tag, synthesizes one summary memory
//! per surviving cluster, and demotes the members to background priority
//! instead of deleting them. Demoted members are stamped with the
//! "consolidated" tag so later passes skip them.

use super::{memory_from_row, record_operation, sql};
use crate::models::{
    ClusterPreview, ConsolidationReport, ConsolidationRequest, Memory, MemoryId, Ref,
    RememberRequest,
};
use crate::remote::Executor;
use crate::Result;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

/// Tag stamped on cluster members and their synthesized summary.
const CONSOLIDATED_TAG: &str = "consolidated";

impl<E: Executor> super::MemoryStore<E> {
    /// Runs a consolidation pass.
    ///
    /// Dry-run (the default) returns cluster previews and mutates
    /// nothing: repeated calls with identical store contents produce
    /// identical previews. Execute mode synthesizes one "world" memory
    /// per cluster and demotes every member.
    pub fn consolidate(&self, request: &ConsolidationRequest) -> Result<ConsolidationReport> {
        let start = Instant::now();
        let result = self.consolidate_inner(request);
        record_operation("consolidate", start, result.is_ok());
        result
    }

    fn consolidate_inner(&self, request: &ConsolidationRequest) -> Result<ConsolidationReport> {
        let rows = self
            .executor()
            .exec(sql::consolidation_candidates(&request.tags))?;
        let candidates: Vec<Memory> = rows.iter().map(memory_from_row).collect::<Result<_>>()?;

        let clusters = cluster_by_tag(&candidates, request.min_cluster);
        if request.dry_run {
            return Ok(ConsolidationReport {
                clusters,
                consolidated: 0,
                demoted: 0,
            });
        }

        let by_id: HashMap<&MemoryId, &Memory> =
            candidates.iter().map(|m| (&m.id, m)).collect();
        let mut consolidated = 0;
        let mut demoted = 0;
        for cluster in &clusters {
            let members: Vec<&Memory> = cluster
                .member_ids
                .iter()
                .filter_map(|id| by_id.get(id).copied())
                .collect();
            self.merge_cluster(cluster, &members)?;
            consolidated += 1;
            demoted += members.len();
        }

        tracing::info!(
            clusters = clusters.len(),
            consolidated,
            demoted,
            "consolidation pass complete"
        );
        Ok(ConsolidationReport {
            clusters,
            consolidated,
            demoted,
        })
    }

    /// Synthesizes the cluster summary and demotes its members, all in
    /// one batched round trip.
    fn merge_cluster(&self, cluster: &ClusterPreview, members: &[&Memory]) -> Result<()> {
        let summary = members
            .iter()
            .map(|m| m.summary.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        let mut refs: Vec<Ref> = cluster.member_ids.iter().cloned().map(Ref::id).collect();
        refs.push(Ref::cluster(cluster.tag.clone(), cluster.size()));

        let request = RememberRequest::new(summary, "world")
            .with_tags(vec![cluster.tag.clone(), CONSOLIDATED_TAG.to_string()])
            .with_refs(refs)
            .with_priority(1);
        let now = Utc::now();
        let synthesized = super::write::build_memory_at(&request, now)?;

        let mut statements = sql::insert_memory(&synthesized);
        for member in members {
            let mut tags = member.tags.clone();
            if !tags.iter().any(|t| t == CONSOLIDATED_TAG) {
                tags.push(CONSOLIDATED_TAG.to_string());
            }
            statements.push(sql::demote_member(&member.id, &tags, -1, now));
        }
        let outcomes = self.executor().exec_batch(statements)?;
        for outcome in outcomes {
            outcome?;
        }
        Ok(())
    }
}

/// Greedy disjoint clustering.
///
/// Tags are processed by descending member count (ties broken by tag
/// name so output is deterministic); each memory joins at most one
/// cluster, the largest tag it still qualifies for. Tags whose remaining
/// unassigned members fall below `min_cluster` are discarded.
fn cluster_by_tag(candidates: &[Memory], min_cluster: usize) -> Vec<ClusterPreview> {
    let mut by_tag: BTreeMap<&str, Vec<&MemoryId>> = BTreeMap::new();
    for memory in candidates {
        for tag in &memory.tags {
            by_tag.entry(tag.as_str()).or_default().push(&memory.id);
        }
    }

    let mut order: Vec<(&str, usize)> = by_tag
        .iter()
        .map(|(tag, members)| (*tag, members.len()))
        .collect();
    order.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    let mut assigned: HashSet<&MemoryId> = HashSet::new();
    let mut clusters = Vec::new();
    for (tag, _) in order {
        let member_ids: Vec<MemoryId> = by_tag[tag]
            .iter()
            .filter(|id| !assigned.contains(*id))
            .map(|id| (*id).clone())
            .collect();
        if member_ids.len() < min_cluster {
            continue;
        }
        for id in &by_tag[tag] {
            assigned.insert(*id);
        }
        clusters.push(ClusterPreview {
            tag: tag.to_string(),
            member_ids,
        });
    }
    clusters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MemoryType, Priority};

    fn tagged(tags: &[&str]) -> Memory {
        let now = Utc::now();
        Memory {
            id: MemoryId::generate(),
            memory_type: MemoryType::World,
            t: now,
            created_at: now,
            updated_at: now,
            valid_from: now,
            summary: "fact".to_string(),
            confidence: Some(0.7),
            tags: tags.iter().map(ToString::to_string).collect(),
            refs: Vec::new(),
            priority: Priority::NORMAL,
            session_id: None,
            access_count: 0,
            last_accessed: None,
            deleted_at: None,
        }
    }

    #[test]
    fn test_clusters_are_disjoint() {
        // Four memories carry "a", three of those also carry "b".
        let candidates = vec![
            tagged(&["a", "b"]),
            tagged(&["a", "b"]),
            tagged(&["a", "b"]),
            tagged(&["a"]),
        ];
        let clusters = cluster_by_tag(&candidates, 3);
        // "a" has four members and wins; "b" has nothing left.
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].tag, "a");
        assert_eq!(clusters[0].size(), 4);
    }

    #[test]
    fn test_small_clusters_discarded() {
        let candidates = vec![tagged(&["a"]), tagged(&["a"])];
        assert!(cluster_by_tag(&candidates, 3).is_empty());
    }

    #[test]
    fn test_tie_break_is_deterministic() {
        let candidates = vec![
            tagged(&["b"]),
            tagged(&["b"]),
            tagged(&["b"]),
            tagged(&["a"]),
            tagged(&["a"]),
            tagged(&["a"]),
        ];
        let clusters = cluster_by_tag(&candidates, 3);
        assert_eq!(clusters.len(), 2);
        // Equal counts break ties by tag name.
        assert_eq!(clusters[0].tag, "a");
        assert_eq!(clusters[1].tag, "b");
    }

    #[test]
    fn test_clustering_is_pure() {
        let candidates = vec![tagged(&["t1"]), tagged(&["t1"]), tagged(&["t1"])];
        let first = cluster_by_tag(&candidates, 3);
        let second = cluster_by_tag(&candidates, 3);
        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].member_ids, second[0].member_ids);
    }
}
