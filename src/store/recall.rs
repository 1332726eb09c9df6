//! Ranked retrieval.
//!
//! Non-strict recalls oversample from the store, rescore client-side
//! with the composite score, optionally backfill thin result sets by
//! harvesting tags from the partial results, and touch access counters
//! in the background.

use super::{memory_from_row, record_operation, sql};
use crate::models::{Memory, MemoryId, RecallRequest, TagMode};
use crate::remote::{Executor, Row};
use crate::Result;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

/// Priority weight in the composite score.
const PRIORITY_WEIGHT: f64 = 0.3;
/// Per-day recency decay factor.
const RECENCY_DECAY: f64 = 0.01;
/// Access-count weight for episodic scoring.
const ACCESS_WEIGHT: f64 = 0.2;

impl<E: Executor> super::MemoryStore<E> {
    /// Retrieves memories matching `request`, ranked by composite score
    /// unless `strict` is set.
    ///
    /// Soft-deleted and superseded memories never appear. Returned
    /// memories have their access counters updated as a background side
    /// effect.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] before any network call on
    /// conflicting tag aliases or a wildcard search without `fetch_all`.
    pub fn recall(&self, request: &RecallRequest) -> Result<Vec<Memory>> {
        let start = Instant::now();
        let result = self.recall_inner(request);
        record_operation("recall", start, result.is_ok());
        result
    }

    fn recall_inner(&self, request: &RecallRequest) -> Result<Vec<Memory>> {
        let (tags, tag_mode) = request.validate()?;
        let rows = self
            .executor()
            .exec(sql::build_recall(request, &tags, tag_mode))?;

        let ranked = request.effective_search().is_some();
        let mut memories = decode_ranked(&rows, request, ranked)?;

        let threshold = self.config().expansion_threshold;
        if !request.strict && threshold > 0 && memories.len() < threshold {
            self.expand(request, &mut memories)?;
        }
        memories.truncate(request.limit);

        self.touch_in_background(&memories);
        Ok(memories)
    }

    /// Memories observed at or after `after`, newest first.
    pub fn recall_since(&self, after: DateTime<Utc>, limit: usize) -> Result<Vec<Memory>> {
        self.recall(
            &RecallRequest::new()
                .fetch_all()
                .strict()
                .with_since(after)
                .with_limit(limit),
        )
    }

    /// Memories observed in `[after, before)`, newest first.
    pub fn recall_between(
        &self,
        after: DateTime<Utc>,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Memory>> {
        self.recall(
            &RecallRequest::new()
                .fetch_all()
                .strict()
                .with_since(after)
                .with_until(before)
                .with_limit(limit),
        )
    }

    /// Executes several independent recalls as one batched round trip.
    ///
    /// One result list per input query, in order; a per-query failure
    /// yields an error in its slot without affecting siblings. Batch
    /// slots skip query expansion.
    pub fn recall_batch(
        &self,
        requests: &[RecallRequest],
    ) -> Result<Vec<Result<Vec<Memory>>>> {
        let start = Instant::now();

        let mut slots: Vec<Option<Result<Vec<Memory>>>> = Vec::with_capacity(requests.len());
        let mut statements = Vec::new();
        // Maps each sent statement back to its slot.
        let mut slot_of = Vec::new();
        let mut ranked_of = Vec::new();

        for (slot, request) in requests.iter().enumerate() {
            match request.validate() {
                Ok((tags, tag_mode)) => {
                    statements.push(sql::build_recall(request, &tags, tag_mode));
                    slot_of.push(slot);
                    ranked_of.push(request.effective_search().is_some());
                    slots.push(None);
                },
                Err(err) => slots.push(Some(Err(err))),
            }
        }

        if !statements.is_empty() {
            let outcomes = match self.executor().exec_batch(statements) {
                Ok(outcomes) => outcomes,
                Err(err) => {
                    record_operation("recall_batch", start, false);
                    return Err(err);
                },
            };
            let mut touched = Vec::new();
            for (i, outcome) in outcomes.into_iter().enumerate() {
                let request = &requests[slot_of[i]];
                let decoded = outcome.and_then(|rows| {
                    let mut memories = decode_ranked(&rows, request, ranked_of[i])?;
                    memories.truncate(request.limit);
                    Ok(memories)
                });
                if let Ok(memories) = &decoded {
                    touched.extend(memories.iter().map(|m| m.id.clone()));
                }
                slots[slot_of[i]] = Some(decoded);
            }
            self.touch_ids_in_background(touched);
        }

        record_operation("recall_batch", start, true);
        Ok(slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| Ok(Vec::new())))
            .collect())
    }

    /// Backfills a thin result set by searching on the tags the partial
    /// results carry, deduplicating by id.
    fn expand(&self, request: &RecallRequest, memories: &mut Vec<Memory>) -> Result<()> {
        let harvested: Vec<String> = {
            let mut seen = HashSet::new();
            memories
                .iter()
                .flat_map(|m| m.tags.iter())
                .filter(|tag| seen.insert((*tag).clone()))
                .cloned()
                .collect()
        };
        if harvested.is_empty() {
            return Ok(());
        }

        let supplement = RecallRequest::new()
            .fetch_all()
            .with_tags(harvested.clone())
            .with_limit(request.limit);
        let rows = self
            .executor()
            .exec(sql::build_recall(&supplement, &harvested, TagMode::Any))?;

        let known: HashSet<MemoryId> = memories.iter().map(|m| m.id.clone()).collect();
        for row in &rows {
            if memories.len() >= request.limit {
                break;
            }
            let memory = memory_from_row(row)?;
            if !known.contains(&memory.id) {
                tracing::debug!(id = %memory.id, "recall expansion backfill");
                memories.push(memory);
            }
        }
        Ok(())
    }

    fn touch_in_background(&self, memories: &[Memory]) {
        self.touch_ids_in_background(memories.iter().map(|m| m.id.clone()).collect());
    }

    /// Updates access counters without blocking the recall. Best-effort.
    fn touch_ids_in_background(&self, ids: Vec<MemoryId>) {
        if ids.is_empty() {
            return;
        }
        let executor = Arc::clone(self.executor());
        self.registry().spawn("touch_access", move || {
            executor.exec(sql::touch_access(&ids, Utc::now()))?;
            Ok(())
        });
    }
}

/// Decodes rows and, for ranked requests, rescores and reorders by
/// composite score.
fn decode_ranked(rows: &[Row], request: &RecallRequest, ranked: bool) -> Result<Vec<Memory>> {
    if request.strict || !ranked {
        return rows.iter().map(memory_from_row).collect();
    }

    let now = Utc::now();
    let mut scored: Vec<(f64, Memory)> = Vec::with_capacity(rows.len());
    for row in rows {
        let relevance = relevance_from_rank(row.opt_float("rank")?);
        let memory = memory_from_row(row)?;
        let score = composite_score(&memory, relevance, now, request.episodic);
        scored.push((score, memory));
    }
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    Ok(scored.into_iter().map(|(_, memory)| memory).collect())
}

/// Maps a bm25 rank (negative is better) to a non-negative relevance.
fn relevance_from_rank(rank: Option<f64>) -> f64 {
    rank.map_or(1.0, |r| (-r).max(0.0))
}

/// `relevance x (1 + priority x 0.3) x recency_decay`, with an optional
/// access-frequency boost for episodic recalls.
#[allow(clippy::cast_precision_loss)]
fn composite_score(memory: &Memory, relevance: f64, now: DateTime<Utc>, episodic: bool) -> f64 {
    let age_days = (now - memory.t).num_seconds().max(0) as f64 / 86_400.0;
    let recency = 1.0 / (1.0 + age_days * RECENCY_DECAY);
    let priority_boost = 1.0 + f64::from(memory.priority.value()) * PRIORITY_WEIGHT;
    let mut score = relevance * priority_boost * recency;
    if episodic {
        let accesses = memory.access_count as f64;
        score *= 1.0 + (1.0 + accesses).ln() * ACCESS_WEIGHT;
    }
    score
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::models::{MemoryType, Priority};

    fn memory_at(age_days: i64, priority: i8, access_count: u64) -> Memory {
        let now = Utc::now();
        let t = now - chrono::Duration::days(age_days);
        Memory {
            id: MemoryId::generate(),
            memory_type: MemoryType::World,
            t,
            created_at: t,
            updated_at: t,
            valid_from: t,
            summary: "fact".to_string(),
            confidence: Some(0.7),
            tags: Vec::new(),
            refs: Vec::new(),
            priority: Priority::new(priority),
            session_id: None,
            access_count,
            last_accessed: None,
            deleted_at: None,
        }
    }

    #[test]
    fn test_composite_score_rewards_priority() {
        let now = Utc::now();
        let low = composite_score(&memory_at(0, 0, 0), 1.0, now, false);
        let high = composite_score(&memory_at(0, 2, 0), 1.0, now, false);
        assert!(high > low);
        assert!((high / low - 1.6).abs() < 1e-9);
    }

    #[test]
    fn test_composite_score_decays_with_age() {
        let now = Utc::now();
        let fresh = composite_score(&memory_at(0, 0, 0), 1.0, now, false);
        let stale = composite_score(&memory_at(100, 0, 0), 1.0, now, false);
        assert!(fresh > stale);
        // 100 days at 0.01/day halves the score.
        assert!((stale / fresh - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_episodic_boost_requires_accesses() {
        let now = Utc::now();
        let memory = memory_at(0, 0, 0);
        let plain = composite_score(&memory, 1.0, now, false);
        let episodic = composite_score(&memory, 1.0, now, true);
        assert!((plain - episodic).abs() < 1e-9);

        let accessed = memory_at(0, 0, 20);
        assert!(composite_score(&accessed, 1.0, now, true) > plain);
    }

    #[test]
    fn test_background_priority_penalizes() {
        let now = Utc::now();
        let normal = composite_score(&memory_at(0, 0, 0), 1.0, now, false);
        let demoted = composite_score(&memory_at(0, -1, 0), 1.0, now, false);
        assert!(demoted < normal);
    }

    #[test]
    fn test_relevance_from_rank_negates_bm25() {
        assert!((relevance_from_rank(Some(-2.5)) - 2.5).abs() < 1e-9);
        assert!((relevance_from_rank(None) - 1.0).abs() < 1e-9);
        // A positive bm25 value clamps to zero rather than going negative.
        assert!(relevance_from_rank(Some(0.5)).abs() < 1e-9);
    }
}
