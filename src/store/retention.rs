//! Retention: priority adjustments and pruning.

use super::{record_operation, sql};
use crate::models::{MemoryId, Priority, PruneReport};
use crate::remote::Executor;
use crate::{Error, Result};
use chrono::{Duration, Utc};
use std::time::Instant;

impl<E: Executor> super::MemoryStore<E> {
    /// Sets an absolute priority tier, clamped to [-1, 2].
    pub fn reprioritize(&self, id: &MemoryId, priority: i8) -> Result<()> {
        self.set_priority(id, Priority::new(priority))
    }

    /// Raises priority by one tier.
    pub fn strengthen(&self, id: &MemoryId) -> Result<()> {
        self.adjust_priority(id, 1)
    }

    /// Lowers priority by one tier.
    pub fn weaken(&self, id: &MemoryId) -> Result<()> {
        self.adjust_priority(id, -1)
    }

    fn adjust_priority(&self, id: &MemoryId, delta: i8) -> Result<()> {
        let current = self
            .fetch_active(id)?
            .ok_or_else(|| Error::InvalidInput(format!("no active memory with id {id}")))?;
        self.set_priority(id, current.priority.adjusted(delta))
    }

    pub(crate) fn set_priority(&self, id: &MemoryId, priority: Priority) -> Result<()> {
        let start = Instant::now();
        let result = self
            .executor()
            .exec(sql::update_priority(id, priority.value(), Utc::now()))
            .map(|_| ());
        record_operation("reprioritize", start, result.is_ok());
        result
    }

    /// Soft-deletes memories older than `older_than_days` whose priority
    /// is at or below `priority_floor`.
    ///
    /// Dry-run returns the candidate ids without mutating. Execute mode
    /// deletes each candidate through the same path as
    /// [`super::MemoryStore::forget`].
    pub fn prune_by_age(
        &self,
        older_than_days: i64,
        priority_floor: i8,
        dry_run: bool,
    ) -> Result<PruneReport> {
        let cutoff = Utc::now() - Duration::days(older_than_days);
        self.prune(
            sql::prune_by_age_candidates(cutoff, priority_floor),
            dry_run,
        )
    }

    /// Soft-deletes memories whose priority is at or below
    /// `max_priority`, regardless of age.
    pub fn prune_by_priority(&self, max_priority: i8, dry_run: bool) -> Result<PruneReport> {
        self.prune(sql::prune_by_priority_candidates(max_priority), dry_run)
    }

    fn prune(&self, candidates: crate::remote::Statement, dry_run: bool) -> Result<PruneReport> {
        let start = Instant::now();
        let result = self.prune_inner(candidates, dry_run);
        record_operation("prune", start, result.is_ok());
        result
    }

    fn prune_inner(
        &self,
        candidates: crate::remote::Statement,
        dry_run: bool,
    ) -> Result<PruneReport> {
        let rows = self.executor().exec(candidates)?;
        let ids: Vec<MemoryId> = rows
            .iter()
            .map(|row| Ok(MemoryId::new(row.text("id")?)))
            .collect::<Result<_>>()?;

        if dry_run {
            return Ok(PruneReport {
                candidates: ids,
                pruned: 0,
            });
        }

        let mut pruned = 0;
        for id in &ids {
            if self.forget(id)? {
                pruned += 1;
            }
        }
        tracing::info!(candidates = ids.len(), pruned, "prune complete");
        Ok(PruneReport {
            candidates: ids,
            pruned,
        })
    }
}
