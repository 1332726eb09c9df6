//! Versioning and the reference graph.
//!
//! `supersede` is the bitemporal correction primitive: the old fact's
//! validity ends exactly when the new fact's begins, and the new memory
//! carries the old id in `refs` so chains stay traversable.

use super::{memory_from_row, record_operation, sql};
use crate::models::{Alternative, ChainEntry, Memory, MemoryId, MemoryType, RememberRequest};
use crate::remote::Executor;
use crate::{Error, Result};
use chrono::Utc;
use std::collections::HashSet;
use std::time::Instant;

/// Hard cap on chain traversal depth.
pub const MAX_CHAIN_DEPTH: usize = 10;

impl<E: Executor> super::MemoryStore<E> {
    /// Replaces `original_id` with a corrected memory and returns the
    /// new id.
    ///
    /// The soft-delete of the original and the insert of the replacement
    /// are sent as one batched round trip. When `tags` is empty the
    /// replacement inherits the original's tags.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when `original_id` does not name
    /// an active memory, before any mutation is sent.
    pub fn supersede(
        &self,
        original_id: &MemoryId,
        summary: impl Into<String>,
        memory_type: &str,
        tags: Vec<String>,
    ) -> Result<MemoryId> {
        let start = Instant::now();
        let result = self.supersede_inner(original_id, summary.into(), memory_type, tags);
        record_operation("supersede", start, result.is_ok());
        result
    }

    fn supersede_inner(
        &self,
        original_id: &MemoryId,
        summary: String,
        memory_type: &str,
        tags: Vec<String>,
    ) -> Result<MemoryId> {
        let memory_type = MemoryType::parse(memory_type)?;
        let original = self.fetch_active(original_id)?.ok_or_else(|| {
            Error::InvalidInput(format!("cannot supersede {original_id}: no active memory"))
        })?;

        let now = Utc::now();
        let request = RememberRequest::new(summary, memory_type.as_str())
            .with_tags(if tags.is_empty() { original.tags } else { tags })
            .with_refs(vec![crate::models::Ref::id(original_id.clone())])
            .with_valid_from(now);
        let replacement = super::write::build_memory_at(&request, now)?;
        let new_id = replacement.id.clone();

        let mut statements = vec![sql::soft_delete(original_id, now)];
        statements.extend(sql::insert_memory(&replacement));
        let outcomes = self.executor().exec_batch(statements)?;
        for outcome in outcomes {
            outcome?;
        }
        Ok(new_id)
    }

    /// Soft-deletes a memory.
    ///
    /// Idempotent: returns `Ok(false)` when the memory is already gone
    /// or never existed, `Ok(true)` when this call deleted it.
    pub fn forget(&self, id: &MemoryId) -> Result<bool> {
        let start = Instant::now();
        let result = self.forget_inner(id);
        record_operation("forget", start, result.is_ok());
        result
    }

    fn forget_inner(&self, id: &MemoryId) -> Result<bool> {
        let rows = self.executor().exec(sql::count_active(id))?;
        let active = rows
            .first()
            .map(|row| row.integer("n"))
            .transpose()?
            .unwrap_or(0);
        if active == 0 {
            return Ok(false);
        }
        self.executor().exec(sql::soft_delete(id, Utc::now()))?;
        Ok(true)
    }

    /// Traverses plain-id references outward from `root_id`, breadth
    /// first, up to `depth` levels (hard-capped at [`MAX_CHAIN_DEPTH`]).
    ///
    /// Typed objects in `refs` (alternatives, cluster markers) are
    /// skipped. A visited-set guard terminates cyclic graphs. The root
    /// itself is emitted at depth 0; soft-deleted ancestors are included
    /// since a supersede chain is made of them.
    pub fn get_chain(&self, root_id: &MemoryId, depth: usize) -> Result<Vec<ChainEntry>> {
        let start = Instant::now();
        let result = self.get_chain_inner(root_id, depth.min(MAX_CHAIN_DEPTH));
        record_operation("get_chain", start, result.is_ok());
        result
    }

    fn get_chain_inner(&self, root_id: &MemoryId, depth: usize) -> Result<Vec<ChainEntry>> {
        let root = self
            .fetch_any(root_id)?
            .ok_or_else(|| Error::InvalidInput(format!("no memory with id {root_id}")))?;

        let mut visited: HashSet<MemoryId> = HashSet::new();
        visited.insert(root.id.clone());
        let mut frontier: Vec<MemoryId> = root.plain_refs().cloned().collect();
        let mut chain = vec![ChainEntry {
            memory: root,
            depth: 0,
        }];

        let mut level = 1;
        while !frontier.is_empty() && level <= depth {
            frontier.retain(|id| visited.insert(id.clone()));
            if frontier.is_empty() {
                break;
            }
            let statements = frontier.iter().map(sql::select_by_id).collect();
            let outcomes = self.executor().exec_batch(statements)?;

            let mut next = Vec::new();
            for outcome in outcomes {
                let Some(row) = outcome?.into_iter().next() else {
                    // Dangling reference; skip it.
                    continue;
                };
                let memory = memory_from_row(&row)?;
                next.extend(
                    memory
                        .plain_refs()
                        .filter(|id| !visited.contains(*id))
                        .cloned(),
                );
                chain.push(ChainEntry {
                    memory,
                    depth: level,
                });
            }
            frontier = next;
            level += 1;
        }
        Ok(chain)
    }

    /// Extracts the typed alternatives object from a decision memory's
    /// `refs`, if present.
    pub fn get_alternatives(&self, id: &MemoryId) -> Result<Vec<Alternative>> {
        let memory = self
            .fetch_any(id)?
            .ok_or_else(|| Error::InvalidInput(format!("no memory with id {id}")))?;
        Ok(memory.alternatives())
    }

    pub(crate) fn fetch_active(&self, id: &MemoryId) -> Result<Option<Memory>> {
        Ok(self.fetch_any(id)?.filter(|memory| !memory.is_deleted()))
    }

    pub(crate) fn fetch_any(&self, id: &MemoryId) -> Result<Option<Memory>> {
        let rows = self.executor().exec(sql::select_by_id(id))?;
        rows.first().map(memory_from_row).transpose()
    }
}
