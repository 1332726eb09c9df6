//! Memory write path.
//!
//! Inserts are synchronous by default; fire-and-forget writes run on
//! independent worker threads tracked in a mutex-guarded registry so
//! `flush` can join them with a per-write deadline. There is no
//! cancellation primitive for an in-flight write.

use super::{record_operation, sql};
use crate::models::{Memory, MemoryId, MemoryType, Priority, RememberRequest};
use crate::remote::Executor;
use crate::{Error, Result};
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Config key holding the running tag vocabulary.
const TAG_VOCABULARY_KEY: &str = "memory.tag_vocabulary";

/// Completion signal shared between a worker thread and `flush`.
struct Signal {
    done: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    fn new() -> Self {
        Self {
            done: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    fn complete(&self) {
        let mut done = self
            .done
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *done = true;
        drop(done);
        self.cond.notify_all();
    }

    /// Waits up to `timeout`; returns whether the write completed.
    fn wait(&self, timeout: Duration) -> bool {
        let done = self
            .done
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let (done, _) = self
            .cond
            .wait_timeout_while(done, timeout, |done| !*done)
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *done
    }
}

struct PendingWrite {
    id: u64,
    label: &'static str,
    signal: Arc<Signal>,
}

/// Registry of outstanding background writes.
///
/// An entry is added before the write starts and removed on completion,
/// so `flush` always sees every write that might still be in flight.
pub struct WriteRegistry {
    pending: Mutex<Vec<PendingWrite>>,
    next_id: AtomicU64,
}

impl WriteRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Spawns a tracked worker thread running `op`.
    pub(crate) fn spawn<F>(self: &Arc<Self>, label: &'static str, op: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let signal = Arc::new(Signal::new());

        {
            let mut pending = self
                .pending
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            pending.push(PendingWrite {
                id,
                label,
                signal: Arc::clone(&signal),
            });
        }

        let registry = Arc::clone(self);
        std::thread::spawn(move || {
            if let Err(err) = op() {
                tracing::warn!(label, error = %err, "background write failed");
            }
            signal.complete();
            let mut pending = registry
                .pending
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            pending.retain(|entry| entry.id != id);
        });
    }

    /// Joins all currently-tracked writes, each up to `timeout`.
    #[must_use]
    pub fn flush(&self, timeout: Duration) -> FlushReport {
        let snapshot: Vec<(&'static str, Arc<Signal>)> = {
            let pending = self
                .pending
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            pending
                .iter()
                .map(|entry| (entry.label, Arc::clone(&entry.signal)))
                .collect()
        };

        let mut report = FlushReport::default();
        for (label, signal) in snapshot {
            if signal.wait(timeout) {
                report.completed += 1;
            } else {
                tracing::warn!(label, timeout_ms = timeout.as_millis() as u64, "flush timed out");
                report.timed_out += 1;
            }
        }
        report
    }

    /// Number of writes currently tracked.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

impl Default for WriteRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Writes that completed within their deadline.
    pub completed: usize,
    /// Writes still in flight when their deadline passed.
    pub timed_out: usize,
}

impl<E: Executor> super::MemoryStore<E> {
    /// Stores a new memory and returns its id.
    ///
    /// With `sync` set (the default) the insert blocks; otherwise it runs
    /// as a tracked background write with no ordering guarantee relative
    /// to later reads until [`super::MemoryStore::flush`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] before any network call when the
    /// type is outside the closed set or the summary is empty.
    pub fn remember(&self, request: RememberRequest) -> Result<MemoryId> {
        let start = Instant::now();
        let memory = build_memory(&request)?;
        let id = memory.id.clone();

        let result = if request.sync {
            self.insert_and_bookkeep(&memory)
        } else {
            let executor = Arc::clone(self.executor());
            self.registry().spawn("remember", move || {
                insert_and_bookkeep_on(executor.as_ref(), &memory)
            });
            Ok(())
        };

        record_operation("remember", start, result.is_ok());
        result.map(|()| id)
    }

    /// Stores several memories in one batched round trip.
    ///
    /// Items are validated independently: an invalid item yields an error
    /// in its slot without aborting its siblings, and only valid items
    /// are sent to the store.
    pub fn remember_batch(
        &self,
        items: Vec<RememberRequest>,
        sync: bool,
    ) -> Result<Vec<Result<MemoryId>>> {
        let start = Instant::now();

        let mut slots: Vec<Result<MemoryId>> = Vec::with_capacity(items.len());
        let mut memories: Vec<Memory> = Vec::new();
        // Maps each valid memory back to its slot.
        let mut slot_of: Vec<usize> = Vec::new();

        for (slot, item) in items.iter().enumerate() {
            match build_memory(item) {
                Ok(memory) => {
                    slots.push(Ok(memory.id.clone()));
                    slot_of.push(slot);
                    memories.push(memory);
                },
                Err(err) => slots.push(Err(err)),
            }
        }

        if memories.is_empty() {
            record_operation("remember_batch", start, true);
            return Ok(slots);
        }

        if sync {
            let outcomes = self.insert_many(&memories);
            match outcomes {
                Ok(per_memory) => {
                    for (i, outcome) in per_memory.into_iter().enumerate() {
                        if let Err(err) = outcome {
                            slots[slot_of[i]] = Err(err);
                        }
                    }
                },
                Err(err) => {
                    record_operation("remember_batch", start, false);
                    return Err(err);
                },
            }
        } else {
            let executor = Arc::clone(self.executor());
            self.registry().spawn("remember_batch", move || {
                let mut statements = Vec::new();
                for memory in &memories {
                    statements.extend(sql::insert_memory(memory));
                }
                let outcomes = executor.exec_batch(statements)?;
                for outcome in outcomes {
                    outcome?;
                }
                for memory in &memories {
                    update_tag_vocabulary(executor.as_ref(), &memory.tags);
                }
                Ok(())
            });
        }

        record_operation("remember_batch", start, true);
        Ok(slots)
    }

    /// Inserts one memory synchronously, then runs best-effort
    /// bookkeeping.
    fn insert_and_bookkeep(&self, memory: &Memory) -> Result<()> {
        insert_and_bookkeep_on(self.executor().as_ref(), memory)
    }

    /// Inserts a batch and maps slot outcomes back per memory (two
    /// statements per memory: row and text index).
    fn insert_many(&self, memories: &[Memory]) -> Result<Vec<Result<()>>> {
        let mut statements = Vec::with_capacity(memories.len() * 2);
        for memory in memories {
            statements.extend(sql::insert_memory(memory));
        }
        let mut outcomes = self.executor().exec_batch(statements)?.into_iter();

        let mut per_memory = Vec::with_capacity(memories.len());
        for memory in memories {
            let row = outcomes.next().unwrap_or_else(|| Ok(Vec::new()));
            let fts = outcomes.next().unwrap_or_else(|| Ok(Vec::new()));
            let outcome = row.and(fts).map(|_| ());
            if outcome.is_ok() {
                update_tag_vocabulary(self.executor().as_ref(), &memory.tags);
            }
            per_memory.push(outcome);
        }
        Ok(per_memory)
    }
}

/// Validates a request and builds the memory record.
fn build_memory(request: &RememberRequest) -> Result<Memory> {
    build_memory_at(request, Utc::now())
}

/// As [`build_memory`] with an explicit creation instant, so callers
/// batching a delete with an insert can stamp both identically.
pub(crate) fn build_memory_at(
    request: &RememberRequest,
    now: chrono::DateTime<Utc>,
) -> Result<Memory> {
    let memory_type = MemoryType::parse(&request.memory_type)?;
    if request.what.trim().is_empty() {
        return Err(Error::InvalidInput("summary must not be empty".to_string()));
    }
    if let Some(confidence) = request.confidence {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(Error::InvalidInput(format!(
                "confidence {confidence} outside [0, 1]"
            )));
        }
    }

    Ok(Memory {
        id: MemoryId::generate(),
        memory_type,
        t: now,
        created_at: now,
        updated_at: now,
        valid_from: request.valid_from.unwrap_or(now),
        summary: request.what.clone(),
        confidence: Some(
            request
                .confidence
                .unwrap_or_else(|| memory_type.default_confidence()),
        ),
        tags: request.tags.clone(),
        refs: request.refs.clone(),
        priority: Priority::new(request.priority),
        session_id: request.session_id.clone(),
        access_count: 0,
        last_accessed: None,
        deleted_at: None,
    })
}

fn insert_and_bookkeep_on<E: Executor + ?Sized>(executor: &E, memory: &Memory) -> Result<()> {
    let outcomes = executor.exec_batch(sql::insert_memory(memory))?;
    for outcome in outcomes {
        outcome?;
    }
    update_tag_vocabulary(executor, &memory.tags);
    Ok(())
}

/// Appends novel tags to the running vocabulary config entry.
///
/// Best-effort: a failure here must never fail the write that triggered
/// it, so errors are only logged.
fn update_tag_vocabulary<E: Executor + ?Sized>(executor: &E, tags: &[String]) {
    if tags.is_empty() {
        return;
    }
    let result = (|| -> Result<()> {
        let rows = executor.exec(sql::config_get(TAG_VOCABULARY_KEY))?;
        let mut vocabulary: Vec<String> = rows
            .first()
            .map(|row| -> Result<Vec<String>> {
                serde_json::from_str(row.text("value")?)
                    .map_err(|e| Error::InvalidInput(format!("malformed tag vocabulary: {e}")))
            })
            .transpose()?
            .unwrap_or_default();

        let mut changed = false;
        for tag in tags {
            if !vocabulary.contains(tag) {
                vocabulary.push(tag.clone());
                changed = true;
            }
        }
        if !changed {
            return Ok(());
        }
        let value = serde_json::to_string(&vocabulary)
            .map_err(|e| Error::InvalidInput(format!("tag vocabulary encode: {e}")))?;
        executor.exec(sql::config_set(TAG_VOCABULARY_KEY, &value, "memory"))?;
        Ok(())
    })();
    if let Err(err) = result {
        tracing::debug!(error = %err, "tag vocabulary update skipped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_build_memory_applies_type_defaults() {
        let request = RememberRequest::new("note", "decision");
        let memory = build_memory(&request);
        assert!(memory.is_ok());
        if let Ok(memory) = memory {
            assert_eq!(memory.confidence, Some(0.8));
            assert_eq!(memory.priority, Priority::NORMAL);
            assert_eq!(memory.valid_from, memory.created_at);
        }
    }

    #[test]
    fn test_build_memory_rejects_bad_type() {
        let request = RememberRequest::new("note", "nope");
        assert!(matches!(
            build_memory(&request),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_build_memory_rejects_empty_summary() {
        let request = RememberRequest::new("  ", "world");
        assert!(matches!(
            build_memory(&request),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_build_memory_rejects_out_of_range_confidence() {
        let request = RememberRequest::new("note", "world").with_confidence(1.5);
        assert!(matches!(
            build_memory(&request),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_build_memory_clamps_priority() {
        let request = RememberRequest::new("note", "world").with_priority(9);
        let memory = build_memory(&request).unwrap();
        assert_eq!(memory.priority, Priority::CRITICAL);
    }

    #[test]
    fn test_registry_tracks_and_flushes() {
        let registry = Arc::new(WriteRegistry::new());
        registry.spawn("test", || {
            std::thread::sleep(Duration::from_millis(100));
            Ok(())
        });
        assert_eq!(registry.outstanding(), 1);
        let report = registry.flush(Duration::from_secs(2));
        assert_eq!(report.timed_out, 0);
        assert_eq!(report.completed, 1);
    }

    #[test]
    fn test_flush_reports_timeouts() {
        let registry = Arc::new(WriteRegistry::new());
        registry.spawn("slow", || {
            std::thread::sleep(Duration::from_millis(300));
            Ok(())
        });
        let report = registry.flush(Duration::from_millis(5));
        assert_eq!(report.completed, 0);
        assert_eq!(report.timed_out, 1);
        // A later flush with a generous deadline sees it complete.
        let report = registry.flush(Duration::from_secs(2));
        assert_eq!(report.timed_out, 0);
    }
}
