//! The memory store: caller-facing surface over the remote access layer.
//!
//! [`MemoryStore`] owns an [`Executor`] and implements the write path,
//! ranked retrieval, versioning, consolidation, and retention on top of
//! its two primitives (single and batched statement execution). The only
//! shared mutable in-process state is the pending-writes registry; the
//! remote store is the single source of truth.

mod consolidate;
mod kv;
mod recall;
mod retention;
pub(crate) mod sql;
mod versioning;
mod write;

pub use write::{FlushReport, WriteRegistry};

use crate::config::EngramConfig;
use crate::models::{Memory, MemoryId, MemoryType, Priority, Ref};
use crate::remote::{Executor, HttpExecutor, RetryPolicy, Row};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A persistent, queryable memory store for an autonomous agent.
pub struct MemoryStore<E: Executor> {
    executor: Arc<E>,
    config: EngramConfig,
    registry: Arc<WriteRegistry>,
}

impl MemoryStore<HttpExecutor> {
    /// Connects to the remote store described by `config`.
    #[must_use]
    pub fn connect(config: EngramConfig) -> Self {
        let executor = HttpExecutor::from_credentials(&config.credentials)
            .with_retry(RetryPolicy::new(
                config.max_retries,
                Duration::from_millis(config.retry_base_delay_ms),
            ))
            .with_timeout(Duration::from_millis(config.http_timeout_ms));
        Self::with_executor(executor, config)
    }
}

impl<E: Executor> MemoryStore<E> {
    /// Creates a store over an explicit executor (tests plug canned-row
    /// executors here).
    #[must_use]
    pub fn with_executor(executor: E, config: EngramConfig) -> Self {
        Self {
            executor: Arc::new(executor),
            config,
            registry: Arc::new(WriteRegistry::new()),
        }
    }

    /// Creates the schema if it does not exist.
    pub fn migrate(&self) -> Result<()> {
        let outcomes = self.executor.exec_batch(sql::migration_statements())?;
        for outcome in outcomes {
            outcome?;
        }
        Ok(())
    }

    /// Joins all currently-tracked background writes, each up to the
    /// configured per-write timeout, and reports completed vs. timed-out
    /// counts. The only explicit synchronization primitive: a `recall`
    /// issued right after a fire-and-forget `remember` may not see it
    /// until a flush.
    #[must_use]
    pub fn flush(&self) -> FlushReport {
        self.registry
            .flush(Duration::from_millis(self.config.flush_timeout_ms))
    }

    /// Installs a best-effort final flush on process interruption.
    ///
    /// A last-resort safety net against losing fire-and-forget writes on
    /// termination, not a substitute for explicit [`MemoryStore::flush`]
    /// calls before anything observable depends on a write.
    pub fn install_exit_flush(&self) {
        let registry = Arc::clone(&self.registry);
        let timeout = Duration::from_millis(self.config.flush_timeout_ms);
        let result = ctrlc::set_handler(move || {
            let report = registry.flush(timeout);
            tracing::info!(
                completed = report.completed,
                timed_out = report.timed_out,
                "exit flush"
            );
            std::process::exit(130);
        });
        if let Err(err) = result {
            tracing::debug!(error = %err, "exit flush hook not installed");
        }
    }

    pub(crate) fn executor(&self) -> &Arc<E> {
        &self.executor
    }

    pub(crate) fn config(&self) -> &EngramConfig {
        &self.config
    }

    pub(crate) fn registry(&self) -> &Arc<WriteRegistry> {
        &self.registry
    }
}

/// Decodes a memory from a result row.
///
/// The single decode path for every query shape, so derived fields stay
/// consistent no matter which statement produced the row.
pub(crate) fn memory_from_row(row: &Row) -> Result<Memory> {
    let tags: Vec<String> = serde_json::from_str(row.text("tags")?)
        .map_err(|e| Error::InvalidInput(format!("malformed tags column: {e}")))?;
    let refs: Vec<Ref> = serde_json::from_str(row.text("refs")?)
        .map_err(|e| Error::InvalidInput(format!("malformed refs column: {e}")))?;
    #[allow(clippy::cast_possible_truncation)]
    let priority = Priority::new(row.integer("priority")? as i8);
    #[allow(clippy::cast_sign_loss)]
    let access_count = row.integer("access_count")?.max(0) as u64;
    Ok(Memory {
        id: MemoryId::new(row.text("id")?),
        memory_type: MemoryType::parse(row.text("type")?)?,
        t: row.datetime("t")?,
        created_at: row.datetime("created_at")?,
        updated_at: row.datetime("updated_at")?,
        valid_from: row.datetime("valid_from")?,
        summary: row.text("summary")?.to_string(),
        confidence: row.opt_float("confidence")?,
        tags,
        refs,
        priority,
        session_id: row.opt_text("session_id")?.map(ToString::to_string),
        access_count,
        last_accessed: row.opt_datetime("last_accessed")?,
        deleted_at: row.opt_datetime("deleted_at")?,
    })
}

/// Records operation count and latency metrics.
pub(crate) fn record_operation(operation: &'static str, start: Instant, ok: bool) {
    let status = if ok { "success" } else { "error" };
    metrics::counter!(
        "memory_operations_total",
        "operation" => operation,
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "memory_operation_duration_ms",
        "operation" => operation
    )
    .record(start.elapsed().as_secs_f64() * 1000.0);
}
