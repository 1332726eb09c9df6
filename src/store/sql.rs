//! SQL construction for the memory store.
//!
//! All statements are parameterized; every argument travels as text (or
//! null) per the wire protocol, relying on column affinity at the store
//! for numeric comparisons.

use crate::models::{Memory, MemoryId, RecallRequest, TagMode};
use chrono::{DateTime, Utc};

use crate::remote::Statement;

/// Column list for memory INSERTs.
pub const MEMORY_COLUMNS: &str = "id, type, t, created_at, updated_at, valid_from, summary, \
     confidence, tags, refs, priority, session_id, access_count, last_accessed, deleted_at";

/// Qualified column list shared by every memory SELECT, so decoding is
/// uniform and join statements stay unambiguous.
pub const SELECT_COLUMNS: &str = "m.id, m.type, m.t, m.created_at, m.updated_at, m.valid_from, \
     m.summary, m.confidence, m.tags, m.refs, m.priority, m.session_id, m.access_count, \
     m.last_accessed, m.deleted_at";

/// Active-row predicate: not soft-deleted, and not superseded.
///
/// A memory whose id appears as a plain reference inside another active
/// memory's `refs` is superseded and excluded, independent of its own
/// `deleted_at`. The two mechanisms overlap deliberately: when a batched
/// supersede's insert becomes visible before its paired soft-delete, the
/// ref-based exclusion still hides the old record.
pub const ACTIVE_PREDICATE: &str = "m.deleted_at IS NULL AND m.id NOT IN (\
     SELECT j.value FROM memories r, json_each(r.refs) j \
     WHERE r.deleted_at IS NULL AND json_type(j.value) = 'text')";

/// Ranked searches oversample by this factor so client-side composite
/// rescoring has room to reorder before the cut to `limit`.
pub const RANK_OVERSAMPLE: usize = 4;

/// Schema bootstrap statements.
#[must_use]
pub fn migration_statements() -> Vec<Statement> {
    vec![
        Statement::new(
            "CREATE TABLE IF NOT EXISTS memories (\
             id TEXT PRIMARY KEY, \
             type TEXT NOT NULL, \
             t TEXT NOT NULL, \
             created_at TEXT NOT NULL, \
             updated_at TEXT NOT NULL, \
             valid_from TEXT NOT NULL, \
             summary TEXT NOT NULL, \
             confidence REAL, \
             tags TEXT NOT NULL DEFAULT '[]', \
             refs TEXT NOT NULL DEFAULT '[]', \
             priority INTEGER NOT NULL DEFAULT 0, \
             session_id TEXT, \
             access_count INTEGER NOT NULL DEFAULT 0, \
             last_accessed TEXT, \
             deleted_at TEXT)",
        ),
        // The id column is unindexed so text relevance weighs only the
        // body and the tag collection.
        Statement::new(
            "CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts \
             USING fts5(id UNINDEXED, summary, tags)",
        ),
        Statement::new("CREATE INDEX IF NOT EXISTS idx_memories_t ON memories(t)"),
        Statement::new("CREATE INDEX IF NOT EXISTS idx_memories_session ON memories(session_id)"),
        Statement::new(
            "CREATE TABLE IF NOT EXISTS config (\
             key TEXT PRIMARY KEY, \
             value TEXT NOT NULL, \
             category TEXT NOT NULL DEFAULT 'general', \
             mutable INTEGER NOT NULL DEFAULT 1)",
        ),
    ]
}

fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Builds the pair of inserts (row + text index) for a new memory.
#[must_use]
pub fn insert_memory(memory: &Memory) -> Vec<Statement> {
    let tags_json = serde_json::to_string(&memory.tags).unwrap_or_else(|_| "[]".to_string());
    let refs_json = serde_json::to_string(&memory.refs).unwrap_or_else(|_| "[]".to_string());
    vec![
        Statement::with_args(
            format!(
                "INSERT INTO memories ({MEMORY_COLUMNS}) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            vec![
                Some(memory.id.to_string()),
                Some(memory.memory_type.as_str().to_string()),
                Some(rfc3339(memory.t)),
                Some(rfc3339(memory.created_at)),
                Some(rfc3339(memory.updated_at)),
                Some(rfc3339(memory.valid_from)),
                Some(memory.summary.clone()),
                memory.confidence.map(|c| c.to_string()),
                Some(tags_json),
                Some(refs_json),
                Some(memory.priority.value().to_string()),
                memory.session_id.clone(),
                Some(memory.access_count.to_string()),
                memory.last_accessed.map(rfc3339),
                memory.deleted_at.map(rfc3339),
            ],
        ),
        Statement::new("INSERT INTO memories_fts (id, summary, tags) VALUES (?, ?, ?)")
            .bind(memory.id.to_string())
            .bind(memory.summary.clone())
            .bind(memory.tags.join(" ")),
    ]
}

/// Fetch one memory by id, deleted or not (chain traversal needs
/// history, not just active records).
#[must_use]
pub fn select_by_id(id: &MemoryId) -> Statement {
    Statement::new(format!(
        "SELECT {SELECT_COLUMNS} FROM memories m WHERE m.id = ?"
    ))
    .bind(id.to_string())
}

/// Soft-deletes a memory.
#[must_use]
pub fn soft_delete(id: &MemoryId, now: DateTime<Utc>) -> Statement {
    Statement::new(
        "UPDATE memories SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(rfc3339(now))
    .bind(rfc3339(now))
    .bind(id.to_string())
}

/// Returns 1 row per memory soft-deleted by the paired [`soft_delete`];
/// used to report whether a forget actually changed anything.
#[must_use]
pub fn count_active(id: &MemoryId) -> Statement {
    Statement::new("SELECT COUNT(*) AS n FROM memories WHERE id = ? AND deleted_at IS NULL")
        .bind(id.to_string())
}

/// Updates the priority tier.
#[must_use]
pub fn update_priority(id: &MemoryId, priority: i8, now: DateTime<Utc>) -> Statement {
    Statement::new("UPDATE memories SET priority = ?, updated_at = ? WHERE id = ?")
        .bind(priority.to_string())
        .bind(rfc3339(now))
        .bind(id.to_string())
}

/// Replaces the tag collection and demotes the priority tier; used when
/// consolidation stamps members.
#[must_use]
pub fn demote_member(
    id: &MemoryId,
    tags: &[String],
    priority: i8,
    now: DateTime<Utc>,
) -> Statement {
    let tags_json = serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string());
    Statement::new("UPDATE memories SET priority = ?, tags = ?, updated_at = ? WHERE id = ?")
        .bind(priority.to_string())
        .bind(tags_json)
        .bind(rfc3339(now))
        .bind(id.to_string())
}

/// Bumps access bookkeeping for every returned memory.
#[must_use]
pub fn touch_access(ids: &[MemoryId], now: DateTime<Utc>) -> Statement {
    let placeholders = vec!["?"; ids.len()].join(", ");
    let mut args = vec![Some(rfc3339(now))];
    args.extend(ids.iter().map(|id| Some(id.to_string())));
    Statement::with_args(
        format!(
            "UPDATE memories SET access_count = access_count + 1, last_accessed = ? \
             WHERE id IN ({placeholders})"
        ),
        args,
    )
}

/// Escapes a search string into an FTS MATCH query: each token is
/// double-quoted so index syntax characters are literal.
#[must_use]
pub fn fts_query(search: &str) -> String {
    search
        .split_whitespace()
        .map(|token| format!("\"{}\"", token.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Accumulates WHERE clauses and their arguments.
#[derive(Debug, Default)]
struct Predicates {
    clauses: Vec<String>,
    args: Vec<Option<String>>,
}

impl Predicates {
    fn push(&mut self, clause: impl Into<String>, args: impl IntoIterator<Item = String>) {
        self.clauses.push(clause.into());
        self.args.extend(args.into_iter().map(Some));
    }

    fn from_request(request: &RecallRequest, tags: &[String], tag_mode: TagMode) -> Self {
        let mut p = Self::default();
        p.clauses.push(ACTIVE_PREDICATE.to_string());

        if !tags.is_empty() {
            let membership = "EXISTS (SELECT 1 FROM json_each(m.tags) WHERE json_each.value = ?)";
            let joiner = match tag_mode {
                TagMode::Any => " OR ",
                TagMode::All => " AND ",
            };
            let clause = vec![membership; tags.len()].join(joiner);
            p.push(format!("({clause})"), tags.iter().cloned());
        }
        if let Some(memory_type) = &request.memory_type {
            p.push("m.type = ?", [memory_type.clone()]);
        }
        if let Some(min_confidence) = request.min_confidence {
            p.push("m.confidence >= ?", [min_confidence.to_string()]);
        }
        if let Some(since) = request.since {
            p.push("m.t >= ?", [rfc3339(since)]);
        }
        if let Some(until) = request.until {
            p.push("m.t < ?", [rfc3339(until)]);
        }
        if let Some(session_id) = &request.session_id {
            p.push("m.session_id = ?", [session_id.clone()]);
        }
        p
    }
}

/// Builds the recall statement for a validated request.
///
/// With a text predicate this is a ranked FTS join returning a `rank`
/// column (the id column carries no index weight, so body and tags score
/// equally). Without one it is a plain chronological scan; non-strict
/// callers rescore client-side.
#[must_use]
pub fn build_recall(request: &RecallRequest, tags: &[String], tag_mode: TagMode) -> Statement {
    let p = Predicates::from_request(request, tags, tag_mode);
    let where_clause = p.clauses.join(" AND ");

    let fetch = if request.strict {
        request.limit
    } else {
        request.limit.saturating_mul(RANK_OVERSAMPLE)
    };

    request.effective_search().map_or_else(
        || {
            let mut args = p.args.clone();
            args.push(Some(fetch.to_string()));
            Statement::with_args(
                format!(
                    "SELECT {SELECT_COLUMNS} FROM memories m \
                     WHERE {where_clause} ORDER BY m.t DESC LIMIT ?"
                ),
                args,
            )
        },
        |search| {
            let mut args = vec![Some(fts_query(search))];
            args.extend(p.args.clone());
            args.push(Some(fetch.to_string()));
            // Strict mode keeps the MATCH as a filter only; ordering
            // stays chronological.
            let order = if request.strict { "m.t DESC" } else { "rank" };
            Statement::with_args(
                format!(
                    "SELECT {SELECT_COLUMNS}, bm25(memories_fts) AS rank \
                     FROM memories_fts f JOIN memories m ON m.id = f.id \
                     WHERE memories_fts MATCH ? AND {where_clause} \
                     ORDER BY {order} LIMIT ?"
                ),
                args,
            )
        },
    )
}

/// Selects soft-delete candidates older than `cutoff` at or below
/// `priority_floor`.
#[must_use]
pub fn prune_by_age_candidates(cutoff: DateTime<Utc>, priority_floor: i8) -> Statement {
    Statement::new(
        "SELECT id FROM memories m \
         WHERE m.deleted_at IS NULL AND m.t < ? AND m.priority <= ? ORDER BY m.t",
    )
    .bind(rfc3339(cutoff))
    .bind(priority_floor.to_string())
}

/// Selects soft-delete candidates at or below `max_priority`.
#[must_use]
pub fn prune_by_priority_candidates(max_priority: i8) -> Statement {
    Statement::new(
        "SELECT id FROM memories m \
         WHERE m.deleted_at IS NULL AND m.priority <= ? ORDER BY m.t",
    )
    .bind(max_priority.to_string())
}

/// Fetches active memories eligible for consolidation: not already
/// consolidated, optionally restricted to memories carrying any of
/// `tags`.
#[must_use]
pub fn consolidation_candidates(tags: &[String]) -> Statement {
    let mut clauses = vec![
        ACTIVE_PREDICATE.to_string(),
        "NOT EXISTS (SELECT 1 FROM json_each(m.tags) WHERE json_each.value = 'consolidated')"
            .to_string(),
    ];
    let mut args: Vec<Option<String>> = Vec::new();
    if !tags.is_empty() {
        let membership = "EXISTS (SELECT 1 FROM json_each(m.tags) WHERE json_each.value = ?)";
        clauses.push(format!("({})", vec![membership; tags.len()].join(" OR ")));
        args.extend(tags.iter().cloned().map(Some));
    }
    Statement::with_args(
        format!(
            "SELECT {SELECT_COLUMNS} FROM memories m WHERE {} ORDER BY m.t",
            clauses.join(" AND ")
        ),
        args,
    )
}

/// Reads one config value.
#[must_use]
pub fn config_get(key: &str) -> Statement {
    Statement::new("SELECT value FROM config WHERE key = ?").bind(key)
}

/// Upserts one config value.
#[must_use]
pub fn config_set(key: &str, value: &str, category: &str) -> Statement {
    Statement::new(
        "INSERT INTO config (key, value, category) VALUES (?, ?, ?) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .bind(category)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecallRequest;

    #[test]
    fn test_fts_query_quotes_tokens() {
        assert_eq!(fts_query("coffee preference"), "\"coffee\" \"preference\"");
        assert_eq!(fts_query("a\"b"), "\"a\"\"b\"");
        assert_eq!(fts_query("NEAR(x)"), "\"NEAR(x)\"");
    }

    #[test]
    fn test_recall_without_search_is_chronological() {
        let request = RecallRequest::new().fetch_all();
        let stmt = build_recall(&request, &[], TagMode::Any);
        assert!(stmt.sql.contains("ORDER BY m.t DESC"));
        assert!(!stmt.sql.contains("MATCH"));
        assert!(stmt.sql.contains("deleted_at IS NULL"));
        assert!(stmt.sql.contains("json_each(r.refs)"));
    }

    #[test]
    fn test_recall_with_search_joins_fts() {
        let request = RecallRequest::new().with_search("coffee");
        let stmt = build_recall(&request, &[], TagMode::Any);
        assert!(stmt.sql.contains("MATCH ?"));
        assert!(stmt.sql.contains("bm25(memories_fts)"));
        assert_eq!(stmt.args.first(), Some(&Some("\"coffee\"".to_string())));
    }

    #[test]
    fn test_strict_search_orders_by_timestamp() {
        let request = RecallRequest::new().with_search("cache").strict();
        let stmt = build_recall(&request, &[], TagMode::Any);
        // The match predicate filters; it never orders.
        assert!(stmt.sql.contains("MATCH ?"));
        assert!(stmt.sql.contains("ORDER BY m.t DESC"));
        assert!(!stmt.sql.contains("ORDER BY rank"));
    }

    #[test]
    fn test_strict_mode_does_not_oversample() {
        let strict = build_recall(&RecallRequest::new().strict(), &[], TagMode::Any);
        assert_eq!(strict.args.last(), Some(&Some("10".to_string())));

        let ranked = build_recall(&RecallRequest::new(), &[], TagMode::Any);
        assert_eq!(ranked.args.last(), Some(&Some("40".to_string())));
    }

    #[test]
    fn test_tag_modes_join_differently() {
        let tags = vec!["a".to_string(), "b".to_string()];
        let any = build_recall(&RecallRequest::new(), &tags, TagMode::Any);
        assert!(any.sql.contains(" OR "));
        let all = build_recall(&RecallRequest::new(), &tags, TagMode::All);
        assert!(all.sql.contains("= ?) AND EXISTS"));
    }

    #[test]
    fn test_time_bounds_inclusive_exclusive() {
        let since = chrono::Utc::now();
        let request = RecallRequest::new().with_since(since).with_until(since);
        let stmt = build_recall(&request, &[], TagMode::Any);
        assert!(stmt.sql.contains("m.t >= ?"));
        assert!(stmt.sql.contains("m.t < ?"));
    }

    #[test]
    fn test_touch_access_covers_all_ids() {
        let ids = vec![MemoryId::new("a"), MemoryId::new("b")];
        let stmt = touch_access(&ids, chrono::Utc::now());
        assert!(stmt.sql.contains("IN (?, ?)"));
        assert_eq!(stmt.args.len(), 3);
    }

    #[test]
    fn test_consolidation_candidates_exclude_marker() {
        let stmt = consolidation_candidates(&[]);
        assert!(stmt.sql.contains("'consolidated'"));
        assert!(stmt.args.is_empty());

        let stmt = consolidation_candidates(&["infra".to_string()]);
        assert_eq!(stmt.args.len(), 1);
    }
}
