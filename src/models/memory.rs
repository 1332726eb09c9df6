//! Memory types and identifiers.

use super::refs::{Alternative, Ref};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum preview length in characters before truncation.
const PREVIEW_MAX_CHARS: usize = 160;

/// Maximum number of tags carried in a truncated preview prefix.
const PREVIEW_TAG_LIMIT: usize = 3;

/// Unique identifier for a memory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryId(String);

impl MemoryId {
    /// Creates a new memory ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mints a fresh random ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MemoryId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MemoryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The closed set of memory types.
///
/// Creation with any other type string is rejected before a network call
/// is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    /// A decision the agent made, with optional alternatives in `refs`.
    Decision,
    /// A fact about the world.
    World,
    /// Something unexpected worth remembering.
    Anomaly,
    /// A first-person experience.
    Experience,
    /// An interaction with another party.
    Interaction,
    /// A reusable procedure or recipe.
    Procedure,
}

impl MemoryType {
    /// All valid type names, used in validation error messages.
    pub const ALL: [&'static str; 6] = [
        "decision",
        "world",
        "anomaly",
        "experience",
        "interaction",
        "procedure",
    ];

    /// Parses a memory type string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for anything outside the closed set.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "decision" => Ok(Self::Decision),
            "world" => Ok(Self::World),
            "anomaly" => Ok(Self::Anomaly),
            "experience" => Ok(Self::Experience),
            "interaction" => Ok(Self::Interaction),
            "procedure" => Ok(Self::Procedure),
            other => Err(Error::InvalidInput(format!(
                "unknown memory type '{other}' (expected one of: {})",
                Self::ALL.join(", ")
            ))),
        }
    }

    /// Returns the canonical type name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Decision => "decision",
            Self::World => "world",
            Self::Anomaly => "anomaly",
            Self::Experience => "experience",
            Self::Interaction => "interaction",
            Self::Procedure => "procedure",
        }
    }

    /// Default confidence applied when the caller supplies none.
    #[must_use]
    pub const fn default_confidence(self) -> f64 {
        match self {
            Self::Decision => 0.8,
            Self::World | Self::Procedure => 0.7,
            Self::Anomaly | Self::Experience => 0.6,
            Self::Interaction => 0.5,
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Memory priority tier, always clamped to [-1, 2].
///
/// Tiers: background (-1), normal (0), important (1), critical (2).
/// Priority governs the ranking boost during recall and pruning
/// eligibility during retention passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(i8);

impl Priority {
    /// Background tier: excluded from ranking boost, first to prune.
    pub const BACKGROUND: Self = Self(-1);
    /// Normal tier.
    pub const NORMAL: Self = Self(0);
    /// Important tier.
    pub const IMPORTANT: Self = Self(1);
    /// Critical tier: never pruned by default policies.
    pub const CRITICAL: Self = Self(2);

    /// Creates a priority, clamping to [-1, 2].
    #[must_use]
    pub const fn new(value: i8) -> Self {
        Self(if value < -1 {
            -1
        } else if value > 2 {
            2
        } else {
            value
        })
    }

    /// Returns the inner tier value.
    #[must_use]
    pub const fn value(self) -> i8 {
        self.0
    }

    /// Adjusts the priority by `delta`, clamping to [-1, 2].
    #[must_use]
    pub const fn adjusted(self, delta: i8) -> Self {
        Self::new(self.0.saturating_add(delta))
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

/// A stored memory record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Unique identifier, assigned at creation, immutable.
    pub id: MemoryId,
    /// The memory type.
    pub memory_type: MemoryType,
    /// Event timestamp.
    pub t: DateTime<Utc>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Start of validity; defaults to creation time but can be backdated
    /// for bitemporal corrections.
    pub valid_from: DateTime<Utc>,
    /// Free-text content, the searchable body.
    pub summary: String,
    /// Optional 0-1 confidence score.
    pub confidence: Option<f64>,
    /// Tags; order is preserved but filtering uses set semantics.
    pub tags: Vec<String>,
    /// References: plain memory ids or typed objects.
    pub refs: Vec<Ref>,
    /// Priority tier.
    pub priority: Priority,
    /// Logical working session this memory was written in.
    pub session_id: Option<String>,
    /// Number of times retrieval has returned this memory.
    pub access_count: u64,
    /// Last time retrieval returned this memory.
    pub last_accessed: Option<DateTime<Utc>>,
    /// Soft-delete marker; non-null excludes the record from all active
    /// queries.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Memory {
    /// Returns `true` if this memory has been soft-deleted.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Returns the plain-id references, skipping typed objects.
    pub fn plain_refs(&self) -> impl Iterator<Item = &MemoryId> {
        self.refs.iter().filter_map(|r| match r {
            Ref::Id(id) => Some(id),
            Ref::Alternatives { .. } | Ref::Cluster { .. } => None,
        })
    }

    /// Returns the alternatives embedded in `refs`, if any.
    ///
    /// Populated by decision-type memories; other types may carry none.
    #[must_use]
    pub fn alternatives(&self) -> Vec<Alternative> {
        self.refs
            .iter()
            .find_map(|r| match r {
                Ref::Alternatives { alternatives } => Some(alternatives.clone()),
                Ref::Id(_) | Ref::Cluster { .. } => None,
            })
            .unwrap_or_default()
    }

    /// Returns a bounded preview of the summary.
    ///
    /// When the summary is short it is returned verbatim. When truncation
    /// would drop topical context the preview is prefixed with the leading
    /// tags so the topic survives the cut. Computed here, on the decoded
    /// record, so every query path produces the same preview.
    #[must_use]
    pub fn preview(&self) -> String {
        let total = self.summary.chars().count();
        if total <= PREVIEW_MAX_CHARS {
            return self.summary.clone();
        }
        let truncated: String = self.summary.chars().take(PREVIEW_MAX_CHARS).collect();
        if self.tags.is_empty() {
            format!("{truncated}…")
        } else {
            let shown: Vec<&str> = self
                .tags
                .iter()
                .take(PREVIEW_TAG_LIMIT)
                .map(String::as_str)
                .collect();
            format!("[{}] {truncated}…", shown.join(", "))
        }
    }
}

/// An emitted node from a chain traversal, carrying its distance from the
/// traversal root.
#[derive(Debug, Clone, Serialize)]
pub struct ChainEntry {
    /// The memory at this position in the chain.
    pub memory: Memory,
    /// BFS distance from the root (root itself is depth 0).
    pub depth: usize,
}

/// Request to store a new memory.
#[derive(Debug, Clone)]
pub struct RememberRequest {
    /// What to remember: the free-text summary.
    pub what: String,
    /// Memory type name; validated against the closed set.
    pub memory_type: String,
    /// Tags to attach.
    pub tags: Vec<String>,
    /// Confidence override; type default applies when `None`.
    pub confidence: Option<f64>,
    /// References to other memories or typed objects.
    pub refs: Vec<Ref>,
    /// Priority; clamped to [-1, 2].
    pub priority: i8,
    /// Validity start override for bitemporal corrections.
    pub valid_from: Option<DateTime<Utc>>,
    /// Session grouping.
    pub session_id: Option<String>,
    /// Whether to block on the insert (default) or track it as a
    /// background write.
    pub sync: bool,
}

impl RememberRequest {
    /// Creates a request with the required fields.
    #[must_use]
    pub fn new(what: impl Into<String>, memory_type: impl Into<String>) -> Self {
        Self {
            what: what.into(),
            memory_type: memory_type.into(),
            tags: Vec::new(),
            confidence: None,
            refs: Vec::new(),
            priority: 0,
            valid_from: None,
            session_id: None,
            sync: true,
        }
    }

    /// Sets the tags.
    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Sets the confidence.
    #[must_use]
    pub const fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Sets the references.
    #[must_use]
    pub fn with_refs(mut self, refs: Vec<Ref>) -> Self {
        self.refs = refs;
        self
    }

    /// Sets the priority (clamped at insert time).
    #[must_use]
    pub const fn with_priority(mut self, priority: i8) -> Self {
        self.priority = priority;
        self
    }

    /// Backdates the validity start.
    #[must_use]
    pub const fn with_valid_from(mut self, valid_from: DateTime<Utc>) -> Self {
        self.valid_from = Some(valid_from);
        self
    }

    /// Sets the session id.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Marks the write as fire-and-forget (tracked background write).
    #[must_use]
    pub const fn background(mut self) -> Self {
        self.sync = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_type_parse_roundtrip() {
        for name in MemoryType::ALL {
            let parsed = MemoryType::parse(name);
            assert_eq!(parsed.ok().map(MemoryType::as_str), Some(name));
        }
    }

    #[test]
    fn test_memory_type_parse_rejects_unknown() {
        let err = MemoryType::parse("nope");
        assert!(matches!(err, Err(Error::InvalidInput(_))));
        if let Err(Error::InvalidInput(msg)) = err {
            assert!(msg.contains("decision"));
        }
    }

    #[test]
    fn test_priority_clamps() {
        assert_eq!(Priority::new(5).value(), 2);
        assert_eq!(Priority::new(-7).value(), -1);
        assert_eq!(Priority::new(1).value(), 1);
        assert_eq!(Priority::CRITICAL.adjusted(1).value(), 2);
        assert_eq!(Priority::BACKGROUND.adjusted(-3).value(), -1);
        assert_eq!(Priority::NORMAL.adjusted(1), Priority::IMPORTANT);
    }

    #[test]
    fn test_default_confidence_per_type() {
        assert!((MemoryType::Decision.default_confidence() - 0.8).abs() < f64::EPSILON);
        assert!((MemoryType::Interaction.default_confidence() - 0.5).abs() < f64::EPSILON);
    }

    fn sample_memory(summary: &str, tags: Vec<String>) -> Memory {
        let now = Utc::now();
        Memory {
            id: MemoryId::generate(),
            memory_type: MemoryType::World,
            t: now,
            created_at: now,
            updated_at: now,
            valid_from: now,
            summary: summary.to_string(),
            confidence: None,
            tags,
            refs: Vec::new(),
            priority: Priority::NORMAL,
            session_id: None,
            access_count: 0,
            last_accessed: None,
            deleted_at: None,
        }
    }

    #[test]
    fn test_preview_short_summary_verbatim() {
        let m = sample_memory("short note", vec!["coffee".to_string()]);
        assert_eq!(m.preview(), "short note");
    }

    #[test]
    fn test_preview_long_summary_tag_prefixed() {
        let long = "x".repeat(400);
        let m = sample_memory(&long, vec!["topic".to_string(), "extra".to_string()]);
        let preview = m.preview();
        assert!(preview.starts_with("[topic, extra] "));
        assert!(preview.ends_with('…'));
        assert!(preview.chars().count() < 200);
    }

    #[test]
    fn test_preview_long_summary_without_tags() {
        let long = "y".repeat(400);
        let m = sample_memory(&long, Vec::new());
        let preview = m.preview();
        assert!(!preview.starts_with('['));
        assert!(preview.ends_with('…'));
    }
}
