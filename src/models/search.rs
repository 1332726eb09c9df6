//! Recall request types and filter validation.

use crate::{Error, Result};
use chrono::{DateTime, Utc};

/// Default number of results returned by a recall.
pub const DEFAULT_RECALL_LIMIT: usize = 10;

/// How multiple tag filters combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagMode {
    /// A memory matches if it carries any of the tags.
    #[default]
    Any,
    /// A memory matches only if it carries every tag.
    All,
}

/// A recall query.
///
/// Built with the `with_*` methods and validated once, before any network
/// call, by [`RecallRequest::validate`].
#[derive(Debug, Clone, Default)]
pub struct RecallRequest {
    /// Full-text search string.
    pub search: Option<String>,
    /// Tag filter combined per [`TagMode`].
    pub tags: Vec<String>,
    /// How `tags` combine.
    pub tag_mode: TagMode,
    /// Convenience alias: tags that must all be present.
    pub tags_all: Option<Vec<String>>,
    /// Convenience alias: tags of which any may be present.
    pub tags_any: Option<Vec<String>>,
    /// Restrict to one memory type.
    pub memory_type: Option<String>,
    /// Minimum confidence.
    pub min_confidence: Option<f64>,
    /// Strict chronological mode: skip ranking, order by timestamp
    /// descending. The right contract whenever determinism matters more
    /// than best-match.
    pub strict: bool,
    /// Inclusive lower time bound.
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper time bound.
    pub until: Option<DateTime<Utc>>,
    /// Restrict to one session.
    pub session_id: Option<String>,
    /// Retrieve without a text predicate.
    pub fetch_all: bool,
    /// Reward frequently-accessed memories in the composite score.
    pub episodic: bool,
    /// Maximum number of results.
    pub limit: usize,
}

impl RecallRequest {
    /// Creates an empty request with the default limit.
    #[must_use]
    pub fn new() -> Self {
        Self {
            limit: DEFAULT_RECALL_LIMIT,
            ..Self::default()
        }
    }

    /// Sets the full-text search string.
    #[must_use]
    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    /// Sets the tag filter.
    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Sets the tag combination mode.
    #[must_use]
    pub const fn with_tag_mode(mut self, mode: TagMode) -> Self {
        self.tag_mode = mode;
        self
    }

    /// Requires all of `tags` (alias for tags + [`TagMode::All`]).
    #[must_use]
    pub fn with_tags_all(mut self, tags: Vec<String>) -> Self {
        self.tags_all = Some(tags);
        self
    }

    /// Requires any of `tags` (alias for tags + [`TagMode::Any`]).
    #[must_use]
    pub fn with_tags_any(mut self, tags: Vec<String>) -> Self {
        self.tags_any = Some(tags);
        self
    }

    /// Restricts to one memory type.
    #[must_use]
    pub fn with_type(mut self, memory_type: impl Into<String>) -> Self {
        self.memory_type = Some(memory_type.into());
        self
    }

    /// Sets the minimum confidence.
    #[must_use]
    pub const fn with_min_confidence(mut self, confidence: f64) -> Self {
        self.min_confidence = Some(confidence);
        self
    }

    /// Enables strict chronological mode.
    #[must_use]
    pub const fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Sets the inclusive lower time bound.
    #[must_use]
    pub const fn with_since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Sets the exclusive upper time bound.
    #[must_use]
    pub const fn with_until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    /// Restricts to one session.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Retrieves without a text predicate.
    #[must_use]
    pub const fn fetch_all(mut self) -> Self {
        self.fetch_all = true;
        self
    }

    /// Rewards frequently-accessed memories in the composite score.
    #[must_use]
    pub const fn episodic(mut self) -> Self {
        self.episodic = true;
        self
    }

    /// Sets the result limit.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Validates the request and resolves the effective tag filter.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] when both `tags_all` and `tags_any` are
    ///   supplied.
    /// - [`Error::InvalidInput`] when the search string is a literal
    ///   wildcard; the text index treats `*` as a literal token, so the
    ///   caller must use `fetch_all` instead.
    pub fn validate(&self) -> Result<(Vec<String>, TagMode)> {
        if self.tags_all.is_some() && self.tags_any.is_some() {
            return Err(Error::InvalidInput(
                "tags_all and tags_any are mutually exclusive".to_string(),
            ));
        }
        if let Some(search) = &self.search {
            let stripped: String = search.chars().filter(|c| !c.is_whitespace()).collect();
            if !stripped.is_empty() && stripped.chars().all(|c| c == '*') && !self.fetch_all {
                return Err(Error::InvalidInput(
                    "wildcard search is not supported; use fetch_all to retrieve without a text predicate"
                        .to_string(),
                ));
            }
        }
        if let Some(tags) = &self.tags_all {
            return Ok((tags.clone(), TagMode::All));
        }
        if let Some(tags) = &self.tags_any {
            return Ok((tags.clone(), TagMode::Any));
        }
        Ok((self.tags.clone(), self.tag_mode))
    }

    /// Returns the search string unless `fetch_all` suppresses it.
    #[must_use]
    pub fn effective_search(&self) -> Option<&str> {
        if self.fetch_all {
            None
        } else {
            self.search.as_deref().filter(|s| !s.trim().is_empty())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_conflicting_tag_aliases_rejected() {
        let request = RecallRequest::new()
            .with_tags_all(vec!["a".to_string()])
            .with_tags_any(vec!["b".to_string()]);
        let err = request.validate();
        assert!(matches!(err, Err(Error::InvalidInput(_))));
    }

    #[test_case("*" ; "single star")]
    #[test_case("**" ; "double star")]
    #[test_case(" * " ; "padded star")]
    fn test_wildcard_search_rejected(search: &str) {
        let request = RecallRequest::new().with_search(search);
        let err = request.validate();
        match err {
            Err(Error::InvalidInput(msg)) => assert!(msg.contains("fetch_all")),
            other => panic!("expected InvalidInput, got {other:?}"),
        }
    }

    #[test]
    fn test_wildcard_allowed_with_fetch_all() {
        let request = RecallRequest::new().with_search("*").fetch_all();
        assert!(request.validate().is_ok());
        assert!(request.effective_search().is_none());
    }

    #[test]
    fn test_alias_resolution() {
        let request = RecallRequest::new().with_tags_all(vec!["a".to_string(), "b".to_string()]);
        let (tags, mode) = request.validate().unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(mode, TagMode::All);

        let request = RecallRequest::new().with_tags_any(vec!["a".to_string()]);
        let (_, mode) = request.validate().unwrap();
        assert_eq!(mode, TagMode::Any);
    }

    #[test]
    fn test_non_wildcard_search_passes() {
        let request = RecallRequest::new().with_search("coffee preference");
        assert!(request.validate().is_ok());
        assert_eq!(request.effective_search(), Some("coffee preference"));
    }
}
