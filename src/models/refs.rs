//! The heterogeneous `refs` collection.
//!
//! A memory's `refs` holds either plain ids of other memories or typed
//! structured objects. Modeling this as a tagged union keeps graph
//! traversal and alternative-extraction exhaustive: a new ref shape is a
//! compile error at every match site, not a silently skipped blob.

use super::memory::MemoryId;
use serde::{Deserialize, Serialize};

/// A considered-but-rejected option attached to a decision memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alternative {
    /// The option that was considered.
    pub option: String,
    /// Why it was rejected, if recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Cluster membership produced by consolidation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMembership {
    /// The tag the cluster was formed around.
    pub tag: String,
    /// Number of member memories merged into the summary.
    pub member_count: usize,
}

/// One element of a memory's `refs` collection.
///
/// On the wire a plain reference is a bare JSON string and typed objects
/// carry a discriminating field, so decoding is shape-driven.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Ref {
    /// Alternatives record attached to a decision.
    Alternatives {
        /// The considered options.
        alternatives: Vec<Alternative>,
    },
    /// Cluster membership record attached to a consolidation summary.
    Cluster {
        /// Membership details.
        cluster: ClusterMembership,
    },
    /// Plain reference to another memory.
    Id(MemoryId),
}

impl Ref {
    /// Convenience constructor for a plain id reference.
    #[must_use]
    pub fn id(id: impl Into<MemoryId>) -> Self {
        Self::Id(id.into())
    }

    /// Convenience constructor for an alternatives record.
    #[must_use]
    pub const fn alternatives(alternatives: Vec<Alternative>) -> Self {
        Self::Alternatives { alternatives }
    }

    /// Convenience constructor for a cluster membership record.
    #[must_use]
    pub fn cluster(tag: impl Into<String>, member_count: usize) -> Self {
        Self::Cluster {
            cluster: ClusterMembership {
                tag: tag.into(),
                member_count,
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_id_serializes_as_bare_string() {
        let r = Ref::id("mem-1");
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(json, "\"mem-1\"");
    }

    #[test]
    fn test_alternatives_roundtrip() {
        let r = Ref::alternatives(vec![Alternative {
            option: "postgres".to_string(),
            reason: Some("operational cost".to_string()),
        }]);
        let json = serde_json::to_string(&r).unwrap();
        assert!(json.contains("\"alternatives\""));
        let back: Ref = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn test_cluster_roundtrip() {
        let r = Ref::cluster("infra", 4);
        let json = serde_json::to_string(&r).unwrap();
        let back: Ref = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn test_heterogeneous_collection_decodes_by_shape() {
        let json = r#"["mem-a", {"alternatives": [{"option": "b"}]}, {"cluster": {"tag": "t", "member_count": 3}}, "mem-d"]"#;
        let refs: Vec<Ref> = serde_json::from_str(json).unwrap();
        assert_eq!(refs.len(), 4);
        assert!(matches!(&refs[0], Ref::Id(id) if id.as_str() == "mem-a"));
        assert!(matches!(&refs[1], Ref::Alternatives { .. }));
        assert!(matches!(&refs[2], Ref::Cluster { .. }));
        assert!(matches!(&refs[3], Ref::Id(_)));
    }
}
