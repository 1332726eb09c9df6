//! # Engram
//!
//! A persistent, queryable memory store for autonomous agents.
//!
//! Engram lets an agent write short natural-language memory records and
//! later retrieve them by ranked relevance, tag, type, time window, or
//! session. Storage is a remote SQL-over-HTTP service; engram is the
//! client-side protocol and algorithm layer on top of it: ranked
//! retrieval, supersede-chains, tag-cluster consolidation, and a tracked
//! background-write path with an explicit flush protocol.
//!
//! ## Example
//!
//! ```rust,ignore
//! use engram::{EngramConfig, MemoryStore, RememberRequest, RecallRequest};
//!
//! let store = MemoryStore::connect(EngramConfig::load()?);
//! let id = store.remember(RememberRequest::new("Use FTS for recall", "decision"))?;
//! let hits = store.recall(&RecallRequest::new().with_search("recall"))?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod config;
pub mod models;
pub mod observability;
pub mod remote;
pub mod store;

// Re-exports for convenience
pub use config::{CredentialSource, Credentials, EngramConfig};
pub use models::{
    Alternative, ChainEntry, ClusterMembership, ConsolidationReport, ConsolidationRequest, Memory,
    MemoryId, MemoryType, Priority, PruneReport, RecallRequest, Ref, RememberRequest, TagMode,
};
pub use remote::{Executor, HttpExecutor, RetryPolicy, Row, Statement, Value};
pub use store::{FlushReport, MemoryStore};

/// Error type for engram operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait
/// implementations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Bad memory type, wildcard search without `fetch_all`, conflicting tag filters |
/// | `Remote` | The store reports a statement error (bad SQL, constraint violation) |
/// | `Connectivity` | The HTTP round trip itself fails (connect, TLS, timeout, 429/5xx) |
/// | `Credentials` | No endpoint/token could be resolved from any configured source |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    ///
    /// Raised before any network call; never retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The remote store reported a statement-level error.
    ///
    /// These are permanent: the same statement will fail the same way,
    /// so they are surfaced immediately with the store's code and
    /// message and never retried.
    #[error("remote error {code}: {message}")]
    Remote {
        /// Error code reported by the store.
        code: String,
        /// Error message reported by the store.
        message: String,
    },

    /// The HTTP round trip to the store failed.
    ///
    /// `transient` is set at the transport layer: connect failures, TLS
    /// handshake failures, timeouts, HTTP 429 and 5xx are transient and
    /// eligible for retry with backoff; anything else is permanent.
    #[error("connectivity failure: {cause}{}", troubleshooting_hint())]
    Connectivity {
        /// What went wrong at the transport layer.
        cause: String,
        /// Whether a retry with backoff is worthwhile.
        transient: bool,
    },

    /// Credential resolution exhausted every configured source.
    ///
    /// The message enumerates each source checked so the failure is
    /// actionable without reading the resolution code.
    #[error("credentials unresolved: {0}")]
    Credentials(String),
}

impl Error {
    /// Returns `true` if the error is worth retrying with backoff.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Connectivity { transient: true, .. })
    }
}

fn troubleshooting_hint() -> &'static str {
    "; check ENGRAM_DB_URL / ENGRAM_DB_TOKEN and network reachability of the store endpoint"
}

/// Result type alias for engram operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidInput("bad type".to_string());
        assert_eq!(err.to_string(), "invalid input: bad type");

        let err = Error::Remote {
            code: "SQLITE_ERROR".to_string(),
            message: "no such table".to_string(),
        };
        assert_eq!(err.to_string(), "remote error SQLITE_ERROR: no such table");

        let err = Error::Connectivity {
            cause: "connection refused".to_string(),
            transient: true,
        };
        assert!(err.to_string().contains("connection refused"));
        assert!(err.to_string().contains("ENGRAM_DB_URL"));
    }

    #[test]
    fn test_transience_classification() {
        assert!(
            Error::Connectivity {
                cause: "timeout".to_string(),
                transient: true,
            }
            .is_transient()
        );
        assert!(
            !Error::Connectivity {
                cause: "HTTP 401".to_string(),
                transient: false,
            }
            .is_transient()
        );
        assert!(!Error::InvalidInput("x".to_string()).is_transient());
        assert!(
            !Error::Remote {
                code: "x".to_string(),
                message: "y".to_string(),
            }
            .is_transient()
        );
    }
}
