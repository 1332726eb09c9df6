//! Data models for engram.
//!
//! This module contains all the core data structures used throughout the
//! system.

mod consolidation;
mod memory;
mod refs;
mod search;

pub use consolidation::{ClusterPreview, ConsolidationReport, ConsolidationRequest, PruneReport};
pub use memory::{ChainEntry, Memory, MemoryId, MemoryType, Priority, RememberRequest};
pub use refs::{Alternative, ClusterMembership, Ref};
pub use search::{RecallRequest, TagMode};
