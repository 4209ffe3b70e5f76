//! Store Module
//!
//! Durability, atomicity, index coherence, and concurrent access
//! discipline. The store exclusively owns the persistent tables and both
//! companion indexes.

pub mod migrations;
mod sqlite;

pub use sqlite::{CandidatePlan, CleanupCounts, Store, ttl_for_type};
