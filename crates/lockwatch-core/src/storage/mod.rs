//! Findings persistence: models, string interner, append-only store,
//! retention and the segment archive format.

pub mod findings;
pub mod interner;
pub mod model;
pub mod retention;
pub mod segment;

pub use findings::{FindingsHistory, FindingsStore, Versioned};
pub use interner::StringInterner;
pub use retention::{RetentionManager, RetentionResult};
