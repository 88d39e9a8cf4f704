//! Lock/session snapshot sampling.
//!
//! The `LockSource` trait abstracts the resource manager's introspection
//! interface so the engine runs identically against a live PostgreSQL
//! instance and against mock state in tests.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                   Sampler                    │
//! │  generation stamping, tenant scoping,        │
//! │  background-session filtering                │
//! └──────────────────────┬───────────────────────┘
//!                        │
//!                 ┌──────▼──────┐
//!                 │  LockSource │ (trait)
//!                 └──────┬──────┘
//!          ┌─────────────┴─────────────┐
//!   ┌──────▼─────────┐        ┌────────▼───────┐
//!   │ PostgresLock   │        │ MockLockSource │
//!   │ Source (live)  │        │ (testing)      │
//!   └────────────────┘        └────────────────┘
//! ```

pub mod mock;
mod pg_source;
mod queries;
mod sampler;

use crate::storage::interner::StringInterner;
use crate::storage::model::{LockRecord, SessionInfo};
use crate::tenant::TenantScope;

pub use mock::MockLockSource;
pub use pg_source::PostgresLockSource;
pub use sampler::Sampler;

/// Error type for lock sampling.
#[derive(Debug)]
pub enum SampleError {
    /// Environment variable not set.
    EnvNotSet(String),
    /// Connection failed or dropped.
    Connection(String),
    /// Query execution failed.
    Query(String),
    /// The resource manager did not answer within the sampling timeout.
    Timeout(String),
}

impl std::fmt::Display for SampleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleError::EnvNotSet(var) => write!(f, "sampling: {} not set", var),
            SampleError::Connection(msg) => write!(f, "sampling: {}", msg),
            SampleError::Query(msg) => write!(f, "sampling query error: {}", msg),
            SampleError::Timeout(msg) => write!(f, "sampling timed out: {}", msg),
        }
    }
}

impl std::error::Error for SampleError {}

/// Unscoped output of one `LockSource` read: every client-visible lock row
/// and session on the instance, strings already interned.
#[derive(Debug, Default)]
pub struct RawSample {
    pub locks: Vec<LockRecord>,
    pub sessions: Vec<SessionInfo>,
}

/// Read interface to a resource manager's lock table and session registry.
///
/// Implementations are read-only with respect to the resource manager and
/// must observe the bounded sampling timeout; the `scope` is advisory (a
/// source may pre-filter server-side, the sampler re-filters regardless).
pub trait LockSource: Send {
    fn sample(
        &mut self,
        scope: &TenantScope,
        interner: &mut StringInterner,
    ) -> Result<RawSample, SampleError>;
}

impl<T: LockSource + ?Sized> LockSource for Box<T> {
    fn sample(
        &mut self,
        scope: &TenantScope,
        interner: &mut StringInterner,
    ) -> Result<RawSample, SampleError> {
        (**self).sample(scope, interner)
    }
}
