//! Findings data model.
//!
//! Raw observations (`LockRecord`, `SessionInfo`, `LockSnapshot`) are
//! captured by the sampler; everything else is derived per pass by the
//! analysis layer. String fields are interned hashes, resolved through the
//! pass's `StringInterner`.

mod deadlock;
mod lock;
mod session;
mod snapshot;
mod window;

pub use deadlock::{DeadlockEvent, DeadlockStatus, Resolution, ResolutionKind};
pub use lock::{BlockingEdge, LockMode, LockRecord};
pub use session::{ImpactSeverity, SessionInfo, SessionSummary};
pub use snapshot::LockSnapshot;
pub use window::{AnalysisWindow, Hotspot, TrendDirection};
