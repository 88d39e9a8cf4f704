//! Snapshot sampler: turns raw source reads into immutable, scoped,
//! generation-stamped `LockSnapshot`s.

use tracing::debug;

use super::{LockSource, SampleError};
use crate::clock::Clock;
use crate::storage::interner::StringInterner;
use crate::storage::model::LockSnapshot;
use crate::tenant::TenantScope;

/// Backend type of ordinary client connections; everything else (autovacuum,
/// checkpointer, walwriter, ...) is invisible to the engine.
const CLIENT_BACKEND: &str = "client backend";

#[derive(Debug, Default)]
pub struct Sampler {
    generation: u64,
}

impl Sampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last generation handed out.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Takes one scoped snapshot.
    ///
    /// Filters out non-client sessions (and their locks), applies the tenant
    /// scope, stamps the tenant tag on every record, and orders lock records
    /// deterministically so downstream derivations are reproducible.
    pub fn collect(
        &mut self,
        source: &mut dyn LockSource,
        scope: &TenantScope,
        clock: &dyn Clock,
        interner: &mut StringInterner,
    ) -> Result<LockSnapshot, SampleError> {
        let raw = source.sample(scope, interner)?;

        let client_hash = interner.intern(CLIENT_BACKEND);
        let tenant_filter = scope.name().map(|name| interner.intern(name));
        let tenant_hash = scope.tag(interner);

        let mut sessions: Vec<_> = raw
            .sessions
            .into_iter()
            .filter(|s| s.backend_type_hash == client_hash)
            .filter(|s| tenant_filter.is_none_or(|t| s.datname_hash == t))
            .collect();
        sessions.sort_by_key(|s| s.session_id);

        let kept: std::collections::HashSet<i32> =
            sessions.iter().map(|s| s.session_id).collect();

        let mut locks: Vec<_> = raw
            .locks
            .into_iter()
            .filter(|l| {
                // A lock row whose session vanished between the two source
                // reads cannot be attributed; drop it rather than guess.
                let keep = kept.contains(&l.session_id);
                if !keep {
                    debug!(session_id = l.session_id, "dropping lock row without session");
                }
                keep
            })
            .map(|mut l| {
                l.tenant_hash = tenant_hash;
                l
            })
            .collect();
        locks.sort_by(|a, b| {
            a.resource_key()
                .cmp(&b.resource_key())
                .then(b.granted.cmp(&a.granted))
                .then(a.session_id.cmp(&b.session_id))
                .then(a.mode.cmp(&b.mode))
        });

        self.generation += 1;
        Ok(LockSnapshot {
            generation: self.generation,
            timestamp: clock.now(),
            tenant_hash,
            locks,
            sessions,
        })
    }
}
