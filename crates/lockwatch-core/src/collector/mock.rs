//! Mock lock source and pre-built contention scenarios for testing.
//!
//! Scenarios model realistic instance states (quiet system, a single
//! blocking chain, a two-session deadlock, a contention storm) so engine
//! behavior can be exercised without a live resource manager.

use super::{LockSource, RawSample, SampleError};
use crate::storage::interner::StringInterner;
use crate::storage::model::{LockMode, LockRecord, SessionInfo};
use crate::tenant::TenantScope;

/// One scripted session row, interned at sample time.
#[derive(Debug, Clone)]
pub struct MockSession {
    pub session_id: i32,
    pub datname: String,
    pub usename: String,
    pub application_name: String,
    pub backend_type: String,
    pub state: String,
    pub query: String,
    pub client_addr: String,
    pub backend_start: i64,
    pub xact_start: i64,
    pub query_start: i64,
}

impl MockSession {
    /// A client backend in the given database.
    pub fn client(session_id: i32, datname: &str) -> Self {
        Self {
            session_id,
            datname: datname.to_string(),
            usename: "app".to_string(),
            application_name: "mock".to_string(),
            backend_type: "client backend".to_string(),
            state: "active".to_string(),
            query: String::new(),
            client_addr: "127.0.0.1".to_string(),
            backend_start: 0,
            xact_start: 0,
            query_start: 0,
        }
    }

    pub fn background(session_id: i32, backend_type: &str) -> Self {
        let mut s = Self::client(session_id, "");
        s.backend_type = backend_type.to_string();
        s
    }

    pub fn xact_start(mut self, at: i64) -> Self {
        self.xact_start = at;
        self
    }

    pub fn query(mut self, q: &str) -> Self {
        self.query = q.to_string();
        self
    }
}

/// One scripted lock row.
#[derive(Debug, Clone)]
pub struct MockLock {
    pub session_id: i32,
    pub lock_type: String,
    pub target: String,
    pub mode: LockMode,
    pub granted: bool,
    pub acquired_at: i64,
}

impl MockLock {
    pub fn granted(session_id: i32, target: &str, mode: LockMode, since: i64) -> Self {
        Self {
            session_id,
            lock_type: "relation".to_string(),
            target: target.to_string(),
            mode,
            granted: true,
            acquired_at: since,
        }
    }

    pub fn waiting(session_id: i32, target: &str, mode: LockMode, since: i64) -> Self {
        let mut lock = Self::granted(session_id, target, mode, since);
        lock.granted = false;
        lock
    }
}

/// Scriptable `LockSource` for tests.
#[derive(Debug, Default)]
pub struct MockLockSource {
    sessions: Vec<MockSession>,
    locks: Vec<MockLock>,
    fail_next: Option<String>,
}

impl MockLockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_session(&mut self, session: MockSession) -> &mut Self {
        self.sessions.push(session);
        self
    }

    pub fn push_lock(&mut self, lock: MockLock) -> &mut Self {
        self.locks.push(lock);
        self
    }

    /// Clears scripted state between passes.
    pub fn reset(&mut self) {
        self.sessions.clear();
        self.locks.clear();
    }

    /// The next `sample` call fails with a connection error.
    pub fn fail_next(&mut self, msg: &str) {
        self.fail_next = Some(msg.to_string());
    }

    // ------------------------------------------------------------
    // Scenarios
    // ------------------------------------------------------------

    /// A quiet instance: two idle-ish client backends, no contention.
    pub fn idle_system(now: i64) -> Self {
        let mut source = Self::new();
        source.push_session(MockSession::client(101, "app"));
        source.push_session(MockSession::client(102, "app"));
        source.push_session(MockSession::background(90, "autovacuum launcher"));
        source.push_lock(MockLock::granted(
            101,
            "public.accounts",
            LockMode::AccessShare,
            now - 5,
        ));
        source
    }

    /// Holder 201 has an exclusive lock; waiter 202 wants the same table.
    pub fn single_block(now: i64) -> Self {
        let mut source = Self::new();
        source.push_session(
            MockSession::client(201, "app")
                .xact_start(now - 120)
                .query("UPDATE accounts SET balance = balance - 1"),
        );
        source.push_session(
            MockSession::client(202, "app")
                .xact_start(now - 90)
                .query("ALTER TABLE accounts ADD COLUMN note text"),
        );
        source.push_lock(MockLock::granted(
            201,
            "public.accounts",
            LockMode::Exclusive,
            now - 120,
        ));
        source.push_lock(MockLock::waiting(
            202,
            "public.accounts",
            LockMode::Exclusive,
            now - 90,
        ));
        source
    }

    /// Classic two-session deadlock: 301 holds r1 and waits on r2, 302
    /// holds r2 and waits on r1.
    pub fn deadlock_pair(now: i64) -> Self {
        let mut source = Self::new();
        source.push_session(MockSession::client(301, "app").xact_start(now - 60));
        source.push_session(MockSession::client(302, "app").xact_start(now - 45));
        source.push_lock(MockLock::granted(
            301,
            "public.orders",
            LockMode::RowExclusive,
            now - 60,
        ));
        source.push_lock(MockLock::waiting(
            301,
            "public.items",
            LockMode::Share,
            now - 30,
        ));
        source.push_lock(MockLock::granted(
            302,
            "public.items",
            LockMode::RowExclusive,
            now - 45,
        ));
        source.push_lock(MockLock::waiting(
            302,
            "public.orders",
            LockMode::Share,
            now - 30,
        ));
        source
    }

    /// `blockers` independent holders each blocking one waiter, all held
    /// long enough to grade High.
    pub fn contention_storm(now: i64, blockers: i32) -> Self {
        let mut source = Self::new();
        for i in 0..blockers {
            let holder = 400 + i * 2;
            let waiter = 401 + i * 2;
            let target = format!("public.t{}", i);
            source.push_session(MockSession::client(holder, "app").xact_start(now - 400));
            source.push_session(MockSession::client(waiter, "app").xact_start(now - 350));
            source.push_lock(MockLock::granted(
                holder,
                &target,
                LockMode::AccessExclusive,
                now - 400,
            ));
            source.push_lock(MockLock::waiting(
                waiter,
                &target,
                LockMode::AccessShare,
                now - 350,
            ));
        }
        source
    }
}

impl LockSource for MockLockSource {
    fn sample(
        &mut self,
        _scope: &TenantScope,
        interner: &mut StringInterner,
    ) -> Result<RawSample, SampleError> {
        if let Some(msg) = self.fail_next.take() {
            return Err(SampleError::Connection(msg));
        }

        let sessions = self
            .sessions
            .iter()
            .map(|s| SessionInfo {
                session_id: s.session_id,
                backend_start: s.backend_start,
                xact_start: s.xact_start,
                query_start: s.query_start,
                state_hash: interner.intern(&s.state),
                datname_hash: interner.intern(&s.datname),
                usename_hash: interner.intern(&s.usename),
                application_name_hash: interner.intern(&s.application_name),
                backend_type_hash: interner.intern(&s.backend_type),
                query_hash: interner.intern(&s.query),
                client_addr: s.client_addr.clone(),
            })
            .collect();

        let by_id: std::collections::HashMap<i32, &MockSession> =
            self.sessions.iter().map(|s| (s.session_id, s)).collect();

        let locks = self
            .locks
            .iter()
            .map(|l| {
                let session = by_id.get(&l.session_id);
                LockRecord {
                    tenant_hash: 0,
                    lock_type_hash: interner.intern(&l.lock_type),
                    target_hash: interner.intern(&l.target),
                    mode: l.mode,
                    granted: l.granted,
                    session_id: l.session_id,
                    acquired_at: l.acquired_at,
                    query_hash: interner.intern(session.map(|s| s.query.as_str()).unwrap_or("")),
                    datname_hash: interner
                        .intern(session.map(|s| s.datname.as_str()).unwrap_or("")),
                    usename_hash: interner
                        .intern(session.map(|s| s.usename.as_str()).unwrap_or("")),
                    application_name_hash: interner
                        .intern(session.map(|s| s.application_name.as_str()).unwrap_or("")),
                    impact_score: 0,
                }
            })
            .collect();

        Ok(RawSample { locks, sessions })
    }
}
