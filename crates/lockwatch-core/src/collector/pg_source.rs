//! PostgreSQL lock source.
//!
//! Connects with the standard PG* environment variables, keeps one client
//! connection, and reconnects transparently after a drop. Every sampling
//! statement runs under the configured `statement_timeout` so a stalled
//! resource manager fails the pass instead of blocking the scheduler.

use postgres::{Client, NoTls};
use std::time::Duration;
use tracing::{debug, warn};

use super::queries::{build_lock_query, build_session_query};
use super::{LockSource, RawSample, SampleError};
use crate::storage::interner::StringInterner;
use crate::storage::model::{LockMode, LockRecord, SessionInfo};
use crate::tenant::TenantScope;

pub struct PostgresLockSource {
    connection_string: String,
    client: Option<Client>,
    last_error: Option<String>,
    server_version_num: Option<i32>,
    statement_timeout: Duration,
}

impl PostgresLockSource {
    /// Creates a source from environment variables.
    ///
    /// Uses $USER as default if PGUSER is not set.
    pub fn from_env(statement_timeout: Duration) -> Result<Self, SampleError> {
        let user = std::env::var("PGUSER")
            .or_else(|_| std::env::var("USER"))
            .map_err(|_| SampleError::EnvNotSet("PGUSER or USER".to_string()))?;

        let host = std::env::var("PGHOST").unwrap_or_else(|_| "localhost".to_string());
        let port = std::env::var("PGPORT").unwrap_or_else(|_| "5432".to_string());
        let password = std::env::var("PGPASSWORD").unwrap_or_default();
        let database = std::env::var("PGDATABASE").unwrap_or_else(|_| user.clone());

        let connection_string = if password.is_empty() {
            format!(
                "host={} port={} user={} dbname={}",
                host, port, user, database
            )
        } else {
            format!(
                "host={} port={} user={} password={} dbname={}",
                host, port, user, password, database
            )
        };

        Ok(Self::with_connection_string(
            connection_string,
            statement_timeout,
        ))
    }

    /// Creates a source with an explicit connection string.
    pub fn with_connection_string(connection_string: String, statement_timeout: Duration) -> Self {
        Self {
            connection_string,
            client: None,
            last_error: None,
            server_version_num: None,
            statement_timeout,
        }
    }

    /// Attempts to connect, for startup checks before the first pass.
    pub fn try_connect(&mut self) -> Result<(), SampleError> {
        self.ensure_connected()
    }

    /// Returns the last error message, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn ensure_connected(&mut self) -> Result<(), SampleError> {
        if self.client.is_some() {
            return Ok(());
        }

        match Client::connect(&self.connection_string, NoTls) {
            Ok(mut client) => {
                // Determine server version once per (re)connect.
                self.server_version_num = client
                    .query_one("SHOW server_version_num", &[])
                    .ok()
                    .and_then(|row| row.try_get::<_, String>(0).ok())
                    .and_then(|v| v.parse::<i32>().ok());

                let timeout_ms = self.statement_timeout.as_millis();
                if let Err(e) =
                    client.batch_execute(&format!("SET statement_timeout = {}", timeout_ms))
                {
                    warn!(error = %format_postgres_error(&e), "failed to set statement_timeout");
                }

                self.client = Some(client);
                self.last_error = None;
                debug!(version = ?self.server_version_num, "lock source connected");
                Ok(())
            }
            Err(e) => {
                let msg = format_postgres_error(&e);
                self.last_error = Some(msg.clone());
                self.server_version_num = None;
                Err(SampleError::Connection(msg))
            }
        }
    }

    /// Drops connection state after a query failure so the next pass
    /// reconnects from scratch.
    fn reset(&mut self, msg: String) -> SampleError {
        self.last_error = Some(msg.clone());
        self.client = None;
        self.server_version_num = None;
        if msg.contains("statement timeout") {
            SampleError::Timeout(msg)
        } else {
            SampleError::Query(msg)
        }
    }
}

impl LockSource for PostgresLockSource {
    fn sample(
        &mut self,
        _scope: &TenantScope,
        interner: &mut StringInterner,
    ) -> Result<RawSample, SampleError> {
        self.ensure_connected()?;
        let version = self.server_version_num;
        let client = self.client.as_mut().expect("connected above");

        let session_rows = match client.query(build_session_query(), &[]) {
            Ok(rows) => rows,
            Err(e) => {
                let msg = format_postgres_error(&e);
                return Err(self.reset(msg));
            }
        };

        let lock_rows = match client.query(build_lock_query(version).as_str(), &[]) {
            Ok(rows) => rows,
            Err(e) => {
                let msg = format_postgres_error(&e);
                return Err(self.reset(msg));
            }
        };

        let sessions: Vec<SessionInfo> = session_rows
            .iter()
            .filter_map(|row| parse_session_row(row, interner))
            .collect();
        let locks: Vec<LockRecord> = lock_rows
            .iter()
            .filter_map(|row| parse_lock_row(row, interner))
            .collect();

        Ok(RawSample { locks, sessions })
    }
}

/// Safely parses one pg_stat_activity row. None if the pid is missing.
fn parse_session_row(row: &postgres::Row, interner: &mut StringInterner) -> Option<SessionInfo> {
    let session_id: i32 = row.try_get(0).ok()?;

    let datname: String = row.try_get(1).unwrap_or_default();
    let usename: String = row.try_get(2).unwrap_or_default();
    let application_name: String = row.try_get(3).unwrap_or_default();
    let client_addr: String = row.try_get(4).unwrap_or_default();
    let state: String = row.try_get(5).unwrap_or_default();
    let query: String = row.try_get(6).unwrap_or_default();
    let backend_type: String = row.try_get(7).unwrap_or_default();

    let backend_start: i64 = row.try_get(8).unwrap_or(0);
    let xact_start: i64 = row.try_get(9).unwrap_or(0);
    let query_start: i64 = row.try_get(10).unwrap_or(0);

    Some(SessionInfo {
        session_id,
        backend_start,
        xact_start,
        query_start,
        state_hash: interner.intern(&state),
        datname_hash: interner.intern(&datname),
        usename_hash: interner.intern(&usename),
        application_name_hash: interner.intern(&application_name),
        backend_type_hash: interner.intern(&backend_type),
        query_hash: interner.intern(&query),
        client_addr,
    })
}

/// Safely parses one pg_locks row. None if critical columns fail.
fn parse_lock_row(row: &postgres::Row, interner: &mut StringInterner) -> Option<LockRecord> {
    let session_id: i32 = row.try_get(0).ok()?;
    let lock_type: String = row.try_get(1).unwrap_or_default();
    let lock_mode: String = row.try_get(2).unwrap_or_default();
    let granted: bool = row.try_get(3).unwrap_or(true);
    let target: String = row.try_get(4).unwrap_or_else(|_| "unknown".to_string());
    let query: String = row.try_get(5).unwrap_or_default();
    let datname: String = row.try_get(6).unwrap_or_default();
    let usename: String = row.try_get(7).unwrap_or_default();
    let application_name: String = row.try_get(8).unwrap_or_default();
    let acquired_at: i64 = row.try_get(9).unwrap_or(0);

    // Unrecognized modes degrade to AccessShare so they never fabricate
    // conflicts the server did not report.
    let mode = match LockMode::from_label(&lock_mode) {
        Some(mode) => mode,
        None => {
            warn!(mode = %lock_mode, session_id, "unrecognized lock mode");
            LockMode::AccessShare
        }
    };

    Some(LockRecord {
        tenant_hash: 0,
        lock_type_hash: interner.intern(&lock_type),
        target_hash: interner.intern(&target),
        mode,
        granted,
        session_id,
        acquired_at,
        query_hash: interner.intern(&query),
        datname_hash: interner.intern(&datname),
        usename_hash: interner.intern(&usename),
        application_name_hash: interner.intern(&application_name),
        impact_score: 0,
    })
}

/// Formats PostgreSQL error message for display.
fn format_postgres_error(e: &postgres::Error) -> String {
    if let Some(db_error) = e.as_db_error() {
        format!("{}: {}", db_error.severity(), db_error.message())
    } else {
        let msg = e.to_string();
        if msg.contains("Connection refused") {
            "connection refused".to_string()
        } else if msg.contains("password authentication failed") {
            "password authentication failed".to_string()
        } else {
            msg
        }
    }
}
