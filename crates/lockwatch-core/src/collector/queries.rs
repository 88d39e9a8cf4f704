//! SQL builders for lock and session sampling.

/// Builds the session registry query over pg_stat_activity.
pub(super) fn build_session_query() -> &'static str {
    r#"
        SELECT
            pid,
            COALESCE(datname, '') as datname,
            COALESCE(usename, '') as usename,
            COALESCE(application_name, '') as application_name,
            COALESCE(client_addr::text, '') as client_addr,
            COALESCE(state, '') as state,
            COALESCE(query, '') as query,
            COALESCE(backend_type, '') as backend_type,
            COALESCE(EXTRACT(EPOCH FROM backend_start)::bigint, 0) as backend_start,
            COALESCE(EXTRACT(EPOCH FROM xact_start)::bigint, 0) as xact_start,
            COALESCE(EXTRACT(EPOCH FROM query_start)::bigint, 0) as query_start
        FROM pg_stat_activity
        WHERE pid IS NOT NULL
    "#
}

/// Builds the version-aware lock table query.
///
/// `pg_locks.waitstart` exists from PostgreSQL 14; older servers fall back
/// to the session's query_start as the wait origin. A relation dropped
/// between enumeration and the pg_class lookup resolves to 'unknown'
/// instead of failing the row.
pub(super) fn build_lock_query(server_version_num: Option<i32>) -> String {
    let wait_origin_expr = if server_version_num.unwrap_or(0) >= 140000 {
        "COALESCE(EXTRACT(EPOCH FROM l.waitstart)::bigint, \
         EXTRACT(EPOCH FROM a.query_start)::bigint, 0)"
    } else {
        "COALESCE(EXTRACT(EPOCH FROM a.query_start)::bigint, 0)"
    };

    format!(
        r#"
        SELECT
            l.pid,
            COALESCE(l.locktype, '') as lock_type,
            COALESCE(l.mode, '') as lock_mode,
            l.granted,
            COALESCE(n.nspname || '.' || c.relname, l.relation::text, 'unknown') as target,
            COALESCE(a.query, '') as query,
            COALESCE(a.datname, '') as datname,
            COALESCE(a.usename, '') as usename,
            COALESCE(a.application_name, '') as application_name,
            CASE
                WHEN l.granted THEN
                    COALESCE(EXTRACT(EPOCH FROM a.xact_start)::bigint,
                             EXTRACT(EPOCH FROM a.query_start)::bigint, 0)
                ELSE {wait_origin_expr}
            END as acquired_at
        FROM pg_locks l
        JOIN pg_stat_activity a ON a.pid = l.pid
        LEFT JOIN pg_class c ON c.oid = l.relation
        LEFT JOIN pg_namespace n ON n.oid = c.relnamespace
        WHERE l.pid IS NOT NULL
        ORDER BY l.pid, l.granted ASC
    "#
    )
}
