//! SQL query builders for PostgreSQL statistics views.
//!
//! Every query is prefixed with [`QUERY_MARKER_SQL`].

use crate::storage::model::PG_VERSION_96;

use super::plan::{StatementFetchPlan, StatementSource, TimingColumns};

/// Comment prefixed to every query the collector sends.
pub const QUERY_MARKER_SQL: &str = "/* pgdelta-collector */ ";

/// Schema holding the optional SECURITY DEFINER helper functions.
pub const HELPER_SCHEMA: &str = "pgdelta";

pub const STATEMENTS_HELPER: &str = "get_stat_statements";

/// Quotes a value as a SQL string literal.
pub(crate) fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `E'^...'` literal matching query texts that start with the marker.
///
/// The marker is escaped for the regex engine first, then for the `E''`
/// string syntax (backslashes and quotes doubled).
pub(crate) fn marker_pattern_literal(marker: &str) -> String {
    let pattern = format!("^{}", regex::escape(marker.trim()));
    format!("E'{}'", pattern.replace('\\', "\\\\").replace('\'', "''"))
}

/// Whether a query text was issued by the collector itself.
pub(crate) fn is_collector_statement(query: &str) -> bool {
    query.starts_with(QUERY_MARKER_SQL.trim())
}

/// Session settings applied on every new connection.
pub(crate) fn build_session_setup(statement_timeout_ms: i32, application_name: &str) -> String {
    format!(
        "{QUERY_MARKER_SQL}SET statement_timeout = {}; {QUERY_MARKER_SQL}SET application_name = {}",
        statement_timeout_ms.max(0),
        quote_literal(application_name)
    )
}

pub(crate) fn build_version_query() -> String {
    format!(
        "{QUERY_MARKER_SQL}SELECT current_setting('server_version') AS server_version, \
         current_setting('server_version_num')::integer AS server_version_num"
    )
}

pub(crate) fn build_current_database_oid_query() -> String {
    format!("{QUERY_MARKER_SQL}SELECT oid FROM pg_database WHERE datname = current_database()")
}

pub(crate) fn build_data_directory_query() -> String {
    format!("{QUERY_MARKER_SQL}SELECT current_setting('data_directory') AS value")
}

// ============================================================
// Capability probes
// ============================================================

pub(crate) fn build_superuser_probe() -> String {
    format!("{QUERY_MARKER_SQL}SELECT current_setting('is_superuser') = 'on' AS enabled")
}

pub(crate) fn build_monitoring_role_probe() -> String {
    format!(
        r#"{QUERY_MARKER_SQL}SELECT EXISTS (
                SELECT 1
                FROM pg_auth_members m
                JOIN pg_roles r ON r.oid = m.roleid
                JOIN pg_roles u ON u.oid = m.member
                WHERE r.rolname = 'pg_monitor' AND u.rolname = current_user
            ) AS enabled"#
    )
}

pub(crate) fn build_helper_exists_probe(function_name: &str) -> String {
    format!(
        r#"{QUERY_MARKER_SQL}SELECT EXISTS (
                SELECT 1
                FROM pg_proc p
                JOIN pg_namespace n ON n.oid = p.pronamespace
                WHERE n.nspname = {} AND p.proname = {}
            ) AS enabled"#,
        quote_literal(HELPER_SCHEMA),
        quote_literal(function_name)
    )
}

pub(crate) fn build_create_extension() -> String {
    format!("{QUERY_MARKER_SQL}CREATE EXTENSION IF NOT EXISTS pg_stat_statements")
}

// ============================================================
// Statements
// ============================================================

/// Builds the statement statistics query described by `plan`.
///
/// Columns the server does not have are selected as typed NULLs so that
/// every plan yields the same result shape.
pub(crate) fn build_statements_query(plan: &StatementFetchPlan, marker: &str) -> String {
    let queryid_expr = if plan.has_query_id() {
        "s.queryid AS queryid"
    } else {
        "NULL::bigint AS queryid"
    };

    let (total, min, max, mean, stddev) = match plan.timing {
        TimingColumns::Legacy => (
            "s.total_time",
            "s.min_time",
            "s.max_time",
            "s.mean_time",
            "s.stddev_time",
        ),
        TimingColumns::Exec | TimingColumns::ExecSplitIo => (
            "s.total_exec_time",
            "s.min_exec_time",
            "s.max_exec_time",
            "s.mean_exec_time",
            "s.stddev_exec_time",
        ),
    };
    let (blk_read, blk_write) = match plan.timing {
        TimingColumns::ExecSplitIo => (
            "(s.shared_blk_read_time + s.local_blk_read_time)",
            "(s.shared_blk_write_time + s.local_blk_write_time)",
        ),
        _ => ("s.blk_read_time", "s.blk_write_time"),
    };

    let extra = |expr: &str, alias: &str| {
        if plan.has_extra_timing() {
            format!("{expr}::double precision AS {alias}")
        } else {
            format!("NULL::double precision AS {alias}")
        }
    };
    let min_expr = extra(min, "min_time");
    let max_expr = extra(max, "max_time");
    let mean_expr = extra(mean, "mean_time");
    let stddev_expr = extra(stddev, "stddev_time");

    let source = match plan.source {
        StatementSource::Helper => format!("{HELPER_SCHEMA}.{STATEMENTS_HELPER}()"),
        StatementSource::StandardView => "pg_stat_statements".to_string(),
    };
    let marker_pattern = marker_pattern_literal(marker);

    format!(
        r#"{marker}SELECT
                s.userid,
                s.dbid,
                COALESCE(s.query, '') AS query,
                {queryid_expr},
                s.calls,
                {total}::double precision AS total_time,
                s.rows,
                s.shared_blks_hit,
                s.shared_blks_read,
                s.shared_blks_dirtied,
                s.shared_blks_written,
                s.local_blks_hit,
                s.local_blks_read,
                s.local_blks_dirtied,
                s.local_blks_written,
                s.temp_blks_read,
                s.temp_blks_written,
                {blk_read}::double precision AS blk_read_time,
                {blk_write}::double precision AS blk_write_time,
                {min_expr},
                {max_expr},
                {mean_expr},
                {stddev_expr}
            FROM {source} s
            WHERE s.dbid IN (SELECT oid FROM pg_database WHERE datname = current_database())
              AND s.query !~ {marker_pattern}
              AND s.query <> '<insufficient privilege>'
              AND s.query NOT LIKE 'DEALLOCATE %'"#
    )
}

// ============================================================
// Relations, indexes, functions
// ============================================================

pub(crate) fn build_relation_stats_query() -> String {
    format!(
        r#"{QUERY_MARKER_SQL}SELECT
                s.relid,
                pg_relation_size(s.relid) AS size_bytes,
                COALESCE(s.seq_scan, 0)::bigint AS seq_scan,
                COALESCE(s.seq_tup_read, 0)::bigint AS seq_tup_read,
                s.idx_scan::bigint AS idx_scan,
                s.idx_tup_fetch::bigint AS idx_tup_fetch,
                COALESCE(s.n_tup_ins, 0)::bigint AS n_tup_ins,
                COALESCE(s.n_tup_upd, 0)::bigint AS n_tup_upd,
                COALESCE(s.n_tup_del, 0)::bigint AS n_tup_del,
                COALESCE(s.n_tup_hot_upd, 0)::bigint AS n_tup_hot_upd,
                COALESCE(s.n_live_tup, 0)::bigint AS n_live_tup,
                COALESCE(s.n_dead_tup, 0)::bigint AS n_dead_tup,
                COALESCE(s.vacuum_count, 0)::bigint AS vacuum_count,
                COALESCE(s.autovacuum_count, 0)::bigint AS autovacuum_count,
                COALESCE(s.analyze_count, 0)::bigint AS analyze_count,
                COALESCE(s.autoanalyze_count, 0)::bigint AS autoanalyze_count,
                COALESCE(io.heap_blks_read, 0)::bigint AS heap_blks_read,
                COALESCE(io.heap_blks_hit, 0)::bigint AS heap_blks_hit,
                io.idx_blks_read::bigint AS idx_blks_read,
                io.idx_blks_hit::bigint AS idx_blks_hit,
                io.toast_blks_read::bigint AS toast_blks_read,
                io.toast_blks_hit::bigint AS toast_blks_hit,
                io.tidx_blks_read::bigint AS tidx_blks_read,
                io.tidx_blks_hit::bigint AS tidx_blks_hit
            FROM pg_stat_user_tables s
            LEFT JOIN pg_statio_user_tables io ON io.relid = s.relid"#
    )
}

pub(crate) fn build_index_stats_query() -> String {
    format!(
        r#"{QUERY_MARKER_SQL}SELECT
                s.indexrelid,
                pg_relation_size(s.indexrelid) AS size_bytes,
                COALESCE(s.idx_scan, 0)::bigint AS idx_scan,
                COALESCE(s.idx_tup_read, 0)::bigint AS idx_tup_read,
                COALESCE(s.idx_tup_fetch, 0)::bigint AS idx_tup_fetch,
                COALESCE(io.idx_blks_read, 0)::bigint AS idx_blks_read,
                COALESCE(io.idx_blks_hit, 0)::bigint AS idx_blks_hit
            FROM pg_stat_user_indexes s
            LEFT JOIN pg_statio_user_indexes io ON io.indexrelid = s.indexrelid"#
    )
}

pub(crate) fn build_function_stats_query() -> String {
    format!(
        r#"{QUERY_MARKER_SQL}SELECT
                funcid,
                calls,
                total_time::double precision AS total_time,
                self_time::double precision AS self_time
            FROM pg_stat_user_functions"#
    )
}

// ============================================================
// Catalog
// ============================================================

pub(crate) fn build_roles_query() -> String {
    format!(
        r#"{QUERY_MARKER_SQL}SELECT
                oid,
                rolname::text AS rolname,
                rolsuper,
                rolcanlogin,
                rolconnlimit
            FROM pg_roles"#
    )
}

pub(crate) fn build_databases_query() -> String {
    format!(
        r#"{QUERY_MARKER_SQL}SELECT
                oid,
                datname::text AS datname,
                datdba,
                pg_encoding_to_char(encoding)::text AS encoding,
                datallowconn,
                age(datfrozenxid) AS frozen_xid_age
            FROM pg_database
            WHERE NOT datistemplate"#
    )
}

pub(crate) fn build_settings_query() -> String {
    format!(
        r#"{QUERY_MARKER_SQL}SELECT
                name,
                COALESCE(setting, '') AS setting,
                unit,
                boot_val,
                reset_val,
                source
            FROM pg_settings"#
    )
}

/// Builds version-aware query for pg_stat_activity.
///
/// 9.6 replaced the `waiting` flag with `wait_event_type`.
pub(crate) fn build_backends_query(server_version_num: i32) -> String {
    let waiting_expr = if server_version_num >= PG_VERSION_96 {
        "COALESCE(wait_event_type = 'Lock', false) AS waiting"
    } else {
        "waiting"
    };

    format!(
        r#"{QUERY_MARKER_SQL}SELECT
                pid,
                datid,
                usesysid,
                COALESCE(application_name, '') AS application_name,
                COALESCE(client_addr::text, '') AS client_addr,
                COALESCE(state, '') AS state,
                {waiting_expr},
                COALESCE(EXTRACT(EPOCH FROM backend_start)::bigint, 0) AS backend_start,
                EXTRACT(EPOCH FROM xact_start)::bigint AS xact_start,
                EXTRACT(EPOCH FROM query_start)::bigint AS query_start,
                EXTRACT(EPOCH FROM state_change)::bigint AS state_change
            FROM pg_stat_activity
            WHERE pid <> pg_backend_pid()"#
    )
}

pub(crate) fn build_relations_query() -> String {
    format!(
        r#"{QUERY_MARKER_SQL}SELECT
                c.oid,
                (SELECT oid FROM pg_database WHERE datname = current_database()) AS database_oid,
                n.nspname::text AS schema_name,
                c.relname::text AS relation_name,
                c.relkind::text AS relation_type,
                c.relpersistence::text AS persistence_type
            FROM pg_class c
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE c.relkind IN ('r', 'v', 'm', 'p')
              AND n.nspname NOT IN ('pg_catalog', 'information_schema')
              AND n.nspname !~ '^pg_toast'"#
    )
}

pub(crate) fn build_functions_query() -> String {
    format!(
        r#"{QUERY_MARKER_SQL}SELECT
                p.oid,
                (SELECT oid FROM pg_database WHERE datname = current_database()) AS database_oid,
                n.nspname::text AS schema_name,
                p.proname::text AS function_name,
                l.lanname::text AS language,
                COALESCE(pg_get_function_arguments(p.oid), '') AS arguments,
                COALESCE(pg_get_function_result(p.oid), '') AS result
            FROM pg_proc p
            JOIN pg_namespace n ON n.oid = p.pronamespace
            JOIN pg_language l ON l.oid = p.prolang
            WHERE n.nspname NOT IN ('pg_catalog', 'information_schema', {})"#,
        quote_literal(HELPER_SCHEMA)
    )
}
