//! PostgreSQL statistics and catalog data collected from system views.
//!
//! Counter records are keyed by a stable entity key so that the same logical
//! object can be matched across two snapshots. Fields that only exist on some
//! server versions (or that the server reports as NULL) are `Option`s: an
//! absent value is never the same thing as zero.

use serde::{Deserialize, Serialize};

pub type Oid = u32;

pub const PG_VERSION_94: i32 = 90400;
pub const PG_VERSION_95: i32 = 90500;
pub const PG_VERSION_96: i32 = 90600;
pub const PG_VERSION_13: i32 = 130000;
pub const PG_VERSION_17: i32 = 170000;

/// Server version as reported by `server_version` / `server_version_num`.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct PostgresVersion {
    /// Source: `current_setting('server_version')`, e.g. `"15.4 (Debian 15.4-1)"`.
    pub full: String,
    /// Leading numeric part of `full`, e.g. `"15.4"`.
    pub short: String,
    /// Source: `current_setting('server_version_num')`, e.g. `150004`.
    pub numeric: i32,
}

impl PostgresVersion {
    pub fn new(full: impl Into<String>, numeric: i32) -> Self {
        let full = full.into();
        let short = full.split_whitespace().next().unwrap_or_default().to_string();
        Self {
            full,
            short,
            numeric,
        }
    }
}

// ---------------------------------------------------------------------------
// Entity keys
// ---------------------------------------------------------------------------

/// Identity of a normalized statement within one monitored server.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatementKey {
    pub database_oid: Oid,
    pub role_oid: Oid,
    /// `pg_stat_statements.queryid` on 9.4+, otherwise a fingerprint of the
    /// normalized query text.
    pub query_id: i64,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationKey {
    pub database_oid: Oid,
    pub relid: Oid,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexKey {
    pub database_oid: Oid,
    pub indexrelid: Oid,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionKey {
    pub database_oid: Oid,
    pub funcid: Oid,
}

// ---------------------------------------------------------------------------
// Counter records
// ---------------------------------------------------------------------------

/// Query statistics from pg_stat_statements (or the stats helper function).
///
/// Times are in milliseconds.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct StatementStats {
    /// Source: `calls`
    pub calls: i64,
    /// Source: `total_time` (`total_exec_time` on 13+)
    pub total_time: f64,
    pub rows: i64,
    pub shared_blks_hit: i64,
    pub shared_blks_read: i64,
    pub shared_blks_dirtied: i64,
    pub shared_blks_written: i64,
    pub local_blks_hit: i64,
    pub local_blks_read: i64,
    pub local_blks_dirtied: i64,
    pub local_blks_written: i64,
    pub temp_blks_read: i64,
    pub temp_blks_written: i64,
    pub blk_read_time: f64,
    pub blk_write_time: f64,

    /// PostgreSQL 9.5+. Not cumulative: these move in both directions.
    pub min_time: Option<f64>,
    pub max_time: Option<f64>,
    pub mean_time: Option<f64>,
    pub stddev_time: Option<f64>,
}

/// Per-table statistics from pg_stat_user_tables merged with pg_statio_user_tables.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct RelationStats {
    /// Source: `pg_relation_size(relid)`
    pub size_bytes: i64,
    pub seq_scan: i64,
    pub seq_tup_read: i64,
    /// NULL for tables without indexes.
    pub idx_scan: Option<i64>,
    pub idx_tup_fetch: Option<i64>,
    pub n_tup_ins: i64,
    pub n_tup_upd: i64,
    pub n_tup_del: i64,
    pub n_tup_hot_upd: i64,
    pub n_live_tup: i64,
    pub n_dead_tup: i64,
    pub vacuum_count: i64,
    pub autovacuum_count: i64,
    pub analyze_count: i64,
    pub autoanalyze_count: i64,
    pub heap_blks_read: i64,
    pub heap_blks_hit: i64,
    pub idx_blks_read: Option<i64>,
    pub idx_blks_hit: Option<i64>,
    /// NULL for tables without a TOAST table.
    pub toast_blks_read: Option<i64>,
    pub toast_blks_hit: Option<i64>,
    pub tidx_blks_read: Option<i64>,
    pub tidx_blks_hit: Option<i64>,
}

/// Per-index statistics from pg_stat_user_indexes merged with pg_statio_user_indexes.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct IndexStats {
    pub size_bytes: i64,
    pub idx_scan: i64,
    pub idx_tup_read: i64,
    pub idx_tup_fetch: i64,
    pub idx_blks_read: i64,
    pub idx_blks_hit: i64,
}

/// Source: `pg_stat_user_functions` (requires `track_functions`).
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct FunctionStats {
    pub calls: i64,
    pub total_time: f64,
    pub self_time: f64,
}

// ---------------------------------------------------------------------------
// Catalog data (carried for reporting, never diffed)
// ---------------------------------------------------------------------------

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct PostgresRole {
    pub oid: Oid,
    pub name: String,
    pub superuser: bool,
    pub can_login: bool,
    pub connection_limit: i32,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct PostgresDatabase {
    pub oid: Oid,
    pub name: String,
    pub owner_role_oid: Oid,
    pub encoding: String,
    pub allow_connections: bool,
    pub frozen_xid_age: i32,
}

/// One row of pg_stat_activity.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct PostgresBackend {
    pub pid: i32,
    pub database_oid: Option<Oid>,
    pub role_oid: Option<Oid>,
    pub application_name: String,
    pub client_addr: String,
    pub state: String,
    pub waiting: bool,
    /// Unix seconds.
    pub backend_start: i64,
    pub xact_start: Option<i64>,
    pub query_start: Option<i64>,
    pub state_change: Option<i64>,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct PostgresRelation {
    pub oid: Oid,
    pub database_oid: Oid,
    pub schema_name: String,
    pub relation_name: String,
    /// `pg_class.relkind`, e.g. `r`, `m`, `p`.
    pub relation_type: String,
    pub persistence_type: String,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct PostgresSetting {
    pub name: String,
    pub current_value: String,
    pub unit: Option<String>,
    pub boot_value: Option<String>,
    pub reset_value: Option<String>,
    pub source: Option<String>,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct PostgresFunction {
    pub oid: Oid,
    pub database_oid: Oid,
    pub schema_name: String,
    pub function_name: String,
    pub language: String,
    pub arguments: String,
    pub result: String,
}

/// A server log line captured by the log collector.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct LogLine {
    /// Unix seconds.
    pub occurred_at: i64,
    pub log_level: String,
    pub backend_pid: i32,
    pub content: String,
}

/// An EXPLAIN plan captured for a slow statement.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct PostgresExplain {
    /// Unix seconds.
    pub occurred_at: i64,
    pub statement_key: Option<StatementKey>,
    pub explain_output: String,
}

/// Query text for one statement key. Lives only for the cycle that fetched it.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct StatementText {
    pub query: String,
    /// Whether the key was derived from the text instead of a server queryid.
    pub fingerprinted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_short_strips_distribution_suffix() {
        let v = PostgresVersion::new("15.4 (Debian 15.4-1.pgdg120+1)", 150004);
        assert_eq!(v.short, "15.4");
        assert_eq!(v.numeric, 150004);
    }

    #[test]
    fn version_short_handles_empty_string() {
        let v = PostgresVersion::new("", 0);
        assert_eq!(v.short, "");
    }
}
