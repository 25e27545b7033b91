//! PostgreSQL statistics acquisition.
//!
//! Reads cumulative counters and catalog data from:
//! - `pg_stat_statements` (or the `pgdelta.get_stat_statements()` helper)
//! - `pg_stat_user_tables` + `pg_statio_user_tables`
//! - `pg_stat_user_indexes` + `pg_statio_user_indexes`
//! - `pg_stat_user_functions`
//! - `pg_roles`, `pg_database`, `pg_settings`, `pg_stat_activity`, `pg_class`, `pg_proc`
//!
//! Every query starts with [`queries::QUERY_MARKER_SQL`] so the collector can
//! recognize (and exclude) its own statements in pg_stat_statements.
//!
//! The [`PgConnection`] trait is the seam between SQL text and typed rows:
//! [`PostgresConnection`] talks to a real server, `collector::mock` provides
//! a scripted connection for tests.

mod catalog;
mod functions;
mod plan;
mod probes;
pub(crate) mod queries;
mod relations;
mod statements;

use postgres::error::SqlState;
use postgres::types::FromSql;
use postgres::{Client, NoTls, Row};
use tracing::{debug, info};

use crate::config::CollectionOpts;
use crate::storage::model::{
    FunctionStats, IndexStats, Oid, PostgresBackend, PostgresDatabase, PostgresFunction,
    PostgresRelation, PostgresRole, PostgresSetting, PostgresVersion, RelationStats,
    StatementStats,
};

pub use catalog::{Catalog, acquire_catalog};
pub use functions::acquire_function_stats;
pub use plan::{OptionalFields, StatementFetchPlan, StatementSource, TimingColumns};
pub use probes::{
    Capabilities, connected_as_monitoring_role, connected_as_superuser, probe_capabilities,
    stats_helper_exists,
};
pub use relations::{acquire_index_stats, acquire_relation_stats};
pub use statements::{AcquiredStatements, acquire_statements, fingerprint};

/// Error type for PostgreSQL acquisition.
#[derive(Debug, Clone, PartialEq)]
pub enum PgCollectError {
    /// Environment variable not set.
    EnvNotSet(String),
    /// Connection failed or was lost.
    ConnectionError(String),
    /// Query execution failed.
    QueryError(String),
    /// The queried relation does not exist (SQLSTATE 42P01).
    UndefinedTable(String),
}

impl std::fmt::Display for PgCollectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PgCollectError::EnvNotSet(var) => write!(f, "PostgreSQL: {} not set", var),
            PgCollectError::ConnectionError(msg) => write!(f, "PostgreSQL: {}", msg),
            PgCollectError::QueryError(msg) => write!(f, "PostgreSQL query error: {}", msg),
            PgCollectError::UndefinedTable(msg) => {
                write!(f, "PostgreSQL relation does not exist: {}", msg)
            }
        }
    }
}

impl std::error::Error for PgCollectError {}

/// One row of the statement statistics source.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatementRow {
    pub userid: Oid,
    pub dbid: Oid,
    pub query: String,
    /// NULL before 9.4.
    pub queryid: Option<i64>,
    pub stats: StatementStats,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RelationStatsRow {
    pub relid: Oid,
    pub stats: RelationStats,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct IndexStatsRow {
    pub indexrelid: Oid,
    pub stats: IndexStats,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FunctionStatsRow {
    pub funcid: Oid,
    pub stats: FunctionStats,
}

/// A connection that runs acquisition SQL and returns typed rows.
///
/// The SQL text is always built by this module; implementations only map
/// result columns to row types.
pub trait PgConnection {
    fn server_version(&mut self, sql: &str) -> Result<PostgresVersion, PgCollectError>;
    fn current_database_oid(&mut self, sql: &str) -> Result<Oid, PgCollectError>;
    /// Single boolean probe. No rows means `false`.
    fn query_flag(&mut self, sql: &str) -> Result<bool, PgCollectError>;
    /// Single text value. No rows means `None`.
    fn query_text(&mut self, sql: &str) -> Result<Option<String>, PgCollectError>;
    fn execute(&mut self, sql: &str) -> Result<(), PgCollectError>;

    fn statements(&mut self, sql: &str) -> Result<Vec<StatementRow>, PgCollectError>;
    fn relation_stats(&mut self, sql: &str) -> Result<Vec<RelationStatsRow>, PgCollectError>;
    fn index_stats(&mut self, sql: &str) -> Result<Vec<IndexStatsRow>, PgCollectError>;
    fn function_stats(&mut self, sql: &str) -> Result<Vec<FunctionStatsRow>, PgCollectError>;

    fn roles(&mut self, sql: &str) -> Result<Vec<PostgresRole>, PgCollectError>;
    fn databases(&mut self, sql: &str) -> Result<Vec<PostgresDatabase>, PgCollectError>;
    fn settings(&mut self, sql: &str) -> Result<Vec<PostgresSetting>, PgCollectError>;
    fn backends(&mut self, sql: &str) -> Result<Vec<PostgresBackend>, PgCollectError>;
    fn relations(&mut self, sql: &str) -> Result<Vec<PostgresRelation>, PgCollectError>;
    fn functions(&mut self, sql: &str) -> Result<Vec<PostgresFunction>, PgCollectError>;
}

/// Connection to a monitored server over the `postgres` crate.
///
/// Connects lazily and reconnects on the next call after the connection
/// was lost. `statement_timeout` and `application_name` are applied to every
/// new session.
pub struct PostgresConnection {
    connection_string: String,
    application_name: String,
    statement_timeout_ms: i32,
    client: Option<Client>,
}

impl PostgresConnection {
    pub fn new(connection_string: impl Into<String>, opts: &CollectionOpts) -> Self {
        Self {
            connection_string: connection_string.into(),
            application_name: opts.collector_application_name.clone(),
            statement_timeout_ms: opts.statement_timeout_ms,
            client: None,
        }
    }

    /// Creates a connection from the standard libpq environment variables:
    /// - PGHOST (default: localhost)
    /// - PGPORT (default: 5432)
    /// - PGUSER (default: $USER)
    /// - PGPASSWORD (default: empty)
    /// - PGDATABASE (default: same as PGUSER)
    pub fn from_env(opts: &CollectionOpts) -> Result<Self, PgCollectError> {
        let user = std::env::var("PGUSER")
            .or_else(|_| std::env::var("USER"))
            .map_err(|_| PgCollectError::EnvNotSet("PGUSER or USER".to_string()))?;

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

        Ok(Self::new(connection_string, opts))
    }

    /// Connects now instead of on the first query. Useful for startup checks.
    pub fn try_connect(&mut self) -> Result<(), PgCollectError> {
        self.client().map(|_| ())
    }

    fn client(&mut self) -> Result<&mut Client, PgCollectError> {
        if self.client.is_none() {
            let mut client = Client::connect(&self.connection_string, NoTls)
                .map_err(|e| PgCollectError::ConnectionError(format_postgres_error(&e)))?;
            client
                .batch_execute(&queries::build_session_setup(
                    self.statement_timeout_ms,
                    &self.application_name,
                ))
                .map_err(|e| PgCollectError::ConnectionError(format_postgres_error(&e)))?;
            info!(application_name = %self.application_name, "connected to PostgreSQL");
            self.client = Some(client);
        }
        self.client
            .as_mut()
            .ok_or_else(|| PgCollectError::ConnectionError("not connected".to_string()))
    }

    fn query(&mut self, sql: &str) -> Result<Vec<Row>, PgCollectError> {
        let result = self.client()?.query(sql, &[]);
        result.map_err(|e| {
            if e.is_closed() {
                debug!("connection closed, reconnecting on next query");
                self.client = None;
            }
            classify_error(&e)
        })
    }

    fn map_rows<T>(
        &mut self,
        sql: &str,
        parse: impl Fn(&Row) -> Result<T, PgCollectError>,
    ) -> Result<Vec<T>, PgCollectError> {
        self.query(sql)?.iter().map(parse).collect()
    }
}

fn col<'a, T: FromSql<'a>>(row: &'a Row, name: &str) -> Result<T, PgCollectError> {
    row.try_get(name)
        .map_err(|e| PgCollectError::QueryError(format!("column {}: {}", name, e)))
}

impl PgConnection for PostgresConnection {
    fn server_version(&mut self, sql: &str) -> Result<PostgresVersion, PgCollectError> {
        let rows = self.query(sql)?;
        let row = rows
            .first()
            .ok_or_else(|| PgCollectError::QueryError("server version not reported".to_string()))?;
        let full: String = col(row, "server_version")?;
        let numeric: i32 = col(row, "server_version_num")?;
        Ok(PostgresVersion::new(full, numeric))
    }

    fn current_database_oid(&mut self, sql: &str) -> Result<Oid, PgCollectError> {
        let rows = self.query(sql)?;
        let row = rows
            .first()
            .ok_or_else(|| PgCollectError::QueryError("current database not found".to_string()))?;
        col(row, "oid")
    }

    fn query_flag(&mut self, sql: &str) -> Result<bool, PgCollectError> {
        let rows = self.query(sql)?;
        match rows.first() {
            Some(row) => col(row, "enabled"),
            None => Ok(false),
        }
    }

    fn query_text(&mut self, sql: &str) -> Result<Option<String>, PgCollectError> {
        let rows = self.query(sql)?;
        match rows.first() {
            Some(row) => col(row, "value"),
            None => Ok(None),
        }
    }

    fn execute(&mut self, sql: &str) -> Result<(), PgCollectError> {
        let result = self.client()?.batch_execute(sql);
        result.map_err(|e| {
            if e.is_closed() {
                self.client = None;
            }
            classify_error(&e)
        })
    }

    fn statements(&mut self, sql: &str) -> Result<Vec<StatementRow>, PgCollectError> {
        self.map_rows(sql, |row| {
            Ok(StatementRow {
                userid: col(row, "userid")?,
                dbid: col(row, "dbid")?,
                query: col(row, "query")?,
                queryid: col(row, "queryid")?,
                stats: StatementStats {
                    calls: col(row, "calls")?,
                    total_time: col(row, "total_time")?,
                    rows: col(row, "rows")?,
                    shared_blks_hit: col(row, "shared_blks_hit")?,
                    shared_blks_read: col(row, "shared_blks_read")?,
                    shared_blks_dirtied: col(row, "shared_blks_dirtied")?,
                    shared_blks_written: col(row, "shared_blks_written")?,
                    local_blks_hit: col(row, "local_blks_hit")?,
                    local_blks_read: col(row, "local_blks_read")?,
                    local_blks_dirtied: col(row, "local_blks_dirtied")?,
                    local_blks_written: col(row, "local_blks_written")?,
                    temp_blks_read: col(row, "temp_blks_read")?,
                    temp_blks_written: col(row, "temp_blks_written")?,
                    blk_read_time: col(row, "blk_read_time")?,
                    blk_write_time: col(row, "blk_write_time")?,
                    min_time: col(row, "min_time")?,
                    max_time: col(row, "max_time")?,
                    mean_time: col(row, "mean_time")?,
                    stddev_time: col(row, "stddev_time")?,
                },
            })
        })
    }

    fn relation_stats(&mut self, sql: &str) -> Result<Vec<RelationStatsRow>, PgCollectError> {
        self.map_rows(sql, |row| {
            Ok(RelationStatsRow {
                relid: col(row, "relid")?,
                stats: RelationStats {
                    size_bytes: col(row, "size_bytes")?,
                    seq_scan: col(row, "seq_scan")?,
                    seq_tup_read: col(row, "seq_tup_read")?,
                    idx_scan: col(row, "idx_scan")?,
                    idx_tup_fetch: col(row, "idx_tup_fetch")?,
                    n_tup_ins: col(row, "n_tup_ins")?,
                    n_tup_upd: col(row, "n_tup_upd")?,
                    n_tup_del: col(row, "n_tup_del")?,
                    n_tup_hot_upd: col(row, "n_tup_hot_upd")?,
                    n_live_tup: col(row, "n_live_tup")?,
                    n_dead_tup: col(row, "n_dead_tup")?,
                    vacuum_count: col(row, "vacuum_count")?,
                    autovacuum_count: col(row, "autovacuum_count")?,
                    analyze_count: col(row, "analyze_count")?,
                    autoanalyze_count: col(row, "autoanalyze_count")?,
                    heap_blks_read: col(row, "heap_blks_read")?,
                    heap_blks_hit: col(row, "heap_blks_hit")?,
                    idx_blks_read: col(row, "idx_blks_read")?,
                    idx_blks_hit: col(row, "idx_blks_hit")?,
                    toast_blks_read: col(row, "toast_blks_read")?,
                    toast_blks_hit: col(row, "toast_blks_hit")?,
                    tidx_blks_read: col(row, "tidx_blks_read")?,
                    tidx_blks_hit: col(row, "tidx_blks_hit")?,
                },
            })
        })
    }

    fn index_stats(&mut self, sql: &str) -> Result<Vec<IndexStatsRow>, PgCollectError> {
        self.map_rows(sql, |row| {
            Ok(IndexStatsRow {
                indexrelid: col(row, "indexrelid")?,
                stats: IndexStats {
                    size_bytes: col(row, "size_bytes")?,
                    idx_scan: col(row, "idx_scan")?,
                    idx_tup_read: col(row, "idx_tup_read")?,
                    idx_tup_fetch: col(row, "idx_tup_fetch")?,
                    idx_blks_read: col(row, "idx_blks_read")?,
                    idx_blks_hit: col(row, "idx_blks_hit")?,
                },
            })
        })
    }

    fn function_stats(&mut self, sql: &str) -> Result<Vec<FunctionStatsRow>, PgCollectError> {
        self.map_rows(sql, |row| {
            Ok(FunctionStatsRow {
                funcid: col(row, "funcid")?,
                stats: FunctionStats {
                    calls: col(row, "calls")?,
                    total_time: col(row, "total_time")?,
                    self_time: col(row, "self_time")?,
                },
            })
        })
    }

    fn roles(&mut self, sql: &str) -> Result<Vec<PostgresRole>, PgCollectError> {
        self.map_rows(sql, |row| {
            Ok(PostgresRole {
                oid: col(row, "oid")?,
                name: col(row, "rolname")?,
                superuser: col(row, "rolsuper")?,
                can_login: col(row, "rolcanlogin")?,
                connection_limit: col(row, "rolconnlimit")?,
            })
        })
    }

    fn databases(&mut self, sql: &str) -> Result<Vec<PostgresDatabase>, PgCollectError> {
        self.map_rows(sql, |row| {
            Ok(PostgresDatabase {
                oid: col(row, "oid")?,
                name: col(row, "datname")?,
                owner_role_oid: col(row, "datdba")?,
                encoding: col(row, "encoding")?,
                allow_connections: col(row, "datallowconn")?,
                frozen_xid_age: col(row, "frozen_xid_age")?,
            })
        })
    }

    fn settings(&mut self, sql: &str) -> Result<Vec<PostgresSetting>, PgCollectError> {
        self.map_rows(sql, |row| {
            Ok(PostgresSetting {
                name: col(row, "name")?,
                current_value: col(row, "setting")?,
                unit: col(row, "unit")?,
                boot_value: col(row, "boot_val")?,
                reset_value: col(row, "reset_val")?,
                source: col(row, "source")?,
            })
        })
    }

    fn backends(&mut self, sql: &str) -> Result<Vec<PostgresBackend>, PgCollectError> {
        self.map_rows(sql, |row| {
            Ok(PostgresBackend {
                pid: col(row, "pid")?,
                database_oid: col(row, "datid")?,
                role_oid: col(row, "usesysid")?,
                application_name: col(row, "application_name")?,
                client_addr: col(row, "client_addr")?,
                state: col(row, "state")?,
                waiting: col(row, "waiting")?,
                backend_start: col(row, "backend_start")?,
                xact_start: col(row, "xact_start")?,
                query_start: col(row, "query_start")?,
                state_change: col(row, "state_change")?,
            })
        })
    }

    fn relations(&mut self, sql: &str) -> Result<Vec<PostgresRelation>, PgCollectError> {
        self.map_rows(sql, |row| {
            Ok(PostgresRelation {
                oid: col(row, "oid")?,
                database_oid: col(row, "database_oid")?,
                schema_name: col(row, "schema_name")?,
                relation_name: col(row, "relation_name")?,
                relation_type: col(row, "relation_type")?,
                persistence_type: col(row, "persistence_type")?,
            })
        })
    }

    fn functions(&mut self, sql: &str) -> Result<Vec<PostgresFunction>, PgCollectError> {
        self.map_rows(sql, |row| {
            Ok(PostgresFunction {
                oid: col(row, "oid")?,
                database_oid: col(row, "database_oid")?,
                schema_name: col(row, "schema_name")?,
                function_name: col(row, "function_name")?,
                language: col(row, "language")?,
                arguments: col(row, "arguments")?,
                result: col(row, "result")?,
            })
        })
    }
}

fn classify_error(e: &postgres::Error) -> PgCollectError {
    let msg = format_postgres_error(e);
    if e.code() == Some(&SqlState::UNDEFINED_TABLE) {
        PgCollectError::UndefinedTable(msg)
    } else if e.is_closed() {
        PgCollectError::ConnectionError(msg)
    } else {
        PgCollectError::QueryError(msg)
    }
}

/// Formats PostgreSQL error message for display.
pub(crate) fn format_postgres_error(e: &postgres::Error) -> String {
    if let Some(db_error) = e.as_db_error() {
        format!("{}: {}", db_error.severity(), db_error.message())
    } else {
        let msg = e.to_string();
        if msg.contains("Connection refused") {
            "connection refused".to_string()
        } else if msg.contains("password authentication failed") {
            "password authentication failed".to_string()
        } else if msg.contains("does not exist") {
            msg.split("FATAL:")
                .last()
                .unwrap_or(&msg)
                .trim()
                .to_string()
        } else {
            msg
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_connection_is_lazy() {
        let opts = CollectionOpts::default();
        let conn = PostgresConnection::new("host=invalid", &opts);
        assert!(conn.client.is_none());
        assert_eq!(conn.statement_timeout_ms, opts.statement_timeout_ms);
        assert_eq!(conn.application_name, "pgdelta");
    }

    #[test]
    fn error_display_names_the_failure() {
        assert_eq!(
            PgCollectError::UndefinedTable("pg_stat_statements".to_string()).to_string(),
            "PostgreSQL relation does not exist: pg_stat_statements"
        );
        assert_eq!(
            PgCollectError::EnvNotSet("PGUSER".to_string()).to_string(),
            "PostgreSQL: PGUSER not set"
        );
    }
}
