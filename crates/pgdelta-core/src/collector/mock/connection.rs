//! Scripted [`PgConnection`] for testing acquisition without a server.
//!
//! Answers are picked by looking at the SQL text, and every statement sent is
//! recorded so tests can assert on what the collector asked for.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::collector::pg_collector::{
    FunctionStatsRow, IndexStatsRow, PgCollectError, PgConnection, RelationStatsRow, StatementRow,
};
use crate::storage::model::{
    Oid, PostgresBackend, PostgresDatabase, PostgresFunction, PostgresRelation, PostgresRole,
    PostgresSetting, PostgresVersion,
};

#[derive(Debug, Clone, Default)]
pub struct MockConnection {
    pub version: PostgresVersion,
    pub database_oid: Oid,
    /// Every call fails with a connection error.
    pub unreachable: bool,

    pub superuser: bool,
    pub monitoring_role: bool,
    pub helper_present: bool,
    pub probes_fail: bool,

    /// `pg_stat_statements` is undefined until the extension is created.
    pub extension_missing: bool,
    pub create_extension_fails: bool,
    /// CREATE EXTENSION succeeds but the view stays undefined.
    pub create_extension_is_noop: bool,
    pub helper_fails_undefined: bool,
    pub statements_error: Option<PgCollectError>,
    pub statement_fetches: usize,
    /// Cleared when statements are fetched, like a shutdown arriving mid-cycle.
    pub stop_on_fetch: Option<Arc<AtomicBool>>,

    pub statements: Vec<StatementRow>,
    pub relation_stats: Vec<RelationStatsRow>,
    pub index_stats: Vec<IndexStatsRow>,
    pub function_stats: Vec<FunctionStatsRow>,
    pub roles: Vec<PostgresRole>,
    pub databases: Vec<PostgresDatabase>,
    pub settings: Vec<PostgresSetting>,
    pub backends: Vec<PostgresBackend>,
    pub relations: Vec<PostgresRelation>,
    pub functions: Vec<PostgresFunction>,
    pub data_directory: Option<String>,
    pub data_directory_fails: bool,

    /// Queries received, in order.
    pub queries: Vec<String>,
    /// Statements passed to `execute`, in order.
    pub executed: Vec<String>,
}

impl MockConnection {
    /// Empty server of the given `server_version_num`, connected to database 5.
    pub fn new(server_version_num: i32) -> Self {
        let major = server_version_num / 10000;
        let full = if major >= 10 {
            format!("{}.{}", major, server_version_num % 10000)
        } else {
            format!("{}.{}.{}", major, (server_version_num / 100) % 100, server_version_num % 100)
        };
        Self {
            version: PostgresVersion::new(full, server_version_num),
            database_oid: 5,
            ..Default::default()
        }
    }

    fn record(&mut self, sql: &str) -> Result<(), PgCollectError> {
        self.queries.push(sql.to_string());
        if self.unreachable {
            return Err(PgCollectError::ConnectionError(
                "connection refused".to_string(),
            ));
        }
        Ok(())
    }
}

impl PgConnection for MockConnection {
    fn server_version(&mut self, sql: &str) -> Result<PostgresVersion, PgCollectError> {
        self.record(sql)?;
        Ok(self.version.clone())
    }

    fn current_database_oid(&mut self, sql: &str) -> Result<Oid, PgCollectError> {
        self.record(sql)?;
        Ok(self.database_oid)
    }

    fn query_flag(&mut self, sql: &str) -> Result<bool, PgCollectError> {
        self.record(sql)?;
        if self.probes_fail {
            return Err(PgCollectError::QueryError("permission denied".to_string()));
        }
        Ok(if sql.contains("is_superuser") {
            self.superuser
        } else if sql.contains("pg_monitor") {
            self.monitoring_role
        } else if sql.contains("pg_proc") {
            self.helper_present
        } else {
            false
        })
    }

    fn query_text(&mut self, sql: &str) -> Result<Option<String>, PgCollectError> {
        self.record(sql)?;
        if self.data_directory_fails {
            return Err(PgCollectError::QueryError(
                "must be superuser or a member of pg_read_all_settings".to_string(),
            ));
        }
        Ok(self.data_directory.clone())
    }

    fn execute(&mut self, sql: &str) -> Result<(), PgCollectError> {
        self.record(sql)?;
        self.executed.push(sql.to_string());
        if sql.contains("CREATE EXTENSION") {
            if self.create_extension_fails {
                return Err(PgCollectError::QueryError(
                    "permission denied to create extension".to_string(),
                ));
            }
            if !self.create_extension_is_noop {
                self.extension_missing = false;
            }
        }
        Ok(())
    }

    fn statements(&mut self, sql: &str) -> Result<Vec<StatementRow>, PgCollectError> {
        self.record(sql)?;
        self.statement_fetches += 1;
        if let Some(flag) = &self.stop_on_fetch {
            flag.store(false, Ordering::SeqCst);
        }
        if let Some(e) = &self.statements_error {
            return Err(e.clone());
        }
        let undefined = if sql.contains("get_stat_statements()") {
            self.helper_fails_undefined
        } else {
            self.extension_missing
        };
        if undefined {
            return Err(PgCollectError::UndefinedTable(
                "relation \"pg_stat_statements\" does not exist".to_string(),
            ));
        }
        Ok(self.statements.clone())
    }

    fn relation_stats(&mut self, sql: &str) -> Result<Vec<RelationStatsRow>, PgCollectError> {
        self.record(sql)?;
        Ok(self.relation_stats.clone())
    }

    fn index_stats(&mut self, sql: &str) -> Result<Vec<IndexStatsRow>, PgCollectError> {
        self.record(sql)?;
        Ok(self.index_stats.clone())
    }

    fn function_stats(&mut self, sql: &str) -> Result<Vec<FunctionStatsRow>, PgCollectError> {
        self.record(sql)?;
        Ok(self.function_stats.clone())
    }

    fn roles(&mut self, sql: &str) -> Result<Vec<PostgresRole>, PgCollectError> {
        self.record(sql)?;
        Ok(self.roles.clone())
    }

    fn databases(&mut self, sql: &str) -> Result<Vec<PostgresDatabase>, PgCollectError> {
        self.record(sql)?;
        Ok(self.databases.clone())
    }

    fn settings(&mut self, sql: &str) -> Result<Vec<PostgresSetting>, PgCollectError> {
        self.record(sql)?;
        Ok(self.settings.clone())
    }

    fn backends(&mut self, sql: &str) -> Result<Vec<PostgresBackend>, PgCollectError> {
        self.record(sql)?;
        Ok(self.backends.clone())
    }

    fn relations(&mut self, sql: &str) -> Result<Vec<PostgresRelation>, PgCollectError> {
        self.record(sql)?;
        Ok(self.relations.clone())
    }

    fn functions(&mut self, sql: &str) -> Result<Vec<PostgresFunction>, PgCollectError> {
        self.record(sql)?;
        Ok(self.functions.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_follows_numeric_scheme() {
        assert_eq!(MockConnection::new(150004).version.short, "15.4");
        assert_eq!(MockConnection::new(90623).version.short, "9.6.23");
    }

    #[test]
    fn unreachable_server_fails_every_call() {
        let mut conn = MockConnection::new(150004);
        conn.unreachable = true;
        assert!(matches!(
            conn.server_version("SELECT 1"),
            Err(PgCollectError::ConnectionError(_))
        ));
        assert_eq!(conn.queries.len(), 1);
    }
}
