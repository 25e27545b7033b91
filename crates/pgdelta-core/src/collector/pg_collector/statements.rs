//! pg_stat_statements acquisition.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use tracing::{debug, info, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::storage::model::{StatementKey, StatementStats, StatementText};

use super::plan::{StatementFetchPlan, StatementSource};
use super::queries::{build_create_extension, is_collector_statement};
use super::{PgCollectError, PgConnection, StatementRow};

/// Statement counters and texts of one cycle.
#[derive(Debug, Clone, Default)]
pub struct AcquiredStatements {
    pub stats: HashMap<StatementKey, StatementStats>,
    pub texts: HashMap<StatementKey, StatementText>,
    /// Rows dropped because they were the collector's own queries.
    pub own_excluded: i64,
}

/// Stable identifier for a normalized query text, used when the server has
/// no `queryid`.
pub fn fingerprint(query: &str) -> i64 {
    xxh3_64(query.as_bytes()) as i64
}

/// Fetches statement statistics according to `plan`.
///
/// When the standard view is missing, the extension is created once and the
/// fetch retried once; a second failure is returned.
pub fn acquire_statements<C: PgConnection + ?Sized>(
    conn: &mut C,
    plan: &StatementFetchPlan,
) -> Result<AcquiredStatements, PgCollectError> {
    let sql = plan.sql();
    let rows = match conn.statements(&sql) {
        Err(PgCollectError::UndefinedTable(msg))
            if plan.source == StatementSource::StandardView =>
        {
            warn!(error = %msg, "pg_stat_statements is missing, trying to create the extension");
            conn.execute(&build_create_extension())?;
            info!("created extension pg_stat_statements");
            conn.statements(&sql)?
        }
        other => other?,
    };
    Ok(index_rows(rows, plan))
}

fn index_rows(rows: Vec<StatementRow>, plan: &StatementFetchPlan) -> AcquiredStatements {
    let mut out = AcquiredStatements::default();
    for row in rows {
        if is_collector_statement(&row.query) {
            out.own_excluded += 1;
            continue;
        }

        let server_id = if plan.has_query_id() { row.queryid } else { None };
        let key = StatementKey {
            database_oid: row.dbid,
            role_oid: row.userid,
            query_id: server_id.unwrap_or_else(|| fingerprint(&row.query)),
        };

        let mut stats = row.stats;
        if !plan.has_extra_timing() {
            stats.min_time = None;
            stats.max_time = None;
            stats.mean_time = None;
            stats.stddev_time = None;
        }

        match out.stats.entry(key) {
            Entry::Occupied(mut entry) => {
                debug!(?key, "duplicate statement key, adding up rows");
                let merged = merge_stats(entry.get(), &stats);
                entry.insert(merged);
            }
            Entry::Vacant(entry) => {
                entry.insert(stats);
            }
        }
        out.texts.insert(
            key,
            StatementText {
                query: row.query,
                fingerprinted: server_id.is_none(),
            },
        );
    }
    out
}

/// Combines two rows reported for the same key, e.g. the top-level and
/// nested rows of PostgreSQL 14+ with `pg_stat_statements.track = all`.
///
/// Counters add up. Timing aggregates are combined only when both rows
/// carry them: min/max pick the extreme, mean is weighted by calls and the
/// (population) standard deviation is pooled.
fn merge_stats(a: &StatementStats, b: &StatementStats) -> StatementStats {
    let calls = a.calls + b.calls;
    let mean_time = a.mean_time.zip(b.mean_time).map(|(ma, mb)| {
        if calls == 0 {
            ma
        } else {
            (ma * a.calls as f64 + mb * b.calls as f64) / calls as f64
        }
    });
    let stddev_time = match (a.stddev_time, b.stddev_time, a.mean_time, b.mean_time, mean_time) {
        (Some(sa), Some(sb), Some(ma), Some(mb), Some(mean)) if calls > 0 => {
            let second_moment = (a.calls as f64 * (sa * sa + ma * ma)
                + b.calls as f64 * (sb * sb + mb * mb))
                / calls as f64;
            Some((second_moment - mean * mean).max(0.0).sqrt())
        }
        (Some(sa), Some(_), Some(_), Some(_), Some(_)) => Some(sa),
        _ => None,
    };

    StatementStats {
        calls,
        total_time: a.total_time + b.total_time,
        rows: a.rows + b.rows,
        shared_blks_hit: a.shared_blks_hit + b.shared_blks_hit,
        shared_blks_read: a.shared_blks_read + b.shared_blks_read,
        shared_blks_dirtied: a.shared_blks_dirtied + b.shared_blks_dirtied,
        shared_blks_written: a.shared_blks_written + b.shared_blks_written,
        local_blks_hit: a.local_blks_hit + b.local_blks_hit,
        local_blks_read: a.local_blks_read + b.local_blks_read,
        local_blks_dirtied: a.local_blks_dirtied + b.local_blks_dirtied,
        local_blks_written: a.local_blks_written + b.local_blks_written,
        temp_blks_read: a.temp_blks_read + b.temp_blks_read,
        temp_blks_written: a.temp_blks_written + b.temp_blks_written,
        blk_read_time: a.blk_read_time + b.blk_read_time,
        blk_write_time: a.blk_write_time + b.blk_write_time,
        min_time: a.min_time.zip(b.min_time).map(|(x, y)| x.min(y)),
        max_time: a.max_time.zip(b.max_time).map(|(x, y)| x.max(y)),
        mean_time,
        stddev_time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::{MockConnection, statement_row};
    use crate::collector::pg_collector::queries::QUERY_MARKER_SQL;
    use crate::diff::diff_entity;
    use crate::storage::model::PostgresVersion;

    fn plan_for(numeric: i32) -> StatementFetchPlan {
        StatementFetchPlan::new(&PostgresVersion::new("x", numeric), false)
    }

    #[test]
    fn keys_use_server_queryid_on_94_plus() {
        let mut conn = MockConnection::new(150004);
        conn.statements = vec![statement_row(10, 5, "SELECT $1", Some(42), 3)];
        let got = acquire_statements(&mut conn, &plan_for(150004)).unwrap();
        let key = StatementKey {
            database_oid: 5,
            role_oid: 10,
            query_id: 42,
        };
        assert_eq!(got.stats[&key].calls, 3);
        assert!(!got.texts[&key].fingerprinted);
        assert_eq!(got.texts[&key].query, "SELECT $1");
    }

    #[test]
    fn keys_fall_back_to_fingerprint_before_94() {
        let mut conn = MockConnection::new(90300);
        conn.statements = vec![statement_row(10, 5, "SELECT ?", Some(42), 3)];
        let got = acquire_statements(&mut conn, &plan_for(90300)).unwrap();
        let key = StatementKey {
            database_oid: 5,
            role_oid: 10,
            query_id: fingerprint("SELECT ?"),
        };
        assert!(got.stats.contains_key(&key));
        assert!(got.texts[&key].fingerprinted);
    }

    #[test]
    fn fingerprint_is_stable_and_text_sensitive() {
        assert_eq!(fingerprint("SELECT 1"), fingerprint("SELECT 1"));
        assert_ne!(fingerprint("SELECT 1"), fingerprint("SELECT 2"));
    }

    #[test]
    fn extra_timing_is_absent_on_94() {
        let mut conn = MockConnection::new(90400);
        let mut row = statement_row(1, 1, "SELECT 1", Some(7), 1);
        row.stats.min_time = Some(0.5);
        conn.statements = vec![row];
        let got = acquire_statements(&mut conn, &plan_for(90400)).unwrap();
        let stats = got.stats.values().next().unwrap();
        assert_eq!(stats.min_time, None);
        assert_eq!(stats.stddev_time, None);
    }

    #[test]
    fn own_statements_are_excluded_and_counted() {
        let mut conn = MockConnection::new(150004);
        conn.statements = vec![
            statement_row(1, 1, "SELECT * FROM users", Some(1), 1),
            statement_row(1, 1, &format!("{QUERY_MARKER_SQL}SELECT 1"), Some(2), 1),
            statement_row(1, 1, "SELECT 1 /* pgdelta-collector */", Some(3), 1),
        ];
        let got = acquire_statements(&mut conn, &plan_for(150004)).unwrap();
        assert_eq!(got.own_excluded, 1);
        assert_eq!(got.stats.len(), 2);
        assert!(got.texts.values().all(|t| !t.query.starts_with("/* pgdelta")));
    }

    #[test]
    fn duplicate_keys_add_up() {
        let mut conn = MockConnection::new(150004);
        conn.statements = vec![
            statement_row(1, 1, "SELECT 1", Some(9), 1),
            statement_row(1, 1, "SELECT 1", Some(9), 5),
        ];
        let got = acquire_statements(&mut conn, &plan_for(150004)).unwrap();
        assert_eq!(got.stats.len(), 1);
        assert_eq!(got.stats.values().next().unwrap().calls, 6);
    }

    #[test]
    fn duplicate_rows_diff_correctly_when_order_changes() {
        let mut conn = MockConnection::new(150004);
        conn.statements = vec![
            statement_row(10, 5, "SELECT $1", Some(42), 100),
            statement_row(10, 5, "SELECT $1", Some(42), 5),
        ];
        let first = acquire_statements(&mut conn, &plan_for(150004)).unwrap();

        conn.statements = vec![
            statement_row(10, 5, "SELECT $1", Some(42), 6),
            statement_row(10, 5, "SELECT $1", Some(42), 101),
        ];
        let second = acquire_statements(&mut conn, &plan_for(150004)).unwrap();

        let key = StatementKey {
            database_oid: 5,
            role_oid: 10,
            query_id: 42,
        };
        let d = diff_entity(first.stats.get(&key), &second.stats[&key]);
        assert!(!d.reset);
        assert_eq!(d.delta.calls, 2);
    }

    #[test]
    fn merged_timing_needs_both_rows() {
        let a = StatementStats {
            calls: 1,
            total_time: 2.0,
            min_time: Some(2.0),
            max_time: Some(2.0),
            mean_time: Some(2.0),
            stddev_time: Some(0.0),
            ..StatementStats::default()
        };
        let b = StatementStats {
            calls: 1,
            total_time: 4.0,
            min_time: Some(4.0),
            max_time: Some(4.0),
            mean_time: Some(4.0),
            stddev_time: Some(0.0),
            ..StatementStats::default()
        };
        let m = merge_stats(&a, &b);
        assert_eq!(m.calls, 2);
        assert_eq!(m.total_time, 6.0);
        assert_eq!(m.min_time, Some(2.0));
        assert_eq!(m.max_time, Some(4.0));
        assert_eq!(m.mean_time, Some(3.0));
        assert_eq!(m.stddev_time, Some(1.0));

        let partial = merge_stats(&a, &StatementStats::default());
        assert_eq!(partial.min_time, None);
        assert_eq!(partial.stddev_time, None);
    }

    #[test]
    fn missing_view_is_created_and_retried_once() {
        let mut conn = MockConnection::new(150004);
        conn.extension_missing = true;
        conn.statements = vec![statement_row(1, 1, "SELECT 1", Some(9), 1)];
        let got = acquire_statements(&mut conn, &plan_for(150004)).unwrap();
        assert_eq!(got.stats.len(), 1);
        assert_eq!(conn.executed.len(), 1);
        assert!(conn.executed[0].contains("CREATE EXTENSION IF NOT EXISTS pg_stat_statements"));
        assert_eq!(conn.statement_fetches, 2);
    }

    #[test]
    fn failed_extension_creation_is_returned() {
        let mut conn = MockConnection::new(150004);
        conn.extension_missing = true;
        conn.create_extension_fails = true;
        let err = acquire_statements(&mut conn, &plan_for(150004)).unwrap_err();
        assert!(matches!(err, PgCollectError::QueryError(_)));
        assert_eq!(conn.statement_fetches, 1);
    }

    #[test]
    fn second_missing_view_is_not_retried_again() {
        let mut conn = MockConnection::new(150004);
        conn.extension_missing = true;
        conn.create_extension_is_noop = true;
        let err = acquire_statements(&mut conn, &plan_for(150004)).unwrap_err();
        assert!(matches!(err, PgCollectError::UndefinedTable(_)));
        assert_eq!(conn.statement_fetches, 2);
        assert_eq!(conn.executed.len(), 1);
    }

    #[test]
    fn helper_source_is_not_self_healed() {
        let mut conn = MockConnection::new(150004);
        conn.extension_missing = true;
        let plan = StatementFetchPlan::new(&PostgresVersion::new("x", 150004), true);
        conn.helper_fails_undefined = true;
        let err = acquire_statements(&mut conn, &plan).unwrap_err();
        assert!(matches!(err, PgCollectError::UndefinedTable(_)));
        assert!(conn.executed.is_empty());
    }

    #[test]
    fn other_errors_are_not_retried() {
        let mut conn = MockConnection::new(150004);
        conn.statements_error = Some(PgCollectError::QueryError("permission denied".into()));
        let err = acquire_statements(&mut conn, &plan_for(150004)).unwrap_err();
        assert_eq!(err, PgCollectError::QueryError("permission denied".into()));
        assert_eq!(conn.statement_fetches, 1);
        assert!(conn.executed.is_empty());
    }
}
