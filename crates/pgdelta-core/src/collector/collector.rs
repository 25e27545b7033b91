//! Main collector that combines PostgreSQL and host acquisition.
//!
//! The `Collector` struct runs one acquisition pass against a connection and
//! produces a [`Snapshot`] plus the per-cycle [`TransientState`].

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::collector::pg_collector::{
    Capabilities, PgCollectError, PgConnection, StatementFetchPlan, acquire_catalog,
    acquire_function_stats, acquire_index_stats, acquire_relation_stats, acquire_statements,
    probe_capabilities, queries,
};
use crate::collector::procfs::SystemSource;
use crate::config::CollectionOpts;
use crate::storage::model::{CollectorStats, Snapshot, TransientState};

/// Timing information for each collector phase.
///
/// Used for debugging and performance monitoring.
#[derive(Debug, Clone, Default)]
pub struct CollectorTiming {
    /// Total snapshot collection time.
    pub total: Duration,
    /// Version query and capability probes.
    pub probes: Duration,
    pub statements: Duration,
    /// Table and index statistics.
    pub relations: Duration,
    pub functions: Duration,
    pub catalog: Duration,
    pub system: Duration,
}

/// Gathers everything one cycle needs from a monitored server.
pub struct Collector<C: PgConnection> {
    connection: C,
    system: Option<Box<dyn SystemSource + Send>>,
    opts: CollectionOpts,
    /// Lives as long as the process; copied into every snapshot.
    stats: CollectorStats,
    capabilities: Option<Capabilities>,
    /// Timing information from the last collect_snapshot call.
    last_timing: Option<CollectorTiming>,
}

impl<C: PgConnection> Collector<C> {
    pub fn new(connection: C, opts: CollectionOpts) -> Self {
        Self {
            connection,
            system: None,
            opts,
            stats: CollectorStats::default(),
            capabilities: None,
            last_timing: None,
        }
    }

    /// Enables host statistics (ignored when `collect_system_information` is off).
    pub fn with_system(mut self, source: Box<dyn SystemSource + Send>) -> Self {
        self.system = Some(source);
        self
    }

    pub fn opts(&self) -> &CollectionOpts {
        &self.opts
    }

    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.connection
    }

    pub fn stats(&self) -> &CollectorStats {
        &self.stats
    }

    /// Capabilities seen by the last successful probe.
    pub fn capabilities(&self) -> Option<Capabilities> {
        self.capabilities
    }

    /// Returns timing information from the last collect_snapshot call.
    pub fn last_timing(&self) -> Option<&CollectorTiming> {
        self.last_timing.as_ref()
    }

    /// Acquires one snapshot.
    ///
    /// Every call counts as a cycle; failures and elapsed time are added to
    /// the collector's own counters whether or not acquisition succeeds.
    pub fn collect_snapshot(&mut self) -> Result<(Snapshot, TransientState), PgCollectError> {
        let total_start = Instant::now();
        self.stats.cycles_total += 1;

        let mut timing = CollectorTiming::default();
        let result = self.acquire(&mut timing);

        timing.total = total_start.elapsed();
        self.stats.acquisition_time_ms_total += timing.total.as_secs_f64() * 1000.0;
        self.last_timing = Some(timing);

        match result {
            Ok((mut snapshot, transient, own_excluded)) => {
                self.stats.own_statements_excluded_total += own_excluded;
                snapshot.collector_stats = self.stats.clone();
                Ok((snapshot, transient))
            }
            Err(e) => {
                self.stats.acquisition_failures_total += 1;
                Err(e)
            }
        }
    }

    fn acquire(
        &mut self,
        timing: &mut CollectorTiming,
    ) -> Result<(Snapshot, TransientState, i64), PgCollectError> {
        let collected_at = chrono::Utc::now().timestamp();
        let conn = &mut self.connection;

        let start = Instant::now();
        let version = conn.server_version(&queries::build_version_query())?;
        let database_oid = conn.current_database_oid(&queries::build_current_database_oid_query())?;
        let capabilities = probe_capabilities(conn);
        self.capabilities = Some(capabilities);
        let plan = StatementFetchPlan::new(&version, capabilities.statements_helper);
        debug!(version = %version.full, ?plan, "statement fetch plan");
        timing.probes = start.elapsed();

        let start = Instant::now();
        let statements = acquire_statements(conn, &plan)?;
        timing.statements = start.elapsed();

        let mut snapshot = Snapshot {
            collected_at,
            database_oids_with_local_catalog: vec![database_oid],
            statement_stats: statements.stats,
            ..Default::default()
        };

        if self.opts.collect_relations {
            let start = Instant::now();
            snapshot.relation_stats = acquire_relation_stats(conn, database_oid)?;
            snapshot.index_stats = acquire_index_stats(conn, database_oid)?;
            timing.relations = start.elapsed();
        }

        if self.opts.collect_functions {
            let start = Instant::now();
            snapshot.function_stats = acquire_function_stats(conn, database_oid)?;
            timing.functions = start.elapsed();
        }

        let start = Instant::now();
        let catalog = acquire_catalog(conn, &version, &self.opts)?;
        snapshot.roles = catalog.roles;
        snapshot.databases = catalog.databases;
        snapshot.backends = catalog.backends;
        snapshot.settings = catalog.settings;
        snapshot.relations = catalog.relations;
        snapshot.functions = catalog.functions;
        snapshot.data_directory = catalog.data_directory;
        snapshot.version = version;
        timing.catalog = start.elapsed();

        if self.opts.collect_system_information {
            let start = Instant::now();
            match self.system.as_mut() {
                Some(source) => snapshot.system = source.sample(),
                None => warn!("system information requested but no source configured"),
            }
            timing.system = start.elapsed();
        }

        let transient = TransientState {
            statements: statements.texts,
        };
        Ok((snapshot, transient, statements.own_excluded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::{MockConnection, MockFs, statement_row};
    use crate::collector::pg_collector::RelationStatsRow;
    use crate::collector::procfs::ProcfsSystemSource;
    use crate::storage::model::RelationStats;

    fn collector(conn: MockConnection) -> Collector<MockConnection> {
        Collector::new(conn, CollectionOpts::default()).with_system(Box::new(
            ProcfsSystemSource::new(MockFs::typical_host(), "/proc"),
        ))
    }

    #[test]
    fn test_collect_snapshot() {
        let mut conn = MockConnection::new(150004);
        conn.statements = vec![statement_row(10, 5, "SELECT $1", Some(1), 2)];
        conn.relation_stats = vec![RelationStatsRow {
            relid: 16384,
            stats: RelationStats::default(),
        }];
        let mut collector = collector(conn);

        let (snapshot, transient) = collector.collect_snapshot().unwrap();

        assert_eq!(snapshot.version.numeric, 150004);
        assert_eq!(snapshot.database_oids_with_local_catalog, vec![5]);
        assert_eq!(snapshot.statement_stats.len(), 1);
        assert_eq!(snapshot.relation_stats.len(), 1);
        assert_eq!(transient.statements.len(), 1);
        assert!(snapshot.system.cpu.contains_key("cpu"));
        assert!(snapshot.collected_at > 0);
        assert_eq!(snapshot.collector_stats.cycles_total, 1);
        assert!(collector.last_timing().is_some());
    }

    #[test]
    fn test_disabled_categories_stay_empty() {
        let mut conn = MockConnection::new(150004);
        conn.relation_stats = vec![RelationStatsRow::default()];
        let opts = CollectionOpts {
            collect_relations: false,
            collect_functions: false,
            collect_system_information: false,
            ..CollectionOpts::default()
        };
        let mut collector = Collector::new(conn, opts).with_system(Box::new(
            ProcfsSystemSource::new(MockFs::typical_host(), "/proc"),
        ));

        let (snapshot, _) = collector.collect_snapshot().unwrap();
        assert!(snapshot.relation_stats.is_empty());
        assert!(snapshot.system.cpu.is_empty());
        assert!(
            !collector
                .connection_mut()
                .queries
                .iter()
                .any(|q| q.contains("pg_stat_user_tables"))
        );
    }

    #[test]
    fn test_logs_and_explains_are_left_to_external_collectors() {
        let opts = CollectionOpts {
            collect_logs: true,
            collect_explain: true,
            ..CollectionOpts::default()
        };
        let mut collector = Collector::new(MockConnection::new(150004), opts);

        let (snapshot, _) = collector.collect_snapshot().unwrap();
        assert!(snapshot.logs.is_empty());
        assert!(snapshot.explains.is_empty());
    }

    #[test]
    fn test_failures_are_counted() {
        let mut conn = MockConnection::new(150004);
        conn.unreachable = true;
        let mut collector = collector(conn);

        assert!(collector.collect_snapshot().is_err());
        assert_eq!(collector.stats().cycles_total, 1);
        assert_eq!(collector.stats().acquisition_failures_total, 1);

        collector.connection_mut().unreachable = false;
        let (snapshot, _) = collector.collect_snapshot().unwrap();
        assert_eq!(snapshot.collector_stats.cycles_total, 2);
        assert_eq!(snapshot.collector_stats.acquisition_failures_total, 1);
    }

    #[test]
    fn test_own_statements_counter_accumulates() {
        let mut conn = MockConnection::new(150004);
        conn.statements = vec![statement_row(
            1,
            5,
            &format!("{}SELECT 1", queries::QUERY_MARKER_SQL),
            Some(1),
            1,
        )];
        let mut collector = collector(conn);

        collector.collect_snapshot().unwrap();
        let (snapshot, _) = collector.collect_snapshot().unwrap();
        assert!(snapshot.statement_stats.is_empty());
        assert_eq!(snapshot.collector_stats.own_statements_excluded_total, 2);
    }

    #[test]
    fn test_helper_plan_is_used_when_installed() {
        let mut conn = MockConnection::new(150004);
        conn.helper_present = true;
        let mut collector = collector(conn);

        collector.collect_snapshot().unwrap();
        assert!(collector.capabilities().is_some_and(|c| c.statements_helper));
        assert!(
            collector
                .connection_mut()
                .queries
                .iter()
                .any(|q| q.contains("FROM pgdelta.get_stat_statements() s"))
        );
    }

    #[test]
    fn test_failing_probes_do_not_abort_acquisition() {
        let mut conn = MockConnection::new(150004);
        conn.probes_fail = true;
        let mut collector = collector(conn);
        assert!(collector.collect_snapshot().is_ok());
        assert_eq!(collector.capabilities(), Some(Capabilities::default()));
    }
}
