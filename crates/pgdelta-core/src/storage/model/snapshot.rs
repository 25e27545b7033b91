//! Snapshot structures.
//!
//! A [`Snapshot`] is everything one collection cycle saw that must survive
//! until the next cycle: the cumulative counters used for diffing plus the
//! catalog data carried along for reporting. It is persisted per API key by
//! the state store and becomes the "previous" baseline of the next cycle.
//!
//! [`TransientState`] holds data that only enriches the current cycle and is
//! never persisted; [`DiffState`] is the result of diffing two snapshots.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::postgres::{
    FunctionKey, FunctionStats, IndexKey, IndexStats, LogLine, Oid, PostgresBackend,
    PostgresDatabase, PostgresExplain, PostgresFunction, PostgresRelation, PostgresRole,
    PostgresSetting, PostgresVersion, RelationKey, RelationStats, StatementKey, StatementStats,
    StatementText,
};
use super::system::{CollectorStats, CpuStats, DiskStats, NetworkStats, SystemState};

/// State kept across collector runs to be used for diffs.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct Snapshot {
    /// Unix timestamp (seconds) when the sample was taken.
    pub collected_at: i64,

    /// Databases the collector connected to and fetched local catalog data from.
    pub database_oids_with_local_catalog: Vec<Oid>,

    pub statement_stats: HashMap<StatementKey, StatementStats>,
    pub relation_stats: HashMap<RelationKey, RelationStats>,
    pub index_stats: HashMap<IndexKey, IndexStats>,
    pub function_stats: HashMap<FunctionKey, FunctionStats>,

    pub roles: Vec<PostgresRole>,
    pub databases: Vec<PostgresDatabase>,
    pub backends: Vec<PostgresBackend>,
    pub relations: Vec<PostgresRelation>,
    pub settings: Vec<PostgresSetting>,
    pub functions: Vec<PostgresFunction>,
    pub version: PostgresVersion,
    pub logs: Vec<LogLine>,
    pub explains: Vec<PostgresExplain>,

    pub data_directory: String,
    pub system: SystemState,

    pub collector_stats: CollectorStats,
}

/// State that is only used within a collector run.
#[derive(Clone, Debug, Default)]
pub struct TransientState {
    pub statements: HashMap<StatementKey, StatementText>,
}

/// One entity's delta record.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Diffed<T> {
    pub delta: T,
    /// A counter went backwards: `delta` holds current absolute values.
    pub reset: bool,
}

/// Result of diffing two snapshots.
#[derive(Clone, Debug, Default)]
pub struct DiffState {
    pub statement_stats: HashMap<StatementKey, Diffed<StatementStats>>,
    pub relation_stats: HashMap<RelationKey, Diffed<RelationStats>>,
    pub index_stats: HashMap<IndexKey, Diffed<IndexStats>>,
    pub function_stats: HashMap<FunctionKey, Diffed<FunctionStats>>,

    pub system_cpu_stats: HashMap<String, Diffed<CpuStats>>,
    pub system_network_stats: HashMap<String, Diffed<NetworkStats>>,
    pub system_disk_stats: HashMap<String, Diffed<DiskStats>>,

    pub collector_stats: Diffed<CollectorStats>,

    /// Seconds between the previous and the current snapshot, `None` without
    /// a previous snapshot.
    pub interval_secs: Option<i64>,
}

impl DiffState {
    /// Number of entities across all categories that were treated as reset.
    pub fn reset_count(&self) -> usize {
        fn resets<K, T>(m: &HashMap<K, Diffed<T>>) -> usize {
            m.values().filter(|d| d.reset).count()
        }
        resets(&self.statement_stats)
            + resets(&self.relation_stats)
            + resets(&self.index_stats)
            + resets(&self.function_stats)
            + resets(&self.system_cpu_stats)
            + resets(&self.system_network_stats)
            + resets(&self.system_disk_stats)
            + usize::from(self.collector_stats.reset)
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct GrantConfig {
    pub server_id: String,
    pub server_url: String,
}

/// Upload authorization attached to a monitored target.
///
/// Only reporting looks at it; diffing never depends on it.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct Grant {
    pub valid: bool,
    pub config: GrantConfig,
    pub s3_url: String,
    pub s3_fields: BTreeMap<String, String>,
}
