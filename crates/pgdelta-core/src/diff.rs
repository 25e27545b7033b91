//! Snapshot diffing.
//!
//! Turns two snapshots of cumulative counters into per-interval deltas.
//! Every category (statements, relations, indexes, functions, CPUs, network
//! interfaces, disks, collector health) goes through the same rules:
//!
//! - key only in the current snapshot: first observation, zero deltas
//! - key in both, no counter went backwards: `current - previous`
//! - key in both, some counter went backwards: reset, report current values
//! - key only in the previous snapshot: dropped
//!
//! Optional fields only produce a value when present on both sides.
//! Nothing here divides by elapsed time; rates are a reporting concern.

use std::collections::HashMap;
use std::hash::Hash;

use crate::storage::model::{
    CollectorStats, CpuStats, DiffState, Diffed, DiskStats, FunctionStats, IndexStats,
    NetworkStats, RelationStats, Snapshot, StatementStats,
};

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

/// A monotonically increasing counter value.
pub trait Counter: Copy {
    fn zero() -> Self;
    fn regressed_from(self, prev: Self) -> bool;
    fn minus(self, prev: Self) -> Self;
}

impl Counter for i64 {
    fn zero() -> Self {
        0
    }

    fn regressed_from(self, prev: Self) -> bool {
        self < prev
    }

    fn minus(self, prev: Self) -> Self {
        self - prev
    }
}

impl Counter for f64 {
    fn zero() -> Self {
        0.0
    }

    fn regressed_from(self, prev: Self) -> bool {
        self < prev
    }

    fn minus(self, prev: Self) -> Self {
        self - prev
    }
}

/// A record of counters that can be diffed against an earlier reading of
/// the same entity.
pub trait Cumulative: Sized {
    /// True if any counter present in both readings decreased.
    fn regressed_from(&self, prev: &Self) -> bool;
    /// Delta for a matched entity whose counters did not decrease.
    fn delta_from(&self, prev: &Self) -> Self;
    /// Delta for a matched entity after a reset: current absolute values.
    fn reset_from(&self, prev: &Self) -> Self;
    /// Delta for an entity seen for the first time.
    fn baseline(&self) -> Self;
}

/// Implements [`Cumulative`] for a record by listing every field by kind.
///
/// - `counters`: always present, cumulative
/// - `optional_counters`: `Option`, cumulative when present
/// - `gauges`: always present, point-in-time, passed through
/// - `optional_gauges`: `Option`, point-in-time, passed through when present on both sides
macro_rules! impl_cumulative {
    (
        $ty:ty {
            counters: [$($c:ident),* $(,)?],
            optional_counters: [$($oc:ident),* $(,)?],
            gauges: [$($g:ident),* $(,)?],
            optional_gauges: [$($og:ident),* $(,)?] $(,)?
        }
    ) => {
        impl Cumulative for $ty {
            fn regressed_from(&self, prev: &Self) -> bool {
                false
                    $(|| self.$c.regressed_from(prev.$c))*
                    $(|| self.$oc.zip(prev.$oc).is_some_and(|(c, p)| c.regressed_from(p)))*
            }

            fn delta_from(&self, prev: &Self) -> Self {
                Self {
                    $($c: self.$c.minus(prev.$c),)*
                    $($oc: self.$oc.zip(prev.$oc).map(|(c, p)| c.minus(p)),)*
                    $($g: self.$g,)*
                    $($og: self.$og.zip(prev.$og).map(|(c, _)| c),)*
                }
            }

            fn reset_from(&self, prev: &Self) -> Self {
                Self {
                    $($c: self.$c,)*
                    $($oc: self.$oc.zip(prev.$oc).map(|(c, _)| c),)*
                    $($g: self.$g,)*
                    $($og: self.$og.zip(prev.$og).map(|(c, _)| c),)*
                }
            }

            fn baseline(&self) -> Self {
                Self {
                    $($c: Counter::zero(),)*
                    $($oc: self.$oc.map(|_| Counter::zero()),)*
                    $($g: self.$g,)*
                    $($og: None,)*
                }
            }
        }
    };
}

impl_cumulative!(StatementStats {
    counters: [
        calls,
        total_time,
        rows,
        shared_blks_hit,
        shared_blks_read,
        shared_blks_dirtied,
        shared_blks_written,
        local_blks_hit,
        local_blks_read,
        local_blks_dirtied,
        local_blks_written,
        temp_blks_read,
        temp_blks_written,
        blk_read_time,
        blk_write_time,
    ],
    optional_counters: [],
    gauges: [],
    optional_gauges: [min_time, max_time, mean_time, stddev_time],
});

impl_cumulative!(RelationStats {
    counters: [
        seq_scan,
        seq_tup_read,
        n_tup_ins,
        n_tup_upd,
        n_tup_del,
        n_tup_hot_upd,
        vacuum_count,
        autovacuum_count,
        analyze_count,
        autoanalyze_count,
        heap_blks_read,
        heap_blks_hit,
    ],
    optional_counters: [
        idx_scan,
        idx_tup_fetch,
        idx_blks_read,
        idx_blks_hit,
        toast_blks_read,
        toast_blks_hit,
        tidx_blks_read,
        tidx_blks_hit,
    ],
    gauges: [size_bytes, n_live_tup, n_dead_tup],
    optional_gauges: [],
});

impl_cumulative!(IndexStats {
    counters: [idx_scan, idx_tup_read, idx_tup_fetch, idx_blks_read, idx_blks_hit],
    optional_counters: [],
    gauges: [size_bytes],
    optional_gauges: [],
});

impl_cumulative!(FunctionStats {
    counters: [calls, total_time, self_time],
    optional_counters: [],
    gauges: [],
    optional_gauges: [],
});

impl_cumulative!(CpuStats {
    counters: [user, nice, system, idle, iowait, irq, softirq, steal],
    optional_counters: [],
    gauges: [],
    optional_gauges: [],
});

impl_cumulative!(NetworkStats {
    counters: [
        receive_bytes,
        receive_packets,
        receive_errors,
        receive_drops,
        transmit_bytes,
        transmit_packets,
        transmit_errors,
        transmit_drops,
    ],
    optional_counters: [],
    gauges: [],
    optional_gauges: [],
});

impl_cumulative!(DiskStats {
    counters: [
        reads_completed,
        sectors_read,
        read_time_ms,
        writes_completed,
        sectors_written,
        write_time_ms,
        io_time_ms,
    ],
    optional_counters: [],
    gauges: [in_progress],
    optional_gauges: [],
});

impl_cumulative!(CollectorStats {
    counters: [
        cycles_total,
        acquisition_failures_total,
        own_statements_excluded_total,
        acquisition_time_ms_total,
    ],
    optional_counters: [],
    gauges: [],
    optional_gauges: [],
});

// ---------------------------------------------------------------------------
// Diffing
// ---------------------------------------------------------------------------

/// Diffs one entity against its previous reading, if any.
///
/// A missing previous reading gives zero deltas: the cumulative total may
/// include activity from before monitoring started, so it only establishes
/// the baseline. This also applies to an entity that was evicted on the
/// server and reappeared, which cannot be told apart from a new one.
pub fn diff_entity<T: Cumulative>(prev: Option<&T>, curr: &T) -> Diffed<T> {
    match prev {
        None => Diffed {
            delta: curr.baseline(),
            reset: false,
        },
        Some(prev) if curr.regressed_from(prev) => Diffed {
            delta: curr.reset_from(prev),
            reset: true,
        },
        Some(prev) => Diffed {
            delta: curr.delta_from(prev),
            reset: false,
        },
    }
}

/// Diffs every entity of the current counter set. Keys that only exist in
/// `prev` produce no entry.
pub fn diff_counter_set<K, T>(
    prev: Option<&HashMap<K, T>>,
    curr: &HashMap<K, T>,
) -> HashMap<K, Diffed<T>>
where
    K: Eq + Hash + Clone,
    T: Cumulative,
{
    curr.iter()
        .map(|(key, c)| (key.clone(), diff_entity(prev.and_then(|p| p.get(key)), c)))
        .collect()
}

/// Diffs two snapshots. Without a previous snapshot every entity is new.
///
/// `diff_statements = false` leaves the statement category empty.
pub fn diff_state(prev: Option<&Snapshot>, curr: &Snapshot, diff_statements: bool) -> DiffState {
    let statement_stats = if diff_statements {
        diff_counter_set(prev.map(|p| &p.statement_stats), &curr.statement_stats)
    } else {
        HashMap::new()
    };

    DiffState {
        statement_stats,
        relation_stats: diff_counter_set(prev.map(|p| &p.relation_stats), &curr.relation_stats),
        index_stats: diff_counter_set(prev.map(|p| &p.index_stats), &curr.index_stats),
        function_stats: diff_counter_set(prev.map(|p| &p.function_stats), &curr.function_stats),
        system_cpu_stats: diff_counter_set(prev.map(|p| &p.system.cpu), &curr.system.cpu),
        system_network_stats: diff_counter_set(
            prev.map(|p| &p.system.network),
            &curr.system.network,
        ),
        system_disk_stats: diff_counter_set(prev.map(|p| &p.system.disks), &curr.system.disks),
        collector_stats: diff_entity(prev.map(|p| &p.collector_stats), &curr.collector_stats),
        interval_secs: prev.map(|p| curr.collected_at - p.collected_at),
    }
}
