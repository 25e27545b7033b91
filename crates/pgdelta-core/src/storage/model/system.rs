//! Host-level counters and the collector's own health counters.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// CPU time per core in clock ticks.
///
/// Source: `/proc/stat` (`cpu` for the total, `cpuN` per core)
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct CpuStats {
    pub user: i64,
    pub nice: i64,
    pub system: i64,
    pub idle: i64,
    pub iowait: i64,
    pub irq: i64,
    pub softirq: i64,
    pub steal: i64,
}

/// Source: `/proc/net/dev`
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct NetworkStats {
    pub receive_bytes: i64,
    pub receive_packets: i64,
    pub receive_errors: i64,
    pub receive_drops: i64,
    pub transmit_bytes: i64,
    pub transmit_packets: i64,
    pub transmit_errors: i64,
    pub transmit_drops: i64,
}

/// Source: `/proc/diskstats`
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct DiskStats {
    pub reads_completed: i64,
    pub sectors_read: i64,
    pub read_time_ms: i64,
    pub writes_completed: i64,
    pub sectors_written: i64,
    pub write_time_ms: i64,
    pub io_time_ms: i64,
    /// Number of I/Os in flight. Not cumulative.
    pub in_progress: i64,
}

/// Point-in-time host sample. Keys are the cpu label (`cpu`, `cpu0`, ...),
/// the interface name and the block device name respectively.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct SystemState {
    pub cpu: HashMap<String, CpuStats>,
    pub network: HashMap<String, NetworkStats>,
    pub disks: HashMap<String, DiskStats>,
}

/// Counters the collector keeps about itself.
///
/// They start at zero with the process, so the first cycle after an agent
/// restart looks like a reset against the persisted baseline.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct CollectorStats {
    pub cycles_total: i64,
    pub acquisition_failures_total: i64,
    /// Rows dropped because they were the collector's own queries.
    pub own_statements_excluded_total: i64,
    pub acquisition_time_ms_total: f64,
}
