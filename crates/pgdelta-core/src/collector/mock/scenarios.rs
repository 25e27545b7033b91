//! Pre-built fixtures for testing.

use crate::collector::pg_collector::StatementRow;
use crate::storage::model::{Oid, StatementStats};

use super::filesystem::MockFs;

impl MockFs {
    /// A host with two cores, a loopback and an ethernet interface and one disk.
    pub fn typical_host() -> Self {
        let mut fs = Self::new();
        fs.add_file(
            "/proc/stat",
            "\
cpu  10000 500 3000 80000 1000 200 100 0 0 0
cpu0 5000 250 1500 40000 500 100 50 0 0 0
cpu1 5000 250 1500 40000 500 100 50 0 0 0
intr 1000000 50 0 0 0 0 0 0 0 1 0 0 0 100 0 0 1000
ctxt 500000
btime 1700000000
processes 12345
procs_running 2
procs_blocked 0
",
        );
        fs.add_file(
            "/proc/net/dev",
            "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo: 1234567     1234    0    0    0     0          0         0  1234567     1234    0    0    0     0       0          0
  eth0: 9876543    98765    0    0    0     0          0         0  5432109    54321    0    0    0     0       0          0
",
        );
        fs.add_file(
            "/proc/diskstats",
            "   8       0 sda 12345 100 987654 5000 6789 200 543210 3000 0 7000 8000 0 0 0 0\n",
        );
        fs
    }
}

/// A statement row with `calls` set and every other counter derived from it.
pub fn statement_row(
    userid: Oid,
    dbid: Oid,
    query: &str,
    queryid: Option<i64>,
    calls: i64,
) -> StatementRow {
    StatementRow {
        userid,
        dbid,
        query: query.to_string(),
        queryid,
        stats: StatementStats {
            calls,
            total_time: calls as f64 * 1.5,
            rows: calls,
            shared_blks_hit: calls * 10,
            ..Default::default()
        },
    }
}
