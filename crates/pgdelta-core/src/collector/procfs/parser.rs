//! Parsers for `/proc` filesystem files.
//!
//! These are pure functions that parse the content of various `/proc` files
//! into the host counter records. They are designed to be easily testable with
//! string inputs.

use std::collections::HashMap;

use crate::storage::model::{CpuStats, DiskStats, NetworkStats};

/// Error type for parsing failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Parse error: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

fn value_at(parts: &[&str], idx: usize) -> i64 {
    parts.get(idx).and_then(|s| s.parse().ok()).unwrap_or(0)
}

/// Parses the `cpu` lines of `/proc/stat`, keyed by label (`cpu`, `cpu0`, ...).
pub fn parse_cpu_stat(content: &str) -> Result<HashMap<String, CpuStats>, ParseError> {
    let mut cpus = HashMap::new();

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(label) = parts.first() else {
            continue;
        };
        if !label.starts_with("cpu") {
            continue;
        }
        if parts.len() < 5 {
            return Err(ParseError::new(format!("short cpu line: {}", line)));
        }

        cpus.insert(
            label.to_string(),
            CpuStats {
                user: value_at(&parts, 1),
                nice: value_at(&parts, 2),
                system: value_at(&parts, 3),
                idle: value_at(&parts, 4),
                iowait: value_at(&parts, 5),
                irq: value_at(&parts, 6),
                softirq: value_at(&parts, 7),
                steal: value_at(&parts, 8),
            },
        );
    }

    if cpus.is_empty() {
        return Err(ParseError::new("no cpu lines in /proc/stat"));
    }
    Ok(cpus)
}

/// Parses `/proc/diskstats` content.
///
/// Format: major minor name reads r_merged r_sectors r_time writes w_merged w_sectors w_time io_pending io_time w_io_time [discards ...]
pub fn parse_diskstats(content: &str) -> Result<HashMap<String, DiskStats>, ParseError> {
    let mut disks = HashMap::new();

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 14 {
            continue; // Skip malformed lines
        }

        disks.insert(
            parts[2].to_string(),
            DiskStats {
                reads_completed: value_at(&parts, 3),
                sectors_read: value_at(&parts, 5),
                read_time_ms: value_at(&parts, 6),
                writes_completed: value_at(&parts, 7),
                sectors_written: value_at(&parts, 9),
                write_time_ms: value_at(&parts, 10),
                in_progress: value_at(&parts, 11),
                io_time_ms: value_at(&parts, 12),
            },
        );
    }

    Ok(disks)
}

/// Parses `/proc/net/dev` content.
///
/// Format:
/// Inter-|   Receive                                                |  Transmit
///  face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
///    lo: 1234567     1234    0    0    0     0          0         0  1234567     1234    0    0    0     0       0          0
pub fn parse_net_dev(content: &str) -> Result<HashMap<String, NetworkStats>, ParseError> {
    let mut devices = HashMap::new();

    for line in content.lines() {
        // Skip header lines
        if line.contains('|') || line.trim().is_empty() {
            continue;
        }

        let Some((interface, rest)) = line.split_once(':') else {
            continue;
        };
        let values: Vec<&str> = rest.split_whitespace().collect();
        if values.len() < 16 {
            continue;
        }

        devices.insert(
            interface.trim().to_string(),
            NetworkStats {
                receive_bytes: value_at(&values, 0),
                receive_packets: value_at(&values, 1),
                receive_errors: value_at(&values, 2),
                receive_drops: value_at(&values, 3),
                transmit_bytes: value_at(&values, 8),
                transmit_packets: value_at(&values, 9),
                transmit_errors: value_at(&values, 10),
                transmit_drops: value_at(&values, 11),
            },
        );
    }

    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_stat() {
        let content = "\
cpu  10000 500 3000 80000 1000 200 100 7 0 0
cpu0 2500 125 750 20000 250 50 25 0 0 0
intr 1000000 50 0
ctxt 500000
";
        let cpus = parse_cpu_stat(content).unwrap();
        assert_eq!(cpus.len(), 2);
        let total = &cpus["cpu"];
        assert_eq!(total.user, 10000);
        assert_eq!(total.idle, 80000);
        assert_eq!(total.steal, 7);
        assert_eq!(cpus["cpu0"].system, 750);
    }

    #[test]
    fn test_parse_cpu_stat_without_cpu_lines() {
        assert!(parse_cpu_stat("ctxt 1\n").is_err());
    }

    #[test]
    fn test_parse_cpu_stat_old_kernel_without_steal() {
        let cpus = parse_cpu_stat("cpu 1 2 3 4 5 6 7\n").unwrap();
        assert_eq!(cpus["cpu"].softirq, 7);
        assert_eq!(cpus["cpu"].steal, 0);
    }

    #[test]
    fn test_parse_diskstats() {
        let content = "   8       0 sda 12345 100 987654 5000 6789 200 543210 3000 2 7000 8000 0 0 0 0\n   8       1 sda1 10 0 20 1\n";
        let disks = parse_diskstats(content).unwrap();
        assert_eq!(disks.len(), 1);
        let sda = &disks["sda"];
        assert_eq!(sda.reads_completed, 12345);
        assert_eq!(sda.sectors_read, 987654);
        assert_eq!(sda.writes_completed, 6789);
        assert_eq!(sda.in_progress, 2);
        assert_eq!(sda.io_time_ms, 7000);
    }

    #[test]
    fn test_parse_net_dev() {
        let content = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo: 1234567     1234    0    0    0     0          0         0  1234567     1234    0    0    0     0       0          0
  eth0: 9876543    98765    1    2    0     0          0         0  5432109    54321    3    4    0     0       0          0
";
        let devices = parse_net_dev(content).unwrap();
        assert_eq!(devices.len(), 2);
        let eth0 = &devices["eth0"];
        assert_eq!(eth0.receive_bytes, 9876543);
        assert_eq!(eth0.receive_drops, 2);
        assert_eq!(eth0.transmit_packets, 54321);
        assert_eq!(eth0.transmit_drops, 4);
    }
}
