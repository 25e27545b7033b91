//! Host counters from the Linux `/proc` filesystem.

mod parser;

use std::path::PathBuf;

use tracing::debug;

use crate::collector::traits::FileSystem;
use crate::storage::model::SystemState;

pub use parser::{ParseError, parse_cpu_stat, parse_diskstats, parse_net_dev};

/// Source of host counters for one cycle.
pub trait SystemSource {
    /// Reads a fresh sample. Unreadable parts are left empty.
    fn sample(&mut self) -> SystemState;
}

/// Reads `/proc/stat`, `/proc/net/dev` and `/proc/diskstats`.
pub struct ProcfsSystemSource<F: FileSystem> {
    fs: F,
    proc_path: PathBuf,
}

impl<F: FileSystem> ProcfsSystemSource<F> {
    pub fn new(fs: F, proc_path: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            proc_path: proc_path.into(),
        }
    }

    fn read<T: Default>(
        &self,
        relative: &str,
        parse: impl Fn(&str) -> Result<T, ParseError>,
    ) -> T {
        let path = self.proc_path.join(relative);
        match self.fs.read_to_string(&path) {
            Ok(content) => parse(&content).unwrap_or_else(|e| {
                debug!(path = %path.display(), error = %e, "unparsable host statistics");
                T::default()
            }),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "host statistics not readable");
                T::default()
            }
        }
    }
}

impl<F: FileSystem> SystemSource for ProcfsSystemSource<F> {
    fn sample(&mut self) -> SystemState {
        SystemState {
            cpu: self.read("stat", parse_cpu_stat),
            network: self.read("net/dev", parse_net_dev),
            disks: self.read("diskstats", parse_diskstats),
        }
    }
}
