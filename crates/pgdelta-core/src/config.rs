//! Collection options consumed by the core.

use std::path::PathBuf;

/// Which categories are collected and how state is persisted.
#[derive(Debug, Clone)]
pub struct CollectionOpts {
    /// pg_stat_user_tables / pg_stat_user_indexes and the relation catalog.
    pub collect_relations: bool,
    pub collect_settings: bool,
    /// pg_stat_user_functions and the function catalog.
    pub collect_functions: bool,
    /// Host CPU/network/disk counters.
    pub collect_system_information: bool,
    /// Switch for an external log tailer that fills `Snapshot::logs`.
    /// Not read by this crate; acquisition leaves `logs` empty.
    pub collect_logs: bool,
    /// Switch for an external EXPLAIN collector that fills
    /// `Snapshot::explains`. Not read by this crate; acquisition leaves
    /// `explains` empty.
    pub collect_explain: bool,

    /// `application_name` of the collector's own sessions.
    pub collector_application_name: String,
    /// Statement timeout for all SQL sent to the database. 0 disables it.
    pub statement_timeout_ms: i32,

    pub diff_statements: bool,

    /// Whether reports may be submitted (requires a valid grant).
    pub submit_collected_data: bool,
    /// Dry run: no previous state is loaded and nothing is saved.
    pub test_run: bool,

    pub state_filename: PathBuf,
    pub write_state_update: bool,
}

impl Default for CollectionOpts {
    fn default() -> Self {
        Self {
            collect_relations: true,
            collect_settings: true,
            collect_functions: true,
            collect_system_information: true,
            collect_logs: false,
            collect_explain: false,
            collector_application_name: "pgdelta".to_string(),
            statement_timeout_ms: 30_000,
            diff_statements: true,
            submit_collected_data: true,
            test_run: false,
            state_filename: PathBuf::from("/var/lib/pgdelta/state"),
            write_state_update: true,
        }
    }
}

impl CollectionOpts {
    /// Whether the previous snapshot is loaded at all.
    pub fn reads_state(&self) -> bool {
        !self.test_run
    }

    /// Whether the current snapshot is saved as the next baseline.
    pub fn writes_state(&self) -> bool {
        !self.test_run && self.write_state_update
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_disables_all_persistence() {
        let opts = CollectionOpts {
            test_run: true,
            ..CollectionOpts::default()
        };
        assert!(!opts.reads_state());
        assert!(!opts.writes_state());
    }

    #[test]
    fn write_state_update_only_gates_saving() {
        let opts = CollectionOpts {
            write_state_update: false,
            ..CollectionOpts::default()
        };
        assert!(opts.reads_state());
        assert!(!opts.writes_state());
    }
}
