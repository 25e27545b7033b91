//! Version-dependent shape of the statement statistics query.

use crate::storage::model::{
    PG_VERSION_13, PG_VERSION_17, PG_VERSION_94, PG_VERSION_95, PostgresVersion,
};

use super::queries;

/// Which optional pg_stat_statements columns the server provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionalFields {
    /// Before 9.4: no `queryid`, no min/max/mean/stddev.
    None,
    /// 9.4: `queryid` only.
    QueryId,
    /// 9.5+: `queryid` and the min/max/mean/stddev timings.
    QueryIdAndTiming,
}

/// Naming of the timing columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingColumns {
    /// `total_time`, `min_time`, ... and `blk_read_time` (before 13).
    Legacy,
    /// `total_exec_time`, `min_exec_time`, ... (13 to 16).
    Exec,
    /// 17+: block I/O time split into `shared_blk_*_time` and `local_blk_*_time`.
    ExecSplitIo,
}

/// Where statement rows come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementSource {
    /// `pgdelta.get_stat_statements()`: a SECURITY DEFINER wrapper that lets
    /// unprivileged collectors see the query text of other roles.
    Helper,
    /// The `pg_stat_statements` view.
    StandardView,
}

/// Everything that decides the text of the statement query.
///
/// Built once per cycle from the server version and the helper probe, then
/// rendered with [`StatementFetchPlan::sql`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatementFetchPlan {
    pub fields: OptionalFields,
    pub timing: TimingColumns,
    pub source: StatementSource,
}

impl StatementFetchPlan {
    pub fn new(version: &PostgresVersion, helper_present: bool) -> Self {
        let v = version.numeric;
        let fields = if v >= PG_VERSION_95 {
            OptionalFields::QueryIdAndTiming
        } else if v >= PG_VERSION_94 {
            OptionalFields::QueryId
        } else {
            OptionalFields::None
        };
        let timing = if v >= PG_VERSION_17 {
            TimingColumns::ExecSplitIo
        } else if v >= PG_VERSION_13 {
            TimingColumns::Exec
        } else {
            TimingColumns::Legacy
        };
        let source = if helper_present {
            StatementSource::Helper
        } else {
            StatementSource::StandardView
        };
        Self {
            fields,
            timing,
            source,
        }
    }

    pub fn has_query_id(&self) -> bool {
        self.fields != OptionalFields::None
    }

    pub fn has_extra_timing(&self) -> bool {
        self.fields == OptionalFields::QueryIdAndTiming
    }

    /// Renders the statement statistics query for this plan.
    pub fn sql(&self) -> String {
        queries::build_statements_query(self, queries::QUERY_MARKER_SQL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(numeric: i32, helper: bool) -> StatementFetchPlan {
        StatementFetchPlan::new(&PostgresVersion::new("x", numeric), helper)
    }

    #[test]
    fn optional_fields_follow_version_thresholds() {
        assert_eq!(plan(90300, false).fields, OptionalFields::None);
        assert_eq!(plan(90400, false).fields, OptionalFields::QueryId);
        assert_eq!(plan(90406, false).fields, OptionalFields::QueryId);
        assert_eq!(plan(90500, false).fields, OptionalFields::QueryIdAndTiming);
        assert_eq!(plan(160002, false).fields, OptionalFields::QueryIdAndTiming);
    }

    #[test]
    fn timing_columns_follow_renames() {
        assert_eq!(plan(120010, false).timing, TimingColumns::Legacy);
        assert_eq!(plan(130000, false).timing, TimingColumns::Exec);
        assert_eq!(plan(160004, false).timing, TimingColumns::Exec);
        assert_eq!(plan(170000, false).timing, TimingColumns::ExecSplitIo);
    }

    #[test]
    fn source_depends_only_on_helper() {
        assert_eq!(plan(90300, true).source, StatementSource::Helper);
        assert_eq!(plan(150000, false).source, StatementSource::StandardView);
    }

    #[test]
    fn pre_94_plan_selects_no_optional_columns_from_the_server() {
        let sql = plan(90300, false).sql();
        assert!(sql.contains("NULL::bigint AS queryid"));
        assert!(sql.contains("NULL::double precision AS min_time"));
        assert!(sql.contains("NULL::double precision AS stddev_time"));
        assert!(!sql.contains("s.queryid"));
        assert!(!sql.contains("s.min_time"));
    }

    #[test]
    fn plan_94_selects_queryid_but_not_extra_timing() {
        let p = plan(90400, false);
        assert!(p.has_query_id());
        assert!(!p.has_extra_timing());
        let sql = p.sql();
        assert!(sql.contains("s.queryid AS queryid"));
        assert!(sql.contains("NULL::double precision AS max_time"));
    }

    #[test]
    fn plan_95_selects_all_optional_columns() {
        let sql = plan(90500, false).sql();
        assert!(sql.contains("s.queryid AS queryid"));
        assert!(sql.contains("s.min_time::double precision AS min_time"));
        assert!(sql.contains("s.stddev_time::double precision AS stddev_time"));
        assert!(!sql.contains("NULL::double precision"));
    }

    #[test]
    fn plan_13_uses_exec_time_columns() {
        let sql = plan(130000, false).sql();
        assert!(sql.contains("s.total_exec_time::double precision AS total_time"));
        assert!(sql.contains("s.mean_exec_time::double precision AS mean_time"));
        assert!(sql.contains("s.blk_read_time::double precision AS blk_read_time"));
    }

    #[test]
    fn plan_17_sums_split_io_timing() {
        let sql = plan(170000, false).sql();
        assert!(sql.contains(
            "(s.shared_blk_read_time + s.local_blk_read_time)::double precision AS blk_read_time"
        ));
        assert!(!sql.contains("s.blk_read_time"));
    }

    #[test]
    fn helper_plan_reads_from_helper_function() {
        let sql = plan(150000, true).sql();
        assert!(sql.contains("FROM pgdelta.get_stat_statements() s"));
        assert!(!sql.contains("FROM pg_stat_statements s"));
    }
}
