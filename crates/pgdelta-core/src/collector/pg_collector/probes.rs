//! Privilege and helper probes.
//!
//! A failed probe is the same as a negative answer: the collector degrades to
//! what an unprivileged role can see instead of failing the cycle.

use tracing::{debug, warn};

use super::queries::{
    STATEMENTS_HELPER, build_helper_exists_probe, build_monitoring_role_probe,
    build_superuser_probe,
};
use super::PgConnection;

fn flag_or_false<C: PgConnection + ?Sized>(conn: &mut C, probe: &str, sql: &str) -> bool {
    match conn.query_flag(sql) {
        Ok(enabled) => enabled,
        Err(e) => {
            debug!(probe, error = %e, "probe failed, assuming false");
            false
        }
    }
}

pub fn connected_as_superuser<C: PgConnection + ?Sized>(conn: &mut C) -> bool {
    flag_or_false(conn, "superuser", &build_superuser_probe())
}

/// Member of `pg_monitor` (PostgreSQL 10+).
pub fn connected_as_monitoring_role<C: PgConnection + ?Sized>(conn: &mut C) -> bool {
    flag_or_false(conn, "monitoring_role", &build_monitoring_role_probe())
}

/// Whether `pgdelta.<name>()` is installed.
pub fn stats_helper_exists<C: PgConnection + ?Sized>(conn: &mut C, name: &str) -> bool {
    flag_or_false(conn, "stats_helper", &build_helper_exists_probe(name))
}

/// What the collector's role is able to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub superuser: bool,
    pub monitoring_role: bool,
    pub statements_helper: bool,
}

impl Capabilities {
    /// Whether query texts of other roles are visible.
    pub fn sees_all_query_texts(&self) -> bool {
        self.superuser || self.monitoring_role || self.statements_helper
    }
}

/// Runs all probes once.
pub fn probe_capabilities<C: PgConnection + ?Sized>(conn: &mut C) -> Capabilities {
    let caps = Capabilities {
        superuser: connected_as_superuser(conn),
        monitoring_role: connected_as_monitoring_role(conn),
        statements_helper: stats_helper_exists(conn, STATEMENTS_HELPER),
    };
    if !caps.sees_all_query_texts() {
        warn!(
            "collector role is neither superuser nor pg_monitor member and \
             pgdelta.{}() is missing; query texts of other roles will be hidden",
            STATEMENTS_HELPER
        );
    }
    caps
}
