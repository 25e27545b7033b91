//! Data models for collected state.
//!
//! - [`postgres`]: entity keys, counter records and catalog data from PostgreSQL
//! - [`system`]: host counters and the collector's own health counters
//! - [`snapshot`]: the persisted [`Snapshot`], per-cycle [`TransientState`]
//!   and the [`DiffState`] produced from two snapshots
//!
//! ```text
//! Snapshot (previous) ─┐
//!                      ├─ diff ──> DiffState ──> reporting
//! Snapshot (current) ──┘
//!        │
//!        └─ saved as the next cycle's previous
//! ```

mod postgres;
mod snapshot;
mod system;

pub use postgres::{
    FunctionKey, FunctionStats, IndexKey, IndexStats, LogLine, Oid, PG_VERSION_13, PG_VERSION_17,
    PG_VERSION_94, PG_VERSION_95, PG_VERSION_96, PostgresBackend, PostgresDatabase,
    PostgresExplain, PostgresFunction, PostgresRelation, PostgresRole, PostgresSetting,
    PostgresVersion, RelationKey, RelationStats, StatementKey, StatementStats, StatementText,
};
pub use snapshot::{DiffState, Diffed, Grant, GrantConfig, Snapshot, TransientState};
pub use system::{CollectorStats, CpuStats, DiskStats, NetworkStats, SystemState};
