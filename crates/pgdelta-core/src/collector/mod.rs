//! Metrics acquisition.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Collector                           │
//! │  ┌──────────────────────────┐   ┌─────────────────────────┐  │
//! │  │       pg_collector       │   │         procfs          │  │
//! │  │  - StatementFetchPlan    │   │  - /proc/stat           │  │
//! │  │  - probes, self-heal     │   │  - /proc/net/dev        │  │
//! │  │  - tables, indexes, ...  │   │  - /proc/diskstats      │  │
//! │  └────────────┬─────────────┘   └────────────┬────────────┘  │
//! │        ┌──────▼───────┐              ┌───────▼──────┐        │
//! │        │ PgConnection │ (trait)      │  FileSystem  │ (trait)│
//! │        └──────┬───────┘              └───────┬──────┘        │
//! └───────────────┼──────────────────────────────┼───────────────┘
//!          ┌──────┴───────┐               ┌──────┴──────┐
//!   PostgresConnection  MockConnection   RealFs      MockFs
//! ```
//!
//! # Usage
//!
//! ```
//! use pgdelta_core::collector::{Collector, MockConnection};
//! use pgdelta_core::config::CollectionOpts;
//!
//! let conn = MockConnection::new(150004);
//! let mut collector = Collector::new(conn, CollectionOpts::default());
//! let (snapshot, _transient) = collector.collect_snapshot().unwrap();
//! assert_eq!(snapshot.version.short, "15.4");
//! ```

#[allow(clippy::module_inception)]
mod collector;
pub mod mock;
pub mod pg_collector;
pub mod procfs;
pub mod traits;

pub use collector::{Collector, CollectorTiming};
pub use mock::{MockConnection, MockFs};
pub use pg_collector::{PgCollectError, PgConnection, PostgresConnection};
pub use procfs::{ProcfsSystemSource, SystemSource};
pub use traits::{FileSystem, RealFs};
