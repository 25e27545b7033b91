//! pgdelta-core: metrics collection core of the pgdelta agent.
//!
//! Provides:
//! - `collector`: version-aware PostgreSQL acquisition and host counters
//! - `diff`: turning two snapshots into per-interval deltas
//! - `storage`: snapshot models and the per-API-key state store
//! - `cycle`: one acquire/diff/persist pass for a monitored target
//! - `config`: collection options

pub mod collector;
pub mod config;
pub mod cycle;
pub mod diff;
pub mod storage;
