//! Snapshot models and persistence of the previous snapshot.

pub mod model;
pub mod state;

pub use model::Snapshot;
pub use state::{
    FileStateStore, MemoryStateStore, STATE_FORMAT_VERSION, StateStore, StoreError, masked,
};
