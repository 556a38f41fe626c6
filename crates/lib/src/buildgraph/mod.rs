//! Persisted build state.
//!
//! - [`rescuable`] - per-artifact data that survives re-resolution
//! - [`command`] - the commands recorded for an artifact
//! - [`store`] - the on-disk build graph and the rescue step
//! - [`lock`] - the exclusive lock guarding a build directory

pub mod command;
pub mod lock;
pub mod rescuable;
pub mod store;

pub use command::{Command, ProcessCommand, ScriptCommand};
pub use lock::{BuildGraphLock, LockError, LockHolder};
pub use rescuable::{ChildData, FileTime, RescuableArtifactData};
pub use store::{BuildGraph, BuildGraphStore, ProductBuildData, StoreError, rescue_build_data};
