//! Versioned binary persistence of the build model and build graph.

mod pool;

pub use pool::{FORMAT_VERSION, MAGIC, PersistError, Persistent, PoolReader, PoolWriter, decode, encode};
