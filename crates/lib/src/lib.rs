//! quarry-lib: the build model and the jobs that operate on it.
//!
//! - `language`: the resolved project model (`Project`, `Product`, `Group`, `Rule`,
//!   `Module`) with copy-on-write property maps and wildcard expansion
//! - `environment`: module-driven build and run environment setup
//! - `script`: the embedded Lua engine and its layered scopes
//! - `loader`: Lua project descriptions to the model
//! - `buildgraph`: persisted build state, its rescue across re-resolution, and the lock
//! - `job`: resolve, build, clean and install as cancellable background jobs

pub mod builder;
pub mod buildgraph;
pub mod cancel;
pub mod consts;
pub mod environment;
pub mod job;
pub mod language;
pub mod loader;
pub mod persist;
pub mod script;
