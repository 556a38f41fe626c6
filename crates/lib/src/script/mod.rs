//! Embedded Lua evaluation for environment setup, prepare scripts and project files.
//!
//! - [`engine`] - the Lua state, evaluation against a [`Scope`] and file imports
//! - [`scope`] - the layered symbol table scripts are evaluated in
//! - [`convert`] - property value conversion across the Lua boundary

pub mod convert;
pub mod engine;
pub mod scope;

pub use convert::{lua_to_property, property_map_to_lua, property_to_lua};
pub use engine::{IMPORTS_LAYER, ScriptEngine};
pub use scope::{Scope, ScopeLayer, ScopeValue};
