//! The resolved build model.
//!
//! A [`Project`] owns its [`Product`]s; products own groups, rules and file taggers and
//! share [`Module`]s. Property maps are shared between owners by `Arc` and copied
//! on write, see [`PropertyMap`].

mod group;
mod location;
mod module;
mod product;
mod project;
mod property_map;
mod rule;
mod wildcards;

use std::collections::BTreeSet;

pub use group::{Group, SourceArtifact, SourceWildCards};
pub use location::CodeLocation;
pub use module::Module;
pub use product::{ArtifactProperties, Product};
pub use project::Project;
pub use property_map::{PropertyMap, PropertyMapPtr, PropertyValue};
pub(crate) use property_map::{insert_at_path, load_value_map, store_value_map};
pub use rule::{Binding, FileTagger, PrepareScript, Rule, RuleArtifact, ScriptImport};
pub use wildcards::WildcardError;

/// A set of file tags; ordered so that iteration and persistence are deterministic.
pub type FileTags = BTreeSet<String>;
