//! Resolving a project description into the build model.

mod params;
mod project_file;

pub use params::SetupProjectParameters;
pub use project_file::{LoadError, load_project};
