mod build;
mod clean;
mod env;
mod install;
mod products;
mod resolve;

pub use build::cmd_build;
pub use clean::cmd_clean;
pub use env::cmd_env;
pub use install::cmd_install;
pub use products::cmd_products;
pub use resolve::cmd_resolve;
