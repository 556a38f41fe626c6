pub const APP_NAME: &str = "quarry";

/// Namespace in a property map that holds the build tool's own properties.
pub const CORE_NAMESPACE: &str = "quarry";

/// Key in a product's property map under which per-module configuration lives.
pub const MODULES_KEY: &str = "modules";

/// Environment variable overriding the default build root.
pub const BUILD_ROOT_ENV: &str = "QUARRY_BUILD_ROOT";

pub const DEFAULT_PROFILE: &str = "default";
pub const DEFAULT_BUILD_VARIANT: &str = "debug";

/// Build graph file extension (`<build_dir>/<project id>.bg`).
pub const BUILD_GRAPH_EXTENSION: &str = "bg";

pub const LOCK_FILENAME: &str = ".lock";

pub const INSTALL_ROOT_DIR: &str = "install-root";
