//! Crate-wide constants.

/// Prefix for environment variables carrying bound resource values.
pub const BINDING_ENV_PREFIX: &str = "SITESTACK";

/// Client package name reported in every binding.
pub const CLIENT_PACKAGE: &str = "sitestack/node";

/// Default directory (relative to the working directory) for build artifacts and templates.
pub const DEFAULT_OUT_DIR: &str = ".sitestack";

/// Maximum size of a single site archive part.
pub const DEFAULT_PART_SIZE_BYTES: u64 = 200 * 1024 * 1024;

/// Timeout ceiling for server functions distributed to the edge.
pub const EDGE_TIMEOUT_LIMIT_SECS: u32 = 30;

/// Timeout ceiling for regional server functions.
pub const REGIONAL_TIMEOUT_LIMIT_SECS: u32 = 180;

/// URL reported by placeholder sites without a configured `dev.url`.
pub const PLACEHOLDER_URL: &str = "localhost";

/// Build command used when a site declares none.
pub const DEFAULT_BUILD_COMMAND: &str = "npm run build";

/// Cache-Control for fingerprinted assets.
pub const CACHE_CONTROL_VERSIONED: &str = "public,max-age=31536000,immutable";

/// Cache-Control for unversioned assets: CDN caches, browsers always revalidate.
pub const CACHE_CONTROL_UNVERSIONED: &str = "public,max-age=0,s-maxage=31536000,must-revalidate";

/// Environment variable overriding the configured stage.
pub const STAGE_ENV_VAR: &str = "SITESTACK_STAGE";

/// Environment variable overriding the configured mode.
pub const MODE_ENV_VAR: &str = "SITESTACK_MODE";
