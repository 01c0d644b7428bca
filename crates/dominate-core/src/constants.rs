//! Package-level constants.

/// Current version of the Dominate hub (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name.
pub const NAME: &str = "dominate";

/// Identity assigned to connections that do not supply one.
pub const ANONYMOUS_IDENTITY: &str = "anonymous";
