//! # dominate-settings
//!
//! Configuration for the Dominate realtime hub, loaded from three layers (in
//! priority order):
//! 1. **Compiled defaults**: [`DominateSettings::default()`]
//! 2. **Settings file**: `~/.dominate/settings.json` or an explicit path
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `DOMINATE_*` overrides (highest priority)
//!
//! The merged result is validated before it is handed out; there is no
//! global instance, the binary owns the loaded value.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
