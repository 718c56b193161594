//! # tars-settings
//!
//! Configuration management with layered sources for the TARS backend.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`TarsSettings::default()`]
//! 2. **User file**: `~/.tars/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `TARS_*` overrides (highest priority)
//!
//! Command-line flags, applied by the binary, sit above all three.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
