//! # parley-settings
//!
//! Configuration for the parley relay, loaded from layered sources (in
//! priority order, lowest first):
//! 1. **Compiled defaults** — [`ParleySettings::default()`]
//! 2. **Settings file** — `~/.parley/settings.json` or an explicit path,
//!    deep-merged over the defaults
//! 3. **Environment variables** — `PORT` and `PARLEY_*` overrides
//!
//! Command-line flags are applied on top by the binary. Settings are passed
//! down explicitly; there is no global instance.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
