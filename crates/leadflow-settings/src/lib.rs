//! # leadflow-settings
//!
//! Configuration for the leadflow engine, loaded from three layers in
//! increasing priority:
//! 1. **Compiled defaults**: [`LeadflowSettings::default()`]
//! 2. **User file**: `~/.leadflow/settings.json`, deep-merged over defaults
//! 3. **Environment**: `LEADFLOW_*` overrides

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, expand_home, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::sync::OnceLock;

static SETTINGS: OnceLock<LeadflowSettings> = OnceLock::new();

/// Process-wide settings, loaded on first access.
///
/// Falls back to compiled defaults if the file cannot be loaded.
pub fn get_settings() -> &'static LeadflowSettings {
    SETTINGS.get_or_init(|| load_settings().unwrap_or_default())
}

/// Install the process-wide settings explicitly.
///
/// # Errors
///
/// Hands `settings` back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: LeadflowSettings) -> std::result::Result<(), LeadflowSettings> {
    SETTINGS.set(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_path_is_under_leadflow_dir() {
        let path = settings_path();
        assert!(path.ends_with(".leadflow/settings.json"));
    }
}
