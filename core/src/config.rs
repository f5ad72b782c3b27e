//! Runtime configuration, loaded from environment variables with sane
//! defaults for local/demo use (no config file format is mandated).

use std::path::PathBuf;

/// Application-wide settings.
///
/// `storage_root` is the one filesystem collaborator the core trusts to
/// exist; everything the store writes lives underneath it.
#[derive(Debug, Clone)]
pub struct Settings {
    pub app_name: String,
    pub storage_root: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "Particle Analysis API".to_string(),
            storage_root: PathBuf::from("./storage"),
        }
    }
}

impl Settings {
    /// Loads settings from the environment, falling back to defaults for any
    /// variable that is unset: `PARTICLELAB_APP_NAME`, `PARTICLELAB_STORAGE_ROOT`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            app_name: std::env::var("PARTICLELAB_APP_NAME").unwrap_or(defaults.app_name),
            storage_root: std::env::var("PARTICLELAB_STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_root),
        }
    }
}
