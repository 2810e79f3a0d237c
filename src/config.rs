use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ExplorerError, Result};

pub const DEFAULT_ENDPOINT: &str = "https://firestore.googleapis.com/v1";

/// Settings for reaching the user collection and storing snapshots.
///
/// Every field has a default so a config file only needs the values that
/// differ. Credentials are never part of this struct: only the name of the
/// environment variable that holds the access token.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorerConfig {
    /// Cloud project that owns the database.
    pub project_id: String,
    /// Database id inside the project.
    pub database: String,
    /// Collection holding one document per user.
    pub collection: String,
    /// Document field whose value becomes the record key. Falls back to the
    /// document id when unset or missing on a document.
    pub key_field: Option<String>,
    /// Directory the snapshot store reads and writes.
    pub snapshot_dir: PathBuf,
    /// Documents requested per list call.
    pub page_size: u32,
    /// Timeout for each HTTP call, in seconds.
    pub timeout_secs: u64,
    /// Environment variable holding the OAuth access token.
    pub access_token_env: String,
    /// REST endpoint root, overridable for emulators.
    pub endpoint: String,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            database: "(default)".to_string(),
            collection: "users".to_string(),
            key_field: None,
            snapshot_dir: PathBuf::from("data"),
            page_size: 300,
            timeout_secs: 30,
            access_token_env: "FIRESTORE_ACCESS_TOKEN".to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }
}

impl ExplorerConfig {
    /// Read a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            ExplorerError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
            .map_err(|e| ExplorerError::Configuration(format!("{}: {e}", path.display())))
    }

    pub fn from_toml_str(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file (if any), then `EXPLORER_*` environment overrides, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup. Empty values are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        if let Some(value) = get("EXPLORER_PROJECT_ID") {
            self.project_id = value;
        }
        if let Some(value) = get("EXPLORER_COLLECTION") {
            self.collection = value;
        }
        if let Some(value) = get("EXPLORER_SNAPSHOT_DIR") {
            self.snapshot_dir = PathBuf::from(value);
        }
    }

    /// Checks only what every command needs. The project id is required once a
    /// live pull is attempted, see [`ExplorerConfig::require_remote`].
    pub fn validate(&self) -> Result<()> {
        if self.collection.trim().is_empty() {
            return Err(ExplorerError::Configuration(
                "collection must not be empty".to_string(),
            ));
        }
        if self.page_size == 0 {
            return Err(ExplorerError::Configuration(
                "page_size must be at least 1".to_string(),
            ));
        }
        if self.snapshot_dir.as_os_str().is_empty() {
            return Err(ExplorerError::Configuration(
                "snapshot_dir must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn require_remote(&self) -> Result<()> {
        if self.project_id.trim().is_empty() {
            return Err(ExplorerError::Configuration(
                "project_id is required to pull live data".to_string(),
            ));
        }
        Ok(())
    }
}
