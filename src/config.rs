use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::ProfileError;

/// Service environment for a run: the JSON-RPC callback endpoint, the auth
/// token passed through to it, and the shared scratch directory.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImporterConfig {
    pub callback_url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_scratch")]
    pub scratch: Utf8PathBuf,
}

fn default_scratch() -> Utf8PathBuf {
    Utf8PathBuf::from("/tmp")
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Resolves the config from a JSON file (`profile-importer.json` by
    /// default), falling back to the service environment variables when no
    /// file is present.
    pub fn resolve(path: Option<&str>) -> Result<ImporterConfig, ProfileError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("profile-importer.json"),
        };

        if config_path.exists() {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| ProfileError::ConfigRead(config_path.display().to_string()))?;
            return serde_json::from_str(&content)
                .map_err(|err| ProfileError::ConfigParse(err.to_string()));
        }
        if path.is_some() {
            return Err(ProfileError::ConfigRead(config_path.display().to_string()));
        }

        Self::from_env().ok_or(ProfileError::MissingConfig)
    }

    fn from_env() -> Option<ImporterConfig> {
        let callback_url = std::env::var("SDK_CALLBACK_URL").ok()?;
        let token = std::env::var("KB_AUTH_TOKEN").unwrap_or_default();
        let scratch = std::env::var("KB_SCRATCH")
            .map(Utf8PathBuf::from)
            .unwrap_or_else(|_| default_scratch());
        Some(ImporterConfig {
            callback_url,
            token,
            scratch,
        })
    }
}
