//! Runtime settings.

use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{Error, Result};

fn default_max_batch_size() -> u32 {
    1000
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("backups")
}

/// Settings for the ingestion and backup services.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Connection string for the backing store.
    pub database_url: String,

    /// Upper bound on rows per upsert batch.
    #[serde(default = "default_max_batch_size")]
    #[validate(range(min = 1))]
    pub max_batch_size: u32,

    /// Directory where backup files are written and read.
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,
}

impl Settings {
    /// Build settings from the process environment.
    ///
    /// `DATABASE_URL` is required. `MAX_BATCH_SIZE` and `BACKUP_DIR`
    /// fall back to defaults when unset.
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| Error::configuration("DATABASE_URL is not set"))?;

        let max_batch_size = match std::env::var("MAX_BATCH_SIZE") {
            Ok(raw) => raw.parse::<u32>().map_err(|_| {
                Error::configuration(format!("MAX_BATCH_SIZE is not a valid integer: {raw}"))
            })?,
            Err(_) => default_max_batch_size(),
        };

        let backup_dir = std::env::var("BACKUP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_backup_dir());

        let settings = Self {
            database_url,
            max_batch_size,
            backup_dir,
        };
        settings
            .validate()
            .map_err(|e| Error::configuration(e.to_string()))?;
        Ok(settings)
    }
}
