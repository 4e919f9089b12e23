//! The client's own `cocos_app.conf`, which carries the version service URL
//! and the installed version counters.

use crate::settings::write_atomic;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppConfigFile {
    captain_url: String,
    #[serde(
        default,
        deserialize_with = "crate::protocol::flexible_version",
        skip_serializing_if = "Option::is_none"
    )]
    pack_job_id: Option<u64>,
    #[serde(
        default,
        deserialize_with = "crate::protocol::flexible_version",
        skip_serializing_if = "Option::is_none"
    )]
    upd_job_id: Option<u64>,
    #[serde(
        default,
        deserialize_with = "crate::protocol::flexible_version",
        skip_serializing_if = "Option::is_none"
    )]
    patch_job_id: Option<u64>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// Loaded app config bound to its file.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    path: PathBuf,
    file: AppConfigFile,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            Error::AppConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        let file: AppConfigFile = serde_json::from_str(&text)?;
        if file.upd_job_id.is_none() && file.pack_job_id.is_none() {
            return Err(Error::AppConfig(format!(
                "{} has neither updJobId nor packJobId",
                path.display()
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Version service URL.
    pub fn captain_url(&self) -> &str {
        &self.file.captain_url
    }

    /// Installed game version: `updJobId`, else `packJobId`.
    pub fn game_version(&self) -> u64 {
        self.file
            .upd_job_id
            .or(self.file.pack_job_id)
            .unwrap_or_default()
    }

    /// Installed patch version: `patchJobId`, else the game version.
    pub fn patch_version(&self) -> u64 {
        self.file.patch_job_id.unwrap_or_else(|| self.game_version())
    }

    pub fn set_versions(&mut self, game: u64, patch: u64) {
        self.file.upd_job_id = Some(game);
        self.file.patch_job_id = Some(patch);
    }

    /// Write the config back, keeping keys this type does not model.
    pub fn save(&self) -> Result<()> {
        let text = serde_json::to_string(&self.file)?;
        write_atomic(&self.path, text.as_bytes())?;
        Ok(())
    }
}
