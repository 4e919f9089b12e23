//! Tool settings (`config.json`) and the per-client directory layout derived
//! from them.

use crate::client::ClientDescriptor;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Placeholder in `AssetDir` replaced by the client's locale code.
pub const CLIENT_PLACEHOLDER: &str = "{client}";

const DEFAULT_UNPACK_DIR: &str = "_unpack";
const DEFAULT_REMAIN_DIR: &str = "_remain";
const DEFAULT_UPDATE_DIR: &str = "_update/_download";
const DEFAULT_JSON_DIR: &str = "gameconfig";
const DEFAULT_ERROR_LOG_THRESHOLD: usize = 10;

/// Required settings keys, in prompt order.
pub const REQUIRED_KEYS: [&str; 4] = ["AssetDir", "AssetRepo", "DeviceID", "UserAgent"];

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("missing required settings: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),
    #[error("unknown settings key: {0}")]
    UnknownKey(String),
    #[error("invalid settings file: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type SettingsResult<T> = std::result::Result<T, SettingsError>;

/// Settings as stored on disk, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SettingsFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_repo: Option<PathBuf>,
    #[serde(rename = "DeviceID", skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unpack_temp_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_remain_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_temp_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_config_json_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decompiler: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_log_threshold: Option<usize>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SettingsFile {
    /// Read the settings file; a missing file yields empty settings.
    pub fn load(path: &Path) -> SettingsResult<Self> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Required keys without a value.
    pub fn missing(&self) -> Vec<&'static str> {
        let present = [
            self.asset_dir.is_some(),
            self.asset_repo.is_some(),
            self.device_id.is_some(),
            self.user_agent.is_some(),
        ];
        REQUIRED_KEYS
            .iter()
            .zip(present)
            .filter(|(_, present)| !present)
            .map(|(key, _)| *key)
            .collect()
    }

    /// Set a required key from user input.
    pub fn set_required(&mut self, key: &str, value: String) -> SettingsResult<()> {
        match key {
            "AssetDir" => self.asset_dir = Some(value),
            "AssetRepo" => self.asset_repo = Some(PathBuf::from(value)),
            "DeviceID" => self.device_id = Some(value),
            "UserAgent" => self.user_agent = Some(value),
            other => return Err(SettingsError::UnknownKey(other.to_string())),
        }
        Ok(())
    }

    /// Ask for every missing required key. Returns whether anything was set.
    pub fn fill_missing<F>(&mut self, mut ask: F) -> SettingsResult<bool>
    where
        F: FnMut(&'static str) -> io::Result<String>,
    {
        let missing = self.missing();
        for &key in &missing {
            let value = ask(key)?;
            self.set_required(key, value)?;
        }
        Ok(!missing.is_empty())
    }

    /// Write the file atomically as pretty JSON.
    pub fn save(&self, path: &Path) -> SettingsResult<()> {
        let text = serde_json::to_string_pretty(self)?;
        write_atomic(path, text.as_bytes())?;
        Ok(())
    }

    /// Validate required keys and apply defaults.
    pub fn validate(self) -> SettingsResult<Settings> {
        let missing = self.missing();
        match (self.asset_dir, self.asset_repo, self.device_id, self.user_agent) {
            (Some(asset_dir), Some(asset_repo), Some(device_id), Some(user_agent)) => {
                Ok(Settings {
                    asset_dir,
                    asset_repo,
                    device_id,
                    user_agent,
                    unpack_temp_dir: self
                        .unpack_temp_dir
                        .unwrap_or_else(|| DEFAULT_UNPACK_DIR.to_string()),
                    asset_remain_dir: self
                        .asset_remain_dir
                        .unwrap_or_else(|| DEFAULT_REMAIN_DIR.to_string()),
                    update_temp_dir: self
                        .update_temp_dir
                        .unwrap_or_else(|| DEFAULT_UPDATE_DIR.to_string()),
                    game_config_json_dir: self
                        .game_config_json_dir
                        .unwrap_or_else(|| DEFAULT_JSON_DIR.to_string()),
                    decompiler: self.decompiler.filter(|cmd| !cmd.is_empty()),
                    error_log_threshold: self
                        .error_log_threshold
                        .unwrap_or(DEFAULT_ERROR_LOG_THRESHOLD),
                    extra: self.extra,
                })
            }
            _ => Err(SettingsError::MissingFields(missing)),
        }
    }
}

/// Validated tool settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Asset root template, containing [`CLIENT_PLACEHOLDER`].
    pub asset_dir: String,
    /// Working tree of the snapshot repository.
    pub asset_repo: PathBuf,
    pub device_id: String,
    pub user_agent: String,
    pub unpack_temp_dir: String,
    pub asset_remain_dir: String,
    pub update_temp_dir: String,
    pub game_config_json_dir: String,
    /// Decompiler command; the input and output paths are appended.
    pub decompiler: Option<Vec<String>>,
    pub error_log_threshold: usize,
    extra: Map<String, Value>,
}

impl Settings {
    /// Load and validate a settings file.
    pub fn load(path: &Path) -> SettingsResult<Self> {
        SettingsFile::load(path)?.validate()
    }

    /// Load a settings file, asking `ask` for every missing required key.
    /// Answers are saved back to `path` before validation.
    pub fn load_with<F>(path: &Path, ask: F) -> SettingsResult<Self>
    where
        F: FnMut(&'static str) -> io::Result<String>,
    {
        let mut file = SettingsFile::load(path)?;
        if file.fill_missing(ask)? {
            file.save(path)?;
        }
        file.validate()
    }

    /// Load a settings file, prompting on the terminal for missing keys
    /// unless `prompt` is off.
    pub fn load_interactive(path: &Path, prompt: bool) -> SettingsResult<Self> {
        if prompt {
            Self::load_with(path, prompt_stdin)
        } else {
            Self::load(path)
        }
    }

    /// Write the settings back to `path`.
    pub fn save(&self, path: &Path) -> SettingsResult<()> {
        self.to_file().save(path)
    }

    fn to_file(&self) -> SettingsFile {
        SettingsFile {
            asset_dir: Some(self.asset_dir.clone()),
            asset_repo: Some(self.asset_repo.clone()),
            device_id: Some(self.device_id.clone()),
            user_agent: Some(self.user_agent.clone()),
            unpack_temp_dir: Some(self.unpack_temp_dir.clone()),
            asset_remain_dir: Some(self.asset_remain_dir.clone()),
            update_temp_dir: Some(self.update_temp_dir.clone()),
            game_config_json_dir: Some(self.game_config_json_dir.clone()),
            decompiler: self.decompiler.clone(),
            error_log_threshold: Some(self.error_log_threshold),
            extra: self.extra.clone(),
        }
    }

    /// Directory layout of one client.
    pub fn client_paths(&self, client: &ClientDescriptor) -> ClientPaths {
        let asset_dir = PathBuf::from(self.asset_dir.replace(CLIENT_PLACEHOLDER, client.locale));
        ClientPaths {
            unpack_dir: asset_dir.join(&self.unpack_temp_dir),
            remain_dir: asset_dir.join(&self.asset_remain_dir),
            download_dir: asset_dir.join(&self.update_temp_dir),
            json_dir: asset_dir.join(&self.game_config_json_dir),
            asset_dir,
        }
    }
}

/// Paths used for one client's asset tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientPaths {
    pub asset_dir: PathBuf,
    pub unpack_dir: PathBuf,
    pub remain_dir: PathBuf,
    pub download_dir: PathBuf,
    pub json_dir: PathBuf,
}

impl ClientPaths {
    /// Layout rooted at `asset_dir` with default subdirectory names.
    pub fn with_defaults(asset_dir: impl Into<PathBuf>) -> Self {
        let asset_dir = asset_dir.into();
        Self {
            unpack_dir: asset_dir.join(DEFAULT_UNPACK_DIR),
            remain_dir: asset_dir.join(DEFAULT_REMAIN_DIR),
            download_dir: asset_dir.join(DEFAULT_UPDATE_DIR),
            json_dir: asset_dir.join(DEFAULT_JSON_DIR),
            asset_dir,
        }
    }

    pub fn app_config(&self) -> PathBuf {
        self.asset_dir.join("cocos_app.conf")
    }

    pub fn ledger_dir(&self) -> PathBuf {
        self.asset_dir.join("_update")
    }

    pub fn script_dir(&self) -> PathBuf {
        self.asset_dir.join("script")
    }

    pub fn config_db(&self) -> PathBuf {
        self.asset_dir.join("gameConfig.db")
    }

    pub fn config_archive(&self) -> PathBuf {
        self.asset_dir.join("gameConfig.db.zip")
    }

    pub fn update_config_db(&self) -> PathBuf {
        self.asset_dir.join("gameUpdateConfig.db")
    }

    pub fn assets_db(&self) -> PathBuf {
        self.unpack_dir.join("assets.db")
    }
}

/// Ask for one settings value on standard input.
pub fn prompt_stdin(key: &'static str) -> io::Result<String> {
    print!("{key}: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Replace `path` with `data` through a temporary file in the same directory.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut temp = tempfile::Builder::new()
        .prefix(".tmp.mirror-")
        .tempfile_in(parent)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;
    persist_tempfile(temp, path)
}

fn persist_tempfile(temp: NamedTempFile, final_path: &Path) -> io::Result<()> {
    temp.persist(final_path).map(|_| ()).map_err(|err| err.error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientRegistry;
    use tempfile::TempDir;

    #[test]
    fn test_missing_fields_are_all_named() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        fs::write(&path, r#"{"AssetDir": "assets/{client}", "Extra": 1}"#).unwrap();

        let err = Settings::load(&path).unwrap_err();
        match err {
            SettingsError::MissingFields(fields) => {
                assert_eq!(fields, vec!["AssetRepo", "DeviceID", "UserAgent"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_defaults_and_client_paths() {
        let mut file = SettingsFile::default();
        for key in REQUIRED_KEYS {
            file.set_required(key, format!("{key}-value")).unwrap();
        }
        file.asset_dir = Some("mirror/{client}".to_string());
        let settings = file.validate().unwrap();
        assert_eq!(settings.unpack_temp_dir, "_unpack");
        assert_eq!(settings.error_log_threshold, 10);
        assert!(settings.decompiler.is_none());

        let kr = ClientRegistry::global().get("KR").unwrap();
        let paths = settings.client_paths(kr);
        assert_eq!(paths.asset_dir, PathBuf::from("mirror/ko-KR"));
        assert_eq!(paths.download_dir, PathBuf::from("mirror/ko-KR/_update/_download"));
        assert_eq!(paths.app_config(), PathBuf::from("mirror/ko-KR/cocos_app.conf"));
    }

    #[test]
    fn test_save_preserves_unknown_keys() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        fs::write(
            &path,
            r#"{"AssetDir":"a/{client}","AssetRepo":"a","DeviceID":"d","UserAgent":"u","Proxy":"socks5://x"}"#,
        )
        .unwrap();

        let settings = Settings::load(&path).unwrap();
        settings.save(&path).unwrap();

        let value: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["Proxy"], "socks5://x");
        assert_eq!(value["UnpackTempDir"], "_unpack");
        assert_eq!(Settings::load(&path).unwrap(), settings);
    }

    #[test]
    fn test_fill_missing_asks_only_for_gaps() {
        let mut file = SettingsFile {
            asset_dir: Some("a/{client}".into()),
            user_agent: Some("UA".into()),
            ..Default::default()
        };
        let mut asked = Vec::new();
        let changed = file
            .fill_missing(|key| {
                asked.push(key);
                Ok(format!("{key}!"))
            })
            .unwrap();
        assert!(changed);
        assert_eq!(asked, vec!["AssetRepo", "DeviceID"]);
        assert_eq!(file.device_id.as_deref(), Some("DeviceID!"));
        assert!(!file.fill_missing(|_| unreachable!()).unwrap());
    }

    #[test]
    fn test_load_with_saves_answers() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        fs::write(&path, r#"{"AssetDir":"a/{client}","AssetRepo":"repo"}"#).unwrap();

        let settings =
            Settings::load_with(&path, |key| Ok(format!("{}-answer", key.to_lowercase())))
                .unwrap();
        assert_eq!(settings.device_id, "deviceid-answer");
        assert_eq!(settings.user_agent, "useragent-answer");

        let saved = SettingsFile::load(&path).unwrap();
        assert!(saved.missing().is_empty());
        assert_eq!(Settings::load_interactive(&path, false).unwrap(), settings);
    }

    #[test]
    fn test_load_without_prompt_reports_gaps() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        let err = Settings::load_interactive(&path, false).unwrap_err();
        assert!(matches!(err, SettingsError::MissingFields(ref f) if f.len() == 4));
        assert!(!path.exists());
    }

    #[test]
    fn test_unknown_required_key() {
        let mut file = SettingsFile::default();
        assert!(matches!(
            file.set_required("Nope", String::new()),
            Err(SettingsError::UnknownKey(_))
        ));
    }
}
