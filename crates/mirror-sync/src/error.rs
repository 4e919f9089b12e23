use crate::settings::SettingsError;
use thiserror::Error;

/// Errors from synchronizing or importing a client's asset tree.
#[derive(Debug, Error)]
pub enum Error {
    /// Asset or package decoding error.
    #[error("codec error: {0}")]
    Codec(#[from] mirror_codec::Error),

    /// Configuration database error.
    #[error("game config error: {0}")]
    GameConfig(#[from] mirror_gameconfig::Error),

    /// Settings could not be loaded or saved.
    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),

    /// The version service rejected the client's version.
    #[error("version {0} does not exist on the version service")]
    VersionNotFound(u64),

    /// The version service response is missing a field or is otherwise unusable.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The snapshot store failed to stage, commit, or push.
    #[error("snapshot error: {0}")]
    Snapshot(String),

    /// The server kept requesting updates beyond the round limit.
    #[error("update did not converge after {0} rounds")]
    NotConverging(usize),

    /// No client with this identifier or package name is known.
    #[error("unknown client: {0}")]
    UnknownClient(String),

    /// The client's app config is missing or invalid.
    #[error("app config error: {0}")]
    AppConfig(String),

    /// An import stage cannot run with the given inputs.
    #[error("import error: {0}")]
    Import(String),

    /// SQLite error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// ZIP archive error.
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Http(err.to_string())
    }
}

/// Result type for mirror-sync operations.
pub type Result<T> = std::result::Result<T, Error>;
