//! Incremental update synchronization against the version service.
//!
//! One call to [`Synchronizer::synchronize`] runs the check loop:
//!
//! - a `Patch` directive downloads the patched files, writes them and stops;
//! - an `Update` directive applies every offered package in server order and
//!   checks again, until the server stops asking for updates or the round
//!   limit is hit;
//! - maintenance, forced client update and unknown codes stop immediately.
//!
//! Every applied version goes through the same finalization: ledger file,
//! config database merge, script pass, version markers, snapshot.

use crate::app_config::AppConfig;
use crate::client::ClientDescriptor;
use crate::decompile::{decompile_tree, Decompiler, ExternalDecompiler};
use crate::ledger::{ChangeKind, ChangeLedger, LedgerStore};
use crate::protocol::{
    part_file_name, Directive, VersionCheck, VersionRequest, VERSION_CHECK_OPCODE,
};
use crate::settings::{ClientPaths, Settings};
use crate::snapshot::SnapshotStore;
use crate::transport::{join_url, HttpTransport};
use crate::{Error, Result};
use log::{debug, info, warn};
use mirror_codec::{PackageAction, StreamCodec, UpdatePackage};
use rayon::prelude::*;
use rayon::ThreadPool;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Default limit of check rounds in one synchronization.
pub const DEFAULT_MAX_ROUNDS: usize = 8;

/// Working state of one check round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncState {
    /// Installed game version.
    pub game_version: u64,
    /// Installed patch version.
    pub patch_version: u64,
    /// Newest game version on the server.
    pub latest_version: u64,
    pub directive: Directive,
}

/// How a synchronization ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Nothing newer is available.
    UpToDate,
    /// A patch was applied.
    Patched {
        /// Patch version now installed.
        version: u64,
    },
    /// The service is in maintenance.
    Maintenance {
        /// English notice text.
        notice: String,
    },
    /// The client binary itself must be replaced.
    ForceUpdateRequired,
    /// The server returned a code without a known meaning.
    Unknown(i64),
}

/// A version reached during synchronization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedVersion {
    /// Game version written to the app config.
    pub game_version: u64,
    /// Patch version written to the app config.
    pub patch_version: u64,
    /// `max(game_version, patch_version)`; names the ledger and the snapshot.
    pub actual_version: u64,
    /// Files touched by this version.
    pub changes: ChangeLedger,
    /// Where the change ledger was written.
    pub ledger_path: PathBuf,
}

/// Result of one [`Synchronizer::synchronize`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Versions applied, oldest first.
    pub applied: Vec<AppliedVersion>,
    /// Why synchronization stopped.
    pub outcome: SyncOutcome,
}

/// Device identity sent with every version check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Device id reported to the version service.
    pub device_id: String,
    /// `User-Agent` header of version checks.
    pub user_agent: String,
}

/// Join a server-supplied relative path onto `root`, refusing escapes.
pub(crate) fn resolve_logical(root: &Path, logical: &str) -> Result<PathBuf> {
    let rel = Path::new(logical.trim_start_matches('/'));
    let safe = rel.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !safe || rel.as_os_str().is_empty() {
        return Err(Error::Protocol(format!("unsafe asset path {:?}", logical)));
    }
    Ok(root.join(rel))
}

fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, data)?;
    Ok(())
}

/// Apply one downloaded update archive to `asset_dir`.
///
/// Returns the manifest version and the changes made. The archive is
/// removed afterwards whether or not applying it succeeded.
pub fn apply_package(
    archive: &Path,
    asset_dir: &Path,
    codec: &StreamCodec,
) -> Result<(u64, ChangeLedger)> {
    let result = apply_package_records(archive, asset_dir, codec);
    if let Err(e) = fs::remove_file(archive) {
        warn!("Failed to remove {}: {}", archive.display(), e);
    }
    result
}

fn apply_package_records(
    archive: &Path,
    asset_dir: &Path,
    codec: &StreamCodec,
) -> Result<(u64, ChangeLedger)> {
    let mut package = UpdatePackage::open(archive)?;
    let manifest = package.manifest().clone();
    let mut ledger = ChangeLedger::new();

    for record in &manifest.records {
        let target = resolve_logical(asset_dir, &record.logical_path)?;
        match &record.action {
            PackageAction::Delete => {
                if target.exists() {
                    fs::remove_file(&target)?;
                    ledger.record(record.logical_path.clone(), ChangeKind::Deleted);
                }
            }
            PackageAction::Upsert { physical_path } => {
                if !package.contains(physical_path) {
                    debug!(
                        "{} lists {} but the archive lacks it",
                        archive.display(),
                        physical_path
                    );
                    continue;
                }
                let raw = package.read_entry(physical_path)?;
                let kind = if target.exists() {
                    ChangeKind::Changed
                } else {
                    ChangeKind::New
                };
                write_file(&target, &codec.decode(&raw)?)?;
                ledger.record(record.logical_path.clone(), kind);
            }
        }
    }

    info!(
        "Applied {} (version {}, {} changes)",
        archive.display(),
        manifest.version,
        ledger.len()
    );
    Ok((manifest.version, ledger))
}

/// Downloaded part archives of one pack, removed from disk when dropped.
struct PartFiles(Vec<PathBuf>);

impl Drop for PartFiles {
    fn drop(&mut self) {
        for path in &self.0 {
            match fs::remove_file(path) {
                Ok(()) => debug!("Removed leftover part {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
    }
}

/// Runs synchronization for one client.
pub struct Synchronizer<T: HttpTransport, S: SnapshotStore> {
    client: ClientDescriptor,
    paths: ClientPaths,
    identity: DeviceIdentity,
    transport: T,
    snapshot: S,
    snapshot_subtree: PathBuf,
    codec: StreamCodec,
    decompiler: Option<Box<dyn Decompiler>>,
    threads: Option<ThreadPool>,
    max_rounds: usize,
}

impl<T: HttpTransport, S: SnapshotStore> Synchronizer<T, S> {
    /// Synchronizer with the default codec, no decompiler and the global
    /// thread pool.
    pub fn new(
        client: ClientDescriptor,
        paths: ClientPaths,
        identity: DeviceIdentity,
        transport: T,
        snapshot: S,
    ) -> Self {
        Self {
            client,
            paths,
            identity,
            transport,
            snapshot,
            snapshot_subtree: PathBuf::from(client.locale),
            codec: StreamCodec::default(),
            decompiler: None,
            threads: None,
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    /// Build from tool settings.
    pub fn from_settings(
        settings: &Settings,
        client: ClientDescriptor,
        transport: T,
        snapshot: S,
    ) -> Self {
        let identity = DeviceIdentity {
            device_id: settings.device_id.clone(),
            user_agent: settings.user_agent.clone(),
        };
        let mut sync = Self::new(
            client,
            settings.client_paths(&client),
            identity,
            transport,
            snapshot,
        );
        if let Some(decompiler) = settings
            .decompiler
            .as_deref()
            .and_then(ExternalDecompiler::from_command)
        {
            sync.decompiler = Some(Box::new(decompiler));
        }
        sync
    }

    /// Codec used to decode downloaded files.
    pub fn with_codec(mut self, codec: StreamCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Run the script pass with `decompiler` after every applied version.
    pub fn with_decompiler(mut self, decompiler: Box<dyn Decompiler>) -> Self {
        self.decompiler = Some(decompiler);
        self
    }

    /// Run downloads and the script pass on `pool` instead of the global pool.
    pub fn with_thread_pool(mut self, pool: ThreadPool) -> Self {
        self.threads = Some(pool);
        self
    }

    /// Check rounds allowed before giving up; at least one.
    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    /// Path staged for snapshots, relative to the snapshot store root.
    pub fn with_snapshot_subtree(mut self, subtree: impl Into<PathBuf>) -> Self {
        self.snapshot_subtree = subtree.into();
        self
    }

    /// Directory layout of the synchronized client.
    pub fn paths(&self) -> &ClientPaths {
        &self.paths
    }

    /// The snapshot store, for inspecting what was recorded.
    pub fn snapshot_store(&self) -> &S {
        &self.snapshot
    }

    /// Run check rounds until the server settles.
    pub fn synchronize(&mut self) -> Result<SyncReport> {
        let mut applied = Vec::new();

        for round in 1..=self.max_rounds {
            let mut app = AppConfig::load(&self.paths.app_config())?;
            let (state, check) = self.check(&app)?;
            debug!("Round {} of {}: {:?}", round, self.client.id, state);

            let outcome = match state.directive {
                Directive::Patch => self.run_patch(&mut app, &state, &check, &mut applied)?,
                Directive::Update => {
                    if state.latest_version <= state.game_version {
                        info!("Client is on newest version");
                        SyncOutcome::UpToDate
                    } else {
                        self.run_update(&mut app, &check, &mut applied)?;
                        continue;
                    }
                }
                Directive::Maintenance => {
                    let notice = check.maintenance_notice()?;
                    warn!("The server is in maintenance mode");
                    debug!("{}", notice);
                    SyncOutcome::Maintenance { notice }
                }
                Directive::ForceUpdate => {
                    warn!("The client application must be updated");
                    SyncOutcome::ForceUpdateRequired
                }
                Directive::Unknown(code) => {
                    warn!("There is no update or the return code {} is unknown", code);
                    SyncOutcome::Unknown(code)
                }
            };
            return Ok(SyncReport { applied, outcome });
        }

        Err(Error::NotConverging(self.max_rounds))
    }

    fn check(&self, app: &AppConfig) -> Result<(SyncState, VersionCheck)> {
        let game_version = app.game_version();
        let patch_version = app.patch_version();
        info!(
            "{} client version - game: {}, patch: {}",
            self.client.id, game_version, patch_version
        );

        let request = VersionRequest {
            device_id: &self.identity.device_id,
            user_agent: &self.identity.user_agent,
            game_version,
        };
        let params = request.params_literal();
        let body = self.transport.post(
            app.captain_url(),
            &request.headers(),
            &[("opCode", VERSION_CHECK_OPCODE), ("params", &params)],
        )?;
        let check = VersionCheck::parse(&body, game_version)?;
        info!("Server version - game: {}", check.latest_version);

        let state = SyncState {
            game_version,
            patch_version,
            latest_version: check.latest_version,
            directive: check.directive,
        };
        Ok((state, check))
    }

    fn in_pool<R: Send>(threads: Option<&ThreadPool>, op: impl FnOnce() -> R + Send) -> R {
        match threads {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }

    fn download(&self, cdn: &str, urls: &[&str]) -> Result<Vec<Vec<u8>>> {
        let transport = &self.transport;
        Self::in_pool(self.threads.as_ref(), || {
            urls.par_iter()
                .map(|url| transport.get(&join_url(cdn, url)))
                .collect()
        })
    }

    fn run_update(
        &mut self,
        app: &mut AppConfig,
        check: &VersionCheck,
        applied: &mut Vec<AppliedVersion>,
    ) -> Result<()> {
        fs::create_dir_all(&self.paths.download_dir)?;

        for pack in &check.packs {
            if pack.part_urls.is_empty() {
                warn!("Update pack {} has no parts", pack.key);
                continue;
            }

            let urls: Vec<&str> = pack.part_urls.iter().map(String::as_str).collect();
            let contents = self.download(&check.cdn_url, &urls)?;
            let mut parts = PartFiles(Vec::with_capacity(urls.len()));
            for (url, content) in urls.iter().zip(contents) {
                let path = self.paths.download_dir.join(part_file_name(url));
                fs::write(&path, content)?;
                parts.0.push(path);
            }

            let mut version = None;
            let mut changes = ChangeLedger::new();
            for archive in &parts.0 {
                let (v, ledger) = apply_package(archive, &self.paths.asset_dir, &self.codec)?;
                version = Some(v);
                changes.extend(ledger);
            }
            drop(parts);

            if let Some(version) = version {
                applied.push(self.finalize(app, version, version, changes)?);
            }
        }
        Ok(())
    }

    fn run_patch(
        &mut self,
        app: &mut AppConfig,
        state: &SyncState,
        check: &VersionCheck,
        applied: &mut Vec<AppliedVersion>,
    ) -> Result<SyncOutcome> {
        let patch = check.patch()?;
        info!("Server version - patch: {}", patch.version);
        if patch.version <= state.patch_version {
            info!("Client is on newest patch");
            return Ok(SyncOutcome::UpToDate);
        }

        info!("New patch available with {} files", patch.files.len());
        let urls: Vec<&str> = patch.files.iter().map(|f| f.url.as_str()).collect();
        let contents = self.download(&check.cdn_url, &urls)?;

        let mut changes = ChangeLedger::new();
        for (file, content) in patch.files.iter().zip(contents) {
            let target = resolve_logical(&self.paths.asset_dir, &file.logic)?;
            let kind = if target.exists() {
                ChangeKind::Changed
            } else {
                ChangeKind::New
            };
            write_file(&target, &self.codec.decode(&content)?)?;
            changes.record(file.logic.clone(), kind);
        }

        applied.push(self.finalize(app, state.game_version, patch.version, changes)?);
        Ok(SyncOutcome::Patched {
            version: patch.version,
        })
    }

    fn finalize(
        &mut self,
        app: &mut AppConfig,
        game_version: u64,
        patch_version: u64,
        changes: ChangeLedger,
    ) -> Result<AppliedVersion> {
        let actual_version = game_version.max(patch_version);
        let ledger_path =
            LedgerStore::new(self.paths.ledger_dir()).write(actual_version, &changes)?;

        let update_db = self.paths.update_config_db();
        if update_db.exists() {
            let report = mirror_gameconfig::apply_update_database(
                &self.paths.config_db(),
                &update_db,
                &self.paths.json_dir,
            )?;
            for (table, err) in &report.failed {
                warn!("Table {} was not converted: {}", table, err);
            }
        }

        if let Some(decompiler) = &self.decompiler {
            let script_dir = self.paths.script_dir();
            Self::in_pool(self.threads.as_ref(), || {
                decompile_tree(&script_dir, &**decompiler)
            })?;
        }

        app.set_versions(game_version, patch_version);
        app.save()?;

        let message = format!("[{}] GAME: {}", self.client.locale, actual_version);
        self.snapshot.stage_subtree(&self.snapshot_subtree)?;
        self.snapshot.commit(&message)?;
        self.snapshot.push_to_remote()?;

        Ok(AppliedVersion {
            game_version,
            patch_version,
            actual_version,
            changes,
            ledger_path,
        })
    }
}
