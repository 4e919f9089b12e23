//! First-time import of a client from its XAPK bundle.
//!
//! Stages run in order and can be switched off individually:
//! `clear`, `extract`, `rename`, `tidy`, `gameconfig`, `decompile`.

use crate::catalog::{
    apply_rename_plan, build_rename_plan, move_file, read_asset_entries, ErrorLedger,
    RenameStats, RENAME_ERROR_LOG,
};
use crate::client::{ClientDescriptor, ClientRegistry};
use crate::decompile::{collect_files, decompile_tree, DecompileStats, Decompiler};
use crate::settings::ClientPaths;
use crate::{Error, Result};
use log::{error, info, warn};
use mirror_codec::{extract_zip, StreamCodec};
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::Deserialize;
use std::fs::{self, File};
use std::io::{self, Read, Seek};
use std::path::{Path, PathBuf};
use zip::ZipArchive;

const XAPK_MANIFEST: &str = "manifest.json";
const APK_RELEASE_PREFIX: &str = "assets/release/";
const APK_ASSETS_DB: &str = "assets/64/assets.db";
const APK_APP_CONFIG: &str = "assets/cocos_app.conf";
const PACKRES_MARKER: &str = ".packres_success";

#[derive(Debug, Clone, Deserialize)]
pub struct XapkFile {
    pub file: String,
}

/// `manifest.json` of an XAPK bundle.
#[derive(Debug, Clone, Deserialize)]
pub struct XapkManifest {
    pub package_name: String,
    #[serde(default)]
    pub expansions: Vec<XapkFile>,
    #[serde(default)]
    pub split_apks: Vec<XapkFile>,
}

impl XapkManifest {
    pub fn read(xapk: &Path) -> Result<Self> {
        let mut archive = ZipArchive::new(File::open(xapk)?)?;
        Self::from_archive(&mut archive)
    }

    fn from_archive<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<Self> {
        let entry = archive.by_name(XAPK_MANIFEST)?;
        Ok(serde_json::from_reader(entry)?)
    }
}

/// Pick the client from an explicit id, or from the bundle's package name.
pub fn resolve_client(id: Option<&str>, xapk: Option<&Path>) -> Result<ClientDescriptor> {
    let registry = ClientRegistry::global();
    if let Some(id) = id {
        return registry
            .get(id)
            .copied()
            .ok_or_else(|| Error::UnknownClient(id.to_string()));
    }
    let xapk = xapk.ok_or_else(|| {
        Error::Import("no client given and no XAPK bundle to read it from".into())
    })?;
    let manifest = XapkManifest::read(xapk)?;
    registry
        .by_package_name(&manifest.package_name)
        .copied()
        .ok_or(Error::UnknownClient(manifest.package_name))
}

/// Which stages to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportStages {
    pub clear: bool,
    pub extract: bool,
    pub rename: bool,
    pub tidy: bool,
    pub gameconfig: bool,
    pub decompile: bool,
}

impl Default for ImportStages {
    fn default() -> Self {
        Self {
            clear: true,
            extract: true,
            rename: true,
            tidy: true,
            gameconfig: true,
            decompile: true,
        }
    }
}

/// Counts from decoding a directory tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub decoded: usize,
    pub plain: usize,
    pub failed: usize,
}

/// Decode every file below `dir` in place, in parallel. Files that fail to
/// decode are logged and left as they are.
pub fn decode_tree(dir: &Path, codec: &StreamCodec) -> Result<DecodeStats> {
    let files = collect_files(dir, None)?;
    let results: Vec<_> = files
        .par_iter()
        .map(|path| codec.decode_in_place(path))
        .collect();

    let mut stats = DecodeStats::default();
    for (path, result) in files.iter().zip(results) {
        match result {
            Ok(true) => stats.decoded += 1,
            Ok(false) => stats.plain += 1,
            Err(e) => {
                error!("Failed to decode {}: {}", path.display(), e);
                stats.failed += 1;
            }
        }
    }
    info!(
        "Decoded {} files in {} ({} plain, {} failed)",
        stats.decoded,
        dir.display(),
        stats.plain,
        stats.failed
    );
    Ok(stats)
}

/// What an import did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub decoded: Option<DecodeStats>,
    pub renamed: Option<RenameStats>,
    pub catalog_issues: usize,
    pub tables_converted: Option<usize>,
    pub tables_failed: usize,
    pub decompiled: Option<DecompileStats>,
}

/// Imports one client's bundle into its asset tree.
pub struct Importer {
    paths: ClientPaths,
    stages: ImportStages,
    xapk: Option<PathBuf>,
    codec: StreamCodec,
    decompiler: Option<Box<dyn Decompiler>>,
    threads: Option<ThreadPool>,
    error_log: PathBuf,
    error_threshold: usize,
}

impl Importer {
    pub fn new(paths: ClientPaths) -> Self {
        Self {
            paths,
            stages: ImportStages::default(),
            xapk: None,
            codec: StreamCodec::default(),
            decompiler: None,
            threads: None,
            error_log: PathBuf::from(RENAME_ERROR_LOG),
            error_threshold: 10,
        }
    }

    pub fn with_stages(mut self, stages: ImportStages) -> Self {
        self.stages = stages;
        self
    }

    pub fn with_xapk(mut self, xapk: impl Into<PathBuf>) -> Self {
        self.xapk = Some(xapk.into());
        self
    }

    pub fn with_codec(mut self, codec: StreamCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_decompiler(mut self, decompiler: Box<dyn Decompiler>) -> Self {
        self.decompiler = Some(decompiler);
        self
    }

    /// Run the parallel stages on `pool` instead of the global pool.
    pub fn with_thread_pool(mut self, pool: ThreadPool) -> Self {
        self.threads = Some(pool);
        self
    }

    /// Where catalog issues go once there are more than `threshold`.
    pub fn with_error_log(mut self, path: impl Into<PathBuf>, threshold: usize) -> Self {
        self.error_log = path.into();
        self.error_threshold = threshold;
        self
    }

    pub fn paths(&self) -> &ClientPaths {
        &self.paths
    }

    /// Run the enabled stages.
    pub fn run(&self) -> Result<ImportReport> {
        if self.stages.extract && self.xapk.is_none() {
            return Err(Error::Import("extraction needs an XAPK bundle".into()));
        }
        if self.stages.tidy && !self.stages.rename {
            return Err(Error::Import("cannot tidy up files when renaming is disabled".into()));
        }

        let mut report = ImportReport::default();

        if self.stages.clear {
            self.clear()?;
        }
        if let (true, Some(xapk)) = (self.stages.extract, &self.xapk) {
            self.extract(xapk)?;
            let decoded = self.in_pool(|| decode_tree(&self.paths.unpack_dir, &self.codec))?;
            report.decoded = Some(decoded);
        }
        if self.stages.rename {
            let (stats, issues) = self.rename()?;
            report.renamed = Some(stats);
            report.catalog_issues = issues;
        }
        if self.stages.tidy {
            self.tidy()?;
        }
        if self.stages.gameconfig {
            if let Some((converted, failed)) = self.gameconfig()? {
                report.tables_converted = Some(converted);
                report.tables_failed = failed;
            }
        }
        if self.stages.decompile {
            report.decompiled = match &self.decompiler {
                Some(decompiler) => {
                    let script_dir = self.paths.script_dir();
                    Some(self.in_pool(|| decompile_tree(&script_dir, &**decompiler))?)
                }
                None => {
                    info!("No decompiler configured, scripts left as bytecode");
                    None
                }
            };
        }

        Ok(report)
    }

    fn in_pool<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        match &self.threads {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }

    /// Remove the unpack, asset and remain directories.
    pub fn clear(&self) -> Result<()> {
        for dir in [
            &self.paths.unpack_dir,
            &self.paths.asset_dir,
            &self.paths.remain_dir,
        ] {
            match fs::remove_dir_all(dir) {
                Ok(()) => info!("Removed {}", dir.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Unpack the bundle's OBB archives and the APK's release assets.
    pub fn extract(&self, xapk: &Path) -> Result<()> {
        let unpack = &self.paths.unpack_dir;
        fs::create_dir_all(unpack)?;

        info!("Unpacking {}", xapk.display());
        let mut bundle = ZipArchive::new(File::open(xapk)?)?;
        let manifest = XapkManifest::from_archive(&mut bundle)?;

        for expansion in &manifest.expansions {
            info!("Unpacking {}", expansion.file);
            let obb = spool_entry(&mut bundle, &expansion.file, unpack)?;
            extract_zip(obb.path(), unpack)?;
        }

        let apk_name = manifest
            .split_apks
            .first()
            .ok_or_else(|| Error::Import("bundle lists no split APK".into()))?;
        info!("Unpacking {}", apk_name.file);
        let apk_file = spool_entry(&mut bundle, &apk_name.file, unpack)?;
        let mut apk = ZipArchive::new(apk_file.reopen()?)?;

        for i in 0..apk.len() {
            let mut entry = apk.by_index(i)?;
            let name = entry.name().to_string();
            let Some(rel) = name.strip_prefix("assets/") else {
                continue;
            };
            if !name.starts_with(APK_RELEASE_PREFIX) || entry.is_dir() {
                continue;
            }
            if entry.enclosed_name().is_none() {
                warn!("Skipping unsafe entry {}", name);
                continue;
            }
            copy_entry(&mut entry, &unpack.join(rel))?;
        }

        for (name, target) in [(APK_ASSETS_DB, "assets.db"), (APK_APP_CONFIG, "cocos_app.conf")] {
            let mut entry = apk.by_name(name)?;
            copy_entry(&mut entry, &unpack.join(target))?;
        }

        info!("Finished extraction into {}", unpack.display());
        Ok(())
    }

    /// Move physical assets to their logical paths. Returns the stats and
    /// the number of catalog issues.
    pub fn rename(&self) -> Result<(RenameStats, usize)> {
        let entries = read_asset_entries(&self.paths.assets_db())?;
        let plan = build_rename_plan(&entries);
        info!(
            "Renaming {} assets from {} physical files",
            entries.len(),
            plan.len()
        );

        let mut errors = ErrorLedger::new(&self.error_log, self.error_threshold);
        let stats = apply_rename_plan(
            &plan,
            &self.paths.unpack_dir,
            &self.paths.asset_dir,
            &mut errors,
        )?;
        errors.flush()?;
        info!("Moved {}, copied {}", stats.moved, stats.copied);
        Ok((stats, errors.len()))
    }

    /// Move leftover release files to the remain directory and drop the
    /// unpack directory.
    pub fn tidy(&self) -> Result<()> {
        let remain = &self.paths.remain_dir;
        fs::create_dir_all(remain)?;

        let release = self.paths.unpack_dir.join("release");
        if release.is_dir() {
            for path in collect_files(&release, None)? {
                let skip = path.extension().is_some_and(|e| e == "luac")
                    || path.file_name().is_some_and(|n| n == PACKRES_MARKER);
                if skip {
                    continue;
                }
                if let Some(name) = path.file_name() {
                    move_file(&path, &remain.join(name))?;
                }
            }
        }

        let conf = self.paths.unpack_dir.join("cocos_app.conf");
        if conf.exists() {
            move_file(&conf, &self.paths.app_config())?;
        } else {
            warn!("No cocos_app.conf in {}", self.paths.unpack_dir.display());
        }

        fs::remove_dir_all(&self.paths.unpack_dir)?;
        info!("Finished tidying");
        Ok(())
    }

    /// Unzip, decode and convert the shipped config database. Returns the
    /// number of converted and failed tables, or `None` without an archive.
    pub fn gameconfig(&self) -> Result<Option<(usize, usize)>> {
        let archive = self.paths.config_archive();
        if !archive.exists() {
            warn!("Can't unpack {}: it doesn't exist", archive.display());
            return Ok(None);
        }
        extract_zip(&archive, &self.paths.asset_dir)?;
        fs::remove_file(&archive)?;

        let report =
            mirror_gameconfig::import_database(&self.paths.config_db(), &self.paths.json_dir)?;
        Ok(Some((report.written.len(), report.failed.len())))
    }
}

/// Copy a nested archive entry to a temporary file under `dir`.
fn spool_entry<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
    dir: &Path,
) -> Result<tempfile::NamedTempFile> {
    let mut entry = archive.by_name(name)?;
    let mut temp = tempfile::Builder::new()
        .prefix(".tmp.bundle-")
        .tempfile_in(dir)?;
    io::copy(&mut entry, temp.as_file_mut())?;
    Ok(temp)
}

fn copy_entry<R: Read>(entry: &mut R, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = File::create(target)?;
    io::copy(entry, &mut out)?;
    Ok(())
}
