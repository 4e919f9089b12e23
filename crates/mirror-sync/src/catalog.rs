//! Mapping of the content-addressed asset store onto logical client paths.
//!
//! The client's `assets.db` lists every logical asset path together with the
//! physical (hash-derived) file holding its bytes. Several logical paths may
//! share one physical file. [`build_rename_plan`] groups them, and
//! [`apply_rename_plan`] moves each physical file to its first logical path
//! and copies it to the others.

use crate::Result;
use chrono::Local;
use log::warn;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OpenFlags};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// File receiving catalog issues once they exceed the threshold.
pub const RENAME_ERROR_LOG: &str = "rename_errors.log";

/// One row of the `assets` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetEntry {
    pub logical_path: String,
    pub version: i64,
    pub physical_path: String,
    pub size: i64,
    pub hash: String,
    /// Set for audio and video assets.
    pub external: bool,
}

fn integer(value: SqlValue) -> i64 {
    match value {
        SqlValue::Integer(i) => i,
        SqlValue::Real(f) => f as i64,
        SqlValue::Text(s) => s.trim().parse().unwrap_or_default(),
        SqlValue::Blob(_) | SqlValue::Null => 0,
    }
}

fn text(value: SqlValue) -> String {
    match value {
        SqlValue::Text(s) => s,
        SqlValue::Integer(i) => i.to_string(),
        SqlValue::Real(f) => f.to_string(),
        SqlValue::Blob(b) => String::from_utf8_lossy(&b).into_owned(),
        SqlValue::Null => String::new(),
    }
}

/// Read every entry of the `assets` table.
pub fn read_asset_entries(assets_db: &Path) -> Result<Vec<AssetEntry>> {
    let conn = Connection::open_with_flags(assets_db, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let mut stmt = conn.prepare("SELECT * FROM assets")?;
    let entries = stmt
        .query_map([], |row| {
            Ok(AssetEntry {
                logical_path: text(row.get(0)?),
                version: integer(row.get(1)?),
                physical_path: text(row.get(2)?),
                size: integer(row.get(3)?),
                hash: text(row.get(4)?),
                external: integer(row.get(5)?) != 0,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

/// Logical targets grouped by physical path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenamePlan {
    groups: Vec<(String, Vec<String>)>,
}

impl RenamePlan {
    /// Groups in first-seen order of their physical path.
    pub fn groups(&self) -> &[(String, Vec<String>)] {
        &self.groups
    }

    pub fn targets(&self, physical_path: &str) -> Option<&[String]> {
        self.groups
            .iter()
            .find(|(p, _)| p == physical_path)
            .map(|(_, t)| t.as_slice())
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Group entries by physical path, keeping the order logical paths appear.
pub fn build_rename_plan(entries: &[AssetEntry]) -> RenamePlan {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for entry in entries {
        match index.get(entry.physical_path.as_str()) {
            Some(&i) => groups[i].1.push(entry.logical_path.clone()),
            None => {
                index.insert(&entry.physical_path, groups.len());
                groups.push((
                    entry.physical_path.clone(),
                    vec![entry.logical_path.clone()],
                ));
            }
        }
    }
    RenamePlan { groups }
}

/// Non-fatal problem met while applying a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogIssue {
    MissingSource {
        source: PathBuf,
        logical_path: String,
    },
    TargetConflict {
        source: PathBuf,
        target: PathBuf,
    },
}

impl fmt::Display for CatalogIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogIssue::MissingSource {
                source,
                logical_path,
            } => write!(f, "{} of {} can not be found", source.display(), logical_path),
            CatalogIssue::TargetConflict { source, target } => write!(
                f,
                "{} -> {}: target already exists",
                source.display(),
                target.display()
            ),
        }
    }
}

/// Accumulates issues and reports them in bulk.
#[derive(Debug)]
pub struct ErrorLedger {
    log_path: PathBuf,
    threshold: usize,
    issues: Vec<CatalogIssue>,
}

impl ErrorLedger {
    pub fn new(log_path: impl Into<PathBuf>, threshold: usize) -> Self {
        Self {
            log_path: log_path.into(),
            threshold,
            issues: Vec::new(),
        }
    }

    pub fn push(&mut self, issue: CatalogIssue) {
        self.issues.push(issue);
    }

    pub fn issues(&self) -> &[CatalogIssue] {
        &self.issues
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// Report the issues: each through `warn!` up to the threshold, otherwise
    /// into the log file. Returns the log file path when it was written.
    pub fn flush(&self) -> Result<Option<PathBuf>> {
        if self.issues.len() <= self.threshold {
            for issue in &self.issues {
                warn!("{}", issue);
            }
            return Ok(None);
        }

        let mut file = io::BufWriter::new(fs::File::create(&self.log_path)?);
        writeln!(
            file,
            "# {} catalog issues, {}",
            self.issues.len(),
            Local::now().format("%Y-%m-%d %H:%M:%S")
        )?;
        for issue in &self.issues {
            writeln!(file, "{}", issue)?;
        }
        file.flush()?;

        warn!(
            "{} catalog issues written to {}",
            self.issues.len(),
            self.log_path.display()
        );
        Ok(Some(self.log_path.clone()))
    }
}

/// Counts of applied renames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenameStats {
    pub moved: usize,
    pub copied: usize,
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) => fs::create_dir_all(parent),
        None => Ok(()),
    }
}

/// Rename, falling back to copy and delete across filesystems.
pub(crate) fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    ensure_parent(to)?;
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}

/// Materialize every logical path of the plan under `target_root`.
pub fn apply_rename_plan(
    plan: &RenamePlan,
    source_root: &Path,
    target_root: &Path,
    errors: &mut ErrorLedger,
) -> Result<RenameStats> {
    let mut stats = RenameStats::default();

    for (physical, targets) in &plan.groups {
        let mut source = source_root.join(physical);
        if !source.is_file() {
            for logical in targets {
                errors.push(CatalogIssue::MissingSource {
                    source: source.clone(),
                    logical_path: logical.clone(),
                });
            }
            continue;
        }

        for (j, logical) in targets.iter().enumerate() {
            let target = target_root.join(logical);
            if target.exists() {
                errors.push(CatalogIssue::TargetConflict {
                    source: source.clone(),
                    target,
                });
                continue;
            }

            if j == 0 {
                move_file(&source, &target)?;
                stats.moved += 1;
                source = target;
            } else {
                ensure_parent(&target)?;
                fs::copy(&source, &target)?;
                stats.copied += 1;
            }
        }
    }

    Ok(stats)
}
