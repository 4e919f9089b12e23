use crate::{Error, Result};
use serde::de::IgnoredAny;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// Name of the manifest entry inside an update package.
pub const MANIFEST_ENTRY: &str = "update";

const VERSION_PREFIX: &str = "version:";

/// What a manifest record asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageAction {
    /// Remove the logical file.
    Delete,
    /// Write the named archive entry to the logical file.
    Upsert {
        /// Content-addressed entry name inside the archive.
        physical_path: String,
    },
}

/// One line of an update manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRecord {
    /// Client-visible path relative to the asset root.
    pub logical_path: String,
    /// Requested action.
    pub action: PackageAction,
}

/// Parsed `update` manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageManifest {
    /// Version the client reaches once this package is applied.
    pub version: u64,
    /// File actions in manifest order.
    pub records: Vec<ManifestRecord>,
}

impl PackageManifest {
    /// Parse manifest text.
    ///
    /// The first line is `version:<N>`, the second is a header and is
    /// skipped, every following non-blank line is a JSON array
    /// `[logical, physical, _, _]`.
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text.lines();
        let first = lines
            .next()
            .ok_or_else(|| Error::InvalidManifest("manifest is empty".to_string()))?;
        let version = first
            .trim()
            .strip_prefix(VERSION_PREFIX)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or_else(|| Error::InvalidManifest(format!("bad version line: {:?}", first)))?;

        let _header = lines.next();

        let mut records = Vec::new();
        for line in lines.filter(|l| !l.trim().is_empty()) {
            let (logical_path, physical_path, _, _): (String, String, IgnoredAny, IgnoredAny) =
                serde_json::from_str(line).map_err(|e| {
                    Error::InvalidManifest(format!("bad record {:?}: {}", line, e))
                })?;
            let action = if physical_path.is_empty() {
                PackageAction::Delete
            } else {
                PackageAction::Upsert { physical_path }
            };
            records.push(ManifestRecord {
                logical_path,
                action,
            });
        }

        Ok(Self { version, records })
    }

    /// Render the manifest back to its text form.
    pub fn to_text(&self) -> Result<String> {
        let mut out = format!("{}{}\n", VERSION_PREFIX, self.version);
        out.push('\n');
        for record in &self.records {
            let physical = match &record.action {
                PackageAction::Delete => "",
                PackageAction::Upsert { physical_path } => physical_path.as_str(),
            };
            let line = serde_json::to_string(&(record.logical_path.as_str(), physical, 0, 0))?;
            out.push_str(&line);
            out.push('\n');
        }
        Ok(out)
    }
}

/// An entry listed in an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Entry path inside the archive.
    pub name: String,
    /// Whether the entry is a directory.
    pub is_dir: bool,
    /// Uncompressed size in bytes.
    pub size: u64,
}

/// A downloaded update package.
#[derive(Debug)]
pub struct UpdatePackage {
    path: PathBuf,
    archive: zip::ZipArchive<File>,
    manifest: PackageManifest,
}

impl UpdatePackage {
    /// Open a package and parse its manifest.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut archive = zip::ZipArchive::new(File::open(path)?)?;

        let manifest_text = {
            let mut entry = match archive.by_name(MANIFEST_ENTRY) {
                Ok(entry) => entry,
                Err(zip::result::ZipError::FileNotFound) => {
                    return Err(Error::MissingEntry(MANIFEST_ENTRY.to_string()));
                }
                Err(e) => return Err(e.into()),
            };
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            String::from_utf8(data).map_err(|e| {
                Error::InvalidManifest(format!("manifest is not valid UTF-8: {}", e))
            })?
        };
        let manifest = PackageManifest::parse(&manifest_text)?;

        Ok(Self {
            path: path.to_path_buf(),
            archive,
            manifest,
        })
    }

    /// Get the parsed manifest.
    pub fn manifest(&self) -> &PackageManifest {
        &self.manifest
    }

    /// Get the path to the package file.
    pub fn archive_path(&self) -> &Path {
        &self.path
    }

    /// Check whether the archive holds the named entry.
    pub fn contains(&self, name: &str) -> bool {
        self.archive.index_for_name(name).is_some()
    }

    /// Read the raw bytes of an entry.
    pub fn read_entry(&mut self, name: &str) -> Result<Vec<u8>> {
        read_zip_entry(&mut self.archive, name)
    }

    /// List all archive entries.
    pub fn entries(&mut self) -> Result<Vec<ArchiveEntry>> {
        list_zip_entries(&mut self.archive)
    }
}

/// List the entries of any zip archive.
pub fn list_zip_entries<R: Read + io::Seek>(
    archive: &mut zip::ZipArchive<R>,
) -> Result<Vec<ArchiveEntry>> {
    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let file = archive.by_index(i)?;
        entries.push(ArchiveEntry {
            name: file.name().to_string(),
            is_dir: file.is_dir(),
            size: file.size(),
        });
    }
    Ok(entries)
}

/// Read one named entry of any zip archive.
pub fn read_zip_entry<R: Read + io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
) -> Result<Vec<u8>> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => {
            return Err(Error::MissingEntry(name.to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    let mut data = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut data)?;
    Ok(data)
}

/// Extract a whole zip archive into `dest`.
pub fn extract_zip<P: AsRef<Path>, Q: AsRef<Path>>(archive_path: P, dest: Q) -> Result<()> {
    let dest = dest.as_ref();
    fs::create_dir_all(dest)?;
    let mut archive = zip::ZipArchive::new(File::open(archive_path.as_ref())?)?;
    archive.extract(dest)?;
    Ok(())
}
