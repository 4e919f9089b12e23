use crate::package::{ManifestRecord, PackageAction, PackageManifest, MANIFEST_ENTRY};
use crate::Result;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use zip::{write::FileOptions, ZipWriter};

/// Builder for update packages in the layout served by the CDN.
#[derive(Debug, Default, Clone)]
pub struct PackageBuilder {
    version: u64,
    records: Vec<ManifestRecord>,
    entries: Vec<(String, Vec<u8>)>,
}

impl PackageBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the target version written to the manifest.
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Add a file stored under `physical_path` and installed at `logical_path`.
    pub fn with_file(
        mut self,
        logical_path: impl Into<String>,
        physical_path: impl Into<String>,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        let physical_path = physical_path.into();
        self.entries.push((physical_path.clone(), data.into()));
        self.records.push(ManifestRecord {
            logical_path: logical_path.into(),
            action: PackageAction::Upsert { physical_path },
        });
        self
    }

    /// Add a manifest record whose entry is not stored in the archive.
    pub fn with_dangling_record(
        mut self,
        logical_path: impl Into<String>,
        physical_path: impl Into<String>,
    ) -> Self {
        self.records.push(ManifestRecord {
            logical_path: logical_path.into(),
            action: PackageAction::Upsert {
                physical_path: physical_path.into(),
            },
        });
        self
    }

    /// Mark a logical file for deletion.
    pub fn with_deletion(mut self, logical_path: impl Into<String>) -> Self {
        self.records.push(ManifestRecord {
            logical_path: logical_path.into(),
            action: PackageAction::Delete,
        });
        self
    }

    /// Get the manifest this builder will write.
    pub fn manifest(&self) -> PackageManifest {
        PackageManifest {
            version: self.version,
            records: self.records.clone(),
        }
    }

    /// Write the package to the specified path.
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<PathBuf> {
        let manifest_text = self.manifest().to_text()?;

        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = File::create(path)?;
        let mut zip = ZipWriter::new(file);
        let options: FileOptions<()> =
            FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        zip.start_file(MANIFEST_ENTRY, options)?;
        zip.write_all(manifest_text.as_bytes())?;

        for (name, data) in &self.entries {
            zip.start_file(name.as_str(), options)?;
            zip.write_all(data)?;
        }

        zip.finish()?;

        Ok(path.to_path_buf())
    }
}
