//! Per-version record of the files an update touched.

use crate::settings::write_atomic;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// How a logical path changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    #[serde(rename = "N")]
    New,
    #[serde(rename = "C")]
    Changed,
    #[serde(rename = "D")]
    Deleted,
}

/// Changes keyed by logical path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeLedger {
    entries: BTreeMap<String, ChangeKind>,
}

impl ChangeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a change; a later record for the same path wins.
    pub fn record(&mut self, logical_path: impl Into<String>, kind: ChangeKind) {
        self.entries.insert(logical_path.into(), kind);
    }

    pub fn get(&self, logical_path: &str) -> Option<ChangeKind> {
        self.entries.get(logical_path).copied()
    }

    /// Fold in the changes of a later package.
    pub fn extend(&mut self, other: ChangeLedger) {
        self.entries.extend(other.entries);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ChangeKind)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// Directory of ledger files named `<version>.json`.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    dir: PathBuf,
}

impl LedgerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, version: u64) -> PathBuf {
        self.dir.join(format!("{}.json", version))
    }

    /// Persist the ledger of `version`, replacing any earlier file.
    pub fn write(&self, version: u64, ledger: &ChangeLedger) -> Result<PathBuf> {
        let mut buf = Vec::new();
        let mut ser =
            serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
        ledger.serialize(&mut ser)?;

        let path = self.path_for(version);
        write_atomic(&path, &buf)?;
        log::info!("Recorded {} changes in {}", ledger.len(), path.display());
        Ok(path)
    }

    pub fn read(&self, version: u64) -> Result<ChangeLedger> {
        let text = fs::read_to_string(self.path_for(version))?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_ledger_file_format() {
        let temp = TempDir::new().unwrap();
        let store = LedgerStore::new(temp.path().join("_update"));

        let mut ledger = ChangeLedger::new();
        ledger.record("c/d.png", ChangeKind::Deleted);
        ledger.record("a/b.png", ChangeKind::New);

        let path = store.write(5, &ledger).unwrap();
        assert_eq!(path, temp.path().join("_update/5.json"));
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "{\n    \"a/b.png\": \"N\",\n    \"c/d.png\": \"D\"\n}"
        );
        assert_eq!(store.read(5).unwrap(), ledger);
    }

    #[test]
    fn test_later_record_wins() {
        let mut first = ChangeLedger::new();
        first.record("x", ChangeKind::New);
        let mut second = ChangeLedger::new();
        second.record("x", ChangeKind::Changed);
        first.extend(second);
        assert_eq!(first.get("x"), Some(ChangeKind::Changed));
        assert_eq!(first.len(), 1);
    }
}
