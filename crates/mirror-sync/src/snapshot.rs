//! Version-controlled snapshots of the mirrored asset tree.

use crate::{Error, Result};
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Records and publishes the state of a working tree.
pub trait SnapshotStore {
    /// Stage everything below `path`, relative to the store root.
    fn stage_subtree(&mut self, path: &Path) -> Result<()>;
    fn commit(&mut self, message: &str) -> Result<()>;
    fn push_to_remote(&mut self) -> Result<()>;
}

/// Snapshot store backed by the `git` executable.
#[derive(Debug, Clone)]
pub struct GitSnapshotStore {
    repo: PathBuf,
    remote: String,
}

impl GitSnapshotStore {
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self {
            repo: repo.into(),
            remote: "origin".to_string(),
        }
    }

    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = remote.into();
        self
    }

    pub fn repo(&self) -> &Path {
        &self.repo
    }

    fn git(&self, args: &[&str]) -> Result<String> {
        debug!("git -C {} {}", self.repo.display(), args.join(" "));
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.repo)
            .args(args)
            .output()
            .map_err(|e| Error::Snapshot(format!("failed to run git: {}", e)))?;
        if !output.status.success() {
            return Err(Error::Snapshot(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl SnapshotStore for GitSnapshotStore {
    fn stage_subtree(&mut self, path: &Path) -> Result<()> {
        let path = path.to_string_lossy();
        self.git(&["add", "--all", "--", &*path])?;
        Ok(())
    }

    fn commit(&mut self, message: &str) -> Result<()> {
        self.git(&["commit", "-m", message])?;
        info!("Committed snapshot: {}", message);
        Ok(())
    }

    fn push_to_remote(&mut self) -> Result<()> {
        self.git(&["push", self.remote.as_str()])?;
        info!("Pushed snapshot to {}", self.remote);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_repository_is_snapshot_error() {
        let mut store = GitSnapshotStore::new("/nonexistent/asset-mirror-repo");
        let err = store.commit("[en-US] GAME: 1").unwrap_err();
        assert!(matches!(err, Error::Snapshot(_)));
    }
}
