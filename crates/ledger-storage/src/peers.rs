use crate::{PeerDirectory, StorageError};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Newline-delimited peer list, re-read on every lookup.
#[derive(Clone, Debug)]
pub struct PeersFile {
    path: PathBuf,
}

impl PeersFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl PeerDirectory for PeersFile {
    fn peers(&self) -> anyhow::Result<Vec<String>> {
        Ok(list_peers(&self.path)?)
    }
}

/// Trimmed, non-empty lines of the peers file in file order. A missing file
/// is not an error: it means there are no peers.
pub fn list_peers(path: &Path) -> Result<Vec<String>, StorageError> {
    if !path.exists() {
        warn!(path = %path.display(), "no peers file found");
        return Ok(vec![]);
    }
    let raw = std::fs::read_to_string(path).map_err(|source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}
