use crate::StorageError;
use ledger_core::{chain::genesis_block, chain::ChainStore, Block};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Whole-chain JSON snapshot on disk: an array of block records.
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ChainStore for JsonFileStore {
    fn load(&self) -> anyhow::Result<Vec<Block>> {
        Ok(load_chain(&self.path)?)
    }

    fn save(&self, chain: &[Block]) -> anyhow::Result<()> {
        Ok(save_chain(&self.path, chain)?)
    }
}

/// Reads the chain file. A missing file, or one holding an empty array,
/// yields a genesis-only chain.
pub fn load_chain(path: &Path) -> Result<Vec<Block>, StorageError> {
    if !path.exists() {
        info!(path = %path.display(), "no chain file, starting from genesis");
        return Ok(vec![genesis_block()]);
    }
    let raw = std::fs::read(path).map_err(|source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let chain: Vec<Block> = serde_json::from_slice(&raw).map_err(|source| StorageError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;
    if chain.is_empty() {
        warn!(path = %path.display(), "chain file is empty, starting from genesis");
        return Ok(vec![genesis_block()]);
    }
    debug!(path = %path.display(), blocks = chain.len(), "chain loaded");
    Ok(chain)
}

/// Writes the chain as pretty JSON next to `path` and renames it into place,
/// so readers never observe a half-written file.
pub fn save_chain(path: &Path, chain: &[Block]) -> Result<(), StorageError> {
    let io_err = |source: std::io::Error| StorageError::Io {
        path: path.to_path_buf(),
        source,
    };
    let bytes = serde_json::to_vec_pretty(chain).map_err(|source| StorageError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(&bytes).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;

    debug!(path = %path.display(), blocks = chain.len(), "chain saved");
    Ok(())
}
