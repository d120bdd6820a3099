pub mod json_store;
pub mod memory;
pub mod peers;

use anyhow::Result;
use std::path::PathBuf;

pub use json_store::{load_chain, save_chain, JsonFileStore};
pub use memory::{MemoryStore, StaticPeers};
pub use peers::{list_peers, PeersFile};

/// Source of the current peer set. Read fresh on every call, never cached.
pub trait PeerDirectory: Send + Sync {
    /// Peer hosts in directory order, either `host` or `host:port`.
    fn peers(&self) -> Result<Vec<String>>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} is not a valid chain file: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
