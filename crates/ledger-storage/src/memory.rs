use crate::PeerDirectory;
use ledger_core::{chain::genesis_block, chain::ChainStore, Block};
use std::sync::{Mutex, PoisonError};

/// Keeps the last saved chain in memory. Used where no file is wanted.
#[derive(Debug, Default)]
pub struct MemoryStore {
    saved: Mutex<Option<Vec<Block>>>,
    saves: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last chain handed to `save`, if any.
    pub fn snapshot(&self) -> Option<Vec<Block>> {
        self.saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ChainStore for MemoryStore {
    fn load(&self) -> anyhow::Result<Vec<Block>> {
        Ok(self.snapshot().unwrap_or_else(|| vec![genesis_block()]))
    }

    fn save(&self, chain: &[Block]) -> anyhow::Result<()> {
        *self.saved.lock().unwrap_or_else(PoisonError::into_inner) = Some(chain.to_vec());
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }
}

/// A fixed peer list.
#[derive(Clone, Debug, Default)]
pub struct StaticPeers(pub Vec<String>);

impl PeerDirectory for StaticPeers {
    fn peers(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.0.clone())
    }
}
