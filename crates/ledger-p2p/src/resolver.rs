use crate::sync::Synchronizer;
use ledger_core::{chain::is_chain_valid, Block};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Which foreign chains are eligible to replace ours.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainSelection {
    /// Length alone decides.
    #[default]
    Longest,
    /// The candidate must also start from our genesis, be hash-linked, and
    /// every block must rehash to its own hash with the required work.
    Validated,
}

#[derive(Debug, PartialEq)]
pub enum Resolution {
    Kept,
    Adopted { peer: String, chain: Vec<Block> },
}

impl Resolution {
    pub fn is_adopted(&self) -> bool {
        matches!(self, Resolution::Adopted { .. })
    }
}

/// Longest-chain rule over already-fetched candidates. The first strictly
/// longer eligible chain wins; ties go to whatever was seen first, starting
/// with the local chain.
pub fn select_longest<I>(local_len: usize, candidates: I, eligible: impl Fn(&[Block]) -> bool) -> Resolution
where
    I: IntoIterator<Item = (String, Vec<Block>)>,
{
    let mut best_len = local_len;
    let mut best = Resolution::Kept;
    for (peer, chain) in candidates {
        if chain.len() <= best_len {
            continue;
        }
        if !eligible(&chain) {
            debug!(peer = %peer, blocks = chain.len(), "longer chain failed validation");
            continue;
        }
        best_len = chain.len();
        best = Resolution::Adopted { peer, chain };
    }
    best
}

#[derive(Clone, Debug)]
pub struct ConflictResolver {
    sync: Synchronizer,
    selection: ChainSelection,
    difficulty: u32,
}

impl ConflictResolver {
    pub fn new(sync: Synchronizer, selection: ChainSelection, difficulty: u32) -> Self {
        Self {
            sync,
            selection,
            difficulty,
        }
    }

    pub fn eligible(&self, chain: &[Block]) -> bool {
        match self.selection {
            ChainSelection::Longest => true,
            ChainSelection::Validated => is_chain_valid(chain, self.difficulty),
        }
    }

    /// Asks every peer for its chain, in order, and picks the longest.
    /// Unreachable peers and empty answers are skipped.
    pub async fn resolve(&self, local: &[Block], peers: &[String]) -> Resolution {
        let mut candidates = Vec::with_capacity(peers.len());
        for peer in peers {
            let chain = self.sync.fetch_chain(peer).await;
            if chain.is_empty() {
                continue;
            }
            candidates.push((peer.clone(), chain));
        }
        let resolution = select_longest(local.len(), candidates, |c| self.eligible(c));
        if let Resolution::Adopted { peer, chain } = &resolution {
            info!("[RESOLVE] longer chain found at peer {peer} ({} blocks)", chain.len());
        }
        resolution
    }
}
