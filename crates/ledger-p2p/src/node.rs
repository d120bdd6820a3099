use crate::error::NodeError;
use crate::resolver::{ChainSelection, ConflictResolver, Resolution};
use crate::state::{LedgerEvent, SharedLedger};
use crate::sync::{BroadcastReport, Synchronizer};
use ledger_core::{
    constants::DEFAULT_DIFFICULTY,
    mine::{mine_parallel, mine_until, BlockTemplate, TipChangePolicy},
    Block, Transaction,
};
use ledger_storage::PeerDirectory;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub node_id: String,
    pub reward: f64,
    pub difficulty: u32,
    pub tip_change: TipChangePolicy,
    pub selection: ChainSelection,
    pub parallel_mining: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "node".to_string(),
            reward: 0.0,
            difficulty: DEFAULT_DIFFICULTY,
            tip_change: TipChangePolicy::Patch,
            selection: ChainSelection::Longest,
            parallel_mining: false,
        }
    }
}

#[derive(Debug)]
pub struct TxSubmission {
    /// False if an equal transaction was already pending locally.
    pub admitted: bool,
    pub broadcast: BroadcastReport,
}

#[derive(Debug)]
pub struct MinedBlock {
    pub block: Block,
    /// Peer whose longer chain replaced ours right after mining.
    pub adopted_from: Option<String>,
    /// `None` when the block was discarded by the adoption and not sent.
    pub broadcast: Option<BroadcastReport>,
}

/// Local operations of a node: submitting transactions and mining.
#[derive(Clone)]
pub struct Node {
    ledger: SharedLedger,
    sync: Synchronizer,
    resolver: ConflictResolver,
    peers: Arc<dyn PeerDirectory>,
    config: NodeConfig,
}

impl Node {
    pub fn new(
        ledger: SharedLedger,
        sync: Synchronizer,
        peers: Arc<dyn PeerDirectory>,
        config: NodeConfig,
    ) -> Self {
        let resolver = ConflictResolver::new(sync.clone(), config.selection, config.difficulty);
        Self {
            ledger,
            sync,
            resolver,
            peers,
            config,
        }
    }

    pub fn ledger(&self) -> &SharedLedger {
        &self.ledger
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn peers(&self) -> Result<Vec<String>, NodeError> {
        self.peers.peers().map_err(NodeError::Storage)
    }

    /// Pools `tx` locally and gossips it to every peer.
    pub async fn add_transaction(&self, tx: Transaction) -> Result<TxSubmission, NodeError> {
        let peers = self.peers()?;
        let admitted = self.ledger.admit_transaction(tx.clone());
        let broadcast = self.sync.broadcast_transaction(&tx, &peers).await;
        info!("[+] Transaction added.");
        Ok(TxSubmission {
            admitted,
            broadcast,
        })
    }

    /// Mines the pending pool into a block, appends it, reconciles with the
    /// peers and gossips the block if it survived reconciliation.
    pub async fn mine(&self) -> Result<MinedBlock, NodeError> {
        let block = loop {
            let (pending, tip) = self.ledger.mining_template();
            let template = BlockTemplate::new(
                &pending,
                &tip.hash,
                tip.index,
                &self.config.node_id,
                self.config.reward,
            );
            let Some(solved) = self.solve(template).await? else {
                info!("tip moved during mining, starting over");
                continue;
            };
            match self.ledger.append_mined(solved, self.config.tip_change).await? {
                Some(block) => break block,
                None => info!("tip moved during mining, starting over"),
            }
        };

        let peers = self.peers()?;
        let adopted_from = self.sync_with(&peers).await?;

        let broadcast = if self.ledger.holds(&block) {
            Some(self.sync.broadcast_block(&block, &peers).await)
        } else {
            warn!(index = block.index, "mined block was discarded in favour of a longer chain");
            None
        };
        info!("[✓] Block {} mined", block.index);
        Ok(MinedBlock {
            block,
            adopted_from,
            broadcast,
        })
    }

    /// Runs conflict resolution against every peer and adopts the winner.
    /// Returns the peer adopted from, if any.
    pub async fn sync_with_peers(&self) -> Result<Option<String>, NodeError> {
        let peers = self.peers()?;
        self.sync_with(&peers).await
    }

    async fn sync_with(&self, peers: &[String]) -> Result<Option<String>, NodeError> {
        let local = self.ledger.chain();
        match self.resolver.resolve(&local, peers).await {
            Resolution::Adopted { peer, chain } => {
                if self.ledger.replace_if_longer(chain).await? {
                    info!("[RESOLVE] Blockchain updated from {peer}");
                    Ok(Some(peer))
                } else {
                    Ok(None)
                }
            }
            Resolution::Kept => Ok(None),
        }
    }

    /// Proof-of-work search on the blocking pool. Under `Restart` any change
    /// of tip cancels the search and yields `None`.
    async fn solve(&self, template: BlockTemplate) -> Result<Option<Block>, NodeError> {
        let cancel = Arc::new(AtomicBool::new(false));
        let watcher = (self.config.tip_change == TipChangePolicy::Restart).then(|| {
            let mut events = self.ledger.subscribe();
            let cancel = Arc::clone(&cancel);
            tokio::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(LedgerEvent::BlockAppended { .. } | LedgerEvent::ChainReplaced { .. })
                        | Err(RecvError::Lagged(_)) => {
                            cancel.store(true, Ordering::Relaxed);
                            break;
                        }
                        Ok(LedgerEvent::TransactionAdmitted(_)) => continue,
                        Err(RecvError::Closed) => break,
                    }
                }
            })
        });

        let difficulty = self.config.difficulty;
        let parallel = self.config.parallel_mining;
        let search = Arc::clone(&cancel);
        let result = tokio::task::spawn_blocking(move || {
            if parallel {
                mine_parallel(&template, difficulty, &search)
            } else {
                mine_until(&template, difficulty, &search)
            }
        })
        .await;

        if let Some(watcher) = watcher {
            watcher.abort();
        }
        result.map_err(|e| NodeError::Mining(e.to_string()))
    }
}
