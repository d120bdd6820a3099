use crate::constants::EVENT_CAPACITY;
use crate::error::NodeError;
use ledger_core::{
    chain::{genesis_block, ChainStore},
    mine::{relink, TipChangePolicy},
    Block, BlockRejection, Transaction, TransactionPool,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// What the connection server does with a block that does not fit the tip.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockAdmission {
    /// Refuse it and log why.
    #[default]
    Reject,
    /// Rewrite its `prev_hash` and `index` to follow the local tip and append
    /// it anyway. The stored hash is left untouched, so the chain stays
    /// linked but the block no longer hashes to its own `hash`.
    Coerce,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockOrigin {
    Mined,
    Remote,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LedgerEvent {
    BlockAppended {
        index: u64,
        hash: String,
        origin: BlockOrigin,
    },
    ChainReplaced {
        length: usize,
        tip_hash: String,
    },
    TransactionAdmitted(Transaction),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Admitted {
    Appended,
    Coerced(BlockRejection),
    Rejected(BlockRejection),
}

#[derive(Debug)]
struct Ledger {
    chain: Vec<Block>,
    pool: TransactionPool,
    /// Bumped on every chain change; orders the snapshots handed to the store.
    generation: u64,
}

impl Ledger {
    fn tip(&self) -> Block {
        self.chain.last().cloned().unwrap_or_else(genesis_block)
    }

    fn snapshot(&mut self) -> Snapshot {
        self.generation += 1;
        Snapshot {
            generation: self.generation,
            chain: self.chain.clone(),
        }
    }
}

struct Snapshot {
    generation: u64,
    chain: Vec<Block>,
}

/// The node's chain and transaction pool behind a single lock. Every read
/// and write of either goes through here.
///
/// Saving happens after the lock is released, on the blocking pool. Saves
/// are serialized and a snapshot older than the one already on disk is
/// skipped, so the chain file always matches some state the node really
/// held and never goes backwards.
#[derive(Clone)]
pub struct SharedLedger {
    inner: Arc<Mutex<Ledger>>,
    store: Arc<dyn ChainStore>,
    /// Generation of the last snapshot written to the store.
    saved: Arc<tokio::sync::Mutex<u64>>,
    events: broadcast::Sender<LedgerEvent>,
}

impl SharedLedger {
    /// Starts from `chain`, or from genesis if it is empty.
    pub fn new(chain: Vec<Block>, store: Arc<dyn ChainStore>) -> Self {
        let chain = if chain.is_empty() {
            vec![genesis_block()]
        } else {
            chain
        };
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(Ledger {
                chain,
                pool: TransactionPool::new(),
                generation: 0,
            })),
            store,
            saved: Arc::new(tokio::sync::Mutex::new(0)),
            events,
        }
    }

    /// Starts from whatever `store` holds.
    pub fn open(store: Arc<dyn ChainStore>) -> Result<Self, NodeError> {
        let chain = store.load().map_err(NodeError::Storage)?;
        info!(blocks = chain.len(), "chain loaded");
        Ok(Self::new(chain, store))
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: LedgerEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    async fn persist(&self, snapshot: Snapshot) -> Result<(), NodeError> {
        let mut saved = self.saved.lock().await;
        if *saved >= snapshot.generation {
            return Ok(());
        }
        let store = Arc::clone(&self.store);
        let Snapshot { generation, chain } = snapshot;
        tokio::task::spawn_blocking(move || store.save(&chain))
            .await
            .map_err(|e| NodeError::Storage(anyhow::Error::new(e)))?
            .map_err(NodeError::Storage)?;
        *saved = generation;
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }

    pub fn chain(&self) -> Vec<Block> {
        self.lock().chain.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().chain.is_empty()
    }

    pub fn tip(&self) -> Block {
        self.lock().tip()
    }

    pub fn pending(&self) -> Vec<Transaction> {
        self.lock().pool.pending().to_vec()
    }

    /// True if `block` is part of the current chain.
    pub fn holds(&self, block: &Block) -> bool {
        self.lock().chain.iter().rev().any(|b| b.hash == block.hash)
    }

    /// Pending transactions and the tip to build on, read atomically.
    pub fn mining_template(&self) -> (Vec<Transaction>, Block) {
        let ledger = self.lock();
        (ledger.pool.pending().to_vec(), ledger.tip())
    }

    /// Adds `tx` to the pool unless an equal one is already pending.
    pub fn admit_transaction(&self, tx: Transaction) -> bool {
        let admitted = self.lock().pool.admit(tx.clone());
        if admitted {
            self.emit(LedgerEvent::TransactionAdmitted(tx));
        }
        admitted
    }

    /// Admission of a block received from a peer.
    pub async fn admit_block(
        &self,
        mut block: Block,
        difficulty: u32,
        policy: BlockAdmission,
    ) -> Result<Admitted, NodeError> {
        let (outcome, event, snapshot) = {
            let mut ledger = self.lock();
            let tip = ledger.tip();
            let outcome = match block.validate_next(&tip, difficulty) {
                Ok(()) => Admitted::Appended,
                Err(reason) => match policy {
                    BlockAdmission::Reject => return Ok(Admitted::Rejected(reason)),
                    BlockAdmission::Coerce => {
                        block.previous_hash = tip.hash.clone();
                        block.index = tip.index + 1;
                        Admitted::Coerced(reason)
                    }
                },
            };
            let event = LedgerEvent::BlockAppended {
                index: block.index,
                hash: block.hash.clone(),
                origin: BlockOrigin::Remote,
            };
            ledger.chain.push(block);
            (outcome, event, ledger.snapshot())
        };
        self.emit(event);
        self.persist(snapshot).await.map(|()| outcome)
    }

    /// Appends a block this node mined, empties the pool and persists.
    ///
    /// If the tip moved since the block's template was taken, `Patch` relinks
    /// it onto the new tip and `Restart` hands back `None` without touching
    /// anything.
    pub async fn append_mined(
        &self,
        mut block: Block,
        policy: TipChangePolicy,
    ) -> Result<Option<Block>, NodeError> {
        let snapshot = {
            let mut ledger = self.lock();
            let tip = ledger.tip();
            if block.previous_hash != tip.hash || block.index != tip.index + 1 {
                match policy {
                    TipChangePolicy::Restart => return Ok(None),
                    TipChangePolicy::Patch => {
                        warn!(
                            index = tip.index + 1,
                            "chain moved during mining, relinking block onto the new tip"
                        );
                        relink(&mut block, &tip);
                    }
                }
            }
            ledger.chain.push(block.clone());
            ledger.pool.drain();
            ledger.snapshot()
        };
        self.emit(LedgerEvent::BlockAppended {
            index: block.index,
            hash: block.hash.clone(),
            origin: BlockOrigin::Mined,
        });
        self.persist(snapshot).await.map(|()| Some(block))
    }

    /// Swaps in `candidate` only if it is strictly longer than the chain held
    /// right now.
    pub async fn replace_if_longer(&self, candidate: Vec<Block>) -> Result<bool, NodeError> {
        let (event, snapshot) = {
            let mut ledger = self.lock();
            if candidate.len() <= ledger.chain.len() {
                return Ok(false);
            }
            ledger.chain = candidate;
            let event = LedgerEvent::ChainReplaced {
                length: ledger.chain.len(),
                tip_hash: ledger.chain.last().map(|b| b.hash.clone()).unwrap_or_default(),
            };
            (event, ledger.snapshot())
        };
        self.emit(event);
        self.persist(snapshot).await.map(|()| true)
    }
}
