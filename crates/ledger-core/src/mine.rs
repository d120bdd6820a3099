use crate::{
    constants::CANCEL_CHECK_INTERVAL, now_secs, pow::digest_meets_difficulty, Block, Transaction,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// What to do when the chain tip moved while a block was being mined.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TipChangePolicy {
    /// Relink the solved block onto the new tip and rehash it under the same
    /// nonce. The result may no longer meet the difficulty target.
    #[default]
    Patch,
    /// Drop the solution and search again on top of the new tip.
    Restart,
}

/// Everything a candidate block needs except the nonce.
#[derive(Clone, Debug)]
pub struct BlockTemplate {
    pub index: u64,
    pub timestamp: u64,
    pub transactions: Vec<Transaction>,
    pub previous_hash: String,
    pub miner: String,
    pub reward: f64,
}

impl BlockTemplate {
    /// A template extending the tip `(tip_hash, tip_index)`, stamped now.
    pub fn new(
        pending: &[Transaction],
        tip_hash: &str,
        tip_index: u64,
        miner: &str,
        reward: f64,
    ) -> Self {
        Self {
            index: tip_index + 1,
            timestamp: now_secs(),
            transactions: pending.to_vec(),
            previous_hash: tip_hash.to_string(),
            miner: miner.to_string(),
            reward,
        }
    }

    fn candidate(&self, nonce: u64) -> Block {
        Block {
            index: self.index,
            timestamp: self.timestamp,
            transactions: self.transactions.clone(),
            previous_hash: self.previous_hash.clone(),
            hash: String::new(),
            nonce,
            miner: self.miner.clone(),
            reward: self.reward,
        }
    }
}

/// Hashes one template under varying nonces without re-encoding the rest.
struct NonceHasher {
    base: Sha256,
    suffix: Vec<u8>,
}

impl NonceHasher {
    fn new(block: &Block) -> Self {
        let (prefix, suffix) = block.hash_parts();
        let mut base = Sha256::new();
        base.update(prefix);
        Self { base, suffix }
    }

    fn digest(&self, nonce: u64) -> [u8; 32] {
        let mut hasher = self.base.clone();
        hasher.update(nonce.to_le_bytes());
        hasher.update(&self.suffix);
        hasher.finalize().into()
    }
}

/// Mine a block extending `(tip_hash, tip_index)` on the calling thread,
/// trying nonces 0, 1, 2, ... until the hash meets `difficulty`.
pub fn mine(
    pending: &[Transaction],
    tip_hash: &str,
    tip_index: u64,
    miner: &str,
    reward: f64,
    difficulty: u32,
) -> Block {
    let template = BlockTemplate::new(pending, tip_hash, tip_index, miner, reward);
    let never = AtomicBool::new(false);
    loop {
        if let Some(block) = mine_until(&template, difficulty, &never) {
            return block;
        }
    }
}

/// Sequential search that gives up with `None` once `cancel` is raised.
/// The flag is polled every [`CANCEL_CHECK_INTERVAL`] nonces.
pub fn mine_until(template: &BlockTemplate, difficulty: u32, cancel: &AtomicBool) -> Option<Block> {
    let mut block = template.candidate(0);
    let hasher = NonceHasher::new(&block);
    let mut nonce = 0u64;
    loop {
        if nonce % CANCEL_CHECK_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
            debug!(index = template.index, nonce, "mining cancelled");
            return None;
        }
        let digest = hasher.digest(nonce);
        if digest_meets_difficulty(&digest, difficulty) {
            block.nonce = nonce;
            block.hash = hex::encode(digest);
            info!(
                "Mined block {} with nonce {} and hash {}",
                block.index, nonce, block.hash
            );
            return Some(block);
        }
        nonce = nonce.wrapping_add(1);
    }
}

/// Searches nonces in parallel until a hash meets `difficulty` or `cancel`
/// is raised. The winning nonce is not necessarily the smallest one.
pub fn mine_parallel(
    template: &BlockTemplate,
    difficulty: u32,
    cancel: &AtomicBool,
) -> Option<Block> {
    let mut block = template.candidate(0);
    let hasher = NonceHasher::new(&block);

    // Rayon will split this range across threads.
    let found = (0u64..u64::MAX).into_par_iter().find_any(|nonce| {
        cancel.load(Ordering::Relaxed) || digest_meets_difficulty(&hasher.digest(*nonce), difficulty)
    })?;
    if !digest_meets_difficulty(&hasher.digest(found), difficulty) {
        debug!(index = template.index, "parallel mining cancelled");
        return None;
    }

    block.nonce = found;
    block.hash = hex::encode(hasher.digest(found));
    info!(
        "Mined block {} with nonce {} and hash {}",
        block.index, found, block.hash
    );
    Some(block)
}

/// Moves `block` onto `tip` if it was built on something else, keeping its
/// nonce and recomputing its hash. Returns whether anything changed.
pub fn relink(block: &mut Block, tip: &Block) -> bool {
    if block.previous_hash == tip.hash && block.index == tip.index + 1 {
        return false;
    }
    block.previous_hash = tip.hash.clone();
    block.index = tip.index + 1;
    block.hash = block.compute_hash();
    true
}
