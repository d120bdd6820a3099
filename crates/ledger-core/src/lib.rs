pub mod constants;
pub mod mine;
pub mod pool;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

pub use pool::TransactionPool;

/// A value transfer. Two transactions are the same transaction when all three
/// fields are equal; there is no id or sequence number.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub from: String,
    pub to: String,
    pub amount: f64,
}

impl Transaction {
    pub fn new(from: impl Into<String>, to: impl Into<String>, amount: f64) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            amount,
        }
    }

    fn hash_bytes(&self, out: &mut Vec<u8>) {
        put_str(out, &self.from);
        put_str(out, &self.to);
        out.extend_from_slice(&self.amount.to_le_bytes());
    }
}

/// A block as it travels on the wire and sits in the chain file.
///
/// `hash` is carried along but never trusted: [`Block::compute_hash`] is the
/// source of truth and [`Block::has_valid_hash`] compares the two.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Block {
    pub index: u64,
    pub timestamp: u64,
    pub transactions: Vec<Transaction>,
    #[serde(rename = "prev_hash")]
    pub previous_hash: String,
    pub hash: String,
    pub nonce: u64,
    pub miner: String,
    pub reward: f64,
}

impl Block {
    /// Canonical byte encoding of every hashed field. Strings are length
    /// prefixed so that field boundaries cannot shift between blocks.
    /// `hash` and `reward` are not part of it.
    pub fn hash_bytes(&self) -> Vec<u8> {
        let (mut bytes, suffix) = self.hash_parts();
        bytes.extend_from_slice(&self.nonce.to_le_bytes());
        bytes.extend_from_slice(&suffix);
        bytes
    }

    /// The bytes hashed before and after the nonce. The miner hashes the
    /// prefix once and only feeds nonce and suffix per attempt.
    pub fn hash_parts(&self) -> (Vec<u8>, Vec<u8>) {
        let mut prefix = Vec::with_capacity(128 + self.transactions.len() * 48);
        prefix.extend_from_slice(&self.index.to_le_bytes());
        prefix.extend_from_slice(&self.timestamp.to_le_bytes());
        prefix.extend_from_slice(&(self.transactions.len() as u64).to_le_bytes());
        for tx in &self.transactions {
            tx.hash_bytes(&mut prefix);
        }
        put_str(&mut prefix, &self.previous_hash);

        let mut suffix = Vec::with_capacity(8 + self.miner.len());
        put_str(&mut suffix, &self.miner);
        (prefix, suffix)
    }

    /// Lowercase hex SHA-256 over [`Block::hash_bytes`].
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.hash_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn has_valid_hash(&self) -> bool {
        self.hash == self.compute_hash()
    }

    /// Serialize into the `BlockRecord` JSON shape.
    pub fn to_record(&self) -> serde_json::Value {
        serde_json::json!({
            "index": self.index,
            "timestamp": self.timestamp,
            "transactions": self.transactions,
            "prev_hash": self.previous_hash,
            "hash": self.hash,
            "nonce": self.nonce,
            "miner": self.miner,
            "reward": self.reward,
        })
    }

    /// Deserialize a `BlockRecord`. The hash is taken as-is; call
    /// [`Block::has_valid_hash`] to check it.
    pub fn from_record(record: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(record)
    }

    /// Checks that `self` may be appended directly after `tip`.
    pub fn validate_next(&self, tip: &Block, difficulty: u32) -> Result<(), BlockRejection> {
        if self.previous_hash != tip.hash {
            return Err(BlockRejection::PreviousHashMismatch {
                expected: tip.hash.clone(),
                found: self.previous_hash.clone(),
            });
        }
        if self.index != tip.index + 1 {
            return Err(BlockRejection::IndexMismatch {
                expected: tip.index + 1,
                found: self.index,
            });
        }
        if !pow::meets_difficulty(&self.hash, difficulty) {
            return Err(BlockRejection::InsufficientWork {
                hash: self.hash.clone(),
                difficulty,
            });
        }
        let computed = self.compute_hash();
        if computed != self.hash {
            return Err(BlockRejection::HashMismatch {
                claimed: self.hash.clone(),
                computed,
            });
        }
        Ok(())
    }
}

/// Why a block was refused admission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlockRejection {
    #[error("previous hash {found} does not match tip {expected}")]
    PreviousHashMismatch { expected: String, found: String },
    #[error("index {found} does not follow tip, expected {expected}")]
    IndexMismatch { expected: u64, found: u64 },
    #[error("hash {hash} does not meet difficulty {difficulty}")]
    InsufficientWork { hash: String, difficulty: u32 },
    #[error("claimed hash {claimed} but content hashes to {computed}")]
    HashMismatch { claimed: String, computed: String },
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u64).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

/// Seconds since the unix epoch; zero if the clock is before it.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Net amount received by `id` across every transaction in `chain`.
/// Mining rewards are informational and not credited.
pub fn balance_of(chain: &[Block], id: &str) -> f64 {
    let mut balance = 0.0;
    for tx in chain.iter().flat_map(|b| b.transactions.iter()) {
        if tx.to == id {
            balance += tx.amount;
        }
        if tx.from == id {
            balance -= tx.amount;
        }
    }
    balance
}

pub mod pow {
    /// True iff `hash` starts with `difficulty` `'0'` hex characters.
    pub fn meets_difficulty(hash: &str, difficulty: u32) -> bool {
        let difficulty = difficulty as usize;
        hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
    }

    /// [`meets_difficulty`] on the raw digest, before hex encoding.
    pub fn digest_meets_difficulty(digest: &[u8], difficulty: u32) -> bool {
        let full = (difficulty / 2) as usize;
        if digest.len() * 2 < difficulty as usize {
            return false;
        }
        if digest[..full].iter().any(|b| *b != 0) {
            return false;
        }
        difficulty % 2 == 0 || digest[full] < 0x10
    }

    pub fn leading_zero_hex(hash: &str) -> u32 {
        hash.bytes().take_while(|b| *b == b'0').count() as u32
    }
}

pub mod chain {
    use super::*;
    use crate::constants::{GENESIS_MINER, GENESIS_PREV_HASH, GENESIS_TIMESTAMP};
    use anyhow::Result;

    /// Persistence seam for whole-chain snapshots.
    /// This lives in `ledger-core` to avoid a circular dependency.
    pub trait ChainStore: Send + Sync {
        /// Load the persisted chain, or a genesis-only chain if none exists.
        fn load(&self) -> Result<Vec<Block>>;
        /// Replace the persisted chain with `chain`.
        fn save(&self, chain: &[Block]) -> Result<()>;
    }

    /// The fixed first block. Every node derives the same one.
    pub fn genesis_block() -> Block {
        let mut block = Block {
            index: 0,
            timestamp: GENESIS_TIMESTAMP,
            transactions: vec![],
            previous_hash: GENESIS_PREV_HASH.to_string(),
            hash: String::new(),
            nonce: 0,
            miner: GENESIS_MINER.to_string(),
            reward: 0.0,
        };
        block.hash = block.compute_hash();
        block
    }

    /// Every adjacent pair is hash-linked. Proof-of-work is not re-checked.
    pub fn is_chain_consistent(chain: &[Block]) -> bool {
        chain
            .windows(2)
            .all(|pair| pair[1].previous_hash == pair[0].hash)
    }

    /// Stricter check used before adopting a foreign chain: linked, indexed
    /// by position, every hash recomputes, every non-genesis block carries
    /// the required work, and the genesis matches ours.
    pub fn is_chain_valid(chain: &[Block], difficulty: u32) -> bool {
        let Some(first) = chain.first() else {
            return false;
        };
        if *first != genesis_block() || !is_chain_consistent(chain) {
            return false;
        }
        if chain.iter().enumerate().any(|(i, b)| b.index != i as u64) {
            return false;
        }
        chain.iter().skip(1).all(|b| {
            b.has_valid_hash() && pow::meets_difficulty(&b.hash, difficulty)
        })
    }

    /// One line per block: index, shortened hash and transaction count.
    pub fn summarize(chain: &[Block]) -> Vec<String> {
        chain
            .iter()
            .map(|b| {
                let short = &b.hash[..b.hash.len().min(10)];
                format!("Index: {}, Hash: {short}..., Tx: {}", b.index, b.transactions.len())
            })
            .collect()
    }
}
