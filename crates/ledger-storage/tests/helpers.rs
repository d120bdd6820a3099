use ledger_core::{chain::genesis_block, mine::mine, Block, Transaction};
use ledger_storage::JsonFileStore;
use rand::Rng;
use tempfile::{tempdir, TempDir};

pub fn create_temp_store() -> (TempDir, JsonFileStore) {
    // The chain file lives inside a fresh temporary directory
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let store = JsonFileStore::new(temp_dir.path().join("blockchain.json"));
    (temp_dir, store)
}

pub fn random_transactions(n: usize) -> Vec<Transaction> {
    let mut rng = rand::thread_rng();
    (0..n)
        .map(|i| Transaction::new(format!("user{i}"), format!("user{}", i + 1), rng.gen_range(1..1000) as f64))
        .collect()
}

/// Genesis followed by `len - 1` mined blocks at difficulty 1.
pub fn build_chain(len: usize) -> Vec<Block> {
    let mut chain = vec![genesis_block()];
    while chain.len() < len {
        let tip = chain.last().expect("chain is never empty");
        let block = mine(&random_transactions(3), &tip.hash, tip.index, "test-node", 50.0, 1);
        chain.push(block);
    }
    chain
}
