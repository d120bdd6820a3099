pub const HASH_SIZE: usize = 32;
pub const HASH_HEX_SIZE: usize = HASH_SIZE * 2;
pub const GENESIS_PREV_HASH: &str = "0";
pub const GENESIS_TIMESTAMP: u64 = 1_700_000_000;
pub const GENESIS_MINER: &str = "genesis";
pub const DEFAULT_DIFFICULTY: u32 = 4;
/// Nonces tried between two looks at the cancel flag.
pub const CANCEL_CHECK_INTERVAL: u64 = 4096;
