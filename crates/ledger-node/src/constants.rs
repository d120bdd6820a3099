pub(crate) const DEFAULT_CONFIG_PATH: &str = "config.json";
pub(crate) const DEFAULT_HOST: &str = "0.0.0.0";
pub(crate) const DEFAULT_BLOCKCHAIN_FILE: &str = "blockchain.json";
pub(crate) const DEFAULT_PEERS_FILE: &str = "peers.txt";
pub(crate) const DEFAULT_REWARD: f64 = 50.0;
pub(crate) const DEFAULT_TIMEOUT_MS: u64 = 5_000;
