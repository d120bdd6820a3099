use crate::constants::{
    DEFAULT_BLOCKCHAIN_FILE, DEFAULT_HOST, DEFAULT_PEERS_FILE, DEFAULT_REWARD, DEFAULT_TIMEOUT_MS,
};
use anyhow::{Context, Result};
use ledger_core::{constants::DEFAULT_DIFFICULTY, mine::TipChangePolicy};
use ledger_p2p::{
    constants::DEFAULT_PORT, BlockAdmission, ChainSelection, Framing, NodeConfig, ServerConfig,
    SyncConfig,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Contents of the node's JSON config file. Every key is optional.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub difficulty: u32,
    pub reward: f64,
    pub node_id: String,
    pub blockchain_file: PathBuf,
    pub peers_file: PathBuf,

    pub framing: Framing,
    pub block_admission: BlockAdmission,
    pub fetch_on_reject: bool,
    pub chain_selection: ChainSelection,
    pub tip_change: TipChangePolicy,
    pub parallel_mining: bool,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub abort_broadcast_on_failure: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            difficulty: DEFAULT_DIFFICULTY,
            reward: DEFAULT_REWARD,
            node_id: "node".to_string(),
            blockchain_file: PathBuf::from(DEFAULT_BLOCKCHAIN_FILE),
            peers_file: PathBuf::from(DEFAULT_PEERS_FILE),
            framing: Framing::default(),
            block_admission: BlockAdmission::default(),
            fetch_on_reject: false,
            chain_selection: ChainSelection::default(),
            tip_change: TipChangePolicy::default(),
            parallel_mining: false,
            connect_timeout_ms: DEFAULT_TIMEOUT_MS,
            read_timeout_ms: DEFAULT_TIMEOUT_MS,
            abort_broadcast_on_failure: false,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            port: self.port,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            framing: self.framing,
            abort_on_failure: self.abort_broadcast_on_failure,
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            difficulty: self.difficulty,
            framing: self.framing,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            admission: self.block_admission,
            fetch_on_reject: self.fetch_on_reject,
            selection: self.chain_selection,
        }
    }

    pub fn node_config(&self) -> NodeConfig {
        NodeConfig {
            node_id: self.node_id.clone(),
            reward: self.reward,
            difficulty: self.difficulty,
            tip_change: self.tip_change,
            selection: self.chain_selection,
            parallel_mining: self.parallel_mining,
        }
    }
}
