//! Networking half of the ledger: the JSON wire protocol, best-effort
//! gossip to peers, chain fetching, longest-chain resolution, the inbound
//! connection server and the mining workflow that ties them together.

pub mod constants;
pub mod error;
pub mod node;
pub mod resolver;
pub mod server;
pub mod state;
pub mod sync;
pub mod wire;

pub use error::{NodeError, SyncError, WireError};
pub use node::{MinedBlock, Node, NodeConfig, TxSubmission};
pub use resolver::{ChainSelection, ConflictResolver, Resolution};
pub use server::{Server, ServerConfig};
pub use state::{Admitted, BlockAdmission, BlockOrigin, LedgerEvent, SharedLedger};
pub use sync::{peer_address, BroadcastReport, SyncConfig, Synchronizer};
pub use wire::{Framing, Message};
