use crate::constants::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_PORT, DEFAULT_READ_TIMEOUT};
use crate::error::{SyncError, WireError};
use crate::wire::{read_frame, write_frame, Framing, Message};
use ledger_core::{Block, Transaction};
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Port used for every peer entry that does not name its own.
    pub port: u16,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub framing: Framing,
    /// Stop sending the rest of a broadcast as soon as one peer fails.
    pub abort_on_failure: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            framing: Framing::Raw,
            abort_on_failure: false,
        }
    }
}

/// Turns a peer entry into something `connect` understands. Bare hosts get
/// the shared `port`; `host:port` and socket addresses are kept as they are.
pub fn peer_address(peer: &str, port: u16) -> String {
    if let Ok(addr) = peer.parse::<SocketAddr>() {
        return addr.to_string();
    }
    if let Ok(ip) = peer.parse::<IpAddr>() {
        return SocketAddr::new(ip, port).to_string();
    }
    match peer.rsplit_once(':') {
        Some((host, p)) if !host.is_empty() && p.parse::<u16>().is_ok() => peer.to_string(),
        _ => format!("{peer}:{port}"),
    }
}

/// Per-peer outcome of one broadcast, in peer-list order.
#[derive(Debug, Default)]
pub struct BroadcastReport {
    pub delivered: Vec<String>,
    pub failed: Vec<(String, SyncError)>,
}

impl BroadcastReport {
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }
}

/// Outbound half of the protocol. Every exchange opens a fresh connection
/// and closes it when done.
#[derive(Clone, Debug)]
pub struct Synchronizer {
    config: SyncConfig,
}

impl Synchronizer {
    pub fn new(config: SyncConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub async fn broadcast_block(&self, block: &Block, peers: &[String]) -> BroadcastReport {
        debug!(index = block.index, peers = peers.len(), "broadcasting block");
        self.broadcast(&Message::Block(block.clone()), peers).await
    }

    pub async fn broadcast_transaction(&self, tx: &Transaction, peers: &[String]) -> BroadcastReport {
        debug!(peers = peers.len(), "broadcasting transaction");
        self.broadcast(&Message::Tx(tx.clone()), peers).await
    }

    /// Best-effort send of `message` to every peer at once. Failures are
    /// logged and reported, never returned as an error.
    pub async fn broadcast(&self, message: &Message, peers: &[String]) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let payload = match message.to_bytes() {
            Ok(bytes) => Arc::new(bytes),
            Err(e) => {
                warn!(error = %e, "could not encode {}", message.kind());
                report.failed = peers
                    .iter()
                    .map(|p| (p.clone(), SyncError::Encode(e.to_string())))
                    .collect();
                return report;
            }
        };

        let mut tasks = JoinSet::new();
        for (i, peer) in peers.iter().enumerate() {
            let payload = Arc::clone(&payload);
            let peer = peer.clone();
            let config = self.config.clone();
            tasks.spawn(async move {
                let result = send_one(&peer, &payload, &config).await;
                (i, peer, result)
            });
        }

        let mut outcomes: BTreeMap<usize, (String, Result<(), SyncError>)> = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            let Ok((i, peer, result)) = joined else {
                // aborted below
                continue;
            };
            if let Err(e) = &result {
                warn!(peer = %peer, error = %e, "[BROADCAST] send failed");
                if self.config.abort_on_failure {
                    tasks.abort_all();
                }
            }
            outcomes.insert(i, (peer, result));
        }

        for (i, peer) in peers.iter().enumerate() {
            match outcomes.remove(&i) {
                Some((peer, Ok(()))) => report.delivered.push(peer),
                Some((peer, Err(e))) => report.failed.push((peer, e)),
                None => report.failed.push((
                    peer.clone(),
                    SyncError::Cancelled { peer: peer.clone() },
                )),
            }
        }
        info!(
            "{} delivered to {}/{} peers",
            message.kind(),
            report.delivered.len(),
            peers.len()
        );
        report
    }

    /// The peer's full chain, or an empty one if anything goes wrong.
    pub async fn fetch_chain(&self, peer: &str) -> Vec<Block> {
        match self.try_fetch_chain(peer).await {
            Ok(chain) => chain,
            Err(e) => {
                warn!(peer = %peer, error = %e, "[RESOLVE] could not fetch chain");
                vec![]
            }
        }
    }

    pub async fn try_fetch_chain(&self, peer: &str) -> Result<Vec<Block>, SyncError> {
        let mut stream = connect(peer, &self.config).await?;
        let request = Message::GetChain
            .to_bytes()
            .map_err(|e| SyncError::Encode(e.to_string()))?;
        write_frame(&mut stream, &request, self.config.framing)
            .await
            .map_err(|e| SyncError::from_wire(peer, e))?;
        // half-close so readers that wait for EOF see the end of the request
        let _ = stream.shutdown().await;

        let frame = timeout(self.config.read_timeout, read_frame(&mut stream, self.config.framing))
            .await
            .map_err(|_| SyncError::from_wire(peer, WireError::TimedOut(self.config.read_timeout)))?
            .map_err(|e| SyncError::from_wire(peer, e))?;

        match Message::parse(&frame).map_err(|e| SyncError::from_wire(peer, e))? {
            Some(Message::Chain(chain)) => {
                debug!(peer = %peer, blocks = chain.len(), "chain fetched");
                Ok(chain)
            }
            Some(other) => Err(SyncError::UnexpectedReply {
                peer: peer.to_string(),
                kind: other.kind().to_string(),
            }),
            None => Err(SyncError::UnexpectedReply {
                peer: peer.to_string(),
                kind: "an untyped message".to_string(),
            }),
        }
    }
}

async fn connect(peer: &str, config: &SyncConfig) -> Result<TcpStream, SyncError> {
    let addr = peer_address(peer, config.port);
    match timeout(config.connect_timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(SyncError::Unreachable {
            peer: peer.to_string(),
            source,
        }),
        Err(_) => Err(SyncError::Timeout {
            peer: peer.to_string(),
        }),
    }
}

async fn send_one(peer: &str, payload: &[u8], config: &SyncConfig) -> Result<(), SyncError> {
    let mut stream = connect(peer, config).await?;
    write_frame(&mut stream, payload, config.framing)
        .await
        .map_err(|e| SyncError::from_wire(peer, e))?;
    let _ = stream.shutdown().await;
    Ok(())
}
