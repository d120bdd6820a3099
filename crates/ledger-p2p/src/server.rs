use crate::constants::DEFAULT_READ_TIMEOUT;
use crate::error::WireError;
use crate::resolver::{select_longest, ChainSelection, ConflictResolver, Resolution};
use crate::state::{Admitted, BlockAdmission, SharedLedger};
use crate::sync::Synchronizer;
use crate::wire::{read_frame, write_message, Framing, Message};
use ledger_core::Block;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub difficulty: u32,
    pub framing: Framing,
    /// How long an inbound connection may take to deliver its message.
    pub read_timeout: Duration,
    pub admission: BlockAdmission,
    /// On a rejected block that claims to be ahead of us, fetch the
    /// sender's chain and adopt it if it is longer.
    pub fetch_on_reject: bool,
    pub selection: ChainSelection,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            difficulty: ledger_core::constants::DEFAULT_DIFFICULTY,
            framing: Framing::Raw,
            read_timeout: DEFAULT_READ_TIMEOUT,
            admission: BlockAdmission::Reject,
            fetch_on_reject: false,
            selection: ChainSelection::Longest,
        }
    }
}

/// Accepts peer connections and serves one message per connection.
#[derive(Clone)]
pub struct Server {
    ledger: SharedLedger,
    sync: Synchronizer,
    config: ServerConfig,
}

impl Server {
    pub fn new(ledger: SharedLedger, sync: Synchronizer, config: ServerConfig) -> Self {
        Self {
            ledger,
            sync,
            config,
        }
    }

    /// Accept loop. Each connection gets its own task; there is no cap on
    /// how many run at once.
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Error accepting connection: {e}");
                    continue;
                }
            };
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream, peer).await {
                    warn!(peer = %peer, error = %e, "dropping connection");
                }
            });
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream, peer: SocketAddr) -> Result<(), WireError> {
        let framing = self.config.framing;
        let frame = timeout(self.config.read_timeout, read_frame(&mut stream, framing))
            .await
            .map_err(|_| WireError::TimedOut(self.config.read_timeout))??;

        let Some(message) = Message::parse(&frame)? else {
            debug!(peer = %peer, "ignoring message without a known type");
            return Ok(());
        };
        debug!(peer = %peer, kind = message.kind(), "dispatching");

        match message {
            Message::GetChain => {
                let reply = Message::Chain(self.ledger.chain());
                write_message(&mut stream, &reply, framing).await?;
                let _ = stream.shutdown().await;
            }
            Message::Block(block) => self.on_block(block, peer).await,
            Message::Tx(tx) => {
                if self.ledger.admit_transaction(tx) {
                    info!("[+] Transaction received from {peer}");
                } else {
                    debug!(peer = %peer, "transaction already pending");
                }
            }
            Message::Chain(_) => debug!(peer = %peer, "ignoring unsolicited chain"),
        }
        Ok(())
    }

    async fn on_block(&self, block: Block, peer: SocketAddr) {
        let claimed_index = block.index;
        match self
            .ledger
            .admit_block(block, self.config.difficulty, self.config.admission)
            .await
        {
            Ok(Admitted::Appended) => info!("[✓] New valid block added from {peer}"),
            Ok(Admitted::Coerced(reason)) => {
                warn!(peer = %peer, %reason, "invalid block relinked onto local tip and appended")
            }
            Ok(Admitted::Rejected(reason)) => {
                warn!(peer = %peer, %reason, "[!] Invalid block received");
                if self.config.fetch_on_reject && claimed_index > self.ledger.tip().index {
                    self.spawn_catch_up(peer);
                }
            }
            Err(e) => error!(peer = %peer, error = %e, "block appended but not persisted"),
        }
    }

    /// The sender seems to be ahead: ask it for its whole chain.
    fn spawn_catch_up(&self, peer: SocketAddr) {
        let ledger = self.ledger.clone();
        let resolver = ConflictResolver::new(
            self.sync.clone(),
            self.config.selection,
            self.config.difficulty,
        );
        let sync = self.sync.clone();
        let host = peer.ip().to_string();
        tokio::spawn(async move {
            let chain = sync.fetch_chain(&host).await;
            if chain.is_empty() {
                return;
            }
            let local_len = ledger.len();
            let resolution =
                select_longest(local_len, [(host.clone(), chain)], |c| resolver.eligible(c));
            if let Resolution::Adopted { peer, chain } = resolution {
                match ledger.replace_if_longer(chain).await {
                    Ok(true) => info!("[RESOLVE] adopted chain from {peer} after rejected block"),
                    Ok(false) => {}
                    Err(e) => error!(error = %e, "adopted chain not persisted"),
                }
            }
        });
    }
}
