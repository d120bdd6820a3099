use ledger_core::{
    chain::{genesis_block, is_chain_consistent},
    mine::{mine, TipChangePolicy},
    pow::meets_difficulty,
    Block, Transaction,
};
use ledger_p2p::{
    Admitted, BlockAdmission, Framing, Message, Node, NodeConfig, Server, ServerConfig,
    SharedLedger, SyncConfig, Synchronizer,
};
use ledger_storage::{load_chain, JsonFileStore, MemoryStore, StaticPeers};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

const DIFFICULTY: u32 = 1;

struct TestNode {
    node: Node,
    ledger: SharedLedger,
    store: Arc<MemoryStore>,
    addr: SocketAddr,
    server: JoinHandle<std::io::Result<()>>,
}

impl TestNode {
    fn peer(&self) -> String {
        self.addr.to_string()
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        self.server.abort();
    }
}

fn sync_config(framing: Framing) -> SyncConfig {
    SyncConfig {
        // every test peer carries its own port
        port: 1,
        connect_timeout: Duration::from_secs(1),
        read_timeout: Duration::from_secs(2),
        framing,
        abort_on_failure: false,
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn spawn_node_with(
    name: &str,
    chain: Vec<Block>,
    peers: Vec<String>,
    admission: BlockAdmission,
    framing: Framing,
) -> anyhow::Result<TestNode> {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let store = Arc::new(MemoryStore::new());
    let ledger = SharedLedger::new(chain, store.clone());
    let sync = Synchronizer::new(sync_config(framing));
    let server = Server::new(
        ledger.clone(),
        sync.clone(),
        ServerConfig {
            difficulty: DIFFICULTY,
            framing,
            read_timeout: Duration::from_secs(2),
            admission,
            ..Default::default()
        },
    );
    let server = tokio::spawn(server.serve(listener));
    let node = Node::new(
        ledger.clone(),
        sync,
        Arc::new(StaticPeers(peers)),
        NodeConfig {
            node_id: name.to_string(),
            reward: 50.0,
            difficulty: DIFFICULTY,
            ..Default::default()
        },
    );
    Ok(TestNode {
        node,
        ledger,
        store,
        addr,
        server,
    })
}

async fn spawn_node(name: &str, peers: Vec<String>) -> anyhow::Result<TestNode> {
    spawn_node_with(name, vec![], peers, BlockAdmission::Reject, Framing::Raw).await
}

/// An address nothing listens on.
async fn dead_peer() -> anyhow::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(addr.to_string())
}

fn chain_of(len: usize, miner: &str) -> Vec<Block> {
    let mut chain = vec![genesis_block()];
    while chain.len() < len {
        let tip = chain.last().unwrap();
        let block = mine(&[], &tip.hash, tip.index, miner, 1.0, DIFFICULTY);
        chain.push(block);
    }
    chain
}

async fn wait_until(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn fetch_chain_returns_the_peer_chain() -> anyhow::Result<()> {
    let chain = chain_of(3, "remote");
    let remote = spawn_node_with("remote", chain.clone(), vec![], BlockAdmission::Reject, Framing::Raw).await?;
    let sync = Synchronizer::new(sync_config(Framing::Raw));

    let fetched = sync.try_fetch_chain(&remote.peer()).await?;
    assert_eq!(fetched, chain);
    assert_eq!(sync.fetch_chain(&remote.peer()).await, chain);
    Ok(())
}

#[tokio::test]
async fn fetch_chain_from_dead_peer_is_empty() -> anyhow::Result<()> {
    let sync = Synchronizer::new(sync_config(Framing::Raw));
    let dead = dead_peer().await?;

    assert!(sync.fetch_chain(&dead).await.is_empty());
    let err = sync.try_fetch_chain(&dead).await.unwrap_err();
    assert!(err.is_unreachable());
    Ok(())
}

#[tokio::test]
async fn fetch_chain_from_silent_peer_times_out() -> anyhow::Result<()> {
    // accepts but never answers
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?.to_string();
    let hold = tokio::spawn(async move {
        let (stream, _) = listener.accept().await?;
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(stream);
        std::io::Result::Ok(())
    });
    let sync = Synchronizer::new(SyncConfig {
        read_timeout: Duration::from_millis(200),
        ..sync_config(Framing::Raw)
    });

    let err = sync.try_fetch_chain(&addr).await.unwrap_err();
    assert!(matches!(err, ledger_p2p::SyncError::Timeout { .. }));
    hold.abort();
    Ok(())
}

#[tokio::test]
async fn broadcast_reaches_exactly_the_reachable_peers() -> anyhow::Result<()> {
    let a = spawn_node("a", vec![]).await?;
    let b = spawn_node("b", vec![]).await?;
    let dead = dead_peer().await?;
    let peers = vec![a.peer(), dead.clone(), b.peer()];
    let sync = Synchronizer::new(sync_config(Framing::Raw));
    let tx = Transaction::new("thiago", "weberti", 10.0);

    let report = sync.broadcast_transaction(&tx, &peers).await;
    assert_eq!(report.delivered, vec![a.peer(), b.peer()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, dead);
    assert!(report.failed[0].1.is_unreachable());

    wait_until("a to pool the tx", || a.ledger.pending() == vec![tx.clone()]).await;
    wait_until("b to pool the tx", || b.ledger.pending() == vec![tx.clone()]).await;
    Ok(())
}

#[tokio::test]
async fn duplicate_transactions_are_pooled_once() -> anyhow::Result<()> {
    let receiver = spawn_node("receiver", vec![]).await?;
    let sender = spawn_node("sender", vec![receiver.peer()]).await?;

    let first = sender.node.add_transaction(Transaction::new("a", "b", 10.0)).await?;
    assert!(first.admitted);
    assert_eq!(first.broadcast.delivered.len(), 1);
    wait_until("first tx", || receiver.ledger.pending().len() == 1).await;

    let second = sender.node.add_transaction(Transaction::new("a", "b", 10.0)).await?;
    assert!(!second.admitted);
    sender.node.add_transaction(Transaction::new("a", "b", 11.0)).await?;
    wait_until("third tx", || receiver.ledger.pending().len() == 2).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    let pending = receiver.ledger.pending();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].amount, 10.0);
    assert_eq!(pending[1].amount, 11.0);
    assert_eq!(sender.ledger.pending().len(), 2);
    Ok(())
}

#[tokio::test]
async fn mined_block_propagates_to_peers() -> anyhow::Result<()> {
    let receiver = spawn_node("receiver", vec![]).await?;
    let miner = spawn_node("miner", vec![receiver.peer()]).await?;

    miner.node.add_transaction(Transaction::new("thiago", "weberti", 10.0)).await?;
    wait_until("tx at receiver", || receiver.ledger.pending().len() == 1).await;

    let mined = miner.node.mine().await?;
    assert_eq!(mined.adopted_from, None);
    let report = mined.broadcast.expect("block kept and sent");
    assert_eq!(report.delivered, vec![receiver.peer()]);

    wait_until("receiver to append", || receiver.ledger.len() == 2).await;
    assert_eq!(receiver.ledger.chain(), miner.ledger.chain());
    assert_eq!(receiver.ledger.tip().transactions.len(), 1);
    // the receiver persisted the accepted block
    wait_until("receiver to save", || receiver.store.save_count() == 1).await;
    assert_eq!(receiver.store.snapshot(), Some(receiver.ledger.chain()));
    Ok(())
}

#[tokio::test]
async fn forged_block_is_rejected() -> anyhow::Result<()> {
    let receiver = spawn_node("receiver", vec![]).await?;
    let sync = Synchronizer::new(sync_config(Framing::Raw));
    let genesis = genesis_block();

    let mut forged = mine(&[Transaction::new("a", "b", 1.0)], &genesis.hash, 0, "x", 1.0, DIFFICULTY);
    forged.transactions[0].amount = 1_000.0;
    let report = sync.broadcast_block(&forged, &[receiver.peer()]).await;
    assert_eq!(report.delivered.len(), 1);

    let unlinked = mine(&[], &"ab".repeat(32), 0, "x", 1.0, DIFFICULTY);
    sync.broadcast_block(&unlinked, &[receiver.peer()]).await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(receiver.ledger.chain(), vec![genesis]);
    assert_eq!(receiver.store.save_count(), 0);
    Ok(())
}

#[tokio::test]
async fn coerce_policy_appends_invalid_blocks() -> anyhow::Result<()> {
    let receiver = spawn_node_with("receiver", vec![], vec![], BlockAdmission::Coerce, Framing::Raw).await?;
    let sync = Synchronizer::new(sync_config(Framing::Raw));

    let unlinked = mine(&[], &"ab".repeat(32), 6, "x", 1.0, DIFFICULTY);
    sync.broadcast_block(&unlinked, &[receiver.peer()]).await;

    wait_until("coerced block", || receiver.ledger.len() == 2).await;
    let chain = receiver.ledger.chain();
    assert_eq!(chain[1].index, 1);
    assert_eq!(chain[1].previous_hash, chain[0].hash);
    assert!(is_chain_consistent(&chain));
    Ok(())
}

#[tokio::test]
async fn malformed_and_unknown_messages_get_no_reply() -> anyhow::Result<()> {
    let node = spawn_node("node", vec![]).await?;

    let payloads: [&[u8]; 3] = [b"{not json", br#"{"type":"ping"}"#, br#"{"data":[]}"#];
    for payload in payloads {
        let mut stream = TcpStream::connect(node.addr).await?;
        stream.write_all(payload).await?;
        stream.shutdown().await?;
        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await?;
        assert!(reply.is_empty());
    }

    // still serving afterwards
    let mut stream = TcpStream::connect(node.addr).await?;
    stream.write_all(br#"{"type":"get_chain"}"#).await?;
    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await?;
    assert_eq!(Message::parse(&reply)?, Some(Message::Chain(vec![genesis_block()])));
    Ok(())
}

#[tokio::test]
async fn resolver_adopts_only_the_longest_chain() -> anyhow::Result<()> {
    let local_len = 3;
    let shorter = spawn_node_with("p1", chain_of(local_len - 1, "p1"), vec![], BlockAdmission::Reject, Framing::Raw).await?;
    let equal = spawn_node_with("p2", chain_of(local_len, "p2"), vec![], BlockAdmission::Reject, Framing::Raw).await?;
    let longer_chain = chain_of(local_len + 3, "p3");
    let longer = spawn_node_with("p3", longer_chain.clone(), vec![], BlockAdmission::Reject, Framing::Raw).await?;
    let dead = dead_peer().await?;

    let local = spawn_node_with(
        "local",
        chain_of(local_len, "local"),
        vec![shorter.peer(), dead, equal.peer(), longer.peer()],
        BlockAdmission::Reject,
        Framing::Raw,
    )
    .await?;

    let adopted = local.node.sync_with_peers().await?;
    assert_eq!(adopted, Some(longer.peer()));
    assert_eq!(local.ledger.chain(), longer_chain);
    assert_eq!(local.store.snapshot(), Some(longer_chain));
    Ok(())
}

#[tokio::test]
async fn mining_from_genesis_without_peers() -> anyhow::Result<()> {
    let node = spawn_node("solo", vec![]).await?;

    let mined = node.node.mine().await?;
    let chain = node.ledger.chain();
    assert_eq!(chain.len(), 2);
    assert_eq!(chain[1].previous_hash, chain[0].hash);
    assert_eq!(chain[1], mined.block);
    assert!(mined.block.transactions.is_empty());
    assert!(meets_difficulty(&mined.block.hash, DIFFICULTY));
    assert_eq!(mined.block.miner, "solo");
    assert!(node.ledger.pending().is_empty());
    assert_eq!(node.store.snapshot(), Some(chain));
    Ok(())
}

#[tokio::test]
async fn mining_drains_the_pool_into_the_block() -> anyhow::Result<()> {
    let node = spawn_node("solo", vec![]).await?;
    node.node.add_transaction(Transaction::new("a", "b", 1.0)).await?;
    node.node.add_transaction(Transaction::new("c", "d", 2.0)).await?;

    let mined = node.node.mine().await?;
    assert_eq!(mined.block.transactions.len(), 2);
    assert!(node.ledger.pending().is_empty());
    Ok(())
}

#[tokio::test]
async fn mined_block_is_dropped_when_a_peer_is_far_ahead() -> anyhow::Result<()> {
    let ahead_chain = chain_of(5, "ahead");
    let ahead = spawn_node_with("ahead", ahead_chain.clone(), vec![], BlockAdmission::Reject, Framing::Raw).await?;
    let local = spawn_node("local", vec![ahead.peer()]).await?;

    let mined = local.node.mine().await?;
    assert_eq!(mined.adopted_from, Some(ahead.peer()));
    assert!(mined.broadcast.is_none());
    assert_eq!(local.ledger.chain(), ahead_chain);
    Ok(())
}

#[tokio::test]
async fn length_prefixed_nodes_interoperate() -> anyhow::Result<()> {
    let receiver = spawn_node_with("receiver", vec![], vec![], BlockAdmission::Reject, Framing::LengthPrefixed).await?;
    let miner = spawn_node_with("miner", vec![], vec![receiver.peer()], BlockAdmission::Reject, Framing::LengthPrefixed).await?;

    miner.node.mine().await?;
    wait_until("receiver to append", || receiver.ledger.len() == 2).await;

    let sync = Synchronizer::new(sync_config(Framing::LengthPrefixed));
    assert_eq!(sync.try_fetch_chain(&receiver.peer()).await?, miner.ledger.chain());
    Ok(())
}

#[tokio::test]
async fn accepted_blocks_survive_a_restart() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("blockchain.json");

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let ledger = SharedLedger::open(Arc::new(JsonFileStore::new(&path)))?;
    let sync = Synchronizer::new(sync_config(Framing::Raw));
    let server = Server::new(
        ledger.clone(),
        sync.clone(),
        ServerConfig {
            difficulty: DIFFICULTY,
            ..Default::default()
        },
    );
    let handle = tokio::spawn(server.serve(listener));

    let block = mine(&[], &genesis_block().hash, 0, "remote", 1.0, DIFFICULTY);
    let report = sync.broadcast_block(&block, &[addr.to_string()]).await;
    assert_eq!(report.delivered.len(), 1);
    wait_until("remote block on disk", || {
        load_chain(&path).map(|c| c.len() == 2).unwrap_or(false)
    })
    .await;
    handle.abort();

    let reloaded = load_chain(&path)?;
    assert_eq!(reloaded, ledger.chain());
    let reopened = SharedLedger::open(Arc::new(JsonFileStore::new(&path)))?;
    assert_eq!(reopened.tip(), block);
    Ok(())
}

#[tokio::test]
async fn block_with_skipped_index_is_refused_and_mining_still_gossips() -> anyhow::Result<()> {
    let receiver = spawn_node("receiver", vec![]).await?;
    let miner = spawn_node("miner", vec![receiver.peer()]).await?;
    let sync = Synchronizer::new(sync_config(Framing::Raw));

    // linked to genesis with valid work, but claims index 99
    let skipping = mine(&[], &genesis_block().hash, 98, "peer", 1.0, DIFFICULTY);
    sync.broadcast_block(&skipping, &[miner.peer()]).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(miner.ledger.len(), 1);

    let mined = miner.node.mine().await?;
    assert_eq!(mined.block.index, 1);
    let report = mined.broadcast.expect("block kept and sent");
    assert_eq!(report.delivered, vec![receiver.peer()]);
    wait_until("receiver to append", || receiver.ledger.len() == 2).await;
    assert_eq!(receiver.ledger.tip(), mined.block);
    Ok(())
}

#[tokio::test]
async fn mined_block_is_gossiped_on_a_chain_with_gapped_indices() -> anyhow::Result<()> {
    // an adopted chain may number its blocks arbitrarily
    let genesis = genesis_block();
    let gapped = vec![genesis.clone(), mine(&[], &genesis.hash, 41, "old", 1.0, DIFFICULTY)];
    let receiver = spawn_node_with("receiver", gapped.clone(), vec![], BlockAdmission::Reject, Framing::Raw).await?;
    let miner = spawn_node_with("miner", gapped, vec![receiver.peer()], BlockAdmission::Reject, Framing::Raw).await?;

    let mined = miner.node.mine().await?;
    assert_eq!(mined.block.index, 43);
    assert!(miner.ledger.holds(&mined.block));
    let report = mined.broadcast.expect("block kept and sent");
    assert_eq!(report.delivered, vec![receiver.peer()]);
    wait_until("receiver to append", || receiver.ledger.len() == 3).await;
    Ok(())
}

#[tokio::test]
async fn restart_policy_resolves_on_the_new_tip() -> anyhow::Result<()> {
    let difficulty = 5;
    let ledger = SharedLedger::new(vec![], Arc::new(MemoryStore::new()));
    let node = Node::new(
        ledger.clone(),
        Synchronizer::new(sync_config(Framing::Raw)),
        Arc::new(StaticPeers(vec![])),
        NodeConfig {
            node_id: "miner".to_string(),
            difficulty,
            tip_change: TipChangePolicy::Restart,
            ..Default::default()
        },
    );

    let mining = tokio::spawn(async move { node.mine().await });
    // let the miner take its template and start searching
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    let remote = mine(&[], &genesis_block().hash, 0, "peer", 1.0, DIFFICULTY);
    let outcome = ledger
        .admit_block(remote.clone(), DIFFICULTY, BlockAdmission::Reject)
        .await?;
    assert_eq!(outcome, Admitted::Appended);

    let mined = mining.await??;
    assert_eq!(mined.block.previous_hash, remote.hash);
    assert_eq!(mined.block.index, 2);
    assert!(mined.block.has_valid_hash());
    assert!(meets_difficulty(&mined.block.hash, difficulty));
    assert_eq!(ledger.chain(), vec![genesis_block(), remote, mined.block]);
    Ok(())
}

#[tokio::test]
async fn rejected_block_from_a_node_ahead_triggers_catch_up() -> anyhow::Result<()> {
    let ahead_chain = chain_of(5, "ahead");
    let ahead = spawn_node_with("ahead", ahead_chain.clone(), vec![], BlockAdmission::Reject, Framing::Raw).await?;

    // the catch-up fetch goes to the sender's host on the shared port
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let ledger = SharedLedger::new(vec![], Arc::new(MemoryStore::new()));
    let sync = Synchronizer::new(SyncConfig {
        port: ahead.addr.port(),
        ..sync_config(Framing::Raw)
    });
    let server = Server::new(
        ledger.clone(),
        sync.clone(),
        ServerConfig {
            difficulty: DIFFICULTY,
            read_timeout: Duration::from_secs(2),
            fetch_on_reject: true,
            ..Default::default()
        },
    );
    let handle = tokio::spawn(server.serve(listener));

    let tip = ahead_chain[4].clone();
    let report = sync.broadcast_block(&tip, &[addr.to_string()]).await;
    assert_eq!(report.delivered.len(), 1);

    wait_until("catch-up adoption", || ledger.len() == 5).await;
    assert_eq!(ledger.chain(), ahead_chain);
    handle.abort();
    Ok(())
}

#[tokio::test]
async fn rejected_block_is_ignored_without_catch_up() -> anyhow::Result<()> {
    let ahead_chain = chain_of(4, "ahead");
    let receiver = spawn_node("receiver", vec![]).await?;
    let sync = Synchronizer::new(sync_config(Framing::Raw));

    sync.broadcast_block(&ahead_chain[3], &[receiver.peer()]).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(receiver.ledger.len(), 1);
    Ok(())
}
