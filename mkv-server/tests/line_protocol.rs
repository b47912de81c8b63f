//! # Line Protocol Integration Tests
//!
//! Purpose: Drive a real server over TCP through `mkv-client` and check the
//! request/response contract, snapshot recovery, and concurrent access.
//!
//! ## Design Principles
//!
//! 1. **End-to-End**: Exercise the accept loop, handler, dispatcher, and engine.
//! 2. **Isolated Server**: Bind to an ephemeral port and a private temp dir per test.
//! 3. **Explicit Shutdown**: Each server stops through a oneshot channel.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use mkv_client::{Client, ClientError};
use mkv_engine::{KvEngine, MemoryEngine, SnapshotFile};
use mkv_server::server::{self, Context};
use mkv_server::{Metrics, Persistence};

struct TestServer {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    persistence: Arc<Persistence<MemoryEngine>>,
    metrics: Arc<Metrics>,
}

async fn spawn_test_server(snapshot_path: &Path) -> TestServer {
    let metrics = Arc::new(Metrics::new());
    let engine = Arc::new(MemoryEngine::new());
    let persistence = Arc::new(Persistence::new(
        Arc::clone(&engine),
        SnapshotFile::new(snapshot_path),
        Arc::clone(&metrics),
    ));
    persistence.load().await.unwrap();

    let listener = server::bind_listener("127.0.0.1:0".parse().unwrap()).unwrap();
    let addr = listener.local_addr().unwrap();
    let ctx = Arc::new(Context::new(engine, Arc::clone(&metrics)));

    let (shutdown, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(server::serve(listener, ctx, async move {
        let _ = shutdown_rx.await;
    }));

    TestServer {
        addr,
        shutdown,
        persistence,
        metrics,
    }
}

#[tokio::test]
async fn basic_commands() {
    let dir = tempfile::tempdir().unwrap();
    let server = spawn_test_server(&dir.path().join("store.db")).await;
    let mut client = Client::connect(server.addr).await.unwrap();

    client.set("key", "value").await.unwrap();
    assert_eq!(client.get("key").await.unwrap().as_deref(), Some("value"));
    assert_eq!(client.get("missing").await.unwrap(), None);

    client.mset(&[("k1", "v1"), ("k3", "v3")]).await.unwrap();
    assert_eq!(
        client.mget(&["k1", "k2", "k3"]).await.unwrap(),
        vec![Some("v1".to_string()), None, Some("v3".to_string())]
    );

    assert_eq!(client.dbsize().await.unwrap(), 3);
    let mut keys = client.keys_expecting(3).await.unwrap();
    keys.sort();
    assert_eq!(keys, vec!["k1", "k3", "key"]);

    client.del("key").await.unwrap();
    client.del("key").await.unwrap();
    assert_eq!(client.get("key").await.unwrap(), None);
    assert_eq!(client.dbsize().await.unwrap(), 2);

    let _ = server.shutdown.send(());
}

#[tokio::test]
async fn empty_and_spaced_values() {
    let dir = tempfile::tempdir().unwrap();
    let server = spawn_test_server(&dir.path().join("store.db")).await;
    let mut client = Client::connect(server.addr).await.unwrap();

    client.set("empty", "").await.unwrap();
    assert_eq!(client.get("empty").await.unwrap().as_deref(), Some(""));

    client.set("greeting", "hello world").await.unwrap();
    assert_eq!(
        client.get("greeting").await.unwrap().as_deref(),
        Some("hello world")
    );

    let _ = server.shutdown.send(());
}

#[tokio::test]
async fn protocol_errors_answer_and_keep_connection() {
    let dir = tempfile::tempdir().unwrap();
    let server = spawn_test_server(&dir.path().join("store.db")).await;
    let mut client = Client::connect(server.addr).await.unwrap();

    assert_eq!(client.raw("PING", 1).await.unwrap(), vec!["UNKNOWN"]);
    assert_eq!(
        client.raw("get", 1).await.unwrap(),
        vec!["ERR wrong number of arguments for 'GET' (required 1)"]
    );
    assert_eq!(
        client.raw("MSET a 1 b", 1).await.unwrap(),
        vec!["ERR wrong number of arguments for 'MSET' (expected key/value pairs)"]
    );
    assert_eq!(client.dbsize().await.unwrap(), 0);

    assert!(matches!(
        client.set("bad key", "v").await,
        Err(ClientError::InvalidArgument(_))
    ));

    client.set("still", "alive").await.unwrap();
    assert_eq!(client.get("still").await.unwrap().as_deref(), Some("alive"));
    assert!(server.metrics.snapshot().errors_total >= 3);

    let _ = server.shutdown.send(());
}

#[tokio::test]
async fn verbs_are_case_insensitive() {
    let dir = tempfile::tempdir().unwrap();
    let server = spawn_test_server(&dir.path().join("store.db")).await;
    let mut client = Client::connect(server.addr).await.unwrap();

    assert_eq!(client.raw("sEt k v", 1).await.unwrap(), vec!["OK"]);
    assert_eq!(client.raw("get k", 1).await.unwrap(), vec!["v"]);
    assert_eq!(client.raw("dbsize", 1).await.unwrap(), vec!["1"]);
    assert_eq!(client.raw("keys *", 1).await.unwrap(), vec!["k"]);
    assert_eq!(client.raw("GET k extra", 1).await.unwrap(), vec!["v"]);

    let _ = server.shutdown.send(());
}

#[tokio::test]
async fn snapshot_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");

    let first = spawn_test_server(&path).await;
    let snapshotter = first.persistence.start_snapshotter(Duration::from_millis(20));
    {
        let mut client = Client::connect(first.addr).await.unwrap();
        client.set("x", "y").await.unwrap();
        client.set("empty", "").await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(150)).await;
    snapshotter.stop().await;
    assert!(first.metrics.snapshot().snapshots.saved >= 1);
    let _ = first.shutdown.send(());

    let second = spawn_test_server(&path).await;
    let mut client = Client::connect(second.addr).await.unwrap();
    assert_eq!(client.get("x").await.unwrap().as_deref(), Some("y"));
    assert_eq!(client.get("empty").await.unwrap().as_deref(), Some(""));
    assert_eq!(client.dbsize().await.unwrap(), 2);

    let _ = second.shutdown.send(());
}

#[tokio::test]
async fn writes_after_last_snapshot_are_not_durable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");

    let first = spawn_test_server(&path).await;
    {
        let mut client = Client::connect(first.addr).await.unwrap();
        client.set("saved", "1").await.unwrap();
        first.persistence.save_once().await.unwrap();
        client.set("unsaved", "2").await.unwrap();
    }
    let _ = first.shutdown.send(());

    let second = spawn_test_server(&path).await;
    let mut client = Client::connect(second.addr).await.unwrap();
    assert_eq!(client.get("saved").await.unwrap().as_deref(), Some("1"));
    assert_eq!(client.get("unsaved").await.unwrap(), None);

    let _ = second.shutdown.send(());
}

#[tokio::test]
async fn closing_one_client_leaves_others_running() {
    let dir = tempfile::tempdir().unwrap();
    let server = spawn_test_server(&dir.path().join("store.db")).await;

    let mut stays = Client::connect(server.addr).await.unwrap();
    {
        let mut leaves = Client::connect(server.addr).await.unwrap();
        leaves.set("from", "leaver").await.unwrap();
    }

    assert_eq!(stays.get("from").await.unwrap().as_deref(), Some("leaver"));
    let _ = server.shutdown.send(());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_clients_never_see_torn_values() {
    const CLIENTS: usize = 8;
    const ROUNDS: usize = 200;
    const KEYS: [&str; 3] = ["shared-a", "shared-b", "shared-c"];

    let dir = tempfile::tempdir().unwrap();
    let server = spawn_test_server(&dir.path().join("store.db")).await;
    let snapshotter = server.persistence.start_snapshotter(Duration::from_millis(5));

    let mut tasks = Vec::with_capacity(CLIENTS);
    for id in 0..CLIENTS {
        let addr = server.addr;
        tasks.push(tokio::spawn(async move {
            let mut client = Client::connect(addr).await.unwrap();
            let mine = char::from(b'a' + id as u8).to_string().repeat(64);

            for round in 0..ROUNDS {
                let key = KEYS[round % KEYS.len()];
                match round % 4 {
                    0 | 1 => client.set(key, &mine).await.unwrap(),
                    2 => client.del(key).await.unwrap(),
                    _ => client
                        .mset(&[(KEYS[0], mine.as_str()), (KEYS[1], mine.as_str())])
                        .await
                        .unwrap(),
                }

                if let Some(value) = client.get(key).await.unwrap() {
                    let first = value.chars().next().unwrap();
                    assert_eq!(value.len(), 64);
                    assert!(value.chars().all(|ch| ch == first), "torn value {value}");
                }

                let size = client.dbsize().await.unwrap();
                assert!(size <= KEYS.len(), "impossible size {size}");
            }
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }
    snapshotter.stop().await;

    let snapshot = server.persistence.file().load().unwrap();
    for (key, value) in snapshot.iter() {
        assert!(KEYS.contains(&key));
        let first = value.chars().next().unwrap();
        assert!(value.chars().all(|ch| ch == first));
    }
    assert!(server.metrics.snapshot().snapshots.failed == 0);

    let _ = server.shutdown.send(());
}

#[tokio::test]
async fn corrupt_snapshot_refuses_to_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    std::fs::write(&path, b"{\"version\":1,\"entries\":").unwrap();

    let engine = Arc::new(MemoryEngine::new());
    let persistence = Persistence::new(
        Arc::clone(&engine),
        SnapshotFile::new(&path),
        Arc::new(Metrics::new()),
    );
    assert!(persistence.load().await.is_err());
    assert!(engine.is_empty());
}
