use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log_dict::{
    Dict, DictConfig, DictState, Error, LogClient, LogNode, MemoryLogClient, WatchStream,
};
use tokio::sync::Notify;
use tokio::time::{sleep, timeout};

const RETRY: Duration = Duration::from_millis(20);

fn config() -> DictConfig {
    DictConfig::default().with_retry_interval(RETRY)
}

async fn seeded_log(keyspace: &str) -> Arc<MemoryLogClient> {
    let log = Arc::new(MemoryLogClient::new());
    log.write(&format!("{}/a", keyspace), "1").await.unwrap();
    log.write(&format!("{}/b", keyspace), "2").await.unwrap();
    log
}

/// Holds every read after taking its snapshot until `release` is notified.
struct HeldReadLog {
    log: Arc<MemoryLogClient>,
    snapshot_taken: Notify,
    release: Notify,
}

impl HeldReadLog {
    fn new(log: Arc<MemoryLogClient>) -> Self {
        Self {
            log,
            snapshot_taken: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl LogClient for HeldReadLog {
    async fn read(&self, path: &str) -> Result<Option<LogNode>, Error> {
        let snapshot = self.log.read(path).await;
        self.snapshot_taken.notify_one();
        self.release.notified().await;
        snapshot
    }

    async fn write(&self, path: &str, value: &str) -> Result<(), Error> {
        self.log.write(path, value).await
    }

    async fn create_directory(&self, path: &str) -> Result<(), Error> {
        self.log.create_directory(path).await
    }

    fn watch(&self, path: &str) -> WatchStream {
        self.log.watch(path)
    }
}

async fn eventually(dict: &Dict, key: &str, expected: &str) {
    let waited = timeout(Duration::from_secs(2), async {
        loop {
            if dict.get(key).ok().as_deref() == Some(expected) {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    assert!(
        waited.is_ok(),
        "expected {} to become {:?} but was {:?}",
        key,
        expected,
        dict.get(key).ok()
    );
}

#[tokio::test]
async fn test_bootstrap_merges_existing_children() {
    let log = seeded_log("boot").await;

    let (dict, init_error) = Dict::open_with_config("boot", log, config()).await;

    assert!(init_error.is_none());
    assert_eq!(dict.state(), DictState::Live);
    assert_eq!(dict.get("a").unwrap(), "1");
    assert_eq!(dict.get("b").unwrap(), "2");
    assert_eq!(dict.len(), 2);
}

#[tokio::test]
async fn test_missing_keyspace_is_created() {
    let log = Arc::new(MemoryLogClient::new());

    let (dict, init_error) = Dict::open_with_config("fresh/", log.clone(), config()).await;

    assert!(init_error.is_none());
    assert_eq!(dict.keyspace(), "fresh");
    assert!(dict.is_empty());
    let node = log.read("fresh").await.unwrap().unwrap();
    assert!(node.is_dir());
}

#[tokio::test]
async fn test_watch_applies_remote_change() {
    let log = seeded_log("watch").await;
    let (dict, _) = Dict::open_with_config("watch", log.clone(), config()).await;

    log.write("watch/a", "9").await.unwrap();
    eventually(&dict, "a", "9").await;

    log.write("watch/a", "10").await.unwrap();
    eventually(&dict, "a", "10").await;
}

#[tokio::test]
async fn test_nested_keys_use_final_segment() {
    let log = Arc::new(MemoryLogClient::new());
    let (dict, _) = Dict::open_with_config("ns", log.clone(), config()).await;

    log.write("ns/sub/x", "1").await.unwrap();
    eventually(&dict, "x", "1").await;
    assert!(dict.get("sub/x").is_err());
    assert!(dict.get("ns/sub/x").is_err());
    assert!(!dict.contains_key("sub"));

    log.write("ns/x", "2").await.unwrap();
    eventually(&dict, "x", "2").await;
}

#[tokio::test]
async fn test_bootstrap_flattens_nested_directories() {
    let log = Arc::new(MemoryLogClient::new());
    log.write("nested/top", "1").await.unwrap();
    log.write("nested/sub/leaf", "2").await.unwrap();

    let (dict, _) = Dict::open_with_config("nested", log, config()).await;

    assert_eq!(dict.get("top").unwrap(), "1");
    assert_eq!(dict.get("leaf").unwrap(), "2");
    assert!(!dict.contains_key("sub"));
}

#[tokio::test]
async fn test_put_is_visible_immediately() {
    let log = Arc::new(MemoryLogClient::new());
    let (dict, _) = Dict::open_with_config("put", log.clone(), config()).await;

    dict.put("k", "v").await.unwrap();

    assert_eq!(dict.get("k").unwrap(), "v");
    let node = log.read("put/k").await.unwrap().unwrap();
    assert_eq!(node.value, "v");
}

#[tokio::test]
async fn test_failed_put_keeps_local_value() {
    let log = Arc::new(MemoryLogClient::new());
    let (dict, _) = Dict::open_with_config("optimistic", log.clone(), config()).await;

    log.reject_writes(true);
    let err = dict.put("k", "v").await.unwrap_err();

    assert!(matches!(err, Error::WriteRejected { ref path, .. } if path == "optimistic/k"));
    assert_eq!(dict.get("k").unwrap(), "v");
    assert_eq!(log.read("optimistic/k").await.unwrap(), None);

    log.reject_writes(false);
    dict.put("k", "v").await.unwrap();
    assert_eq!(log.read("optimistic/k").await.unwrap().unwrap().value, "v");
}

#[tokio::test]
async fn test_get_missing_key() {
    let log = Arc::new(MemoryLogClient::new());
    let (dict, _) = Dict::open_with_config("miss", log, config()).await;

    match dict.get("nope") {
        Err(Error::NotFound { keyspace, key }) => {
            assert_eq!(keyspace, "miss");
            assert_eq!(key, "nope");
        }
        other => panic!("expected NotFound, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unreachable_log_bootstraps_in_background() {
    let log = seeded_log("degraded").await;
    log.set_reachable(false);

    let (dict, init_error) = Dict::open_with_config("degraded", log.clone(), config()).await;

    assert!(matches!(init_error, Some(Error::Unreachable(_))));
    assert_eq!(dict.state(), DictState::Initializing);
    assert!(dict.is_empty());

    log.set_reachable(true);
    eventually(&dict, "a", "1").await;
    eventually(&dict, "b", "2").await;
    assert_eq!(dict.state(), DictState::Live);
}

#[tokio::test]
async fn test_put_while_initializing_survives_bootstrap() {
    let log = Arc::new(MemoryLogClient::new());
    log.write("journal/a", "old").await.unwrap();
    log.set_reachable(false);

    let (dict, init_error) = Dict::open_with_config("journal", log.clone(), config()).await;
    assert!(init_error.is_some());

    let err = dict.put("a", "new").await.unwrap_err();
    assert!(matches!(err, Error::Unreachable(_)));
    assert_eq!(dict.get("a").unwrap(), "new");

    log.set_reachable(true);
    timeout(Duration::from_secs(2), async {
        while dict.state() != DictState::Live {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(dict.get("a").unwrap(), "new");
}

#[tokio::test]
async fn test_close_stops_updates() {
    let log = seeded_log("closing").await;
    let (dict, _) = Dict::open_with_config("closing", log.clone(), config()).await;

    dict.close().await;
    assert_eq!(dict.state(), DictState::Closed);

    log.write("closing/unseen", "x").await.unwrap();
    sleep(Duration::from_millis(50)).await;

    assert!(matches!(dict.get("unseen"), Err(Error::NotFound { .. })));
    assert_eq!(dict.get("a").unwrap(), "1");
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let log = Arc::new(MemoryLogClient::new());
    let (dict, _) = Dict::open_with_config("twice", log, config()).await;

    dict.close().await;
    dict.close().await;

    assert_eq!(dict.state(), DictState::Closed);
}

#[tokio::test]
async fn test_put_after_close_is_rejected() {
    let log = Arc::new(MemoryLogClient::new());
    let (dict, _) = Dict::open_with_config("closed-put", log.clone(), config()).await;
    dict.close().await;

    let err = dict.put("k", "v").await.unwrap_err();

    assert!(matches!(err, Error::Closed(_)));
    assert!(dict.get("k").is_err());
    assert_eq!(log.read("closed-put/k").await.unwrap(), None);
}

#[tokio::test]
async fn test_close_while_initializing_stops_retry() {
    let log = seeded_log("abandon").await;
    log.set_reachable(false);

    let (dict, init_error) = Dict::open_with_config("abandon", log.clone(), config()).await;
    assert!(init_error.is_some());

    timeout(Duration::from_secs(1), dict.close()).await.unwrap();

    log.set_reachable(true);
    sleep(RETRY * 5).await;

    assert_eq!(dict.state(), DictState::Closed);
    assert!(dict.is_empty());
}

#[tokio::test]
async fn test_disconnect_does_not_stop_watch() {
    let log = seeded_log("flaky").await;
    let (dict, _) = Dict::open_with_config("flaky", log.clone(), config()).await;

    log.set_reachable(false);
    sleep(Duration::from_millis(10)).await;
    log.set_reachable(true);

    log.write("flaky/c", "3").await.unwrap();
    eventually(&dict, "c", "3").await;
    assert_eq!(dict.state(), DictState::Live);
}

#[tokio::test]
async fn test_dicts_are_isolated_by_keyspace() {
    let log = Arc::new(MemoryLogClient::new());
    let (left, _) = Dict::open_with_config("left", log.clone(), config()).await;
    let (right, _) = Dict::open_with_config("right", log.clone(), config()).await;

    left.put("k", "l").await.unwrap();
    right.put("k", "r").await.unwrap();
    log.write("left/only", "1").await.unwrap();

    eventually(&left, "only", "1").await;
    assert_eq!(left.get("k").unwrap(), "l");
    assert_eq!(right.get("k").unwrap(), "r");
    assert!(!right.contains_key("only"));
}

#[tokio::test]
async fn test_change_during_bootstrap_read_wins_over_snapshot() {
    let log = seeded_log("race").await;
    let held = Arc::new(HeldReadLog::new(log.clone()));

    let opening = tokio::spawn({
        let held = held.clone();
        async move { Dict::open_with_config("race", held, config()).await }
    });

    held.snapshot_taken.notified().await;
    log.write("race/a", "9").await.unwrap();
    sleep(Duration::from_millis(50)).await;
    held.release.notify_one();

    let (dict, init_error) = opening.await.unwrap();

    assert!(init_error.is_none());
    assert_eq!(dict.state(), DictState::Live);
    assert_eq!(dict.get("a").unwrap(), "9");
    assert_eq!(dict.get("b").unwrap(), "2");
}
