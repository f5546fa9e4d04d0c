//! An in-process log, for tests and for dicts that never leave the process.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::client::{LogClient, WatchEvent, WatchStream};
use crate::error::Error;
use crate::node::LogNode;

const EVENT_CAPACITY: usize = 1024;

enum Entry {
    Value(String),
    Dir,
}

/// A hierarchical log held in memory.
///
/// Behaves like a remote log: writes create missing parent directories and
/// are delivered to every watcher of an enclosing path. It can be switched
/// offline or made to reject writes to exercise degraded behavior.
pub struct MemoryLogClient {
    tree: Mutex<BTreeMap<String, Entry>>,
    events: broadcast::Sender<WatchEvent>,
    reachable: AtomicBool,
    reject_writes: AtomicBool,
}

impl MemoryLogClient {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            tree: Mutex::new(BTreeMap::new()),
            events,
            reachable: AtomicBool::new(true),
            reject_writes: AtomicBool::new(false),
        }
    }

    /// Takes the log offline or brings it back. Going offline sends
    /// [`WatchEvent::Disconnected`] to every watcher.
    pub fn set_reachable(&self, reachable: bool) {
        let was = self.reachable.swap(reachable, Ordering::SeqCst);
        if was && !reachable {
            let _ = self.events.send(WatchEvent::Disconnected);
        }
    }

    /// Makes every subsequent write fail with [`Error::WriteRejected`].
    pub fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Entry>> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_reachable(&self) -> Result<(), Error> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Unreachable("memory log is offline".to_string()))
        }
    }

    /// Creates every missing ancestor of `key` as a directory. Nothing is
    /// created if any ancestor holds a value.
    fn create_ancestors(
        &self,
        tree: &mut BTreeMap<String, Entry>,
        path: &str,
        key: &str,
    ) -> Result<(), Error> {
        let ancestors: Vec<&str> = key.match_indices('/').map(|(idx, _)| &key[..idx]).collect();

        if let Some(ancestor) = ancestors
            .iter()
            .find(|ancestor| matches!(tree.get(**ancestor), Some(Entry::Value(_))))
        {
            return Err(rejected(path, format!("{} is not a directory", ancestor)));
        }

        for ancestor in ancestors {
            if !tree.contains_key(ancestor) {
                tree.insert(ancestor.to_string(), Entry::Dir);
                self.emit(LogNode::directory(ancestor, Vec::new()));
            }
        }
        Ok(())
    }

    fn emit(&self, node: LogNode) {
        let _ = self.events.send(WatchEvent::Changed(node));
    }
}

impl Default for MemoryLogClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogClient for MemoryLogClient {
    async fn read(&self, path: &str) -> Result<Option<LogNode>, Error> {
        self.check_reachable()?;

        let key = path.trim_matches('/');
        let tree = self.lock();

        if key.is_empty() {
            return Ok(Some(build_dir(&tree, key)));
        }

        Ok(match tree.get(key) {
            None => None,
            Some(Entry::Value(value)) => Some(LogNode::new(key, value.clone())),
            Some(Entry::Dir) => Some(build_dir(&tree, key)),
        })
    }

    async fn write(&self, path: &str, value: &str) -> Result<(), Error> {
        self.check_reachable()?;
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(rejected(path, "writes are rejected".to_string()));
        }

        let key = path.trim_matches('/');
        if key.is_empty() {
            return Err(rejected(path, "cannot write the root".to_string()));
        }

        let mut tree = self.lock();
        if let Some(Entry::Dir) = tree.get(key) {
            return Err(rejected(path, format!("{} is a directory", key)));
        }

        self.create_ancestors(&mut tree, path, key)?;
        tree.insert(key.to_string(), Entry::Value(value.to_string()));
        self.emit(LogNode::new(key, value));
        Ok(())
    }

    async fn create_directory(&self, path: &str) -> Result<(), Error> {
        self.check_reachable()?;

        let key = path.trim_matches('/');
        if key.is_empty() {
            return Ok(());
        }

        let mut tree = self.lock();
        match tree.get(key) {
            Some(Entry::Dir) => Ok(()),
            Some(Entry::Value(_)) => Err(rejected(path, format!("{} is not a directory", key))),
            None => {
                self.create_ancestors(&mut tree, path, key)?;
                tree.insert(key.to_string(), Entry::Dir);
                self.emit(LogNode::directory(key, Vec::new()));
                Ok(())
            }
        }
    }

    fn watch(&self, path: &str) -> WatchStream {
        let mut events = self.events.subscribe();
        let scope = path.trim_matches('/').to_string();

        Box::pin(async_stream::stream! {
            loop {
                match events.recv().await {
                    Ok(WatchEvent::Changed(node)) => {
                        if is_under(&node.key, &scope) {
                            yield WatchEvent::Changed(node);
                        }
                    }
                    Ok(WatchEvent::Disconnected) => yield WatchEvent::Disconnected,
                    // events were dropped; the subscriber has to treat this as a gap
                    Err(RecvError::Lagged(_)) => yield WatchEvent::Disconnected,
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

fn build_dir(tree: &BTreeMap<String, Entry>, key: &str) -> LogNode {
    let prefix = if key.is_empty() {
        String::new()
    } else {
        format!("{}/", key)
    };

    let children = tree
        .range(prefix.clone()..)
        .take_while(|(k, _)| k.starts_with(&prefix))
        .filter(|(k, _)| !k[prefix.len()..].contains('/'))
        .map(|(k, entry)| match entry {
            Entry::Value(value) => LogNode::new(k.as_str(), value.as_str()),
            Entry::Dir => build_dir(tree, k),
        })
        .collect();

    LogNode::directory(key, children)
}

fn is_under(key: &str, scope: &str) -> bool {
    scope.is_empty()
        || key == scope
        || key
            .strip_prefix(scope)
            .is_some_and(|rest| rest.starts_with('/'))
}

fn rejected(path: &str, reason: String) -> Error {
    Error::WriteRejected {
        path: path.to_string(),
        reason,
    }
}
