//! Key-value dictionary mirrored from a keyspace of a remote log.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{Cache, DictState};
use crate::client::LogClient;
use crate::config::DictConfig;
use crate::error::Error;
use crate::node::{LogNode, join_key, same_path};
use crate::sync::{RetryTask, WatchTask};

/// A string dictionary backed by a keyspace of a remote hierarchical log.
///
/// Reads are served from a local cache. The cache is populated by a
/// bootstrap read of the keyspace and kept current by a watch
/// subscription consumed on a background task.
///
/// # Consistency
///
/// Writes are optimistic: [`Dict::put`] updates the local cache first and
/// then forwards the write to the log. A failed remote write is reported to
/// the caller but the local value stays in place until a later watch event
/// or `put` replaces it. Re-issuing the `put` is always safe.
///
/// # Key Derivation
///
/// The cache is keyed by the final `/` segment of each full key. Deeper
/// hierarchy under the keyspace is flattened, and two paths sharing a leaf
/// name overwrite each other.
///
/// # Degraded Startup
///
/// If the log is unreachable when the dict is opened, the dict is returned
/// anyway, empty and in [`DictState::Initializing`], along with the error.
/// A background task retries the bootstrap every
/// [`DictConfig::retry_interval`] until it succeeds or the dict is closed.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use log_dict::{Dict, GrpcLogClient};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = Arc::new(GrpcLogClient::connect("localhost:50051")?);
///     let (dict, init_error) = Dict::open("services", client).await;
///     if let Some(e) = init_error {
///         eprintln!("log unavailable, serving an empty dict: {}", e);
///     }
///
///     dict.put("web", "10.0.0.1:80").await?;
///     assert_eq!(dict.get("web")?, "10.0.0.1:80");
///
///     dict.close().await;
///     Ok(())
/// }
/// ```
pub struct Dict {
    inner: Arc<DictInner>,
    shutdown: watch::Sender<bool>,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

pub(crate) struct DictInner {
    pub(crate) keyspace: String,
    pub(crate) client: Arc<dyn LogClient>,
    pub(crate) cache: Cache,
    pub(crate) config: DictConfig,
}

impl Dict {
    /// Opens a dict over `keyspace` with the default configuration.
    ///
    /// See [`Dict::open_with_config`].
    pub async fn open(
        keyspace: impl Into<String>,
        client: Arc<dyn LogClient>,
    ) -> (Self, Option<Error>) {
        Self::open_with_config(keyspace, client, DictConfig::default()).await
    }

    /// Opens a dict over `keyspace`.
    ///
    /// Creates the keyspace directory if needed, subscribes to changes,
    /// then performs one blocking bootstrap read. If that read fails the
    /// dict is still returned, together with the error, and a background
    /// task keeps retrying.
    ///
    /// Changes delivered while the bootstrap is in flight are applied at
    /// once and take precedence over the snapshot, so they are never lost
    /// to it.
    pub async fn open_with_config(
        keyspace: impl Into<String>,
        client: Arc<dyn LogClient>,
        config: DictConfig,
    ) -> (Self, Option<Error>) {
        let keyspace = keyspace.into().trim_end_matches('/').to_string();
        let inner = Arc::new(DictInner {
            keyspace,
            client,
            cache: Cache::new(),
            config,
        });
        let (shutdown, _) = watch::channel(false);

        inner.ensure_keyspace().await;

        let stream = inner.client.watch(&inner.keyspace);
        let watch_task = WatchTask::new(Arc::clone(&inner), stream, shutdown.subscribe());
        let mut tasks = vec![tokio::spawn(watch_task.run())];

        let init_error = match inner.bootstrap().await {
            Ok(()) => None,
            Err(e) => {
                warn!(keyspace = %inner.keyspace, error = %e, "error initializing dict, retrying");
                let retry_task = RetryTask::new(Arc::clone(&inner), shutdown.subscribe());
                tasks.push(tokio::spawn(retry_task.run()));
                Some(e)
            }
        };

        let dict = Self {
            inner,
            shutdown,
            tasks: tokio::sync::Mutex::new(tasks),
        };

        (dict, init_error)
    }

    /// Gets the value for a key from the local cache.
    pub fn get(&self, key: &str) -> Result<String, Error> {
        self.inner.cache.get(key).ok_or_else(|| Error::NotFound {
            keyspace: self.inner.keyspace.clone(),
            key: key.to_string(),
        })
    }

    /// Stores a value locally, then writes it to the log.
    ///
    /// The local value is visible as soon as this is called and is kept
    /// even if the remote write fails.
    pub async fn put(&self, key: &str, value: impl Into<String>) -> Result<(), Error> {
        let value = value.into();
        let path = join_key(&self.inner.keyspace, key);

        if !self.inner.cache.set(&path, value.clone()) {
            return Err(Error::Closed(self.inner.keyspace.clone()));
        }

        self.inner.client.write(&path, &value).await
    }

    /// Stops applying changes and waits for the background tasks to exit.
    ///
    /// Calling `close` more than once is harmless.
    pub async fn close(&self) {
        self.inner.cache.close();
        self.shutdown.send_replace(true);

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        if tasks.is_empty() {
            return;
        }

        for task in tasks {
            if let Err(e) = task.await {
                warn!(keyspace = %self.inner.keyspace, error = %e, "background task failed");
            }
        }

        info!(keyspace = %self.inner.keyspace, "dict closed");
    }

    pub fn keyspace(&self) -> &str {
        &self.inner.keyspace
    }

    pub fn state(&self) -> DictState {
        self.inner.cache.state()
    }

    /// Checks if the local cache contains a key.
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.cache.contains_key(key)
    }

    /// Returns the number of entries in the local cache.
    pub fn len(&self) -> usize {
        self.inner.cache.len()
    }

    /// Returns `true` if the local cache contains no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.cache.is_empty()
    }
}

impl Drop for Dict {
    fn drop(&mut self) {
        self.inner.cache.close();
        self.shutdown.send_replace(true);
    }
}

impl DictInner {
    /// Creates the keyspace directory. Failures are expected while the log
    /// is unreachable and are only logged.
    pub(crate) async fn ensure_keyspace(&self) {
        if let Err(e) = self.client.create_directory(&self.keyspace).await {
            debug!(keyspace = %self.keyspace, error = %e, "could not create keyspace");
        }
    }

    /// Loads every value under the keyspace into the cache.
    pub(crate) async fn bootstrap(&self) -> Result<(), Error> {
        let applied = match self.client.read(&self.keyspace).await? {
            None => {
                self.ensure_keyspace().await;
                self.cache.bootstrap(std::iter::empty::<(&str, &str)>())
            }
            Some(node) => self.cache.bootstrap(
                node.leaves()
                    .into_iter()
                    .map(|leaf| (leaf.key.as_str(), leaf.value.as_str())),
            ),
        };

        if !applied {
            return Err(Error::Closed(self.keyspace.clone()));
        }

        info!(keyspace = %self.keyspace, entries = self.cache.len(), "dict bootstrapped");
        Ok(())
    }

    /// Applies one watch event. Directory nodes and the keyspace node
    /// itself carry no value and are skipped.
    pub(crate) fn apply(&self, node: LogNode) {
        if node.is_dir() || same_path(&node.key, &self.keyspace) {
            debug!(keyspace = %self.keyspace, key = %node.key, "skipping directory event");
            return;
        }

        let LogNode { key, value, .. } = node;
        if self.cache.set(&key, value) {
            debug!(keyspace = %self.keyspace, key = %key, "applied change");
        }
    }
}
