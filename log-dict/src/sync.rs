//! Background tasks that keep the cache in step with the log.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::Error;
use crate::client::{WatchEvent, WatchStream};
use crate::dict::DictInner;

/// Consumes the watch subscription and applies every change to the cache
/// until shutdown.
pub(crate) struct WatchTask {
    inner: Arc<DictInner>,
    stream: WatchStream,
    shutdown: watch::Receiver<bool>,
}

impl WatchTask {
    pub(crate) fn new(inner: Arc<DictInner>, stream: WatchStream, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            inner,
            stream,
            shutdown,
        }
    }

    pub(crate) async fn run(self) {
        let WatchTask {
            inner,
            mut stream,
            mut shutdown,
        } = self;

        loop {
            if *shutdown.borrow() || inner.cache.is_closed() {
                break;
            }

            let event = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                event = stream.next() => event,
            };

            match event {
                Some(WatchEvent::Changed(node)) => inner.apply(node),
                Some(WatchEvent::Disconnected) => {
                    warn!(keyspace = %inner.keyspace, "watch disconnected from log");
                }
                None => {
                    warn!(keyspace = %inner.keyspace, "watch stream ended, resubscribing");
                    if !pause(&mut shutdown, inner.config.retry_interval).await {
                        break;
                    }
                    stream = inner.client.watch(&inner.keyspace);
                }
            }
        }

        debug!(keyspace = %inner.keyspace, "watch loop stopped");
    }
}

/// Re-attempts keyspace creation and bootstrap at a fixed interval until
/// one succeeds or the dict is closed.
pub(crate) struct RetryTask {
    inner: Arc<DictInner>,
    shutdown: watch::Receiver<bool>,
}

impl RetryTask {
    pub(crate) fn new(inner: Arc<DictInner>, shutdown: watch::Receiver<bool>) -> Self {
        Self { inner, shutdown }
    }

    pub(crate) async fn run(self) {
        let RetryTask {
            inner,
            mut shutdown,
        } = self;

        loop {
            if !pause(&mut shutdown, inner.config.retry_interval).await || inner.cache.is_closed() {
                break;
            }

            let attempt = async {
                inner.ensure_keyspace().await;
                inner.bootstrap().await
            };

            let result = tokio::select! {
                _ = shutdown.changed() => break,
                result = attempt => result,
            };

            match result {
                Ok(()) => {
                    info!(keyspace = %inner.keyspace, "initialized dict after error");
                    break;
                }
                Err(Error::Closed(_)) => break,
                Err(e) => {
                    warn!(keyspace = %inner.keyspace, error = %e, "error initializing dict, retrying");
                }
            }
        }

        debug!(keyspace = %inner.keyspace, "retry loop stopped");
    }
}

/// Sleeps for `interval`. Returns `false` if shutdown was signalled first.
async fn pause(shutdown: &mut watch::Receiver<bool>, interval: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(interval) => true,
        _ = shutdown.changed() => false,
    }
}
