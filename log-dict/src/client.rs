//! The capability set a [`Dict`](crate::Dict) needs from a remote log.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::error::Error;
use crate::node::LogNode;

/// One item of a watch subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A node under the watched path changed.
    Changed(LogNode),
    /// The backend could not be reached. The subscription stays open.
    Disconnected,
}

/// A lazy, infinite feed of changes under a path. Dropping it cancels the
/// subscription.
pub type WatchStream = Pin<Box<dyn Stream<Item = WatchEvent> + Send>>;

/// Client for a remote hierarchical log store.
#[async_trait]
pub trait LogClient: Send + Sync {
    /// Reads a node and its children. A missing path is `Ok(None)`; a
    /// backend that cannot be contacted is [`Error::Unreachable`].
    async fn read(&self, path: &str) -> Result<Option<LogNode>, Error>;

    /// Writes a value node, overwriting any previous value.
    async fn write(&self, path: &str, value: &str) -> Result<(), Error>;

    /// Creates a directory. Succeeds if it already exists.
    async fn create_directory(&self, path: &str) -> Result<(), Error>;

    /// Subscribes to changes under `path`.
    fn watch(&self, path: &str) -> WatchStream;
}
