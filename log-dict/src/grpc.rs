//! [`LogClient`] over the log-server's gRPC API.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use log_server_types::logstore::log_store_client::LogStoreClient;
use log_server_types::logstore::{GetRequest, Node, PutDirRequest, PutRequest, WatchRequest};
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Status};
use tracing::{debug, warn};

use crate::client::{LogClient, WatchEvent, WatchStream};
use crate::error::Error;
use crate::node::LogNode;

const RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// A client for a remote log-server.
///
/// The connection is established lazily, so creating the client succeeds
/// even while the server is down; calls made in the meantime fail with
/// [`Error::Unreachable`].
///
/// Watch streams survive server restarts: after a failure they emit
/// [`WatchEvent::Disconnected`], reconnect every reconnect interval and
/// resume after the last index they delivered. A watch that has not
/// delivered anything yet starts no later than the latest
/// [`read`](LogClient::read) of the same path, so nothing committed after
/// that read is missed.
#[derive(Clone)]
pub struct GrpcLogClient {
    client: LogStoreClient<Channel>,
    read_index: Arc<Mutex<HashMap<String, u64>>>,
    reconnect_interval: Duration,
}

impl GrpcLogClient {
    /// Creates a client for the server at `addr` (e.g. `"localhost:50051"`).
    pub fn connect(addr: impl Into<ServerAddr>) -> Result<Self, Error> {
        let server_addr = addr.into();
        let endpoint = Endpoint::from_shared(format!("http://{}", server_addr.0))?;
        let channel = endpoint.connect_lazy();

        Ok(Self {
            client: LogStoreClient::new(channel),
            read_index: Arc::new(Mutex::new(HashMap::new())),
            reconnect_interval: RECONNECT_INTERVAL,
        })
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    fn record_read(&self, path: &str, index: u64) {
        let mut read_index = self.read_index.lock().unwrap_or_else(PoisonError::into_inner);
        read_index.insert(path.trim_matches('/').to_string(), index);
    }
}

#[async_trait]
impl LogClient for GrpcLogClient {
    async fn read(&self, path: &str) -> Result<Option<LogNode>, Error> {
        let mut client = self.client.clone();
        let response = client
            .get(GetRequest {
                key: path.to_string(),
            })
            .await
            .map_err(read_error)?
            .into_inner();

        self.record_read(path, response.index);
        Ok(response.node.map(LogNode::from))
    }

    async fn write(&self, path: &str, value: &str) -> Result<(), Error> {
        let mut client = self.client.clone();
        client
            .put(PutRequest {
                key: path.to_string(),
                value: value.to_string(),
            })
            .await
            .map_err(|status| write_error(path, status))?;

        Ok(())
    }

    async fn create_directory(&self, path: &str) -> Result<(), Error> {
        let mut client = self.client.clone();
        client
            .put_dir(PutDirRequest {
                key: path.to_string(),
            })
            .await
            .map_err(|status| write_error(path, status))?;

        Ok(())
    }

    fn watch(&self, path: &str) -> WatchStream {
        let mut client = self.client.clone();
        let read_index = Arc::clone(&self.read_index);
        let key = path.trim_matches('/').to_string();
        let interval = self.reconnect_interval;

        Box::pin(async_stream::stream! {
            let mut last_index: Option<u64> = None;

            loop {
                let since_index = match last_index {
                    Some(index) => index,
                    None => {
                        // anchor the first subscription: never start later
                        // than the latest read of this path
                        let head = match client.get(GetRequest { key: key.clone() }).await {
                            Ok(response) => response.into_inner().index,
                            Err(status) => {
                                debug!(key = %key, error = %status, "watch could not connect");
                                yield WatchEvent::Disconnected;
                                tokio::time::sleep(interval).await;
                                continue;
                            }
                        };
                        let read = read_index
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .get(&key)
                            .copied();
                        read.map_or(head, |read| read.min(head))
                    }
                };

                let request = WatchRequest {
                    key: key.clone(),
                    since_index: Some(since_index),
                };

                match client.watch(request).await {
                    Ok(response) => {
                        debug!(key = %key, since = since_index, "watch established");
                        last_index = Some(since_index);
                        let mut events = response.into_inner();

                        while let Some(result) = events.next().await {
                            match result {
                                Ok(event) => {
                                    last_index = Some(event.index);
                                    if let Some(node) = event.node {
                                        yield WatchEvent::Changed(LogNode::from(node));
                                    }
                                }
                                Err(status) => {
                                    warn!(key = %key, error = %status, "watch stream failed");
                                    break;
                                }
                            }
                        }

                        yield WatchEvent::Disconnected;
                    }
                    Err(status) => {
                        debug!(key = %key, error = %status, "watch could not connect");
                        yield WatchEvent::Disconnected;
                    }
                }

                tokio::time::sleep(interval).await;
            }
        })
    }
}

impl From<Node> for LogNode {
    fn from(node: Node) -> Self {
        Self {
            key: node.key,
            value: node.value,
            dir: node.dir,
            children: node.children.into_iter().map(LogNode::from).collect(),
        }
    }
}

fn read_error(status: Status) -> Error {
    match status.code() {
        Code::Unavailable => Error::Unreachable(status.message().to_string()),
        _ => Error::Status(status),
    }
}

fn write_error(path: &str, status: Status) -> Error {
    match status.code() {
        Code::Unavailable => Error::Unreachable(status.message().to_string()),
        Code::FailedPrecondition | Code::InvalidArgument => Error::WriteRejected {
            path: path.to_string(),
            reason: status.message().to_string(),
        },
        _ => Error::Status(status),
    }
}

/// Server address wrapper for type-safe connection.
#[derive(Clone)]
pub struct ServerAddr(pub String);

impl From<String> for ServerAddr {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ServerAddr {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
