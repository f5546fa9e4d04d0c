use crate::models::Node;
use crate::storage::{Storage, StorageError};
use futures_util::stream::{Stream, StreamExt};
use log_server_types::logstore::{
    log_store_server::{LogStore, LogStoreServer},
    GetRequest, GetResponse, Node as ProtoNode, PutDirRequest, PutDirResponse, PutRequest,
    PutResponse, WatchEvent, WatchRequest,
};
use std::pin::Pin;
use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::{debug, warn};

#[derive(Clone)]
pub struct LogStoreService {
    storage: Arc<Storage>,
}

impl LogStoreService {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

type WatchStream = Pin<Box<dyn Stream<Item = Result<WatchEvent, Status>> + Send>>;

#[tonic::async_trait]
impl LogStore for LogStoreService {
    type WatchStream = WatchStream;

    async fn get(&self, request: Request<GetRequest>) -> Result<Response<GetResponse>, Status> {
        let req = request.into_inner();
        let (node, index) = self.storage.get(&req.key).await.map_err(to_status)?;

        Ok(Response::new(GetResponse {
            node: node.map(to_proto),
            index,
        }))
    }

    async fn put(&self, request: Request<PutRequest>) -> Result<Response<PutResponse>, Status> {
        let req = request.into_inner();
        let event = self
            .storage
            .put(&req.key, req.value)
            .await
            .map_err(to_status)?;
        debug!(key = %event.key, index = event.ordinal, "put");

        Ok(Response::new(PutResponse {
            index: event.ordinal,
        }))
    }

    async fn put_dir(
        &self,
        request: Request<PutDirRequest>,
    ) -> Result<Response<PutDirResponse>, Status> {
        let req = request.into_inner();
        let index = self.storage.put_dir(&req.key).await.map_err(to_status)?;
        debug!(key = %req.key, index, "put dir");

        Ok(Response::new(PutDirResponse { index }))
    }

    async fn watch(
        &self,
        request: Request<WatchRequest>,
    ) -> Result<Response<Self::WatchStream>, Status> {
        let req = request.into_inner();
        let stream = self
            .storage
            .subscribe_from(&req.key, req.since_index)
            .await
            .map_err(to_status)?;
        debug!(key = %req.key, since = ?req.since_index, "watch");

        let output = async_stream::stream! {
            let mut events = stream;
            while let Some(result) = events.next().await {
                match result {
                    Ok(event) => {
                        yield Ok(WatchEvent {
                            index: event.ordinal,
                            node: Some(ProtoNode {
                                key: event.key,
                                value: event.value,
                                dir: event.dir,
                                children: Vec::new(),
                                modified_index: event.ordinal,
                            }),
                        });
                    }
                    Err(e) => {
                        yield Err(to_status(e));
                        break;
                    }
                }
            }
        };

        Ok(Response::new(Box::pin(output)))
    }
}

fn to_proto(node: Node) -> ProtoNode {
    ProtoNode {
        key: node.key,
        value: node.value,
        dir: node.dir,
        children: node.children.into_iter().map(to_proto).collect(),
        modified_index: node.modified,
    }
}

fn to_status(err: StorageError) -> Status {
    match err {
        StorageError::InvalidKey(_) => Status::invalid_argument(err.to_string()),
        StorageError::NotADirectory(_) | StorageError::IsADirectory(_) => {
            Status::failed_precondition(err.to_string())
        }
        StorageError::Sql(e) => {
            warn!(error = %e, "storage failure");
            Status::internal(format!("Database error: {}", e))
        }
    }
}

pub fn create_server(storage: Arc<Storage>) -> LogStoreServer<LogStoreService> {
    LogStoreServer::new(LogStoreService::new(storage))
}
