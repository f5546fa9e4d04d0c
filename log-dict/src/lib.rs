//! A key-value dictionary kept in sync with a remote hierarchical log.
//!
//! `log-dict` mirrors one keyspace (a subtree) of a remote log into a local
//! `Dict`. Reads never touch the network; writes are applied locally and
//! forwarded to the log. A background watch keeps the local copy current.
//!
//! # Features
//!
//! - Bootstrap from a snapshot of the keyspace, then follow changes
//! - Optimistic local writes, never rolled back
//! - Degraded startup: an unreachable log yields an empty dict that fills
//!   itself once the log comes back
//! - Pluggable backends through the [`LogClient`] trait, with an in-memory
//!   log and a gRPC client for the log-server included
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use log_dict::{Dict, MemoryLogClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let log = Arc::new(MemoryLogClient::new());
//!     let (dict, _) = Dict::open("globe", log).await;
//!
//!     dict.put("key1", "asdf").await?;
//!     assert_eq!(dict.get("key1")?, "asdf");
//!
//!     dict.close().await;
//!     Ok(())
//! }
//! ```

mod cache;
mod client;
mod config;
mod dict;
mod error;
mod grpc;
mod memory;
mod node;
mod sync;

pub use cache::DictState;
pub use client::{LogClient, WatchEvent, WatchStream};
pub use config::DictConfig;
pub use dict::Dict;
pub use error::Error;
pub use grpc::{GrpcLogClient, ServerAddr};
pub use memory::MemoryLogClient;
pub use node::{LogNode, join_key, local_key};
