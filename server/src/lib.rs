//! A hierarchical key-value log served over gRPC.
//!
//! Keys are slash-delimited paths. Every mutation is appended to an event
//! log which watchers tail, filtered to the subtree they asked for.

pub mod db;
pub mod grpc;
pub mod models;
pub mod storage;
