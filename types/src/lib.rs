//! Protobuf and gRPC definitions shared by the log server and its clients.

pub mod logstore {
    tonic::include_proto!("logstore");
}
