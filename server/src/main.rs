use std::env;
use std::sync::Arc;
use tonic::transport::Server;
use tracing::info;

use log_server::{db, grpc, storage};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let addr = args
        .get(1)
        .cloned()
        .unwrap_or_else(|| "127.0.0.1:50051".to_string());
    let database_url = args
        .get(2)
        .cloned()
        .unwrap_or_else(|| "sqlite::memory:".to_string());

    let pool = db::init_pool(&database_url).await?;
    let storage = Arc::new(storage::Storage::new(pool));
    let server = grpc::create_server(storage);

    info!(%addr, %database_url, "log server listening");
    Server::builder().add_service(server).serve(addr.parse()?).await?;

    Ok(())
}
