mod api;
mod config;
mod error;
mod exec;
mod remarks;
mod session;

use std::sync::Arc;
use warp::Filter;

use config::Config;
use exec::ExecutionClient;
use remarks::RemarkStore;
use session::SessionServer;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();

    let server = Arc::new(SessionServer::new());
    server.clone().start_typing_expiry_processing();

    let exec_client = Arc::new(
        ExecutionClient::new(&config.execution).expect("Failed to create execution client"),
    );
    let remark_store =
        Arc::new(RemarkStore::new(&config.remarks).expect("Failed to create remark store"));

    let routes = api::routes::websocket_route(server.clone())
        .or(api::routes::health_check())
        .or(api::routes::config_endpoint())
        .or(api::routes::compile_route(exec_client))
        .or(api::routes::remark_fetch_route(remark_store.clone()))
        .or(api::routes::remark_post_route(remark_store, server));

    let bind_address = config.bind_address();
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        "CodeCollab server listening"
    );

    warp::serve(routes).run(bind_address).await;
}
