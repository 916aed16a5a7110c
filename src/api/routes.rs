use std::sync::Arc;
use warp::http::StatusCode;
use warp::Filter;

use crate::exec::{ExecutionClient, ExecutionRequest};
use crate::remarks::{Remark, RemarkStore};
use crate::session::SessionServer;
use super::websocket;

/// Languages the editor offers; executions in anything else are the
/// gateway's problem to reject.
pub const SUPPORTED_LANGUAGES: &[&str] =
    &["javascript", "python", "java", "cpp", "typescript", "c"];

pub fn websocket_route(
    server: Arc<SessionServer>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("ws")
        .and(warp::ws())
        .and(with_server(server))
        .map(|ws: warp::ws::Ws, server: Arc<SessionServer>| {
            ws.on_upgrade(move |websocket| websocket::handle_websocket(websocket, server))
        })
}

pub fn health_check() -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("health")
        .and(warp::get())
        .map(|| {
            warp::reply::json(&serde_json::json!({
                "status": "healthy",
                "service": "CodeCollab Server",
                "version": "1.0.0"
            }))
        })
}

pub fn config_endpoint() -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("config")
        .and(warp::get())
        .map(|| {
            warp::reply::json(&serde_json::json!({
                "languages": SUPPORTED_LANGUAGES,
                "websocketPath": "/ws",
            }))
        })
}

/// POST /compile — point-to-point execution, never room-broadcast.
/// The response body is the gateway outcome verbatim: either an error
/// message or a status/time/memory/output tuple.
pub fn compile_route(
    exec_client: Arc<ExecutionClient>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("compile")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_exec_client(exec_client))
        .then(
            |request: ExecutionRequest, exec_client: Arc<ExecutionClient>| async move {
                let outcome = exec_client.execute(&request).await;
                warp::reply::json(&outcome)
            },
        )
}

/// GET /api/remarks/:roomId — full ordered replay, used once at join time.
pub fn remark_fetch_route(
    store: Arc<RemarkStore>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("api" / "remarks" / String)
        .and(warp::get())
        .and(with_store(store))
        .then(|room_id: String, store: Arc<RemarkStore>| async move {
            let remarks = store.list(&room_id).await;
            warp::reply::json(&remarks)
        })
}

/// POST /api/remarks — relay to room peers, then persist.
///
/// Delivery and durability are decoupled: peers may see the remark before
/// the store acknowledges it, and a store failure does not recall the
/// broadcast (the author's optimistic echo stands either way).
pub fn remark_post_route(
    store: Arc<RemarkStore>,
    server: Arc<SessionServer>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("api" / "remarks")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_store(store))
        .and(with_server(server))
        .then(
            |remark: Remark, store: Arc<RemarkStore>, server: Arc<SessionServer>| async move {
                server.relay_remark(&remark).await;

                match store.append(&remark).await {
                    Ok(stored) => {
                        warp::reply::with_status(warp::reply::json(&stored), StatusCode::OK)
                    }
                    Err(e) => {
                        tracing::error!(
                            room_id = %remark.room_id,
                            error = %e,
                            "Failed to persist remark"
                        );
                        warp::reply::with_status(
                            warp::reply::json(&serde_json::json!({ "error": e.to_string() })),
                            StatusCode::BAD_GATEWAY,
                        )
                    }
                }
            },
        )
}

fn with_server(
    server: Arc<SessionServer>,
) -> impl Filter<Extract = (Arc<SessionServer>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || server.clone())
}

fn with_exec_client(
    exec_client: Arc<ExecutionClient>,
) -> impl Filter<Extract = (Arc<ExecutionClient>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || exec_client.clone())
}

fn with_store(
    store: Arc<RemarkStore>,
) -> impl Filter<Extract = (Arc<RemarkStore>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || store.clone())
}
