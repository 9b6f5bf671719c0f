//! REST front end.
//!
//! | Route                          | Operation                        |
//! |--------------------------------|----------------------------------|
//! | `GET /v1/resources`            | list (`kind,id,owner_kind,owner_id`) |
//! | `POST /v1/resources`           | create (JSON body)               |
//! | `PATCH /v1/resources`          | patch (raw body)                 |
//! | `DELETE /v1/resources`         | delete (`kind,id`)               |
//! | `GET /v1/resources/events`     | watch, SSE or WebSocket upgrade  |
//!
//! Errors are JSON `{code, message}` with the matching HTTP status.

mod handlers;

#[cfg(test)]
mod http_test;

pub use handlers::ErrorBody;
pub use handlers::ResourceQuery;
pub use handlers::WatchFrame;

use std::convert::Infallible;
use std::net::SocketAddr;

use tokio::sync::watch;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;
use warp::http::StatusCode;
use warp::Filter;
use warp::Rejection;
use warp::Reply;

use crate::constants::HTTP_EVENTS_PATH;
use crate::constants::HTTP_RESOURCES_PATH;
use crate::ErrorCode;
use crate::ResourceApi;
use crate::Result;
use crate::SystemError;

fn with_api(api: ResourceApi) -> impl Filter<Extract = (ResourceApi,), Error = Infallible> + Clone {
    warp::any().map(move || api.clone())
}

/// Every `/v1/resources` route with CORS and JSON rejections applied.
pub fn routes(api: ResourceApi) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let resources = warp::path("v1").and(warp::path(HTTP_RESOURCES_PATH));
    let collection = resources.and(warp::path::end());
    let events = resources.and(warp::path(HTTP_EVENTS_PATH)).and(warp::path::end());

    let list = collection
        .and(warp::get())
        .and(warp::query::<ResourceQuery>())
        .and(with_api(api.clone()))
        .and_then(handlers::list);

    let create = collection
        .and(warp::post())
        .and(warp::body::json())
        .and(with_api(api.clone()))
        .and_then(handlers::create);

    let patch = collection
        .and(warp::patch())
        .and(warp::query::<ResourceQuery>())
        .and(warp::body::bytes())
        .and(with_api(api.clone()))
        .and_then(handlers::patch);

    let delete = collection
        .and(warp::delete())
        .and(warp::query::<ResourceQuery>())
        .and(with_api(api.clone()))
        .and_then(handlers::delete);

    let watch_ws = events
        .and(warp::get())
        .and(warp::ws())
        .and(warp::query::<ResourceQuery>())
        .and(with_api(api.clone()))
        .and_then(handlers::watch_ws);

    let watch_sse = events
        .and(warp::get())
        .and(warp::query::<ResourceQuery>())
        .and(with_api(api))
        .and_then(handlers::watch_sse);

    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["GET", "POST", "PATCH", "DELETE", "OPTIONS"])
        .allow_headers(vec!["content-type"]);

    watch_ws
        .or(watch_sse)
        .or(list)
        .or(create)
        .or(patch)
        .or(delete)
        .with(cors)
        .recover(handle_rejection)
}

/// Maps warp's own rejections (bad query, bad JSON, unknown route) onto the
/// JSON error body.
async fn handle_rejection(rejection: Rejection) -> std::result::Result<impl Reply, Infallible> {
    let (status, code, message) = if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, ErrorCode::NotFound, "no such route".to_string())
    } else if let Some(e) = rejection.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, ErrorCode::InvalidArgument, e.to_string())
    } else if let Some(e) = rejection.find::<warp::reject::InvalidQuery>() {
        (StatusCode::BAD_REQUEST, ErrorCode::InvalidArgument, e.to_string())
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            ErrorCode::InvalidArgument,
            "method not allowed".to_string(),
        )
    } else if let Some(e) = rejection.find::<warp::cors::CorsForbidden>() {
        (StatusCode::FORBIDDEN, ErrorCode::InvalidArgument, e.to_string())
    } else {
        warn!("unhandled rejection: {:?}", rejection);
        (StatusCode::BAD_REQUEST, ErrorCode::InvalidArgument, format!("{rejection:?}"))
    };
    Ok(warp::reply::with_status(
        warp::reply::json(&ErrorBody { code, message }),
        status,
    ))
}

pub(crate) async fn start_http_server(
    api: ResourceApi,
    listen_address: SocketAddr,
    mut shutdown_signal: watch::Receiver<()>,
) -> Result<()> {
    let (addr, server) = warp::serve(routes(api))
        .try_bind_with_graceful_shutdown(listen_address, async move {
            let _ = shutdown_signal.changed().await;
            warn!("Stopping HTTP server. {}", listen_address);
        })
        .map_err(|e| {
            error!("error to start http server :{:?}.", e);
            SystemError::ServerStartFailed(e.to_string())
        })?;
    info!("HTTP front end listening on {}", addr);
    server.await;
    debug!("http service finished!");
    Ok(())
}
