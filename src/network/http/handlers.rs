use std::convert::Infallible;

use futures::SinkExt;
use futures::StreamExt;
use serde::Deserialize;
use serde::Serialize;
use tokio::select;
use tracing::debug;
use tracing::error;
use tracing::warn;
use warp::http::StatusCode;
use warp::hyper::body::Bytes;
use warp::reply::Reply;
use warp::reply::Response;
use warp::sse::Event;
use warp::ws::Message;
use warp::ws::WebSocket;
use warp::ws::Ws;

use crate::constants::SSE_EVENT_ERROR;
use crate::constants::SSE_EVENT_RESOURCE;
use crate::ChangeEvent;
use crate::Error;
use crate::ErrorCode;
use crate::ListQuery;
use crate::OwnerRef;
use crate::Resource;
use crate::ResourceApi;
use crate::ResourceError;
use crate::Result;
use crate::WatchAction;
use crate::WatchRequest;
use crate::WatchStream;

/// Query string shared by every `/v1/resources` route
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ResourceQuery {
    #[serde(default)]
    pub kind: String,
    pub id: Option<String>,
    pub owner_kind: Option<String>,
    pub owner_id: Option<String>,
    pub action: Option<String>,
    pub start_revision: Option<u64>,
}

impl ResourceQuery {
    fn owner(&self) -> Result<Option<OwnerRef>> {
        match (&self.owner_kind, &self.owner_id) {
            (None, None) => Ok(None),
            (Some(kind), Some(id)) => Ok(Some(OwnerRef::new(kind.clone(), id.clone()))),
            _ => Err(ResourceError::InvalidArgument("owner_kind and owner_id must be given together".into()).into()),
        }
    }

    fn id(&self) -> &str {
        self.id.as_deref().unwrap_or_default()
    }

    fn list_query(&self) -> Result<ListQuery> {
        Ok(ListQuery {
            kind: self.kind.clone(),
            id: self.id.clone(),
            owner: self.owner()?,
        })
    }

    fn watch_request(&self) -> Result<WatchRequest> {
        let action = match &self.action {
            Some(raw) => raw.parse::<WatchAction>()?,
            None => WatchAction::All,
        };
        Ok(WatchRequest {
            kind: self.kind.clone(),
            id: self.id.clone(),
            owner: self.owner()?,
            action,
            start_revision: self.start_revision,
        })
    }
}

/// JSON error body: `{code, message}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&Error> for ErrorBody {
    fn from(e: &Error) -> Self {
        ErrorBody {
            code: e.code(),
            message: e.to_string(),
        }
    }
}

/// One watch frame, identical for SSE payloads and WebSocket messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum WatchFrame {
    Resource(ChangeEvent),
    Error(ErrorBody),
}

pub(crate) fn error_reply(e: &Error) -> Response {
    let body = ErrorBody::from(e);
    let status = StatusCode::from_u16(body.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!("http request failed: {:?}", e);
    } else {
        debug!("http request rejected: {}", e);
    }
    warp::reply::with_status(warp::reply::json(&body), status).into_response()
}

fn json_reply<T: Serialize>(
    result: Result<T>,
    status: StatusCode,
) -> Response {
    match result {
        Ok(value) => warp::reply::with_status(warp::reply::json(&value), status).into_response(),
        Err(e) => error_reply(&e),
    }
}

pub(crate) async fn list(
    query: ResourceQuery,
    api: ResourceApi,
) -> std::result::Result<Response, Infallible> {
    let result = match query.list_query() {
        Ok(q) => api.list(q).await,
        Err(e) => Err(e),
    };
    Ok(json_reply(result, StatusCode::OK))
}

pub(crate) async fn create(
    resource: Resource,
    api: ResourceApi,
) -> std::result::Result<Response, Infallible> {
    Ok(json_reply(api.create(resource).await, StatusCode::CREATED))
}

/// The raw body is the patch document.
pub(crate) async fn patch(
    query: ResourceQuery,
    body: Bytes,
    api: ResourceApi,
) -> std::result::Result<Response, Infallible> {
    let result = match query.owner() {
        Ok(owner) => api.patch(&query.kind, query.id(), owner.as_ref(), &body).await,
        Err(e) => Err(e),
    };
    Ok(json_reply(result, StatusCode::OK))
}

pub(crate) async fn delete(
    query: ResourceQuery,
    api: ResourceApi,
) -> std::result::Result<Response, Infallible> {
    Ok(json_reply(api.delete(&query.kind, query.id()).await, StatusCode::OK))
}

async fn open_watch(
    query: &ResourceQuery,
    api: &ResourceApi,
) -> Result<WatchStream> {
    let request = query.watch_request()?;
    api.watch(request).await
}

/// Server-sent events: `event: resource` per change, `event: error` last.
pub(crate) async fn watch_sse(
    query: ResourceQuery,
    api: ResourceApi,
) -> std::result::Result<Response, Infallible> {
    let stream = match open_watch(&query, &api).await {
        Ok(stream) => stream,
        Err(e) => return Ok(error_reply(&e)),
    };
    let events = stream.map(|item| sse_event(frame(item)));
    Ok(warp::sse::reply(warp::sse::keep_alive().stream(events)).into_response())
}

/// WebSocket upgrade on the events path, carrying JSON [`WatchFrame`]s.
pub(crate) async fn watch_ws(
    ws: Ws,
    query: ResourceQuery,
    api: ResourceApi,
) -> std::result::Result<Response, Infallible> {
    let stream = match open_watch(&query, &api).await {
        Ok(stream) => stream,
        Err(e) => return Ok(error_reply(&e)),
    };
    Ok(ws.on_upgrade(move |socket| forward_ws(socket, stream)).into_response())
}

fn frame(item: Result<ChangeEvent>) -> WatchFrame {
    match item {
        Ok(event) => WatchFrame::Resource(event),
        Err(e) => WatchFrame::Error(ErrorBody::from(&e)),
    }
}

fn sse_event(frame: WatchFrame) -> std::result::Result<Event, serde_json::Error> {
    match frame {
        WatchFrame::Resource(event) => Event::default()
            .event(SSE_EVENT_RESOURCE)
            .id(event.revision.to_string())
            .json_data(&event),
        WatchFrame::Error(body) => Event::default().event(SSE_EVENT_ERROR).json_data(&body),
    }
}

async fn forward_ws(
    socket: WebSocket,
    mut stream: WatchStream,
) {
    let watcher_id = stream.id();
    let (mut tx, mut rx) = socket.split();
    loop {
        let item = select! {
            incoming = rx.next() => match incoming {
                Some(Ok(msg)) if !msg.is_close() => continue,
                _ => {
                    debug!(watcher_id, "websocket watcher closed by client");
                    return;
                }
            },
            item = stream.next() => item,
        };
        let Some(item) = item else {
            break;
        };
        let terminal = item.is_err();
        let text = match serde_json::to_string(&frame(item)) {
            Ok(text) => text,
            Err(e) => {
                error!(watcher_id, "could not encode watch frame: {}", e);
                break;
            }
        };
        if let Err(e) = tx.send(Message::text(text)).await {
            warn!(watcher_id, "websocket send failed: {}", e);
            return;
        }
        if terminal {
            break;
        }
    }
    let _ = tx.send(Message::close()).await;
}
