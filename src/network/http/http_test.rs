use std::time::Duration;

use serde_json::json;
use warp::http::StatusCode;

use super::*;
use crate::kind;
use crate::test_utils::mem_api;
use crate::ListResponse;
use crate::Resource;
use crate::WatchAction;
use crate::WatchConfig;

fn error_body(body: &[u8]) -> ErrorBody {
    serde_json::from_slice(body).unwrap()
}

async fn post<F>(
    filter: &F,
    resource: serde_json::Value,
) -> warp::http::Response<warp::hyper::body::Bytes>
where
    F: warp::Filter + 'static,
    F::Extract: warp::Reply + Send,
{
    warp::test::request()
        .method("POST")
        .path("/v1/resources")
        .json(&resource)
        .reply(filter)
        .await
}

#[tokio::test]
async fn test_create_list_patch_delete() {
    let (api, _shutdown) = mem_api(WatchConfig::default());
    let filter = routes(api);

    let resp = post(&filter, json!({ "kind": "node", "id": "n1" })).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = post(
        &filter,
        json!({
            "kind": "machine",
            "id": "m1",
            "owner": { "kind": "node", "id": "n1" },
            "spec": { "name": "vm" }
        }),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created: Resource = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(created.phase, "created");

    let resp = warp::test::request()
        .method("GET")
        .path("/v1/resources?kind=machine&owner_kind=node&owner_id=n1")
        .reply(&filter)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let listed: ListResponse = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(listed.resources, vec![created]);
    assert_eq!(listed.revision, 2);

    let resp = warp::test::request()
        .method("PATCH")
        .path("/v1/resources?kind=machine&id=m1&owner_kind=node&owner_id=n1")
        .body(r#"[{"op":"add","path":"/status/state","value":"running"}]"#)
        .reply(&filter)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let patched: Resource = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(patched.status, json!({ "state": "running" }));

    let resp = warp::test::request()
        .method("DELETE")
        .path("/v1/resources?kind=machine&id=m1")
        .reply(&filter)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = warp::test::request()
        .method("DELETE")
        .path("/v1/resources?kind=machine&id=m1")
        .reply(&filter)
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_body(resp.body()).code, ErrorCode::NotFound);
}

#[tokio::test]
async fn test_error_statuses() {
    let (api, _shutdown) = mem_api(WatchConfig::default());
    let filter = routes(api);

    post(&filter, json!({ "kind": "node", "id": "n1" })).await;
    post(
        &filter,
        json!({ "kind": "machine", "id": "m1", "owner": { "kind": "node", "id": "n1" } }),
    )
    .await;

    let resp = post(&filter, json!({ "kind": "node", "id": "n1" })).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert_eq!(error_body(resp.body()).code, ErrorCode::AlreadyExists);

    let resp = post(&filter, json!({ "kind": "" })).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = warp::test::request()
        .method("POST")
        .path("/v1/resources")
        .body("{not json")
        .reply(&filter)
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_body(resp.body()).code, ErrorCode::InvalidArgument);

    let resp = warp::test::request()
        .method("PATCH")
        .path("/v1/resources?kind=machine&id=m1&owner_kind=node&owner_id=other")
        .body(r#"{"phase":"running"}"#)
        .reply(&filter)
        .await;
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);
    assert_eq!(error_body(resp.body()).code, ErrorCode::OwnerMismatch);

    let resp = warp::test::request()
        .method("PATCH")
        .path("/v1/resources?kind=machine&id=m1&owner_kind=node")
        .body(r#"{"phase":"running"}"#)
        .reply(&filter)
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = warp::test::request()
        .method("GET")
        .path("/v1/resources/events?kind=machine&action=explode")
        .reply(&filter)
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = warp::test::request().method("GET").path("/v2/nothing").reply(&filter).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cors_preflight_is_permissive() {
    let (api, _shutdown) = mem_api(WatchConfig::default());
    let filter = routes(api);

    let resp = warp::test::request()
        .method("OPTIONS")
        .path("/v1/resources")
        .header("origin", "http://ui.example")
        .header("access-control-request-method", "PATCH")
        .reply(&filter)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key("access-control-allow-origin"));
}

/// # Case: the SSE body replays from the start revision and ends with the
/// terminal error once the engine stops
#[tokio::test]
async fn test_sse_watch_replays_then_ends_with_error() {
    let (api, shutdown) = mem_api(WatchConfig::default());
    let filter = routes(api.clone());
    api.create(Resource::new(kind::NODE).with_id("n1")).await.unwrap();
    api.create(Resource::new(kind::NODE).with_id("n2")).await.unwrap();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        drop(shutdown);
    });

    let resp = warp::test::request()
        .method("GET")
        .path("/v1/resources/events?kind=node&start_revision=1")
        .reply(&filter)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = String::from_utf8(resp.body().to_vec()).unwrap();

    assert!(body.contains("event:resource"));
    assert!(body.contains("id:2"));
    assert!(!body.contains("id:1\n"));
    assert!(body.contains("event:error"));
    assert!(body.contains("\"unavailable\""));
}

#[tokio::test]
async fn test_websocket_watch_streams_frames() {
    let (api, _shutdown) = mem_api(WatchConfig::default());
    let filter = routes(api.clone());

    let mut client = warp::test::ws()
        .path("/v1/resources/events?kind=node&action=create")
        .handshake(filter)
        .await
        .expect("handshake");

    api.create(Resource::new(kind::NODE).with_id("n1")).await.unwrap();

    let msg = client.recv().await.unwrap();
    let frame: WatchFrame = serde_json::from_str(msg.to_str().unwrap()).unwrap();
    match frame {
        WatchFrame::Resource(event) => {
            assert_eq!(event.revision, 1);
            assert_eq!(event.action, WatchAction::Create);
            assert_eq!(event.resource.id, "n1");
        }
        other => panic!("unexpected frame {other:?}"),
    }
}
