use std::time::Duration;

use futures::StreamExt;
use serde_json::json;
use tokio::sync::oneshot;

use super::*;
use crate::kind;
use crate::test_utils::mem_api;
use crate::test_utils::MockController;
use crate::ErrorCode;
use crate::ListQuery;
use crate::OwnerRef;
use crate::PatchDocument;
use crate::Resource;
use crate::ResourceClient;
use crate::WatchAction;
use crate::WatchConfig;
use crate::WatchRequest;

async fn connect() -> (ControllerClient, oneshot::Sender<()>, tokio::sync::watch::Sender<()>) {
    let (api, engine_shutdown) = mem_api(WatchConfig::default());
    let (server_tx, server_rx) = oneshot::channel();
    let addr = MockController::listener(api, server_rx, true).await.unwrap();
    let client = ClientBuilder::new(MockController::endpoint(addr))
        .request_timeout(Duration::from_secs(2))
        .build()
        .await
        .unwrap();
    (client, server_tx, engine_shutdown)
}

#[tokio::test]
async fn test_round_trip_over_grpc() {
    let (client, _server, _engine) = connect().await;

    client.create(Resource::new(kind::NODE).with_id("n1")).await.unwrap();
    let spec = json!({
        "name": "vm-1",
        "topology": { "cores": 2, "threads": 1 },
        "memory": 2147483648u64,
        "interfaces": [ { "network": "default", "model": "virtio" } ]
    });
    let created = client
        .create(
            Resource::new(kind::MACHINE)
                .with_owner(OwnerRef::new(kind::NODE, "n1"))
                .with_annotation("origin", "ui")
                .with_spec(spec.clone()),
        )
        .await
        .unwrap();
    assert_eq!(created.spec, spec);

    let fetched = client.get(kind::MACHINE, &created.id).await.unwrap();
    assert_eq!(fetched, created);

    client
        .patch(
            kind::MACHINE,
            &created.id,
            Some(OwnerRef::new(kind::NODE, "n1")),
            PatchDocument::status_report(json!({ "state": "running" }), "running").unwrap(),
        )
        .await
        .unwrap();

    let listed = client
        .list(ListQuery::new(kind::MACHINE).with_owner(OwnerRef::new(kind::NODE, "n1")))
        .await
        .unwrap();
    assert_eq!(listed.revision, 3);
    assert_eq!(listed.resources[0].phase, "running");

    client.delete(kind::MACHINE, &created.id).await.unwrap();
    let err = client.get(kind::MACHINE, &created.id).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
}

#[tokio::test]
async fn test_error_codes_survive_the_wire() {
    let (client, _server, _engine) = connect().await;
    client.create(Resource::new(kind::NODE).with_id("n1")).await.unwrap();

    let err = client.create(Resource::new(kind::NODE).with_id("n1")).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::AlreadyExists);

    let err = client
        .create(Resource::new(kind::MACHINE).with_owner(OwnerRef::new(kind::NODE, "ghost")))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);

    client
        .create(
            Resource::new(kind::MACHINE)
                .with_id("m1")
                .with_owner(OwnerRef::new(kind::NODE, "n1")),
        )
        .await
        .unwrap();
    let err = client
        .patch(
            kind::MACHINE,
            "m1",
            Some(OwnerRef::new(kind::NODE, "n2")),
            PatchDocument::status_report(json!({}), "running").unwrap(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::OwnerMismatch);
}

#[tokio::test]
async fn test_watch_over_grpc_ends_with_terminal_error() {
    let (client, _server, engine) = connect().await;

    let mut events = client
        .watch(WatchRequest::new(kind::NODE).with_action(WatchAction::Create))
        .await
        .unwrap();

    client.create(Resource::new(kind::NODE).with_id("n1")).await.unwrap();
    let event = events.next().await.unwrap().unwrap();
    assert_eq!(event.revision, 1);
    assert_eq!(event.resource.id, "n1");

    drop(engine);
    let err = events.next().await.unwrap().unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unavailable);
    assert!(events.next().await.is_none());
}

#[tokio::test]
async fn test_build_rejects_bad_endpoint() {
    assert!(ClientBuilder::new("not a uri").build().await.is_err());
}
