use rockferry::kind;
use rockferry::phase;
use rockferry::ErrorCode;
use rockferry::ListQuery;
use rockferry::OwnerRef;
use rockferry::PatchDocument;
use rockferry::Resource;
use rockferry::ResourceClient;
use serde_json::json;

use crate::commons::enable_logger;
use crate::commons::memory_config;
use crate::commons::start_node;

#[tokio::test]
async fn test_machine_lifecycle_over_grpc() {
    enable_logger();
    let node = start_node(memory_config()).await.unwrap();
    let client = node.client().await;

    let n1 = client.create(Resource::new(kind::NODE).with_id("n1")).await.unwrap();
    assert_eq!(n1.phase, phase::CREATED);

    let machine = client
        .create(
            Resource::new(kind::MACHINE)
                .with_owner(n1.as_owner())
                .with_spec(json!({ "name": "vm-1", "topology": { "cores": 2, "memory": 1073741824u64 } })),
        )
        .await
        .unwrap();
    assert!(!machine.id.is_empty(), "server generates an id");

    let owned = client
        .list(ListQuery::new(kind::MACHINE).with_owner(n1.as_owner()))
        .await
        .unwrap();
    assert_eq!(owned.resources.len(), 1);
    assert_eq!(owned.revision, 2);

    let report = PatchDocument::status_report(json!({ "state": "running" }), phase::RUNNING).unwrap();
    client
        .patch(kind::MACHINE, &machine.id, Some(n1.as_owner()), report)
        .await
        .unwrap();

    let stored = client.get(kind::MACHINE, &machine.id).await.unwrap();
    assert_eq!(stored.phase, phase::RUNNING);
    assert_eq!(stored.status["state"], json!("running"));
    assert_eq!(stored.spec["topology"]["cores"], json!(2));

    client.delete(kind::MACHINE, &machine.id).await.unwrap();
    let err = client.get(kind::MACHINE, &machine.id).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);

    node.stop().await.unwrap();
}

#[tokio::test]
async fn test_errors_keep_their_code_over_the_wire() {
    enable_logger();
    let node = start_node(memory_config()).await.unwrap();
    let client = node.client().await;

    client.create(Resource::new(kind::NODE).with_id("n1")).await.unwrap();
    client.create(Resource::new(kind::NODE).with_id("n2")).await.unwrap();
    client
        .create(Resource::new(kind::MACHINE).with_id("m1").with_owner(OwnerRef::new(kind::NODE, "n1")))
        .await
        .unwrap();

    let err = client.create(Resource::new(kind::NODE).with_id("n1")).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::AlreadyExists);

    let err = client
        .create(Resource::new(kind::MACHINE).with_owner(OwnerRef::new(kind::NODE, "ghost")))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);

    let patch = PatchDocument::from_value(json!({ "phase": "running" })).unwrap();
    let err = client
        .patch(kind::MACHINE, "m1", Some(OwnerRef::new(kind::NODE, "n2")), patch)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::OwnerMismatch);

    let err = client.delete(kind::MACHINE, "missing").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);

    node.stop().await.unwrap();
}

#[tokio::test]
async fn test_json_patch_test_operation_guards_concurrent_writers() {
    enable_logger();
    let node = start_node(memory_config()).await.unwrap();
    let client = node.client().await;

    client
        .create(Resource::new(kind::NETWORK).with_id("net0").with_spec(json!({ "bridge": "br0" })))
        .await
        .unwrap();

    let guarded = |expected: &str, next: &str| {
        PatchDocument::from_value(json!([
            { "op": "test", "path": "/spec/bridge", "value": expected },
            { "op": "replace", "path": "/spec/bridge", "value": next },
        ]))
        .unwrap()
    };

    client.patch(kind::NETWORK, "net0", None, guarded("br0", "br1")).await.unwrap();
    // A writer that read the old value loses
    let err = client
        .patch(kind::NETWORK, "net0", None, guarded("br0", "br2"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);

    let stored = client.get(kind::NETWORK, "net0").await.unwrap();
    assert_eq!(stored.spec["bridge"], json!("br1"));

    node.stop().await.unwrap();
}
