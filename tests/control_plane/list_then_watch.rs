use std::time::Duration;

use futures::StreamExt;
use rockferry::kind;
use rockferry::ChangeEvent;
use rockferry::EventStream;
use rockferry::ListQuery;
use rockferry::OwnerRef;
use rockferry::PatchDocument;
use rockferry::Resource;
use rockferry::ResourceClient;
use rockferry::WatchAction;
use rockferry::WatchRequest;
use rockferry::KIND_ALL;
use serde_json::json;
use tokio::time::timeout;

use crate::commons::enable_logger;
use crate::commons::memory_config;
use crate::commons::start_node;

async fn next_event(stream: &mut EventStream) -> ChangeEvent {
    timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("event arrived")
        .expect("stream still open")
        .expect("event, not error")
}

#[tokio::test]
async fn test_watch_from_listing_revision_has_no_gap_and_no_duplicate() {
    enable_logger();
    let node = start_node(memory_config()).await.unwrap();
    let client = node.client().await;

    client.create(Resource::new(kind::NODE).with_id("n1")).await.unwrap();
    for i in 0..3 {
        client
            .create(Resource::new(kind::MACHINE).with_id(format!("m{i}")).with_owner(OwnerRef::new(kind::NODE, "n1")))
            .await
            .unwrap();
    }

    let listing = client.list(ListQuery::new(KIND_ALL)).await.unwrap();
    assert_eq!(listing.resources.len(), 4);
    assert_eq!(listing.revision, 4);

    // Written between the listing and the subscription
    client
        .create(Resource::new(kind::MACHINE).with_id("m3").with_owner(OwnerRef::new(kind::NODE, "n1")))
        .await
        .unwrap();
    client.delete(kind::MACHINE, "m0").await.unwrap();

    let mut stream = client
        .watch(WatchRequest::new(KIND_ALL).with_action(WatchAction::All).from_revision(listing.revision))
        .await
        .unwrap();

    let created = next_event(&mut stream).await;
    assert_eq!((created.revision, created.action), (5, WatchAction::Create));
    assert_eq!(created.resource.id, "m3");

    let deleted = next_event(&mut stream).await;
    assert_eq!((deleted.revision, deleted.action), (6, WatchAction::Delete));
    assert_eq!(deleted.resource.id, "m0");

    // Live from here on
    let patch = PatchDocument::from_value(json!({ "status": { "ip": "10.0.0.2" } })).unwrap();
    client.patch(kind::MACHINE, "m1", None, patch).await.unwrap();
    let updated = next_event(&mut stream).await;
    assert_eq!((updated.revision, updated.action), (7, WatchAction::Update));
    assert_eq!(updated.resource.status["ip"], json!("10.0.0.2"));
    assert!(updated.prev_resource.is_some());

    node.stop().await.unwrap();
}

#[tokio::test]
async fn test_filtered_watchers_only_see_matching_events() {
    enable_logger();
    let node = start_node(memory_config()).await.unwrap();
    let client = node.client().await;

    client.create(Resource::new(kind::NODE).with_id("n1")).await.unwrap();
    client.create(Resource::new(kind::NODE).with_id("n2")).await.unwrap();

    let owner = OwnerRef::new(kind::NODE, "n2");
    let mut by_owner = client
        .watch(WatchRequest::new(kind::MACHINE).with_owner(owner.clone()).with_action(WatchAction::All))
        .await
        .unwrap();
    let mut deletes = client
        .watch(WatchRequest::new(kind::MACHINE).with_action(WatchAction::Delete))
        .await
        .unwrap();

    client
        .create(Resource::new(kind::MACHINE).with_id("a").with_owner(OwnerRef::new(kind::NODE, "n1")))
        .await
        .unwrap();
    client
        .create(Resource::new(kind::MACHINE).with_id("b").with_owner(owner))
        .await
        .unwrap();
    client.delete(kind::MACHINE, "a").await.unwrap();

    let event = next_event(&mut by_owner).await;
    assert_eq!(event.resource.id, "b");
    assert_eq!(event.action, WatchAction::Create);

    let event = next_event(&mut deletes).await;
    assert_eq!(event.resource.id, "a");
    assert_eq!(event.action, WatchAction::Delete);

    // Nothing else is pending for the owner filter
    assert!(timeout(Duration::from_millis(100), by_owner.next()).await.is_err());

    node.stop().await.unwrap();
}

#[tokio::test]
async fn test_watch_ends_with_error_when_controller_stops() {
    enable_logger();
    let node = start_node(memory_config()).await.unwrap();
    let client = node.client().await;

    let mut stream = client.watch(WatchRequest::new(kind::NODE)).await.unwrap();
    node.stop().await.unwrap();

    let end = timeout(Duration::from_secs(2), async {
        loop {
            match stream.next().await {
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Some(e),
                None => return None,
            }
        }
    })
    .await
    .expect("stream ended");
    assert!(end.is_some(), "stream ends with a terminal error");
}
