use std::sync::Arc;

use rockferry::kind;
use rockferry::phase;
use rockferry::DomainState;
use rockferry::PatchDocument;
use rockferry::ReconcileConfig;
use rockferry::Reconciler;
use rockferry::Resource;
use rockferry::ResourceClient;
use rockferry::ANNOTATION_ORIGIN;
use rockferry::ORIGIN_SYNC;
use serde_json::json;
use tokio::sync::watch;

use super::fake_hypervisor::FakeHypervisor;
use crate::commons::enable_logger;
use crate::commons::eventually;
use crate::commons::memory_config;
use crate::commons::start_node;

fn agent_config(node_id: &str) -> ReconcileConfig {
    let mut config = ReconcileConfig {
        node_id: node_id.to_string(),
        resubscribe_delay_ms: 50,
        ..Default::default()
    };
    config.backoff.base_delay_ms = 10;
    config.backoff.max_delay_ms = 50;
    config
}

async fn phase_of(
    client: &impl ResourceClient,
    kind: &str,
    id: &str,
) -> String {
    client.get(kind, id).await.map(|r| r.phase).unwrap_or_default()
}

#[tokio::test]
async fn test_agent_converges_machines_through_the_controller() {
    enable_logger();
    let node = start_node(memory_config()).await.unwrap();
    let client = node.client().await;

    client.create(Resource::new(kind::NODE).with_id("n1")).await.unwrap();
    client.create(Resource::new(kind::NODE).with_id("n2")).await.unwrap();
    // Exists before the agent starts, so it arrives through the listing
    client
        .create(
            Resource::new(kind::MACHINE)
                .with_id("vm-a")
                .with_owner(Resource::new(kind::NODE).with_id("n1").as_owner())
                .with_spec(json!({ "name": "vm-a" })),
        )
        .await
        .unwrap();

    let hypervisor = Arc::new(FakeHypervisor::default());
    let (agent_tx, agent_rx) = watch::channel(());
    let agent = Reconciler::new(Arc::new(node.client().await), hypervisor.clone(), agent_config("n1"));
    let agent_handle = tokio::spawn(agent.run(agent_rx));

    let c = &client;
    let hv = &*hypervisor;
    eventually("vm-a running", move || async move { phase_of(c, kind::MACHINE, "vm-a").await == phase::RUNNING }).await;
    let stored = client.get(kind::MACHINE, "vm-a").await.unwrap();
    assert_eq!(stored.status["vnc"], json!("vnc://vm-a"));
    assert_eq!(stored.status["state"], json!("running"));

    // Arrives through the watch; owned by another node so it is ignored
    client
        .create(
            Resource::new(kind::MACHINE)
                .with_id("vm-b")
                .with_owner(Resource::new(kind::NODE).with_id("n2").as_owner())
                .with_spec(json!({ "name": "vm-b" })),
        )
        .await
        .unwrap();

    let stop = PatchDocument::from_value(json!({ "spec": { "power": "stopped" } })).unwrap();
    client.patch(kind::MACHINE, "vm-a", None, stop).await.unwrap();
    eventually("vm-a shut down", move || async move { phase_of(c, kind::MACHINE, "vm-a").await == phase::SHUTDOWN }).await;
    assert_eq!(hypervisor.domain_state("vm-a"), Some(DomainState::Shutdown));

    client.delete(kind::MACHINE, "vm-a").await.unwrap();
    eventually("vm-a undefined", move || async move { hv.domain_state("vm-a").is_none() }).await;

    assert_eq!(hypervisor.domain_creates(), 1, "own status patches never re-create the domain");
    assert_eq!(hypervisor.domain_state("vm-b"), None);
    assert_eq!(phase_of(&client, kind::MACHINE, "vm-b").await, phase::CREATED);

    agent_tx.send(()).unwrap();
    agent_handle.await.unwrap().unwrap();
    node.stop().await.unwrap();
}

#[tokio::test]
async fn test_agent_creates_volumes_in_owned_pools() {
    enable_logger();
    let node = start_node(memory_config()).await.unwrap();
    let client = node.client().await;

    let n1 = client.create(Resource::new(kind::NODE).with_id("n1")).await.unwrap();
    let hypervisor = Arc::new(FakeHypervisor::default());
    let (agent_tx, agent_rx) = watch::channel(());
    let agent = Reconciler::new(Arc::new(node.client().await), hypervisor.clone(), agent_config("n1"));
    let agent_handle = tokio::spawn(agent.run(agent_rx));

    // Pool and volume both arrive through the watch
    let pool = client
        .create(Resource::new(kind::STORAGE_POOL).with_id("p1").with_owner(n1.as_owner()))
        .await
        .unwrap();
    let foreign = client
        .create(Resource::new(kind::STORAGE_POOL).with_id("p2"))
        .await
        .unwrap();
    client
        .create(
            Resource::new(kind::STORAGE_VOLUME)
                .with_id("v1")
                .with_owner(pool.as_owner())
                .with_spec(json!({ "name": "disk0.qcow2", "type": "image", "capacity": 1024 })),
        )
        .await
        .unwrap();
    client
        .create(
            Resource::new(kind::STORAGE_VOLUME)
                .with_id("v2")
                .with_owner(foreign.as_owner())
                .with_spec(json!({ "name": "other.qcow2" })),
        )
        .await
        .unwrap();

    let c = &client;
    let hv = &*hypervisor;
    eventually("v1 created", move || async move {
        let reported = c
            .get(kind::STORAGE_VOLUME, "v1")
            .await
            .map(|r| r.status["pool"] == json!("p1"))
            .unwrap_or(false);
        reported && hv.has_volume("p1", "disk0.qcow2")
    })
    .await;
    assert_eq!(phase_of(&client, kind::STORAGE_VOLUME, "v1").await, phase::CREATED);
    assert!(!hypervisor.has_volume("p2", "other.qcow2"));

    client.delete(kind::STORAGE_VOLUME, "v1").await.unwrap();
    eventually("v1 deleted", move || async move { !hv.has_volume("p1", "disk0.qcow2") }).await;

    agent_tx.send(()).unwrap();
    agent_handle.await.unwrap().unwrap();
    node.stop().await.unwrap();
}

#[tokio::test]
async fn test_agent_publishes_host_inventory() {
    enable_logger();
    let node = start_node(memory_config()).await.unwrap();
    let client = node.client().await;
    client.create(Resource::new(kind::NODE).with_id("n1")).await.unwrap();

    let hypervisor = Arc::new(FakeHypervisor::default().with_host_pool("pool-a", &["base.img"]));
    let (agent_tx, agent_rx) = watch::channel(());
    let agent = Reconciler::new(Arc::new(node.client().await), hypervisor.clone(), agent_config("n1"));
    let agent_handle = tokio::spawn(agent.run(agent_rx));

    let c = &client;
    eventually("synced volume reported", move || async move {
        c.get(kind::STORAGE_VOLUME, "pool-a.base.img")
            .await
            .map(|r| r.status["pool"] == json!("pool-a"))
            .unwrap_or(false)
    })
    .await;

    let pool = client.get(kind::STORAGE_POOL, "pool-a").await.unwrap();
    assert_eq!(pool.owner, Some(Resource::new(kind::NODE).with_id("n1").as_owner()));
    assert_eq!(pool.annotations.get(ANNOTATION_ORIGIN).map(String::as_str), Some(ORIGIN_SYNC));

    let volume = client.get(kind::STORAGE_VOLUME, "pool-a.base.img").await.unwrap();
    assert_eq!(volume.owner, Some(pool.as_owner()));
    assert_eq!(volume.annotations.get(ANNOTATION_ORIGIN).map(String::as_str), Some(ORIGIN_SYNC));
    assert_eq!(volume.spec["name"], json!("base.img"));

    agent_tx.send(()).unwrap();
    agent_handle.await.unwrap().unwrap();
    node.stop().await.unwrap();
}
