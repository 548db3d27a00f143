// crates/flowdispatch/tests/nodes_test.rs

use chrono::{Duration, TimeZone, Utc};
use flowcore::dispatch::RegisterRequest;
use flowdispatch::{normalize_address, DispatchConfig, ManualClock, MemoryStore, NodeRegistry, Store};
use std::sync::Arc;

fn request(address: &str) -> RegisterRequest {
    RegisterRequest {
        address: address.to_string(),
        name: Some("Encoder".to_string()),
        version: "1.0.0".to_string(),
        architecture: "x86_64".to_string(),
        operating_system: "linux".to_string(),
        flow_runners: Some(2),
        capabilities: vec!["ffmpeg".to_string()],
    }
}

fn create_registry() -> (NodeRegistry, Arc<MemoryStore>, Arc<ManualClock>) {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 7, 8, 0, 0).unwrap()));
    let registry = NodeRegistry::new(store.clone(), clock.clone(), DispatchConfig::default());
    (registry, store, clock)
}

#[test]
fn test_normalize_address() {
    assert_eq!(normalize_address("  Encoder-01.LAN "), "encoder-01.lan");
}

#[tokio::test]
async fn test_register_is_idempotent_by_address() {
    let (registry, store, _) = create_registry();

    let first = registry.register(request("encoder-01")).await.unwrap();
    let second = registry.register(request(" ENCODER-01 ")).await.unwrap();

    assert_eq!(first.uid, second.uid);
    assert_eq!(first.name, "Encoder");
    assert_eq!(first.address, "encoder-01");
    assert_eq!(first.flow_runners, 2);
    assert_eq!(store.nodes().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_runner_count_only_applies_on_first_registration() {
    let (registry, store, _) = create_registry();
    let node = registry.register(request("encoder-01")).await.unwrap();

    let mut stored = store.node(node.uid).await.unwrap().unwrap();
    stored.flow_runners = 6;
    store.upsert_node(stored).await.unwrap();

    let mut again = request("encoder-01");
    again.flow_runners = Some(1);
    let node = registry.register(again).await.unwrap();
    assert_eq!(node.flow_runners, 6, "operator setting wins");
}

#[tokio::test]
async fn test_changed_details_persist_immediately() {
    let (registry, store, clock) = create_registry();
    let node = registry.register(request("encoder-01")).await.unwrap();

    clock.advance(Duration::seconds(30));
    let mut upgraded = request("encoder-01");
    upgraded.version = "1.1.0".to_string();
    registry.register(upgraded).await.unwrap();

    let stored = store.node(node.uid).await.unwrap().unwrap();
    assert_eq!(stored.version, "1.1.0");
    assert_eq!(stored.last_seen, node.last_seen + Duration::seconds(30));
}

#[tokio::test]
async fn test_last_seen_writes_are_debounced() {
    let (registry, store, clock) = create_registry();
    let node = registry.register(request("encoder-01")).await.unwrap();
    let registered_at = node.last_seen;

    clock.advance(Duration::minutes(1));
    let seen = registry.register(request("encoder-01")).await.unwrap();
    assert_eq!(seen.last_seen, registered_at + Duration::minutes(1));
    let stored = store.node(node.uid).await.unwrap().unwrap();
    assert_eq!(stored.last_seen, registered_at, "durable write is debounced");

    let live = registry.get(node.uid).await.unwrap().unwrap();
    assert_eq!(live.last_seen, registered_at + Duration::minutes(1));

    clock.advance(Duration::minutes(5));
    registry.touch(&live).await.unwrap();
    let stored = store.node(node.uid).await.unwrap().unwrap();
    assert_eq!(stored.last_seen, registered_at + Duration::minutes(6));
}

#[tokio::test]
async fn test_cannot_run_expires() {
    let (registry, _, clock) = create_registry();
    let node = registry.register(request("encoder-01")).await.unwrap();
    let now = node.last_seen;

    let until = registry.mark_cannot_run(node.uid, 90).await;
    assert_eq!(until, now + Duration::seconds(90));
    assert!(!registry.can_run(&node, now).await);
    assert_eq!(registry.cannot_run_until(node.uid).await, Some(until));

    clock.advance(Duration::seconds(90));
    assert!(registry.can_run(&node, now + Duration::seconds(90)).await);
    assert_eq!(registry.cannot_run_until(node.uid).await, None);
}
