//! Device-link behaviour against a scripted backend.
//!
//! All tests run under a paused clock, so the 60 s idle window, the 10 s
//! pong wait and the 5 s reconnect backoff elapse instantly.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};

use fieldlink_core::{ConnectionState, DeviceUid};
use fieldlink_kuzzle::envelope::{self, Query};
use fieldlink_kuzzle::mock::{MockConnector, MockRemote, SentMessage};
use fieldlink_kuzzle::{DeviceIdentity, DeviceLink, LinkConfig, LinkError};

fn identity() -> DeviceIdentity {
    DeviceIdentity::new(
        DeviceUid::new("NFC_0012345678").unwrap(),
        "RFID_reader",
    )
    .with_owner("alice")
    .with_friendly_name("workbench reader")
}

async fn settle() {
    // Let the spawned actor drain its channels; the paused clock advances
    // instantly.
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Connect, consume the identity lookup, and hand back a running link.
async fn connected_link(
    connector: MockConnector,
    remote: &mut MockRemote,
) -> (
    tokio::task::JoinHandle<Result<(), LinkError>>,
    fieldlink_kuzzle::LinkHandle,
) {
    let (mut link, handle) = DeviceLink::new(connector, identity(), LinkConfig::default());
    link.connect(None).await.unwrap();
    assert_eq!(link.state(), ConnectionState::Connected);

    let lookup = remote.next_sent_json().await.unwrap();
    assert_eq!(lookup["requestId"], "get_device_info");
    assert_eq!(lookup["action"], "get");
    assert_eq!(lookup["_id"], "NFC_0012345678");

    let task = tokio::spawn(async move { link.run().await });
    (task, handle)
}

#[tokio::test(start_paused = true)]
async fn test_missing_device_info_triggers_republish() {
    let connector = MockConnector::new();
    let mut remote = connector.prepare(true);
    let (task, handle) = connected_link(connector, &mut remote).await;

    remote.push_json(&json!({
        "status": 404,
        "requestId": "get_device_info",
        "error": {"message": "document not found", "stack": ""}
    }));

    let upsert = remote.next_sent_json().await.unwrap();
    assert_eq!(upsert["action"], "createOrReplace");
    assert_eq!(upsert["collection"], "device-info");
    assert_eq!(upsert["_id"], "NFC_0012345678");
    assert_eq!(upsert["body"]["device_id"], "NFC_0012345678");
    assert_eq!(upsert["body"]["owner"], "alice");
    assert_eq!(upsert["body"]["device_type"], "RFID_reader");

    handle.disconnect().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_active_device_info_publishes_nothing() {
    let connector = MockConnector::new();
    let mut remote = connector.prepare(true);
    let (task, handle) = connected_link(connector, &mut remote).await;

    let active = json!({
        "status": 200,
        "requestId": "get_device_info",
        "result": {"_source": {"device_type": "RFID_reader", "active": true}}
    });
    remote.push_json(&active);
    settle().await;
    // A second, unmatched response exercises the path again
    remote.push_json(&active);
    settle().await;

    let sent = remote.drain_sent();
    assert!(
        !sent.iter().any(|msg| matches!(
            msg,
            SentMessage::Text(text) if text.contains("createOrReplace")
        )),
        "no create-or-replace may be sent for an active record"
    );

    handle.disconnect().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_publish_state_shape() {
    let connector = MockConnector::new();
    let mut remote = connector.prepare(true);
    let (task, handle) = connected_link(connector, &mut remote).await;

    handle
        .publish_state(json!({"card_id": "04AABBCC", "in_field": true}), false)
        .await
        .unwrap();

    let publish = remote.next_sent_json().await.unwrap();
    assert_eq!(publish["collection"], "device-state");
    assert_eq!(publish["controller"], "document");
    assert_eq!(publish["action"], "create");
    assert_eq!(publish["requestId"], "publish_NFC_0012345678");
    assert_eq!(publish["body"]["device_id"], "NFC_0012345678");
    assert_eq!(publish["body"]["partial_state"], false);
    assert_eq!(publish["body"]["state"]["card_id"], "04AABBCC");

    handle.disconnect().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_remote_state_change_dispatch_and_echo_suppression() {
    let connector = MockConnector::new();
    let mut remote = connector.prepare(true);
    let (task, handle) = connected_link(connector, &mut remote).await;

    let seen: Arc<Mutex<Vec<(Value, bool)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    handle
        .subscribe_state(move |state, partial| {
            sink.lock().unwrap().push((state, partial));
        })
        .await
        .unwrap();
    let subscribe = remote.next_sent_json().await.unwrap();
    assert_eq!(subscribe["action"], "subscribe");

    // Remote change from another session: dispatched
    remote.push_json(&json!({
        "status": 200,
        "requestId": "someone-elses-request",
        "action": "replace",
        "result": {"_source": {"partial_state": true, "state": {"mode": "ramp"}}}
    }));
    // Echo of our own publish: suppressed
    remote.push_json(&json!({
        "status": 200,
        "requestId": "publish_NFC_0012345678",
        "action": "create",
        "result": {"_source": {"partial_state": false, "state": {"mode": "off"}}}
    }));
    settle().await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1, "own publish echo must not reach the callback");
    assert_eq!(seen[0].0, json!({"mode": "ramp"}));
    assert!(seen[0].1);
    drop(seen);

    handle.disconnect().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_resends_identical_subscription() {
    let connector = MockConnector::new();
    let mut remote1 = connector.prepare(true);
    let mut remote2 = connector.prepare(true);
    let (task, handle) = connected_link(connector.clone(), &mut remote1).await;

    handle.subscribe_state(|_, _| {}).await.unwrap();
    let sub1 = remote1.next_sent_json().await.unwrap();
    assert_eq!(sub1["action"], "subscribe");

    // Server drops the connection; after the fixed backoff the link
    // reconnects and re-arms the subscription by itself.
    remote1.close();
    let sub2 = remote2.next_sent_json().await.unwrap();

    assert_eq!(sub2["action"], "subscribe");
    assert_eq!(sub2["controller"], "realtime");
    assert_eq!(sub2["body"], sub1["body"], "re-armed filter must be identical");
    assert_eq!(connector.connect_count(), 2);

    handle.disconnect().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_silent_backend_is_declared_dead() {
    let connector = MockConnector::new();
    // No auto-pong: the probe goes unanswered
    let mut remote = connector.prepare(false);
    let (task, _handle) = connected_link(connector, &mut remote).await;

    // 60 s idle, ping, 10 s of silence, all on the paused clock
    let result = task.await.unwrap();
    assert!(matches!(result, Err(LinkError::PongTimeout(_))));

    let sent = remote.drain_sent();
    assert!(sent.contains(&SentMessage::Ping));
}

#[tokio::test(start_paused = true)]
async fn test_pong_keeps_the_link_alive() {
    let connector = MockConnector::new();
    let mut remote = connector.prepare(true);
    let (task, handle) = connected_link(connector, &mut remote).await;

    // Two idle windows pass; each probe is answered by the transport
    tokio::time::sleep(Duration::from_secs(130)).await;

    handle.disconnect().await.unwrap();
    task.await.unwrap().unwrap();

    let pings = remote
        .drain_sent()
        .into_iter()
        .filter(|msg| *msg == SentMessage::Ping)
        .count();
    assert!(pings >= 2, "expected at least two liveness probes, saw {pings}");
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_drops_pending_queries() {
    let connector = MockConnector::new();
    let mut remote = connector.prepare(true);
    let (task, handle) = connected_link(connector, &mut remote).await;

    let query = Query {
        index: envelope::INDEX_IOT,
        collection: envelope::COLLECTION_DEVICE_STATE,
        request_id: None,
        controller: "document",
        action: "get",
        document_id: Some("some-doc".to_string()),
        body: None,
    };
    let query_handle = handle.clone();
    let pending = tokio::spawn(async move { query_handle.query(query).await });

    // The query reached the wire with a generated requestId...
    let wire = remote.next_sent_json().await.unwrap();
    assert!(wire["requestId"].as_str().is_some_and(|id| !id.is_empty()));

    // ...but the link disconnects before any response arrives
    handle.disconnect().await.unwrap();
    task.await.unwrap().unwrap();

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(LinkError::ConnectionClosed)));
}
