use std::time::Duration;

use keepass_bridge::{BridgeError, PendingTable, REQUEST_TIMEOUT};
use serde_json::json;

#[tokio::test]
async fn resolve_settles_once() {
    let table = PendingTable::new();
    let reply = table.register(1, REQUEST_TIMEOUT);
    assert!(table.contains(1));

    assert!(table.resolve(1, json!({ "isOpen": true })));
    // A stray duplicate is ignored.
    assert!(!table.resolve(1, json!({ "isOpen": false })));
    assert!(!table.reject(1, BridgeError::ConnectionLost));

    assert_eq!(reply.await.unwrap(), json!({ "isOpen": true }));
    assert!(table.is_empty());
}

#[tokio::test]
async fn reject_carries_the_error() {
    let table = PendingTable::new();
    let reply = table.register(4, REQUEST_TIMEOUT);
    assert!(table.reject(
        4,
        BridgeError::PeerReported {
            message: "Domain not provided".into()
        }
    ));
    match reply.await {
        Err(BridgeError::PeerReported { message }) => assert_eq!(message, "Domain not provided"),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn unanswered_entry_times_out_and_leaves_table() {
    let table = PendingTable::new();
    let reply = table.register(1, REQUEST_TIMEOUT);

    let err = reply.await.expect_err("should time out");
    assert!(err.is_timeout());
    assert!(!table.contains(1));
    // A reply that shows up after the timeout is a no-op.
    assert!(!table.resolve(1, json!(null)));
}

#[tokio::test(start_paused = true)]
async fn settlement_cancels_the_timer() {
    let table = PendingTable::new();
    let reply = table.register(1, REQUEST_TIMEOUT);

    tokio::time::sleep(REQUEST_TIMEOUT - Duration::from_millis(1)).await;
    assert!(table.resolve(1, json!("just in time")));

    // Well past the first deadline: nothing else happens.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(reply.await.unwrap(), json!("just in time"));
    assert!(table.is_empty());
}

#[tokio::test(start_paused = true)]
async fn stale_timer_does_not_expire_a_reused_id() {
    let table = PendingTable::new();
    let first = table.register(1, REQUEST_TIMEOUT);
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(table.drain_all_with_error(BridgeError::ConnectionLost), 1);
    assert!(matches!(first.await, Err(BridgeError::ConnectionLost)));

    // Same id on a new connection, registered 20s into the old one's window.
    let second = table.register(1, REQUEST_TIMEOUT);
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert!(table.contains(1));
    assert!(table.resolve(1, json!(2)));
    assert_eq!(second.await.unwrap(), json!(2));
}

#[tokio::test]
async fn drain_fails_every_entry() {
    let table = PendingTable::new();
    let replies: Vec<_> = (1..=3).map(|id| table.register(id, REQUEST_TIMEOUT)).collect();

    assert_eq!(table.drain_all_with_error(BridgeError::ConnectionLost), 3);
    assert!(table.is_empty());
    for reply in replies {
        assert!(matches!(reply.await, Err(BridgeError::ConnectionLost)));
    }
}

#[tokio::test]
async fn clear_and_remove_release_waiters() {
    let table = PendingTable::new();
    let a = table.register(1, REQUEST_TIMEOUT);
    let b = table.register(2, REQUEST_TIMEOUT);

    assert!(table.remove(1));
    assert!(!table.remove(1));
    assert_eq!(table.len(), 1);
    assert!(matches!(a.await, Err(BridgeError::ConnectionLost)));

    assert_eq!(table.clear(), 1);
    assert!(matches!(b.await, Err(BridgeError::ConnectionLost)));
}
