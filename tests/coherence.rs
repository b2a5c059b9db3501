//! End-to-end coherence tests: multiple clients against one in-process
//! server, exercising the invalidation barrier.

mod common;

use bytes::Bytes;
use common::*;
use embercache::core::config::ServerConfig;
use embercache::core::error::CacheError;
use embercache::core::time::{now_millis, Expiry};
use std::time::{Duration, Instant};

#[tokio::test(flavor = "multi_thread")]
async fn test_put_get_invalidate_between_two_clients() {
    let (server, addr) = start_server().await;
    let c1 = connected_client("c1", addr).await;
    let c2 = connected_client("c2", addr).await;

    c1.put("pippo", Bytes::from_static(b"testdata"), Expiry::NEVER)
        .await
        .expect("put");

    let seen = c2.get("pippo").await.expect("get").expect("present");
    assert_eq!(seen.data(), b"testdata");

    // Both clients now hold the key; a write from c2 must not complete
    // until c1 has evicted its copy.
    let v2 = c2
        .put("pippo", Bytes::from_static(b"testdata2"), Expiry::NEVER)
        .await
        .expect("second put");
    assert!(v2 > seen.version);

    let refetched = c1.get("pippo").await.expect("get").expect("present");
    assert_eq!(refetched.data(), b"testdata2");
    assert_eq!(refetched.version, v2);

    c1.invalidate("pippo").await.expect("invalidate");
    assert!(c1.get("pippo").await.expect("get").is_none());
    assert!(c2.get("pippo").await.expect("get").is_none());

    c1.close().await;
    c2.close().await;
    server.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_put_evicts_other_holders_before_completing() {
    let (server, addr) = start_server().await;
    let writer = connected_client("writer", addr).await;
    let reader = connected_client("reader", addr).await;

    let v1 = writer
        .put("k", Bytes::from_static(b"v1"), Expiry::NEVER)
        .await
        .expect("put v1");
    assert!(reader.get("k").await.expect("get").is_some());

    let v2 = writer
        .put("k", Bytes::from_static(b"v2"), Expiry::NEVER)
        .await
        .expect("put v2");
    assert!(v2 > v1);

    // The barrier completed, so the reader's stale copy is gone and this
    // get must fetch the new value from the server.
    let entry = reader.get("k").await.expect("get").expect("present");
    assert_eq!(entry.data(), b"v2");
    assert_eq!(entry.version, v2);

    writer.close().await;
    reader.close().await;
    server.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unresponsive_holder_is_demoted_on_timeout() {
    let mut config = ServerConfig::default();
    config.invalidation_timeout_ms = 300;
    let (server, addr) = start_server_with(config).await;
    let writer = connected_client("writer", addr).await;

    writer
        .put("k", Bytes::from_static(b"v1"), Expiry::NEVER)
        .await
        .expect("put");

    // A holder that never acks the fan-out.
    let mut silent = RawPeer::register(addr, "silent").await;
    silent.become_holder("k").await;

    let started = Instant::now();
    writer
        .put("k", Bytes::from_static(b"v2"), Expiry::NEVER)
        .await
        .expect("put over silent holder");
    let elapsed = started.elapsed();
    assert!(
        elapsed >= Duration::from_millis(250),
        "barrier returned before the ack timeout: {elapsed:?}"
    );
    assert!(
        elapsed < Duration::from_secs(5),
        "barrier took far longer than the ack timeout: {elapsed:?}"
    );

    writer.close().await;
    server.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_disconnected_holder_counts_as_acked() {
    let (server, addr) = start_server().await;
    let writer = connected_client("writer", addr).await;

    writer
        .put("k", Bytes::from_static(b"v1"), Expiry::NEVER)
        .await
        .expect("put");

    let mut doomed = RawPeer::register(addr, "doomed").await;
    doomed.become_holder("k").await;
    drop(doomed);
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Default ack timeout is 10s; a put completing well under that proves
    // the disconnect released the barrier rather than the timeout.
    let started = Instant::now();
    writer
        .put("k", Bytes::from_static(b"v2"), Expiry::NEVER)
        .await
        .expect("put after holder vanished");
    assert!(started.elapsed() < Duration::from_secs(2));

    writer.close().await;
    server.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_puts_on_same_key_are_ordered() {
    let (server, addr) = start_server().await;
    let c1 = connected_client("c1", addr).await;
    let c2 = connected_client("c2", addr).await;

    c1.put("k", Bytes::from_static(b"seed"), Expiry::NEVER)
        .await
        .expect("seed");
    assert!(c2.get("k").await.expect("get").is_some());

    // Both clients hold the key, so each put must run the barrier against
    // the other while the other's own put is parked on the key lock.
    let (r1, r2) = tokio::join!(
        c1.put("k", Bytes::from_static(b"from-c1"), Expiry::NEVER),
        c2.put("k", Bytes::from_static(b"from-c2"), Expiry::NEVER),
    );
    let v1 = r1.expect("c1 put");
    let v2 = r2.expect("c2 put");
    assert_ne!(v1, v2);

    // A fresh client sees the value of whichever write got the higher
    // version.
    let c3 = connected_client("c3", addr).await;
    let entry = c3.get("k").await.expect("get").expect("present");
    assert_eq!(entry.version, v1.max(v2));
    let expected: &[u8] = if v1 > v2 { b"from-c1" } else { b"from-c2" };
    assert_eq!(entry.data(), expected);

    c1.close().await;
    c2.close().await;
    c3.close().await;
    server.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_wrong_shared_secret_is_rejected() {
    let (server, addr) = start_server().await;
    let client = make_client_full("intruder", "wrong", "127.0.0.1", addr.port(), false, None);
    match client.start().await {
        Err(CacheError::Authentication(reason)) => {
            assert!(reason.contains("secret"), "unexpected reason: {reason}");
        }
        other => panic!("expected authentication failure, got {other:?}"),
    }
    assert!(!client.is_connected());
    server.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_close_is_idempotent_and_terminal() {
    let (server, addr) = start_server().await;
    let client = connected_client("c1", addr).await;

    client.close().await;
    client.close().await;
    assert!(!client.is_connected());
    assert!(matches!(
        client.get("k").await,
        Err(CacheError::NotConnected)
    ));
    assert!(matches!(
        client
            .put("k", Bytes::from_static(b"v"), Expiry::NEVER)
            .await,
        Err(CacheError::NotConnected)
    ));
    assert!(matches!(client.start().await, Err(CacheError::NotConnected)));

    server.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_expired_entry_reads_as_absent() {
    let (server, addr) = start_server().await;
    let c1 = connected_client("c1", addr).await;
    let c2 = connected_client("c2", addr).await;

    c1.put(
        "k",
        Bytes::from_static(b"v"),
        Expiry::at_millis(now_millis() + 100),
    )
    .await
    .expect("put");
    assert!(c2.get("k").await.expect("get").is_some());

    tokio::time::sleep(Duration::from_millis(250)).await;
    // Expired on the writer's local copy and on the server alike.
    assert!(c1.get("k").await.expect("get").is_none());
    assert!(c2.get("k").await.expect("get").is_none());

    c1.close().await;
    c2.close().await;
    server.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_get_on_unknown_key_is_absent() {
    let (server, addr) = start_server().await;
    let client = connected_client("c1", addr).await;
    assert!(client.get("never-written").await.expect("get").is_none());
    client.close().await;
    server.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_duplicate_client_id_displaces_old_session() {
    let (server, addr) = start_server().await;
    let first = connected_client("dup", addr).await;

    let second = make_client("dup", addr);
    second.start().await.expect("second start");
    assert!(second.wait_for_connection(Duration::from_secs(10)).await);

    // The server closes the displaced connection; the first client
    // notices and tears itself down.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!first.is_connected());

    second
        .put("k", Bytes::from_static(b"v"), Expiry::NEVER)
        .await
        .expect("put on replacement session");

    second.close().await;
    server.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_heartbeats_keep_idle_session_alive() {
    let mut config = ServerConfig::default();
    config.session_idle_timeout_ms = 1_000;
    let (server, addr) = start_server_with(config).await;

    let mut client_config = embercache::core::config::ClientConfig::default();
    client_config.heartbeat_interval_ms = 200;
    let host_data =
        embercache::net::locator::ServerHostData::new("127.0.0.1", addr.port(), "test", false);
    let client = embercache::client::CacheClient::with_config(
        "hb",
        SECRET,
        Box::new(embercache::net::locator::FixedServerLocator::new(host_data)),
        client_config,
        None,
    );
    client.start().await.expect("start");
    assert!(client.wait_for_connection(Duration::from_secs(10)).await);

    // Idle far longer than the server's idle timeout; only heartbeats
    // cross the wire.
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert!(client.is_connected());
    client
        .put("k", Bytes::from_static(b"v"), Expiry::NEVER)
        .await
        .expect("put after idle period");

    client.close().await;
    server.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_server_close_disconnects_clients() {
    let (server, addr) = start_server().await;
    let client = connected_client("c1", addr).await;
    client
        .put("k", Bytes::from_static(b"v"), Expiry::NEVER)
        .await
        .expect("put");

    server.close().await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!client.is_connected());
    assert!(client.get("k").await.is_err());

    client.close().await;
}
