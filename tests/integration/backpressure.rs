use std::sync::Arc;
use std::time::Duration;

use dagfs_core::wire::{PacketError, QUEUE_SIZE};
use dagfs_services::{MemoryStore, RequestState, Server, TransportError};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Queue depth and buffer backpressure
// ══════════════════════════════════════════════════════════════════════════════

/// Eight requests go out; the ninth is refused without disturbing the
/// others; draining one acknowledgment makes room again.
#[test]
fn test_ninth_submission_refused_until_drained() {
    let (mut client, sink) = session("depth");
    let server = Server::new(sink, Arc::new(MemoryStore::new()));

    let ids: Vec<_> = (0..QUEUE_SIZE)
        .map(|i| client.submit_put(cid(&format!("block-{i}")), &[i as u8; 32]).unwrap())
        .collect();
    assert_eq!(client.outstanding(), QUEUE_SIZE);
    assert_eq!(
        client.submit_put(cid("block-8"), &[8u8; 32]),
        Err(TransportError::QueueFull)
    );

    // server taking requests is not enough, acknowledgments must be drained
    assert_eq!(server.process_pending(), QUEUE_SIZE);
    assert_eq!(client.state(ids[0]), Some(RequestState::AwaitingResponse));
    assert_eq!(
        client.submit_put(cid("block-8"), &[8u8; 32]),
        Err(TransportError::QueueFull)
    );

    let first = client.drain_acks().next().unwrap();
    assert_eq!(first.id, ids[0]);
    assert_eq!(first.error(), PacketError::Ok);
    let ninth = client.submit_put(cid("block-8"), &[8u8; 32]).unwrap();

    // the remaining seven still complete in submission order
    let rest: Vec<_> = client.drain_acks().map(|done| done.id).collect();
    assert_eq!(rest, ids[1..]);

    server.process_pending();
    let last: Vec<_> = client.drain_acks().collect();
    assert_eq!(last.len(), 1);
    assert_eq!(last[0].id, ninth);
    assert_eq!(last[0].error(), PacketError::Ok);
    assert_eq!(client.outstanding(), 0);
}

#[test]
fn test_drain_acks_only_yields_new_completions() {
    let (mut client, sink) = session("drain");
    let server = Server::new(sink, Arc::new(MemoryStore::new()));

    assert_eq!(client.drain_acks().count(), 0);
    client.submit_get(cid("a"), 8).unwrap();
    client.submit_get(cid("b"), 8).unwrap();
    server.process_pending();
    assert_eq!(client.drain_acks().count(), 2);
    assert_eq!(client.drain_acks().count(), 0);

    client.submit_get(cid("c"), 8).unwrap();
    server.process_pending();
    let again: Vec<_> = client.drain_acks().collect();
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].error(), PacketError::Missing);
}

/// Many times the buffer's size in blocks goes through a 16 KiB session.
#[tokio::test]
async fn test_many_puts_through_small_buffer() {
    let args = SessionArgs::new("small", 16 * 1024);
    let (mut client, sink) = establish(&args).unwrap();
    let store = Arc::new(MemoryStore::new());
    let (_tx, rx) = tokio::sync::broadcast::channel(1);
    tokio::spawn(Server::new(sink, store.clone()).run(rx));

    for i in 0..64u32 {
        let data = vec![(i % 256) as u8; 4000 + i as usize];
        let id = dagfs_core::Cid::digest(&data);
        assert_eq!(client.put(id, &data).await.unwrap(), PacketError::Ok);
    }
    assert_eq!(store.count(), 64);
}

/// Requests submitted before the server starts are answered once it runs.
#[tokio::test]
async fn test_server_drains_backlog_on_start() {
    let (mut client, sink) = session("backlog");
    let ids: Vec<_> = (0..QUEUE_SIZE)
        .map(|i| client.submit_get(cid(&format!("x{i}")), 16).unwrap())
        .collect();

    let (_tx, rx) = tokio::sync::broadcast::channel(1);
    tokio::spawn(Server::new(sink, Arc::new(MemoryStore::new())).run(rx));

    for id in ids.into_iter().rev() {
        let done = tokio::time::timeout(Duration::from_secs(5), client.complete(id))
            .await
            .expect("completion should arrive")
            .unwrap();
        assert_eq!(done.error(), PacketError::Missing);
    }
    assert_eq!(client.outstanding(), 0);
}

#[test]
fn test_buffer_exhaustion_is_a_transport_error() {
    let (mut client, _sink) = session("exhaust");
    let err = client.submit_get(cid("huge"), BUF_SIZE + 1).unwrap_err();
    assert_eq!(err, TransportError::BufferExhausted(BUF_SIZE + 1));
    assert_eq!(client.outstanding(), 0);
}

/// A PUT that finds no free window waits for earlier requests to complete.
#[tokio::test]
async fn test_put_waits_for_window() {
    let (mut client, sink) = establish(&SessionArgs::new("window", 16 * 1024)).unwrap();
    let store = Arc::new(MemoryStore::new());

    let early: Vec<_> = (0..3)
        .map(|i| client.submit_put(cid(&format!("early-{i}")), &[i as u8; 5000]).unwrap())
        .collect();
    assert!(client.submit_put(cid("late"), &[9u8; 4000]).is_err());

    let (_tx, rx) = tokio::sync::broadcast::channel(1);
    tokio::spawn(Server::new(sink, store.clone()).run(rx));

    assert_eq!(client.put(cid("late"), &[9u8; 4000]).await.unwrap(), PacketError::Ok);
    for id in early {
        assert_eq!(client.complete(id).await.unwrap().error(), PacketError::Ok);
    }
    assert_eq!(store.count(), 4);
}
