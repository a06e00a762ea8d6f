use std::sync::Arc;

use dagfs_core::wire::{Opcode, Packet, PacketError, MAX_BLOCK_SIZE};
use dagfs_core::Cid;
use dagfs_services::{BlockStore, MemoryStore, RequestState};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  PUT / GET semantics
// ══════════════════════════════════════════════════════════════════════════════

/// PUT ten 'A' bytes, read them back through windows that do and do not
/// fit, then ask for something that was never stored.
#[tokio::test]
async fn test_reference_scenario() {
    let mut h = Harness::memory();
    let data = [0x41u8; 10];

    assert_eq!(h.client.put(deadbeef(), &data).await.unwrap(), PacketError::Ok);

    let fits = h.client.get(deadbeef(), 10).await.unwrap();
    assert_eq!(fits.error(), PacketError::Ok);
    assert_eq!(fits.length(), 10);
    assert_eq!(&fits.payload().unwrap()[..], &data);

    let short = h.client.get(deadbeef(), 4).await.unwrap();
    assert_eq!(short.error(), PacketError::Oversize);
    assert_eq!(short.length(), 10);
    assert!(short.payload().is_none());

    let missing = h.client.get(cid("00000000"), 10).await.unwrap();
    assert_eq!(missing.error(), PacketError::Missing);
    assert_eq!(missing.length(), 0);

    h.stop().await.unwrap();
}

#[tokio::test]
async fn test_put_twice_keeps_original() {
    let mut h = Harness::memory();
    let id = cid("same-cid");

    assert_eq!(h.client.put(id.clone(), b"first").await.unwrap(), PacketError::Ok);
    assert_eq!(h.client.put(id.clone(), b"second!").await.unwrap(), PacketError::Ok);
    assert_eq!(h.store.count(), 1);

    let done = h.client.fetch(id).await.unwrap();
    assert_eq!(&done.payload().unwrap()[..], b"first");

    h.stop().await.unwrap();
}

#[tokio::test]
async fn test_digest_cid_roundtrip_at_block_limit() {
    let mut h = Harness::memory();
    let data: Vec<u8> = (0..MAX_BLOCK_SIZE).map(|i| (i % 251) as u8).collect();
    let id = Cid::digest(&data);

    assert_eq!(h.client.put(id.clone(), &data).await.unwrap(), PacketError::Ok);

    // default window is smaller, fetch has to retry
    let done = h.client.fetch(id).await.unwrap();
    assert_eq!(done.error(), PacketError::Ok);
    assert_eq!(done.length(), MAX_BLOCK_SIZE as u64);
    assert_eq!(&done.payload().unwrap()[..], &data[..]);

    h.stop().await.unwrap();
}

#[tokio::test]
async fn test_empty_block() {
    let mut h = Harness::memory();
    let id = Cid::digest(b"");
    assert_eq!(h.client.put(id.clone(), b"").await.unwrap(), PacketError::Ok);

    let done = h.client.get(id, 0).await.unwrap();
    assert_eq!(done.error(), PacketError::Ok);
    assert_eq!(done.length(), 0);
    assert_eq!(done.payload().unwrap().len(), 0);

    h.stop().await.unwrap();
}

#[tokio::test]
async fn test_oversized_put_leaves_store_unchanged() {
    let store = Arc::new(MemoryStore::new());
    let mut h = Harness::start(store.clone());
    let data = vec![0u8; MAX_BLOCK_SIZE + 1];

    let verdict = h.client.put(cid("too-big"), &data).await.unwrap();
    assert_eq!(verdict, PacketError::Error);
    assert_eq!(store.count(), 0);
    assert_eq!(store.size(), 0);

    h.stop().await.unwrap();
}

/// Requests with an INVALID opcode are answered ERROR, even for a CID that
/// is present.
#[tokio::test]
async fn test_invalid_opcode_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    store.put(&cid("present"), b"data").unwrap();
    let mut h = Harness::start(store);

    let window = h.client.alloc_packet(16).unwrap();
    let id = h
        .client
        .submit(&Packet::request(&window, cid("present"), Opcode::Invalid))
        .unwrap();
    let done = h.client.complete(id).await.unwrap();
    assert_eq!(done.error(), PacketError::Error);
    assert_eq!(done.packet.operation(), Opcode::Invalid);
    assert!(done.payload().is_none());

    h.stop().await.unwrap();
}

/// Two in-flight GETs for the same CID complete independently.
#[tokio::test]
async fn test_same_cid_in_flight_twice() {
    let mut h = Harness::memory();
    h.client.put(cid("dup"), b"0123456789").await.unwrap();

    let small = h.client.submit_get(cid("dup"), 2).unwrap();
    let large = h.client.submit_get(cid("dup"), 64).unwrap();

    let large_done = h.client.complete(large).await.unwrap();
    assert_eq!(h.client.state(small), Some(RequestState::Completed));
    let small_done = h.client.complete(small).await.unwrap();

    assert_eq!(large_done.error(), PacketError::Ok);
    assert_eq!(small_done.error(), PacketError::Oversize);
    assert_eq!(small_done.length(), 10);

    h.stop().await.unwrap();
}

#[tokio::test]
async fn test_verified_server_rejects_mismatched_bytes() {
    let store = Arc::new(MemoryStore::new());
    let mut h = Harness::start_with(store.clone(), true);

    let verdict = h.client.put(Cid::digest(b"claimed"), b"actual").await.unwrap();
    assert_eq!(verdict, PacketError::Error);
    assert_eq!(
        h.client.put(Cid::digest(b"actual"), b"actual").await.unwrap(),
        PacketError::Ok
    );
    assert_eq!(store.count(), 1);

    h.stop().await.unwrap();
}
