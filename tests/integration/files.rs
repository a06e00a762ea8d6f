use std::sync::Arc;

use dagfs_core::wire::PacketError;
use dagfs_core::Cid;
use dagfs_services::{
    DiskStore, FsError, FsSession, Manifest, ManifestEntry, ManifestFs, Mode, NodeKind,
    TransportError,
};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Path-addressed reads over the block protocol
// ══════════════════════════════════════════════════════════════════════════════

async fn store_files(h: &mut Harness, files: &[(&str, &[u8])]) -> Manifest {
    let mut manifest = Manifest::default();
    for (path, data) in files {
        let cid = Cid::digest(data);
        assert_eq!(h.client.put(cid.clone(), data).await.unwrap(), PacketError::Ok);
        manifest.entries.push(ManifestEntry {
            path: path.to_string(),
            cid,
            size: data.len() as u64,
        });
    }
    manifest
}

#[tokio::test]
async fn test_read_files_through_manifest() {
    let dir = temp_dir("manifest");
    let mut h = Harness::start(Arc::new(DiskStore::open(&dir, 0).unwrap()));

    let large = vec![b'z'; 100_000];
    let manifest = store_files(
        &mut h,
        &[
            ("notes/todo.txt", b"water the plants".as_slice()),
            ("notes/archive/2025.txt", b"old notes".as_slice()),
            ("large.bin", large.as_slice()),
        ],
    )
    .await;

    // the manifest survives a trip through JSON
    let json = manifest.to_json_pretty().unwrap();
    let mut fs = FsSession::new(ManifestFs::new(Manifest::from_json(&json).unwrap()).unwrap());

    let notes = fs.dir("/notes", false).unwrap();
    let todo = fs.file(notes, "todo.txt", Mode::ReadOnly, false).unwrap();
    assert_eq!(fs.status(todo).unwrap().size, 16);
    let data = fs.backend().read(todo, &mut h.client).await.unwrap();
    assert_eq!(&data[..], b"water the plants");

    let archived = fs.node("notes/archive/2025.txt").unwrap();
    assert_eq!(fs.status(archived).unwrap().kind, NodeKind::File);
    let data = fs.backend().read(archived, &mut h.client).await.unwrap();
    assert_eq!(&data[..], b"old notes");

    let big = fs.node("/large.bin").unwrap();
    let data = fs.backend().read(big, &mut h.client).await.unwrap();
    assert_eq!(data.len(), large.len());

    for handle in [todo, archived, big, notes] {
        fs.close(handle);
    }
    assert_eq!(fs.backend().open_handles(), 0);

    h.stop().await.unwrap();
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_manifest_entry_without_block() {
    let mut h = Harness::memory();
    let manifest = Manifest {
        entries: vec![ManifestEntry {
            path: "ghost.txt".into(),
            cid: cid("00000000"),
            size: 4,
        }],
    };
    let mut fs = FsSession::new(ManifestFs::new(manifest).unwrap());

    let handle = fs.node("/ghost.txt").unwrap();
    match fs.backend().read(handle, &mut h.client).await {
        Err(FsError::Block { cid, error }) => {
            assert_eq!(cid.as_str(), "00000000");
            assert_eq!(error, PacketError::Missing);
        }
        other => panic!("expected missing block, got {other:?}"),
    }

    h.stop().await.unwrap();
}

#[tokio::test]
async fn test_closed_session_surfaces_as_transport_error() {
    let mut h = Harness::memory();
    let manifest = store_files(&mut h, &[("a.txt", b"a".as_slice())]).await;
    let mut fs = FsSession::new(ManifestFs::new(manifest).unwrap());
    let handle = fs.node("a.txt").unwrap();

    h.client.close();
    assert!(matches!(
        fs.backend().read(handle, &mut h.client).await,
        Err(FsError::Transport(TransportError::Closed))
    ));
}

/// The manifest JSON has the shape other tools consume: an `entries` array
/// of objects with string path and cid and a numeric size.
#[tokio::test]
async fn test_manifest_json_shape() {
    let mut h = Harness::memory();
    let manifest = store_files(&mut h, &[("dir/one.txt", b"one".as_slice())]).await;

    let value: serde_json::Value =
        serde_json::from_str(&manifest.to_json_pretty().unwrap()).unwrap();
    let entries = value["entries"].as_array().expect("entries array");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["path"], "dir/one.txt");
    assert_eq!(entries[0]["cid"], Cid::digest(b"one").as_str());
    assert_eq!(entries[0]["size"], 3);

    // a hand-written manifest is accepted as long as it has that shape
    let written = serde_json::json!({
        "entries": [{ "path": "/x", "cid": "deadbeef", "size": 4 }]
    });
    let parsed = Manifest::from_json(&written.to_string()).unwrap();
    assert_eq!(parsed.entries[0].cid, cid("deadbeef"));

    h.stop().await.unwrap();
}
