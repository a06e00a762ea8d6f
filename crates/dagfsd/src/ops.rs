//! Command handlers. Each runs against an established client session.

use std::path::Path;

use anyhow::{bail, Context, Result};
use tokio::io::AsyncWriteExt;

use dagfs_core::wire::{PacketError, MAX_BLOCK_SIZE};
use dagfs_core::Cid;
use dagfs_services::{BlockStore, Client, FsSession, Manifest, ManifestEntry, ManifestFs, Mode};

pub async fn cmd_put(client: &mut Client, paths: &[&str]) -> Result<()> {
    let mut manifest = Manifest::default();
    for path in paths {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {path}"))?;
        if data.len() > MAX_BLOCK_SIZE {
            bail!("{path}: {} bytes exceeds the {MAX_BLOCK_SIZE} byte block limit", data.len());
        }

        let cid = Cid::digest(&data);
        match client.put(cid.clone(), &data).await? {
            PacketError::Ok => {}
            error => bail!("{path}: put {cid} failed: {error}"),
        }
        tracing::info!(path, %cid, len = data.len(), "stored");
        manifest.entries.push(ManifestEntry {
            path: path.to_string(),
            cid,
            size: data.len() as u64,
        });
    }
    println!("{}", manifest.to_json_pretty()?);
    Ok(())
}

pub async fn cmd_get(client: &mut Client, cid: &str, out: &str) -> Result<()> {
    let cid = Cid::new(cid).with_context(|| format!("invalid cid {cid:?}"))?;
    let done = client.fetch(cid.clone()).await?;
    if done.error() != PacketError::Ok {
        bail!("get {cid} failed: {} (length {})", done.error(), done.length());
    }
    let data = done.payload.unwrap_or_default();
    tokio::fs::write(out, &data)
        .await
        .with_context(|| format!("failed to write {out}"))?;
    println!("{} bytes written to {out}", data.len());
    Ok(())
}

pub async fn cmd_cat(client: &mut Client, manifest: &str, path: &str) -> Result<()> {
    let text = tokio::fs::read_to_string(manifest)
        .await
        .with_context(|| format!("failed to read manifest {manifest}"))?;
    let mut fs = FsSession::new(ManifestFs::new(Manifest::from_json(&text)?)?);

    let target = Path::new(path);
    let parent = target
        .parent()
        .and_then(Path::to_str)
        .filter(|p| !p.is_empty())
        .unwrap_or("/");
    let name = target
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("not a file path: {path}"))?;

    let dir = fs.dir(parent, false)?;
    let handle = fs.file(dir, name, Mode::ReadOnly, false)?;
    let data = fs.backend().read(handle, client).await?;
    fs.close(handle);
    fs.close(dir);

    let mut stdout = tokio::io::stdout();
    stdout.write_all(&data).await?;
    stdout.flush().await?;
    Ok(())
}

pub fn cmd_stat(store: &dyn BlockStore) -> Result<()> {
    let stat = serde_json::json!({
        "blocks": store.count(),
        "bytes": store.size(),
    });
    println!("{}", serde_json::to_string_pretty(&stat)?);
    Ok(())
}
