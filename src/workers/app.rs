//! Loopback demo: host and receiver in one process.
//!
//! Uploads the given files to an in-memory store under one share code,
//! starts a host session and a receive session against the same relay,
//! and writes whatever the receiver delivers into the output directory.
//! The P2P path runs over loopback ICE candidates; the relay listing
//! covers for it when the channel never opens.

use crate::core::code::{normalize_code, safe_filename};
use crate::core::session::host::{HostSession, OutboundFile};
use crate::core::session::receive::{ReceiveMode, ReceiveSession};
use crate::core::session::{SessionEvent, SessionTiming, Tone};
use crate::core::signaling::RelayClient;
use crate::core::store::{FileIndex, MemoryObjectStore};
use crate::utils::format::format_file_size;
use crate::utils::sos::SignalOfStop;
use crate::workers::args::Args;
use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

pub async fn run(args: Args, sos: SignalOfStop) -> Result<()> {
    let store = Arc::new(MemoryObjectStore::new());
    let index = FileIndex::new(store.clone());
    let relay = RelayClient::new(store);

    let mut code = args.code.as_deref().map(normalize_code);
    let mut outbound = Vec::new();
    for path in &args.files {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("Not a file path: {}", path.display()))?;
        let bytes = Bytes::from(
            tokio::fs::read(path)
                .await
                .with_context(|| format!("Cannot read {}", path.display()))?,
        );

        let assigned = index
            .upload(code.as_deref(), name, "application/octet-stream", bytes.clone())
            .await?;
        code = Some(assigned);
        outbound.push(OutboundFile::new(name, "application/octet-stream", bytes));
    }
    let code = code.ok_or_else(|| anyhow!("No files to share"))?;

    println!("Share code: {code}");
    for file in &outbound {
        println!("  {} ({})", file.meta.name, format_file_size(file.meta.size));
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let timing = SessionTiming::default();
    let expected = outbound.len();

    // The host publishes its offer first so the receiver's join finds it.
    let host = HostSession::start(relay.clone(), &code, outbound, timing.clone(), tx.clone()).await?;
    let mode = if args.manual {
        ReceiveMode::Manual
    } else {
        ReceiveMode::Session
    };
    let receiver = ReceiveSession::start(index.clone(), relay, &code, mode, timing, tx).await?;

    tokio::fs::create_dir_all(&args.out_dir)
        .await
        .with_context(|| format!("Cannot create {}", args.out_dir.display()))?;

    let mut saved = 0usize;
    while saved < expected {
        let event = tokio::select! {
            _ = sos.wait() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            SessionEvent::P2pConnected => println!("P2P channel open"),
            SessionEvent::P2pClosed => info!(event = "p2p_closed"),
            SessionEvent::Received(file) => {
                save_file(&args.out_dir, &file.meta.name, &file.bytes).await?;
                println!(
                    "Received {} ({}) over P2P",
                    file.meta.name,
                    format_file_size(file.bytes.len() as u64)
                );
                saved += 1;
            }
            SessionEvent::AutoDownload(remote) => {
                let bytes = index.download(&remote).await?;
                save_file(&args.out_dir, &remote.name, &bytes).await?;
                println!(
                    "Downloaded {} ({}) from relay",
                    remote.name,
                    format_file_size(bytes.len() as u64)
                );
                saved += 1;
            }
            SessionEvent::FilesListed(files) => {
                for remote in files {
                    let bytes = index.download(&remote).await?;
                    save_file(&args.out_dir, &remote.name, &bytes).await?;
                    println!(
                        "Downloaded {} ({}) from relay",
                        remote.name,
                        format_file_size(bytes.len() as u64)
                    );
                    saved += 1;
                }
            }
            SessionEvent::HostTimedOut => println!("No peer answered; relay delivery only"),
            SessionEvent::SendComplete { files } => {
                info!(event = "send_complete", files);
            }
            SessionEvent::Notice { text, tone } => match tone {
                Tone::Error => eprintln!("{text}"),
                _ => println!("{text}"),
            },
        }
    }

    receiver.stop().await;
    host.close().await;
    println!("Done: {saved}/{expected} files in {}", args.out_dir.display());
    Ok(())
}

async fn save_file(out_dir: &Path, name: &str, bytes: &[u8]) -> Result<()> {
    let path = out_dir.join(safe_filename(name)?);
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("Cannot write {}", path.display()))
}
