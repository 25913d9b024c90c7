//! Command handlers: wire signaling, the peer link and the transfer
//! engine together for one session.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;

use peerdrop_peer_link::{PeerLinkManager, ReadyChannel, Role, negotiate};
use peerdrop_protocol::SessionId;
use peerdrop_relay::{RelayConfig, RelayServer};
use peerdrop_signaling::SignalingClient;
use peerdrop_transfer::{
    ChunkedReceiver, ChunkedSender, OutgoingFile, TransferProgress, save_received,
};
use peerdrop_webrtc::WebRtcTransport;

use crate::cli::Command;
use crate::config::Config;

const PROGRESS_BUFFER: usize = 32;

pub async fn run(command: Command, config: Config) -> anyhow::Result<()> {
    match command {
        Command::Send {
            file,
            session,
            relay,
        } => {
            let relay_url = relay.unwrap_or_else(|| config.relay_url.clone());
            send(&file, &session, &relay_url, &config).await
        }
        Command::Receive {
            relay,
            out,
            session,
        } => {
            let relay_url = relay.unwrap_or_else(|| config.relay_url.clone());
            let out = out.unwrap_or_else(|| config.download_dir.clone());
            receive(session.as_deref(), &relay_url, &out, &config).await
        }
        Command::Relay { bind } => relay(bind).await,
    }
}

async fn send(file: &Path, session: &str, relay_url: &str, config: &Config) -> anyhow::Result<()> {
    let session: SessionId = session
        .parse()
        .with_context(|| format!("invalid connection code {session:?}"))?;
    let sender = ChunkedSender::new(config.sender_config())?;
    let outgoing = OutgoingFile::open(file)
        .await
        .with_context(|| format!("cannot open {}", file.display()))?;
    let meta = outgoing.metadata().clone();
    println!("Sending {} ({} bytes, {})", meta.name, meta.size, meta.mime_type);

    let (signaling, link, ready) = connect(Role::Initiator, &session, relay_url, config).await?;

    let (progress_tx, progress_rx) = mpsc::channel(PROGRESS_BUFFER);
    let printer = tokio::spawn(print_progress(progress_rx));
    let result = sender.send(outgoing, &ready, Some(progress_tx)).await;
    let _ = printer.await;
    finish(&signaling, &link).await;

    let report = result.context("transfer failed")?;
    println!(
        "Sent {} in {} chunks, sha256 {}",
        report.metadata.name, report.chunks, report.sha256
    );
    Ok(())
}

async fn receive(
    session: Option<&str>,
    relay_url: &str,
    out: &Path,
    config: &Config,
) -> anyhow::Result<()> {
    let session = match session {
        Some(code) => code
            .parse()
            .with_context(|| format!("invalid connection code {code:?}"))?,
        None => SessionId::generate(),
    };
    println!("Connection code: {session}");
    println!("On the sending machine run: peerdrop send <FILE> --session {session}");

    let (signaling, link, ready) = connect(Role::Responder, &session, relay_url, config).await?;

    let (progress_tx, progress_rx) = mpsc::channel(PROGRESS_BUFFER);
    let printer = tokio::spawn(print_progress(progress_rx));
    let result = ChunkedReceiver::new()
        .receive(&ready, Some(progress_tx))
        .await;
    let _ = printer.await;
    finish(&signaling, &link).await;

    let file = result.context("transfer failed")?;
    let path = save_received(out, &file)
        .await
        .with_context(|| format!("cannot save into {}", out.display()))?;
    println!("Saved {} ({} bytes)", path.display(), file.data.len());
    println!("sha256 {}", file.sha256);
    Ok(())
}

async fn relay(bind: SocketAddr) -> anyhow::Result<()> {
    let server = RelayServer::new(RelayConfig {
        bind,
        ..RelayConfig::default()
    });

    let stopper = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping relay");
            stopper.shutdown();
        }
    });

    server.run().await.context("relay failed")?;
    Ok(())
}

/// Joins the relay room and negotiates a ready data channel.
///
/// Ctrl-C closes the link, which cancels negotiation or the transfer that
/// follows it.
async fn connect(
    role: Role,
    session: &SessionId,
    relay_url: &str,
    config: &Config,
) -> anyhow::Result<(Arc<SignalingClient>, PeerLinkManager, ReadyChannel)> {
    let signaling = Arc::new(
        SignalingClient::connect(relay_url, session)
            .await
            .with_context(|| format!("cannot reach relay at {relay_url}"))?,
    );
    let (transport, events) = WebRtcTransport::new(&config.webrtc_config(), role)
        .await
        .context("cannot create peer connection")?;
    let link = PeerLinkManager::spawn(transport, events);

    let interrupt = link.clone();
    let closed = link.cancellation();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("interrupted");
                interrupt.close().await;
            }
            _ = closed.cancelled() => {}
        }
    });

    println!("Waiting for the other peer...");
    let ready = match negotiate(role, signaling.clone(), link.clone()).await {
        Ok(ready) => ready,
        Err(e) => {
            finish(&signaling, &link).await;
            return Err(e).context("peer connection failed");
        }
    };
    println!("Connected.");
    Ok((signaling, link, ready))
}

async fn finish(signaling: &SignalingClient, link: &PeerLinkManager) {
    link.close().await;
    signaling.close().await;
}

async fn print_progress(mut rx: mpsc::Receiver<TransferProgress>) {
    let mut last = None;
    while let Some(p) = rx.recv().await {
        if last == Some(p.percent) {
            continue;
        }
        last = Some(p.percent);
        println!(
            "{:>3}%  {}/{} bytes  {}",
            p.percent,
            p.transferred,
            p.total,
            format_rate(p.bytes_per_second)
        );
    }
}

fn format_rate(bytes_per_second: f64) -> String {
    const UNITS: [&str; 4] = ["B/s", "KiB/s", "MiB/s", "GiB/s"];
    let mut value = bytes_per_second.max(0.0);
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
