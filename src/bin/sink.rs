//! Call Sink
//!
//! Listens for call frames and logs every call it receives. Handy as the
//! far end while testing a streamer configuration.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use call_streamer::{constants::DISPLAY_SAMPLE_RATE, protocol::read_frame};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let bind_addr: SocketAddr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "0.0.0.0:9123".to_string())
        .parse()
        .context("invalid bind address")?;

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    tracing::info!("Call sink listening on {}", bind_addr);

    let received = Arc::new(AtomicU64::new(0));

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (conn, peer) = accepted?;
                let received = received.clone();
                tokio::spawn(async move {
                    handle_connection(conn, peer, received).await;
                });
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(
                    "Shutting down after {} calls",
                    received.load(Ordering::Relaxed)
                );
                return Ok(());
            }
        }
    }
}

async fn handle_connection(mut conn: TcpStream, peer: SocketAddr, received: Arc<AtomicU64>) {
    let frame = match read_frame(&mut conn).await {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!("Bad frame from {}: {}", peer, e);
            return;
        }
    };

    let total = received.fetch_add(1, Ordering::Relaxed) + 1;
    let meta = &frame.metadata;
    let started = DateTime::<Utc>::from_timestamp(meta.start_time, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| meta.start_time.to_string());
    let seconds = frame.samples.len() as f64 / DISPLAY_SAMPLE_RATE as f64;

    tracing::info!(
        "Call {} on {} TG {} ({:.3} MHz) started {}: {} samples ({:.1}s), patched {:?} [#{}]",
        meta.call_id,
        meta.system_short_name,
        meta.talkgroup,
        meta.frequency as f64 / 1_000_000.0,
        started,
        frame.samples.len(),
        seconds,
        meta.patched_talkgroups,
        total
    );
}
