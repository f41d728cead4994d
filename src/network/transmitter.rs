//! Frame transmitter
//!
//! Each record gets its own TCP connection. Connect is raced against a
//! fixed timer; the frame's regions go out as gathered writes; whatever
//! happens, the call's session is released when the job is finished.

use bytes::Buf;
use std::future::Future;
use std::io::{self, IoSlice};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream};

use crate::constants::CONNECT_TIMEOUT;
use crate::protocol::Frame;
use crate::streams::{CallId, SessionStore};

/// Removes a session from its store when dropped
#[derive(Debug)]
pub struct SessionRelease {
    store: Arc<SessionStore>,
    call_id: CallId,
}

impl SessionRelease {
    pub fn new(store: Arc<SessionStore>, call_id: CallId) -> Self {
        Self { store, call_id }
    }

    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }
}

impl Drop for SessionRelease {
    fn drop(&mut self) {
        self.store.remove(&self.call_id);
    }
}

/// A finished call waiting for the dispatch loop
#[derive(Debug)]
pub struct TransmitJob {
    release: SessionRelease,
    destination: SocketAddr,
    frame: Frame,
}

impl TransmitJob {
    pub fn new(store: Arc<SessionStore>, call_id: CallId, frame: Frame) -> Self {
        let destination = store.subscription().destination;
        Self {
            release: SessionRelease::new(store, call_id),
            destination,
            frame,
        }
    }

    pub fn call_id(&self) -> &CallId {
        self.release.call_id()
    }
}

/// How a transmission ended
#[derive(Debug)]
pub enum SendOutcome {
    /// Whole frame written
    Sent { bytes: usize },
    /// Writer stopped accepting data before the frame was complete
    Partial { sent: usize, total: usize },
    /// No connection within the connect timeout
    ConnectTimeout,
    /// Peer went away (EOF, reset, abort, broken pipe)
    Disconnected(io::Error),
    /// Any other transport error
    Failed(io::Error),
}

impl SendOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, SendOutcome::Sent { .. })
    }
}

/// Transmission counters
#[derive(Debug, Default)]
struct Counters {
    calls_sent: AtomicU64,
    bytes_sent: AtomicU64,
    partial_sends: AtomicU64,
    connect_timeouts: AtomicU64,
    disconnects: AtomicU64,
    failures: AtomicU64,
}

/// Snapshot of transmission counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransmitStats {
    pub calls_sent: u64,
    pub bytes_sent: u64,
    pub partial_sends: u64,
    pub connect_timeouts: u64,
    pub disconnects: u64,
    pub failures: u64,
}

/// Sends frames to their stream's destination
#[derive(Debug)]
pub struct Transmitter {
    connect_timeout: Duration,
    counters: Counters,
}

impl Default for Transmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl Transmitter {
    pub fn new() -> Self {
        Self::with_connect_timeout(CONNECT_TIMEOUT)
    }

    pub fn with_connect_timeout(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            counters: Counters::default(),
        }
    }

    /// Send one job; the job's session is released before this returns
    pub async fn send(&self, job: TransmitJob) -> SendOutcome {
        let destination = job.destination;
        self.send_over(job, connect(destination)).await
    }

    /// Send one job over whatever `connecting` resolves to
    ///
    /// `connecting` is raced against the connect timeout.
    async fn send_over<F, W>(&self, job: TransmitJob, connecting: F) -> SendOutcome
    where
        F: Future<Output = io::Result<W>>,
        W: AsyncWrite + Unpin,
    {
        let TransmitJob {
            release,
            destination,
            frame,
        } = job;

        let outcome = match tokio::time::timeout(self.connect_timeout, connecting).await {
            Err(_) => SendOutcome::ConnectTimeout,
            Ok(Err(e)) => classify(e),
            Ok(Ok(mut stream)) => deliver(&mut stream, frame).await,
        };
        self.report(release.call_id(), destination, &outcome);
        drop(release);
        outcome
    }

    fn report(&self, call_id: &CallId, destination: SocketAddr, outcome: &SendOutcome) {
        let c = &self.counters;
        match outcome {
            SendOutcome::Sent { bytes } => {
                c.calls_sent.fetch_add(1, Ordering::Relaxed);
                c.bytes_sent.fetch_add(*bytes as u64, Ordering::Relaxed);
                tracing::info!(%call_id, bytes, %destination, "sent call data to server");
            }
            SendOutcome::Partial { sent, total } => {
                c.partial_sends.fetch_add(1, Ordering::Relaxed);
                c.bytes_sent.fetch_add(*sent as u64, Ordering::Relaxed);
                tracing::error!(%call_id, sent, total, %destination, "only sent part of call data");
            }
            SendOutcome::ConnectTimeout => {
                c.connect_timeouts.fetch_add(1, Ordering::Relaxed);
                tracing::error!(%call_id, %destination, "no server available, ignoring");
            }
            SendOutcome::Disconnected(e) => {
                c.disconnects.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%call_id, %destination, "socket send failed, client has disconnected: {}", e);
            }
            SendOutcome::Failed(e) => {
                c.failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(%call_id, %destination, "socket send failed: {}", e);
            }
        }
    }

    pub fn stats(&self) -> TransmitStats {
        let c = &self.counters;
        TransmitStats {
            calls_sent: c.calls_sent.load(Ordering::Relaxed),
            bytes_sent: c.bytes_sent.load(Ordering::Relaxed),
            partial_sends: c.partial_sends.load(Ordering::Relaxed),
            connect_timeouts: c.connect_timeouts.load(Ordering::Relaxed),
            disconnects: c.disconnects.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
        }
    }
}

async fn connect(destination: SocketAddr) -> io::Result<TcpStream> {
    open_socket(destination)?.connect(destination).await
}

fn open_socket(destination: SocketAddr) -> io::Result<TcpSocket> {
    let socket = if destination.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket2::SockRef::from(&socket).set_keepalive(true)?;
    Ok(socket)
}

/// Write the whole frame and compare what was accepted with its size
async fn deliver<W>(writer: &mut W, frame: Frame) -> SendOutcome
where
    W: AsyncWrite + Unpin,
{
    let total = frame.total_len();
    match write_gathered(writer, frame.into_buf()).await {
        Ok(sent) if sent == total => SendOutcome::Sent { bytes: sent },
        Ok(sent) => SendOutcome::Partial { sent, total },
        Err(e) => classify(e),
    }
}

/// Write `buf` with vectored writes, returning the number of bytes accepted
///
/// Stops early only if the writer accepts zero bytes.
async fn write_gathered<W>(writer: &mut W, mut buf: impl Buf) -> io::Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let mut sent = 0;
    while buf.has_remaining() {
        let mut slices = [IoSlice::new(&[]); 3];
        let count = buf.chunks_vectored(&mut slices);
        let n = writer.write_vectored(&slices[..count]).await?;
        if n == 0 {
            break;
        }
        buf.advance(n);
        sent += n;
    }
    writer.flush().await?;
    Ok(sent)
}

fn classify(error: io::Error) -> SendOutcome {
    match error.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => SendOutcome::Disconnected(error),
        _ => SendOutcome::Failed(error),
    }
}
