//! CONNECT tunnels.
//!
//! # Responsibilities
//! - Connect to the target before answering the client
//! - Reply `200 Connection Established`, or 502/504 on failure
//! - Splice client and upstream sockets byte-for-byte once hyper hands over
//!   the connection
//!
//! Bytes the client pipelined after the CONNECT head are kept by hyper and
//! replayed through the upgraded stream, so nothing is lost between the
//! reply and the splice.

use std::time::Duration;

use hyper::{Request, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::Instrument;

use crate::http::response::{self, ProxyResponse};
use crate::http::target::TunnelTarget;
use crate::net::{ConnectionGuard, ConnectionId, ConnectionTracker};
use crate::observability::metrics;

/// Open a TCP connection to `target`, bounded by `timeout`.
pub async fn connect_upstream(target: &TunnelTarget, timeout: Duration) -> Result<TcpStream, StatusCode> {
    let (host, port) = target.connect_addr();
    match tokio::time::timeout(timeout, TcpStream::connect((host.as_str(), port))).await {
        Ok(Ok(stream)) => {
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!(error = %e, "Failed to set TCP_NODELAY on upstream");
            }
            Ok(stream)
        }
        Ok(Err(e)) => {
            tracing::warn!(upstream = %target, error = %e, "Tunnel connect failed");
            Err(StatusCode::BAD_GATEWAY)
        }
        Err(_) => {
            tracing::warn!(upstream = %target, timeout_secs = timeout.as_secs(), "Tunnel connect timed out");
            Err(StatusCode::GATEWAY_TIMEOUT)
        }
    }
}

/// Handle an admitted CONNECT request.
///
/// Returns the reply for the client; on success the splice runs in a
/// spawned task once hyper has flushed the reply and released the socket.
pub async fn establish<B>(
    target: TunnelTarget,
    request: Request<B>,
    id: ConnectionId,
    tunnels: &ConnectionTracker,
    timeout: Duration,
) -> ProxyResponse
where
    B: Send + 'static,
{
    let upstream = match connect_upstream(&target, timeout).await {
        Ok(upstream) => upstream,
        Err(status) => return response::status(status),
    };

    let guard = tunnels.track_with_id(id);
    let on_upgrade = hyper::upgrade::on(request);

    tokio::spawn(
        async move {
            match on_upgrade.await {
                Ok(upgraded) => splice(TokioIo::new(upgraded), upstream, &target, guard).await,
                Err(e) => tracing::debug!(upstream = %target, error = %e, "Client upgrade failed"),
            }
        }
        .in_current_span(),
    );

    response::connection_established()
}

/// Buffer size for each splice direction.
const SPLICE_BUFFER: usize = 16 * 1024;

/// Copy bytes both ways until either side closes.
///
/// The session ends as soon as one direction finishes: EOF from one peer is
/// passed on as a write shutdown to the other, then both sockets are dropped.
/// A tunnel never stays half-open waiting on the peer that is still
/// connected.
pub async fn splice<C, U>(client: C, upstream: U, target: &TunnelTarget, _guard: ConnectionGuard)
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    metrics::tunnel_opened();
    tracing::info!(upstream = %target, "Tunnel established");

    let (client_read, client_write) = io::split(client);
    let (upstream_read, upstream_write) = io::split(upstream);
    let mut sent = 0u64;
    let mut received = 0u64;

    let (closed_by, result) = tokio::select! {
        r = pump(client_read, upstream_write, &mut sent) => ("client", r),
        r = pump(upstream_read, client_write, &mut received) => ("upstream", r),
    };

    match result {
        Ok(()) => tracing::info!(upstream = %target, closed_by, sent, received, "Tunnel closed"),
        Err(e) => tracing::debug!(
            upstream = %target,
            closed_by,
            sent,
            received,
            error = %e,
            "Tunnel ended with I/O error"
        ),
    }
    metrics::tunnel_closed(sent, received);
}

/// Copy `from` into `to` until EOF, then shut down `to`. `moved` is updated
/// after every write so the count survives cancellation.
async fn pump<R, W>(mut from: R, mut to: W, moved: &mut u64) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; SPLICE_BUFFER];
    loop {
        let n = from.read(&mut buf).await?;
        if n == 0 {
            to.shutdown().await?;
            return Ok(());
        }
        to.write_all(&buf[..n]).await?;
        *moved += n as u64;
    }
}
