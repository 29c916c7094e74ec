//! BIND
//!
//! Two replies: the first carries the listening address, the second the
//! address of the peer that connected. An accept timeout closes the
//! connection without a second reply, and so does the client hanging up
//! while we wait. Bytes the client sends early are held for the peer.

use super::reply::send_success;
use crate::error::Socks5Error;
use crate::socks::handler::SocksContext;
use crate::socks::types::TargetAddr;
use bytes::BytesMut;
use std::io;
use std::net::{IpAddr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Client bytes held while waiting for the peer
const MAX_EARLY_BYTES: usize = 64 * 1024;

/// Handle BIND on the interface the client reached us through.
///
/// With `bind_validate_peer` set, only a connection from an address the
/// request's target resolves to is accepted; others are dropped and the wait
/// continues.
pub async fn handle_bind<S>(
    stream: &mut S,
    ctx: &SocksContext,
    local_ip: IpAddr,
    target: &TargetAddr,
) -> Result<TcpStream, Socks5Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let allowed = if ctx.config.bind_validate_peer {
        expected_peers(ctx, target).await?
    } else {
        Vec::new()
    };

    let listener = TcpListener::bind(SocketAddr::new(local_ip, 0))
        .await
        .map_err(Socks5Error::Listen)?;
    let bound = listener.local_addr().map_err(Socks5Error::Listen)?;

    send_success(stream, bound).await?;
    info!("BIND listening on {} for {}", bound, target);

    let limit = ctx.config.timeouts.bind_accept();
    let mut early = BytesMut::new();
    let (mut inbound, peer) = tokio::time::timeout(
        limit,
        accept_watching(stream, &listener, &allowed, &mut early),
    )
    .await
    .map_err(|_| Socks5Error::AcceptTimeout(limit))??;
    drop(listener);

    ctx.socket_opts.hint(&inbound);
    send_success(stream, peer).await?;
    info!("BIND accepted {} on {}", peer, bound);

    if !early.is_empty() {
        debug!("Passing {} early bytes to {}", early.len(), peer);
        inbound.write_all(&early).await.map_err(Socks5Error::Relay)?;
    }

    Ok(inbound)
}

async fn expected_peers(ctx: &SocksContext, target: &TargetAddr) -> Result<Vec<IpAddr>, Socks5Error> {
    if let TargetAddr::Ip(addr) = target {
        if addr.ip().is_unspecified() {
            return Ok(Vec::new());
        }
    }

    let resolved = ctx.resolver.resolve(target).await?;
    Ok(resolved.into_iter().map(|addr| addr.ip()).collect())
}

/// Accept the peer while reading from the client, so a client that hangs up
/// ends the wait instead of leaving the listener open.
async fn accept_watching<S>(
    stream: &mut S,
    listener: &TcpListener,
    allowed: &[IpAddr],
    early: &mut BytesMut,
) -> Result<(TcpStream, SocketAddr), Socks5Error>
where
    S: AsyncRead + Unpin,
{
    let accept = accept_peer(listener, allowed);
    tokio::pin!(accept);
    let mut buf = [0u8; 4096];

    loop {
        tokio::select! {
            accepted = &mut accept => return accepted,
            read = stream.read(&mut buf) => match read {
                Ok(0) => {
                    return Err(Socks5Error::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "client closed during BIND accept",
                    )))
                }
                Ok(n) if early.len() + n > MAX_EARLY_BYTES => {
                    return Err(Socks5Error::Protocol(format!(
                        "more than {} bytes sent before BIND peer connected",
                        MAX_EARLY_BYTES
                    )))
                }
                Ok(n) => early.extend_from_slice(&buf[..n]),
                Err(e) => return Err(Socks5Error::Io(e)),
            },
        }
    }
}

async fn accept_peer(
    listener: &TcpListener,
    allowed: &[IpAddr],
) -> Result<(TcpStream, SocketAddr), Socks5Error> {
    loop {
        let (stream, peer) = listener.accept().await.map_err(Socks5Error::Listen)?;
        if allowed.is_empty() || allowed.contains(&peer.ip()) {
            return Ok((stream, peer));
        }
        warn!("Rejected BIND connection from unexpected peer {}", peer);
    }
}
