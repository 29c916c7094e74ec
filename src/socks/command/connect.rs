//! CONNECT

use super::reply::send_success;
use crate::error::Socks5Error;
use crate::socks::handler::SocksContext;
use crate::socks::types::TargetAddr;
use crate::transport::connect_tcp;
use std::io;
use tokio::io::AsyncWrite;
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Resolve `target` and connect to the first candidate that accepts.
///
/// Candidates are tried in resolver order, each bounded by the dial timeout.
/// The last failure decides the reply code.
pub async fn dial(ctx: &SocksContext, target: &TargetAddr) -> Result<TcpStream, Socks5Error> {
    let candidates = ctx.resolver.resolve(target).await?;
    let mut last_error = None;

    for addr in candidates {
        match connect_tcp(
            addr,
            ctx.config.outbound_bind_addr,
            ctx.config.timeouts.dial(),
        )
        .await
        {
            Ok(stream) => {
                ctx.socket_opts.hint(&stream);
                debug!("Connected to {} ({})", target, addr);
                return Ok(stream);
            }
            Err(e) => {
                debug!("Connect to {} ({}) failed: {}", target, addr, e);
                last_error = Some(e);
            }
        }
    }

    Err(Socks5Error::Dial {
        target: target.to_string(),
        source: last_error
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no candidates")),
    })
}

/// Handle CONNECT: dial, then reply with the upstream socket's local address
pub async fn handle_connect<S>(
    stream: &mut S,
    ctx: &SocksContext,
    target: &TargetAddr,
) -> Result<TcpStream, Socks5Error>
where
    S: AsyncWrite + Unpin,
{
    let upstream = dial(ctx, target).await?;
    let bound = upstream.local_addr().map_err(|source| Socks5Error::Dial {
        target: target.to_string(),
        source,
    })?;

    send_success(stream, bound).await?;
    info!("Connected to {} from {}", target, bound);

    Ok(upstream)
}
