//! Reply writers

use crate::error::Socks5ReplyCode;
use crate::socks::codec::encode_reply;
use crate::socks::types::TargetAddr;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Write a reply and flush it
pub async fn send_reply<S>(stream: &mut S, code: Socks5ReplyCode, bound: &TargetAddr) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(&encode_reply(code, bound)).await?;
    stream.flush().await
}

/// Reply "succeeded" with the bound address
pub async fn send_success<S>(stream: &mut S, bound: SocketAddr) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    send_reply(stream, Socks5ReplyCode::Succeeded, &TargetAddr::Ip(bound)).await
}

/// Reply with a failure status and an all-zero IPv4 bound address
pub async fn send_failure<S>(stream: &mut S, code: Socks5ReplyCode) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    send_reply(stream, code, &TargetAddr::default()).await
}
