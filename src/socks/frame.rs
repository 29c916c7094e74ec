//! Message framing on the client connection
//!
//! Reads exactly one handshake, auth or request message off the stream,
//! using the length fields to know how much to read. Each buffer is capped at
//! the largest legal message so nothing here allocates on a length the peer
//! controls.

use super::consts::*;
use crate::error::Socks5Error;
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

async fn read_into<S>(stream: &mut S, frame: &mut BytesMut, len: usize) -> Result<(), Socks5Error>
where
    S: AsyncRead + Unpin,
{
    let start = frame.len();
    frame.resize(start + len, 0);
    stream.read_exact(&mut frame[start..]).await?;
    Ok(())
}

/// Read a method-selection message
pub async fn read_handshake<S>(stream: &mut S) -> Result<BytesMut, Socks5Error>
where
    S: AsyncRead + Unpin,
{
    let mut frame = BytesMut::with_capacity(MAX_HANDSHAKE_LEN);
    read_into(stream, &mut frame, 2).await?;

    if frame[0] != SOCKS5_VERSION {
        return Err(Socks5Error::UnsupportedVersion(frame[0]));
    }

    let nmethods = frame[1] as usize;
    read_into(stream, &mut frame, nmethods).await?;
    Ok(frame)
}

/// Read a username/password sub-negotiation message
pub async fn read_password_auth<S>(stream: &mut S) -> Result<BytesMut, Socks5Error>
where
    S: AsyncRead + Unpin,
{
    let mut frame = BytesMut::with_capacity(MAX_AUTH_LEN);
    read_into(stream, &mut frame, 2).await?;

    if frame[0] != SOCKS5_AUTH_VERSION {
        return Err(Socks5Error::UnsupportedVersion(frame[0]));
    }

    let ulen = frame[1] as usize;
    read_into(stream, &mut frame, ulen + 1).await?;
    let plen = frame[frame.len() - 1] as usize;
    read_into(stream, &mut frame, plen).await?;
    Ok(frame)
}

/// Read a request message.
///
/// An unknown address type stops the read right after the header since the
/// address length cannot be known.
pub async fn read_request<S>(stream: &mut S) -> Result<BytesMut, Socks5Error>
where
    S: AsyncRead + Unpin,
{
    let mut frame = BytesMut::with_capacity(MAX_REQUEST_LEN);
    read_into(stream, &mut frame, 4).await?;

    if frame[0] != SOCKS5_VERSION {
        return Err(Socks5Error::UnsupportedVersion(frame[0]));
    }

    match frame[3] {
        SOCKS5_ADDR_TYPE_IPV4 => read_into(stream, &mut frame, 4 + 2).await?,
        SOCKS5_ADDR_TYPE_IPV6 => read_into(stream, &mut frame, 16 + 2).await?,
        SOCKS5_ADDR_TYPE_DOMAIN => {
            let len = stream.read_u8().await?;
            frame.put_u8(len);
            read_into(stream, &mut frame, len as usize + 2).await?;
        }
        other => return Err(Socks5Error::AddressTypeNotSupported(other)),
    }

    Ok(frame)
}
