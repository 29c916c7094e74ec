//! SOCKS5 wire codec
//!
//! Pure conversions between protocol messages and bytes. Nothing here touches
//! a socket: the frame readers in [`super::frame`] collect exactly one message
//! and hand the bytes to the `decode_*` functions.
//!
//! All multi-byte integers are big-endian.

use super::auth::{AuthMethod, Credentials};
use super::consts::*;
use super::types::{SocksCommand, TargetAddr};
use crate::error::{Socks5Error, Socks5ReplyCode};
use bytes::{Buf, BufMut, BytesMut};
use std::net::{Ipv4Addr, Ipv6Addr};

/// Method-selection message sent by the client
///
/// ```text
/// +----+----------+----------+
/// |VER | NMETHODS | METHODS  |
/// +----+----------+----------+
/// | 1  |    1     | 1 to 255 |
/// +----+----------+----------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Protocol version (always 5 once decoded)
    pub version: u8,
    /// Offered method bytes, in client order
    pub methods: Vec<u8>,
}

/// Client request
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   | Variable |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Protocol version (always 5 once decoded)
    pub version: u8,
    /// Requested command
    pub command: SocksCommand,
    /// Destination address and port
    pub target: TargetAddr,
}

fn need(buf: &[u8], len: usize, what: &str) -> Result<(), Socks5Error> {
    if buf.remaining() < len {
        return Err(Socks5Error::Protocol(format!(
            "truncated {}: need {} bytes, have {}",
            what,
            len,
            buf.remaining()
        )));
    }
    Ok(())
}

/// Decode a method-selection message
pub fn decode_handshake(bytes: &[u8]) -> Result<Handshake, Socks5Error> {
    let mut buf = bytes;
    need(buf, 2, "handshake")?;

    let version = buf.get_u8();
    if version != SOCKS5_VERSION {
        return Err(Socks5Error::UnsupportedVersion(version));
    }

    let nmethods = buf.get_u8() as usize;
    if buf.remaining() != nmethods {
        return Err(Socks5Error::Protocol(format!(
            "handshake declares {} methods but carries {}",
            nmethods,
            buf.remaining()
        )));
    }

    Ok(Handshake {
        version,
        methods: buf.to_vec(),
    })
}

/// Encode the method-selection reply; `None` rejects every offered method
pub fn encode_method_selection(method: Option<AuthMethod>) -> [u8; 2] {
    [
        SOCKS5_VERSION,
        method
            .map(AuthMethod::to_byte)
            .unwrap_or(SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE),
    ]
}

/// Decode the sub-negotiation message for `method`
///
/// ```text
/// +----+------+----------+------+----------+
/// |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
/// +----+------+----------+------+----------+
/// | 1  |  1   | 1 to 255 |  1   | 1 to 255 |
/// +----+------+----------+------+----------+
/// ```
pub fn decode_auth(bytes: &[u8], method: AuthMethod) -> Result<Credentials, Socks5Error> {
    match method {
        AuthMethod::None => Ok(Credentials::None),
        AuthMethod::Password => {
            let mut buf = bytes;
            need(buf, 2, "auth request")?;

            let version = buf.get_u8();
            if version != SOCKS5_AUTH_VERSION {
                return Err(Socks5Error::UnsupportedVersion(version));
            }

            let username = read_string(&mut buf, "username")?;
            let password = read_string(&mut buf, "password")?;

            if buf.has_remaining() {
                return Err(Socks5Error::Protocol(format!(
                    "{} trailing bytes after password",
                    buf.remaining()
                )));
            }

            Ok(Credentials::UsernamePassword { username, password })
        }
    }
}

fn read_string(buf: &mut &[u8], what: &str) -> Result<String, Socks5Error> {
    need(buf, 1, what)?;
    let len = buf.get_u8() as usize;
    need(buf, len, what)?;
    let value = String::from_utf8(buf[..len].to_vec())
        .map_err(|_| Socks5Error::Protocol(format!("invalid UTF-8 in {}", what)))?;
    buf.advance(len);
    Ok(value)
}

/// Encode the sub-negotiation status
pub fn encode_auth_result(ok: bool) -> [u8; 2] {
    let status = if ok {
        SOCKS5_AUTH_SUCCESS
    } else {
        SOCKS5_AUTH_FAILURE
    };
    [SOCKS5_AUTH_VERSION, status]
}

/// Decode a request.
///
/// The address is decoded before the command is checked so that an unknown
/// command is reported as [`Socks5Error::UnsupportedCommand`] (answered with
/// a reply) rather than as malformed input.
pub fn decode_request(bytes: &[u8]) -> Result<Request, Socks5Error> {
    let mut buf = bytes;
    need(buf, 4, "request")?;

    let version = buf.get_u8();
    if version != SOCKS5_VERSION {
        return Err(Socks5Error::UnsupportedVersion(version));
    }

    let cmd_byte = buf.get_u8();
    let _reserved = buf.get_u8();
    let target = decode_address(&mut buf)?;

    if buf.has_remaining() {
        return Err(Socks5Error::Protocol(format!(
            "{} trailing bytes after request address",
            buf.remaining()
        )));
    }

    let command =
        SocksCommand::from_byte(cmd_byte).ok_or(Socks5Error::UnsupportedCommand(cmd_byte))?;

    Ok(Request {
        version,
        command,
        target,
    })
}

/// Decode `ATYP ADDR PORT`, advancing `buf` past it.
///
/// A zero-length domain is accepted here; it fails later in resolution.
pub fn decode_address(buf: &mut &[u8]) -> Result<TargetAddr, Socks5Error> {
    need(buf, 1, "address type")?;
    let atyp = buf.get_u8();

    match atyp {
        SOCKS5_ADDR_TYPE_IPV4 => {
            need(buf, 4 + 2, "IPv4 address")?;
            let ip = Ipv4Addr::from(buf.get_u32());
            let port = buf.get_u16();
            Ok(TargetAddr::ipv4(ip, port))
        }

        SOCKS5_ADDR_TYPE_DOMAIN => {
            need(buf, 1, "domain length")?;
            let len = buf.get_u8() as usize;
            need(buf, len + 2, "domain name")?;
            let domain = String::from_utf8(buf[..len].to_vec())
                .map_err(|_| Socks5Error::Protocol("invalid UTF-8 in domain".to_string()))?;
            buf.advance(len);
            let port = buf.get_u16();
            Ok(TargetAddr::Domain(domain, port))
        }

        SOCKS5_ADDR_TYPE_IPV6 => {
            need(buf, 16 + 2, "IPv6 address")?;
            let ip = Ipv6Addr::from(buf.get_u128());
            let port = buf.get_u16();
            Ok(TargetAddr::ipv6(ip, port))
        }

        other => Err(Socks5Error::AddressTypeNotSupported(other)),
    }
}

/// Encode a reply
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   | Variable |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
pub fn encode_reply(status: Socks5ReplyCode, bound: &TargetAddr) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(3 + bound.encoded_len());
    buf.put_u8(SOCKS5_VERSION);
    buf.put_u8(status.into());
    buf.put_u8(SOCKS5_RESERVED);
    bound.write_to(&mut buf);
    buf.to_vec()
}
