//! UDP request header
//!
//! ```text
//! +----+------+------+----------+----------+----------+
//! |RSV | FRAG | ATYP | DST.ADDR | DST.PORT |   DATA   |
//! +----+------+------+----------+----------+----------+
//! | 2  |  1   |  1   | Variable |    2     | Variable |
//! +----+------+------+----------+----------+----------+
//! ```

use crate::error::Socks5Error;
use crate::socks::codec::decode_address;
use crate::socks::types::TargetAddr;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// A datagram with its SOCKS5 UDP header decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpPacket {
    /// Fragment number, 0 for a standalone datagram
    pub frag: u8,
    /// Destination on requests, source on replies
    pub addr: TargetAddr,
    /// Payload
    pub data: Bytes,
}

impl UdpPacket {
    /// Whether this is part of a fragmented sequence
    pub fn is_fragmented(&self) -> bool {
        self.frag != 0
    }
}

/// Decode the header and split off the payload
pub fn parse_udp_packet(data: &[u8]) -> Result<UdpPacket, Socks5Error> {
    if data.len() < 4 {
        return Err(Socks5Error::Protocol(format!(
            "UDP datagram too short: {} bytes",
            data.len()
        )));
    }

    let mut buf = data;
    let rsv = buf.get_u16();
    if rsv != 0 {
        return Err(Socks5Error::Protocol(format!("invalid RSV field: {}", rsv)));
    }

    let frag = buf.get_u8();
    let addr = decode_address(&mut buf)?;

    Ok(UdpPacket {
        frag,
        addr,
        data: Bytes::copy_from_slice(buf),
    })
}

/// Wrap `payload` in an unfragmented header carrying `addr`
pub fn encode_udp_packet(addr: &TargetAddr, payload: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(3 + addr.encoded_len() + payload.len());
    buf.put_u16(0);
    buf.put_u8(0);
    addr.write_to(&mut buf);
    buf.put_slice(payload);
    buf
}
