//! UDP ASSOCIATE
//!
//! One UDP socket per association carries both directions: datagrams from
//! the client are requests, everything else is a reply to relay back.

mod associate;
mod packet;

pub use associate::{bind_endpoint, UdpAssociation};
pub use packet::{encode_udp_packet, parse_udp_packet, UdpPacket};
