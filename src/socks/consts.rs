//! SOCKS5 protocol constants
//!
//! Wire values from RFC 1928 (SOCKS5) and RFC 1929 (username/password
//! sub-negotiation), plus the framing bounds used by the codec.

/// SOCKS5 protocol version
pub const SOCKS5_VERSION: u8 = 0x05;

/// Username/password sub-negotiation version
pub const SOCKS5_AUTH_VERSION: u8 = 0x01;

// Authentication methods
/// No authentication required
pub const SOCKS5_AUTH_METHOD_NONE: u8 = 0x00;
/// GSSAPI authentication (never selected)
pub const SOCKS5_AUTH_METHOD_GSSAPI: u8 = 0x01;
/// Username/password authentication
pub const SOCKS5_AUTH_METHOD_PASSWORD: u8 = 0x02;
/// No acceptable methods
pub const SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE: u8 = 0xFF;

// Sub-negotiation status
/// Username/password accepted
pub const SOCKS5_AUTH_SUCCESS: u8 = 0x00;
/// Username/password rejected
pub const SOCKS5_AUTH_FAILURE: u8 = 0x01;

// Commands
/// TCP CONNECT command
pub const SOCKS5_CMD_TCP_CONNECT: u8 = 0x01;
/// TCP BIND command
pub const SOCKS5_CMD_TCP_BIND: u8 = 0x02;
/// UDP ASSOCIATE command
pub const SOCKS5_CMD_UDP_ASSOCIATE: u8 = 0x03;

// Address types
/// IPv4 address
pub const SOCKS5_ADDR_TYPE_IPV4: u8 = 0x01;
/// Domain name
pub const SOCKS5_ADDR_TYPE_DOMAIN: u8 = 0x03;
/// IPv6 address
pub const SOCKS5_ADDR_TYPE_IPV6: u8 = 0x04;

// Reply codes (the full set is `Socks5ReplyCode`)
/// Succeeded
pub const SOCKS5_REPLY_SUCCEEDED: u8 = 0x00;
/// Host unreachable
pub const SOCKS5_REPLY_HOST_UNREACHABLE: u8 = 0x04;
/// Connection refused
pub const SOCKS5_REPLY_CONNECTION_REFUSED: u8 = 0x05;
/// Command not supported
pub const SOCKS5_REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
/// Address type not supported
pub const SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

/// Reserved byte value (always 0x00)
pub const SOCKS5_RESERVED: u8 = 0x00;

// Framing bounds
/// Maximum domain name length
pub const MAX_DOMAIN_LEN: usize = 255;
/// Largest method-selection message: VER, NMETHODS, 255 methods
pub const MAX_HANDSHAKE_LEN: usize = 2 + 255;
/// Largest username/password message: VER, ULEN, UNAME, PLEN, PASSWD
pub const MAX_AUTH_LEN: usize = 3 + 255 + 255;
/// Largest request: VER, CMD, RSV, ATYP, LEN, 255-byte domain, port
pub const MAX_REQUEST_LEN: usize = 4 + 1 + MAX_DOMAIN_LEN + 2;
/// Largest UDP datagram the relay will receive
pub const MAX_UDP_PACKET: usize = 65535;
/// Default buffer size for data transfer
pub const DEFAULT_BUFFER_SIZE: usize = 8192;
