//! Error types for Socksd
//!
//! Every failure a session can hit is a [`Socks5Error`]. The variant decides
//! whether the client still gets a reply before the connection is closed:
//! malformed input and timeouts before the request never earn one, command
//! dispatch failures are answered with the matching [`Socks5ReplyCode`].

use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Session stage bounded by its own timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Reading the method-selection message
    Handshake,
    /// Username/password sub-negotiation
    Auth,
    /// Reading the request
    Request,
    /// Waiting for the BIND peer
    BindAccept,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Handshake => write!(f, "handshake"),
            Stage::Auth => write!(f, "authentication"),
            Stage::Request => write!(f, "request"),
            Stage::BindAccept => write!(f, "bind accept"),
        }
    }
}

/// SOCKS5 session errors
#[derive(Error, Debug)]
pub enum Socks5Error {
    /// Version byte was not 5 (or 1 in the auth sub-negotiation)
    #[error("Unsupported SOCKS version: {0}")]
    UnsupportedVersion(u8),

    /// Bytes that do not form a valid message
    #[error("Malformed message: {0}")]
    Protocol(String),

    /// No acceptable authentication method
    #[error("No acceptable authentication method")]
    NoAcceptableMethod,

    /// Credentials rejected
    #[error("Authentication denied for user: {0}")]
    AuthDenied(String),

    /// Unknown or disabled command
    #[error("Command not supported: {0}")]
    UnsupportedCommand(u8),

    /// Unknown address type
    #[error("Address type not supported: {0}")]
    AddressTypeNotSupported(u8),

    /// Target could not be resolved to any usable address
    #[error("Failed to resolve {target}: {reason}")]
    Resolution {
        /// Requested target
        target: String,
        /// Why resolution failed
        reason: String,
    },

    /// Every candidate address failed to connect
    #[error("Failed to connect to {target}: {source}")]
    Dial {
        /// Requested target
        target: String,
        /// Error from the last attempt
        #[source]
        source: io::Error,
    },

    /// BIND listener or UDP endpoint could not be set up
    #[error("Failed to listen: {0}")]
    Listen(#[source] io::Error),

    /// No inbound BIND connection arrived in time
    #[error("No inbound connection within {0:?}")]
    AcceptTimeout(Duration),

    /// Client did not finish a stage in time
    #[error("Timed out during {0}")]
    Timeout(Stage),

    /// Socket failure while relaying
    #[error("Relay error: {0}")]
    Relay(#[source] io::Error),

    /// IO error on the client connection
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Socks5Error {
    /// Reply code owed to the client for this failure.
    ///
    /// `None` means the connection is closed without a reply.
    pub fn reply_code(&self) -> Option<Socks5ReplyCode> {
        match self {
            Socks5Error::UnsupportedCommand(_) => Some(Socks5ReplyCode::CommandNotSupported),
            Socks5Error::AddressTypeNotSupported(_) => {
                Some(Socks5ReplyCode::AddressTypeNotSupported)
            }
            Socks5Error::Resolution { .. } => Some(Socks5ReplyCode::HostUnreachable),
            Socks5Error::Dial { source, .. } => Some(Socks5ReplyCode::from(source)),
            Socks5Error::Listen(_) => Some(Socks5ReplyCode::GeneralFailure),
            _ => None,
        }
    }

    /// True when the peer simply went away
    pub fn is_disconnect(&self) -> bool {
        match self {
            Socks5Error::Io(e) | Socks5Error::Relay(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Reply codes for SOCKS5 protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Socks5ReplyCode {
    /// Command succeeded
    Succeeded = 0x00,
    /// General SOCKS server failure
    GeneralFailure = 0x01,
    /// Connection not allowed by ruleset
    ConnectionNotAllowed = 0x02,
    /// Network unreachable
    NetworkUnreachable = 0x03,
    /// Host unreachable
    HostUnreachable = 0x04,
    /// Connection refused
    ConnectionRefused = 0x05,
    /// TTL expired
    TtlExpired = 0x06,
    /// Command not supported
    CommandNotSupported = 0x07,
    /// Address type not supported
    AddressTypeNotSupported = 0x08,
}

impl From<Socks5ReplyCode> for u8 {
    fn from(code: Socks5ReplyCode) -> Self {
        code as u8
    }
}

impl TryFrom<u8> for Socks5ReplyCode {
    type Error = Socks5Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Socks5ReplyCode::Succeeded),
            0x01 => Ok(Socks5ReplyCode::GeneralFailure),
            0x02 => Ok(Socks5ReplyCode::ConnectionNotAllowed),
            0x03 => Ok(Socks5ReplyCode::NetworkUnreachable),
            0x04 => Ok(Socks5ReplyCode::HostUnreachable),
            0x05 => Ok(Socks5ReplyCode::ConnectionRefused),
            0x06 => Ok(Socks5ReplyCode::TtlExpired),
            0x07 => Ok(Socks5ReplyCode::CommandNotSupported),
            0x08 => Ok(Socks5ReplyCode::AddressTypeNotSupported),
            other => Err(Socks5Error::Protocol(format!("unknown reply code {}", other))),
        }
    }
}

impl From<&io::Error> for Socks5ReplyCode {
    fn from(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => Socks5ReplyCode::ConnectionRefused,
            io::ErrorKind::TimedOut
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::AddrNotAvailable => Socks5ReplyCode::HostUnreachable,
            io::ErrorKind::NetworkUnreachable | io::ErrorKind::NetworkDown => {
                Socks5ReplyCode::NetworkUnreachable
            }
            io::ErrorKind::PermissionDenied => Socks5ReplyCode::ConnectionNotAllowed,
            _ => Socks5ReplyCode::GeneralFailure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socks5_reply_code_round_trip() {
        for value in 0x00..=0x08u8 {
            let code = Socks5ReplyCode::try_from(value).unwrap();
            assert_eq!(u8::from(code), value);
        }
        assert!(Socks5ReplyCode::try_from(0x09).is_err());
        assert!(Socks5ReplyCode::try_from(0xFF).is_err());
    }

    #[test]
    fn test_socks5_reply_code_from_io_error() {
        let cases = [
            (io::ErrorKind::ConnectionRefused, Socks5ReplyCode::ConnectionRefused),
            (io::ErrorKind::TimedOut, Socks5ReplyCode::HostUnreachable),
            (io::ErrorKind::HostUnreachable, Socks5ReplyCode::HostUnreachable),
            (io::ErrorKind::AddrNotAvailable, Socks5ReplyCode::HostUnreachable),
            (io::ErrorKind::NetworkUnreachable, Socks5ReplyCode::NetworkUnreachable),
            (io::ErrorKind::PermissionDenied, Socks5ReplyCode::ConnectionNotAllowed),
            (io::ErrorKind::Other, Socks5ReplyCode::GeneralFailure),
        ];

        for (kind, expected) in cases {
            let err = io::Error::new(kind, "test");
            assert_eq!(Socks5ReplyCode::from(&err), expected, "{:?}", kind);
        }
    }

    #[test]
    fn test_reply_code_for_errors() {
        assert_eq!(Socks5Error::UnsupportedVersion(4).reply_code(), None);
        assert_eq!(Socks5Error::NoAcceptableMethod.reply_code(), None);
        assert_eq!(Socks5Error::AuthDenied("bob".into()).reply_code(), None);
        assert_eq!(
            Socks5Error::UnsupportedCommand(9).reply_code(),
            Some(Socks5ReplyCode::CommandNotSupported)
        );
        assert_eq!(
            Socks5Error::Resolution {
                target: "nowhere:80".into(),
                reason: "no addresses".into(),
            }
            .reply_code(),
            Some(Socks5ReplyCode::HostUnreachable)
        );
        assert_eq!(
            Socks5Error::Dial {
                target: "127.0.0.1:80".into(),
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
            }
            .reply_code(),
            Some(Socks5ReplyCode::ConnectionRefused)
        );
        assert_eq!(
            Socks5Error::AcceptTimeout(Duration::from_secs(1)).reply_code(),
            None
        );
        assert_eq!(Socks5Error::Timeout(Stage::Request).reply_code(), None);
    }

    #[test]
    fn test_is_disconnect() {
        let eof = Socks5Error::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"));
        assert!(eof.is_disconnect());
        assert!(!Socks5Error::NoAcceptableMethod.is_disconnect());
    }

    #[test]
    fn test_socks5_error_display() {
        assert_eq!(
            Socks5Error::UnsupportedVersion(4).to_string(),
            "Unsupported SOCKS version: 4"
        );
        assert_eq!(
            Socks5Error::Timeout(Stage::Handshake).to_string(),
            "Timed out during handshake"
        );
        assert_eq!(
            Socks5Error::AddressTypeNotSupported(0x99).to_string(),
            "Address type not supported: 153"
        );
    }
}
