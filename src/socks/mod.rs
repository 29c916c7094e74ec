//! SOCKS5 protocol core
//!
//! The codec and frame readers turn bytes into messages, the authenticator
//! and resolver answer policy questions, and [`Session`] ties them together
//! for one connection before handing off to the relay or the UDP manager.

pub mod auth;
pub mod codec;
pub mod command;
pub mod consts;
pub mod frame;
pub mod handler;
pub mod relay;
pub mod resolver;
pub mod types;
pub mod udp;

pub use auth::{AuthMethod, AuthOutcome, Authenticator, Credentials};
pub use handler::{Session, SessionState, SocksContext};
pub use relay::{pump, RelayOutcome, RelayPair, TerminationReason};
pub use resolver::{AddressResolver, Resolver, SystemResolver};
pub use types::{SocksCommand, TargetAddr};
pub use udp::UdpAssociation;
