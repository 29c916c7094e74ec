//! Command dispatch
//!
//! CONNECT and BIND produce an upstream stream for the relay; UDP ASSOCIATE
//! lives in [`crate::socks::udp`].

mod bind;
mod connect;
mod reply;

pub use bind::handle_bind;
pub use connect::{dial, handle_connect};
pub use reply::{send_failure, send_reply, send_success};
