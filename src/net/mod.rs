//! Network seams consumed by the SOCKS5 engine
//!
//! Dialers open outbound sockets (directly or through another proxy),
//! and the relay helpers move bytes once a session is established.

mod dialer;
mod relay;

pub use dialer::{Dialer, DirectDialer, Forwarder, PacketConn};
pub use relay::{relay, timed_copy};

pub(crate) use dialer::set_keepalive;
