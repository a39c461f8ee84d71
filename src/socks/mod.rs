//! SOCKS5 protocol engine
//!
//! The wire codec, both handshake roles, the UDP encapsulation, and
//! the dual-role proxy built from them.

mod addr;
mod client;
pub mod consts;
mod handshake;
mod packet;
mod proxy;

pub use addr::{atyp, is_uot, Address};
pub use client::{associate, connect, Credentials};
pub use handshake::{handshake, HandshakeOutcome};
pub use packet::UdpPacketConn;
pub use proxy::Socks5;
